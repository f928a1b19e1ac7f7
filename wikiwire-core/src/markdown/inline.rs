//! Pluggable inline syntax.
//!
//! Extensions are consulted at every trigger character of merged text runs,
//! lowest priority value first. The first extension that claims the input
//! wins; unclaimed characters stay literal.

use super::WikiLink;

/// A recognized inline construct
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineNode {
    WikiLink(WikiLink),
    Hashtag(String),
    Shortcode(String),
    /// Pre-rendered output of a custom extension, with its plain-text form
    Raw { html: String, text: String },
}

/// Surroundings of the current scan position
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineContext {
    /// Character immediately before the candidate, if any
    pub prev: Option<char>,
    /// Inside an existing markdown link
    pub in_link: bool,
}

/// Custom inline syntax handler
pub trait InlineExtension: Send + Sync {
    fn name(&self) -> &'static str;

    /// First character of the syntax
    fn trigger(&self) -> char;

    /// Lower runs first
    fn priority(&self) -> u8 {
        100
    }

    fn fires_inside_links(&self) -> bool {
        false
    }

    /// Parse at the start of `input`, returning bytes consumed and the node
    fn try_parse(&self, input: &str, ctx: &InlineContext) -> Option<(usize, InlineNode)>;
}

/// Piece of a scanned text run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    /// `offset` is the byte position of the node within the scanned text
    Node { node: InlineNode, offset: usize },
}

/// Ordered set of inline extensions
#[derive(Default)]
pub struct InlineScanner {
    extensions: Vec<Box<dyn InlineExtension>>,
}

impl InlineScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, extension: Box<dyn InlineExtension>) {
        self.extensions.push(extension);
        // stable sort keeps registration order among equal priorities
        self.extensions.sort_by_key(|ext| ext.priority());
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.extensions.iter().map(|ext| ext.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Split `text` into literal runs and recognized nodes
    pub fn scan<'a>(&self, text: &'a str, in_link: bool) -> Vec<Segment<'a>> {
        let mut segments = Vec::new();
        if self.extensions.is_empty() {
            if !text.is_empty() {
                segments.push(Segment::Text(text));
            }
            return segments;
        }

        let mut literal_start = 0;
        let mut pos = 0;
        let mut prev: Option<char> = None;

        while let Some(c) = text[pos..].chars().next() {
            let ctx = InlineContext { prev, in_link };
            if let Some((consumed, node)) = self.try_at(&text[pos..], c, &ctx) {
                if literal_start < pos {
                    segments.push(Segment::Text(&text[literal_start..pos]));
                }
                segments.push(Segment::Node { node, offset: pos });
                pos += consumed;
                literal_start = pos;
                prev = text[..pos].chars().next_back();
                continue;
            }

            prev = Some(c);
            pos += c.len_utf8();
        }

        if literal_start < text.len() {
            segments.push(Segment::Text(&text[literal_start..]));
        }
        segments
    }

    fn try_at(&self, input: &str, c: char, ctx: &InlineContext) -> Option<(usize, InlineNode)> {
        self.extensions
            .iter()
            .filter(|ext| ext.trigger() == c)
            .filter(|ext| !ctx.in_link || ext.fires_inside_links())
            .find_map(|ext| {
                ext.try_parse(input, ctx)
                    .filter(|(consumed, _)| *consumed > 0 && *consumed <= input.len())
            })
    }
}
