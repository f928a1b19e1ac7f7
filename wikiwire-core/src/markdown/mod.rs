//! Markdown parsing with frontmatter, title stripping and inline extensions.

pub mod hashtags;
pub mod inline;
pub mod shortcodes;
pub mod wikilinks;

use crate::frontmatter::{self, Frontmatter, FrontmatterError};
use crate::slug::HeadingIds;
use inline::{InlineNode, InlineScanner, Segment};
use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd};
use serde::Serialize;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

pub use hashtags::{render_hashtag, HashtagExtension};
pub use inline::InlineExtension;
pub use shortcodes::ShortcodeExtension;
pub use wikilinks::WikiLinkExtension;

/// Number of leading body lines searched for a title heading
const TITLE_SEARCH_LINES: usize = 5;

const WORDS_PER_MINUTE: usize = 200;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Frontmatter error: {0}")]
    Frontmatter(#[from] FrontmatterError),
}

pub type WikiLinkRenderer = Arc<dyn Fn(&WikiLink) -> String + Send + Sync>;
pub type ShortcodeRenderer = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Parser switches and renderer hooks
#[derive(Clone)]
pub struct ParserConfig {
    pub enable_wiki_links: bool,
    pub enable_hashtags: bool,
    pub enable_frontmatter: bool,
    pub lazy_load_images: bool,
    pub wiki_link_renderer: WikiLinkRenderer,
    pub shortcode_renderer: ShortcodeRenderer,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            enable_wiki_links: true,
            enable_hashtags: true,
            enable_frontmatter: true,
            lazy_load_images: true,
            wiki_link_renderer: Arc::new(default_wiki_link_html),
            shortcode_renderer: Arc::new(shortcodes::default_shortcode_html),
        }
    }
}

impl fmt::Debug for ParserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserConfig")
            .field("enable_wiki_links", &self.enable_wiki_links)
            .field("enable_hashtags", &self.enable_hashtags)
            .field("enable_frontmatter", &self.enable_frontmatter)
            .field("lazy_load_images", &self.lazy_load_images)
            .finish_non_exhaustive()
    }
}

/// `[[target|label]]` occurrence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WikiLink {
    pub target: String,
    pub label: Option<String>,
}

impl WikiLink {
    pub fn new(target: &str, label: Option<&str>) -> Self {
        Self {
            target: target.to_string(),
            label: label.map(String::from),
        }
    }

    /// Visible text: the label, or the target when unlabeled
    pub fn text(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.target)
    }
}

/// `{{name}}` occurrence; `position` is a byte offset into the body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shortcode {
    pub name: String,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeadingData {
    pub level: u8,
    pub text: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageData {
    pub dest: String,
    pub alt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkData {
    pub text: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeBlockData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub code: String,
}

/// Everything derived from one parse of a document
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedContent {
    pub frontmatter: Option<Frontmatter>,
    /// Source with frontmatter and title heading removed
    pub body: String,
    /// Frontmatter `title`, else the stripped heading
    pub title: String,
    /// Literal text of the stripped level-1 heading
    pub heading: Option<String>,
    pub hashtags: Vec<String>,
    pub wiki_links: Vec<WikiLink>,
    pub shortcodes: Vec<Shortcode>,
    pub headings: Vec<HeadingData>,
    pub images: Vec<ImageData>,
    pub links: Vec<LinkData>,
    pub code_blocks: Vec<CodeBlockData>,
    pub html: String,
    pub plain_text: String,
    pub word_count: usize,
}

impl ParsedContent {
    /// Rebuild the source document from its parts
    ///
    /// Frontmatter, title heading and body are joined with newlines; parsing
    /// the result yields the same frontmatter, title and body.
    pub fn to_markdown(&self) -> Result<String, FrontmatterError> {
        let mut parts = Vec::with_capacity(3);
        if let Some(fm) = &self.frontmatter {
            parts.push(fm.marshal()?);
        }
        if let Some(heading) = &self.heading {
            parts.push(format!("# {heading}"));
        }
        parts.push(self.body.clone());
        Ok(parts.join("\n"))
    }

    /// Change the title where it is stored: frontmatter if it has one,
    /// otherwise the leading heading.
    pub fn set_title(&mut self, title: &str) {
        match &mut self.frontmatter {
            Some(fm) if fm.has_key("title") => fm.set_string("title", title),
            _ => self.heading = Some(title.to_string()),
        }
        self.title = title.to_string();
    }

    /// Estimated minutes to read, at least one
    pub fn reading_time(&self) -> usize {
        self.word_count.div_ceil(WORDS_PER_MINUTE).max(1)
    }
}

/// Markdown parser with the configured inline extensions
pub struct MarkdownParser {
    config: ParserConfig,
    options: Options,
    scanner: InlineScanner,
}

impl MarkdownParser {
    pub fn new(config: ParserConfig) -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_HEADING_ATTRIBUTES);

        let mut scanner = InlineScanner::new();
        if config.enable_wiki_links {
            scanner.register(Box::new(WikiLinkExtension));
        }
        if config.enable_hashtags {
            scanner.register(Box::new(HashtagExtension));
        }
        scanner.register(Box::new(ShortcodeExtension));

        Self {
            config,
            options,
            scanner,
        }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Register an additional inline extension
    pub fn with_extension(mut self, extension: Box<dyn InlineExtension>) -> Self {
        self.scanner.register(extension);
        self
    }

    /// Parse a complete document
    ///
    /// # Example
    ///
    /// ```
    /// use wikiwire_core::markdown::{MarkdownParser, ParserConfig};
    ///
    /// let parser = MarkdownParser::new(ParserConfig::default());
    /// let parsed = parser.parse("# Hello\n\nSee [[Other]] #notes").unwrap();
    /// assert_eq!(parsed.title, "Hello");
    /// assert_eq!(parsed.hashtags, vec!["notes"]);
    /// assert_eq!(parsed.wiki_links[0].target, "Other");
    /// ```
    pub fn parse(&self, content: &str) -> Result<ParsedContent, ParseError> {
        let (frontmatter, rest) = if self.config.enable_frontmatter {
            frontmatter::extract(content)?
        } else {
            (None, content)
        };

        // heading list includes the title heading
        let headings = self.collect_headings(rest);
        let (heading, body) = strip_title(rest, TITLE_SEARCH_LINES);

        let title = frontmatter
            .as_ref()
            .and_then(|fm| fm.get_string("title"))
            .filter(|t| !t.trim().is_empty())
            .or_else(|| heading.clone())
            .unwrap_or_default();

        let rendered = self.render(&body);
        let plain_text = rendered.plain.split_whitespace().collect::<Vec<_>>().join(" ");
        let word_count = plain_text.split_whitespace().count();

        Ok(ParsedContent {
            frontmatter,
            body,
            title,
            heading,
            hashtags: rendered.hashtags,
            wiki_links: rendered.wiki_links,
            shortcodes: rendered.shortcodes,
            headings,
            images: rendered.images,
            links: rendered.links,
            code_blocks: rendered.code_blocks,
            html: rendered.html,
            plain_text,
            word_count,
        })
    }

    fn events<'a>(&self, markdown: &'a str) -> Vec<(Event<'a>, Range<usize>)> {
        Parser::new_ext(markdown, self.options)
            .into_offset_iter()
            .collect()
    }

    fn collect_headings(&self, markdown: &str) -> Vec<HeadingData> {
        let events: Vec<Event> = self.events(markdown).into_iter().map(|(e, _)| e).collect();
        collect_headings(&events)
    }

    fn render(&self, body: &str) -> Rendered {
        let events = self.events(body);
        let plain_events: Vec<Event> = events.iter().map(|(e, _)| e.clone()).collect();
        let mut heading_ids = collect_headings(&plain_events)
            .into_iter()
            .map(|h| h.id);

        let mut out = Rendered::default();
        let mut result: Vec<Event<'static>> = Vec::with_capacity(events.len());

        let mut code_block: Option<CodeBlockData> = None;
        let mut image: Option<(ImageData, Option<String>)> = None;
        let mut link: Option<LinkData> = None;
        let mut link_depth = 0usize;

        let mut i = 0;
        while i < events.len() {
            let (event, _) = &events[i];
            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let language = match kind {
                        CodeBlockKind::Fenced(info) => info
                            .split_whitespace()
                            .next()
                            .map(String::from),
                        CodeBlockKind::Indented => None,
                    };
                    code_block = Some(CodeBlockData {
                        language,
                        code: String::new(),
                    });
                    result.push(event.clone().into_static());
                }
                Event::End(TagEnd::CodeBlock) => {
                    if let Some(block) = code_block.take() {
                        out.plain.push_str(&block.code);
                        out.plain.push(' ');
                        out.code_blocks.push(block);
                    }
                    result.push(event.clone().into_static());
                }
                Event::Text(text) if code_block.is_some() => {
                    if let Some(block) = code_block.as_mut() {
                        block.code.push_str(text);
                    }
                    result.push(event.clone().into_static());
                }
                Event::Start(Tag::Image {
                    dest_url, title, ..
                }) => {
                    let title = (!title.is_empty()).then(|| title.to_string());
                    image = Some((
                        ImageData {
                            dest: dest_url.to_string(),
                            alt: String::new(),
                        },
                        title,
                    ));
                    if !self.config.lazy_load_images {
                        result.push(event.clone().into_static());
                    }
                }
                Event::End(TagEnd::Image) => {
                    if let Some((data, title)) = image.take() {
                        if self.config.lazy_load_images {
                            result.push(Event::InlineHtml(CowStr::from(lazy_image_html(
                                &data,
                                title.as_deref(),
                            ))));
                        } else {
                            result.push(event.clone().into_static());
                        }
                        out.plain.push_str(&data.alt);
                        out.plain.push(' ');
                        out.images.push(data);
                    }
                }
                _ if image.is_some() => {
                    if let (Event::Text(text) | Event::Code(text), Some((data, _))) =
                        (event, image.as_mut())
                    {
                        data.alt.push_str(text);
                    }
                    if !self.config.lazy_load_images {
                        result.push(event.clone().into_static());
                    }
                }
                Event::Start(Tag::Link {
                    dest_url, title, ..
                }) => {
                    if link_depth == 0 {
                        link = Some(LinkData {
                            text: String::new(),
                            url: dest_url.to_string(),
                            title: (!title.is_empty()).then(|| title.to_string()),
                        });
                    }
                    link_depth += 1;
                    result.push(event.clone().into_static());
                }
                Event::End(TagEnd::Link) => {
                    link_depth = link_depth.saturating_sub(1);
                    if link_depth == 0 {
                        if let Some(data) = link.take() {
                            out.links.push(data);
                        }
                    }
                    result.push(event.clone().into_static());
                }
                Event::Start(Tag::Heading {
                    level,
                    id,
                    classes,
                    attrs,
                }) => {
                    let generated = heading_ids.next();
                    let id = match id {
                        Some(explicit) => Some(explicit.clone().into_static()),
                        None => generated.filter(|g| !g.is_empty()).map(CowStr::from),
                    };
                    result.push(Event::Start(Tag::Heading {
                        level: *level,
                        id,
                        classes: classes.iter().map(|c| c.clone().into_static()).collect(),
                        attrs: attrs
                            .iter()
                            .map(|(k, v)| {
                                (k.clone().into_static(), v.clone().map(|v| v.into_static()))
                            })
                            .collect(),
                    }));
                }
                Event::Text(_) => {
                    // merge consecutive text events, remembering where each came from
                    let mut merged = String::new();
                    let mut pieces: Vec<(usize, usize)> = Vec::new();
                    while let Some((Event::Text(text), piece_range)) = events.get(i) {
                        pieces.push((merged.len(), piece_range.start));
                        merged.push_str(text);
                        i += 1;
                    }
                    self.emit_text(&merged, &pieces, link_depth > 0, &mut link, &mut result, &mut out);
                    continue;
                }
                Event::Code(code) => {
                    out.plain.push_str(code);
                    out.plain.push(' ');
                    if let Some(data) = link.as_mut() {
                        data.text.push_str(code);
                    }
                    result.push(event.clone().into_static());
                }
                Event::SoftBreak | Event::HardBreak => {
                    out.plain.push(' ');
                    result.push(event.clone().into_static());
                }
                _ => result.push(event.clone().into_static()),
            }
            i += 1;
        }

        html::push_html(&mut out.html, result.into_iter());
        out
    }

    fn emit_text(
        &self,
        merged: &str,
        pieces: &[(usize, usize)],
        in_link: bool,
        link: &mut Option<LinkData>,
        result: &mut Vec<Event<'static>>,
        out: &mut Rendered,
    ) {
        if let Some(data) = link.as_mut() {
            data.text.push_str(merged);
        }

        for segment in self.scanner.scan(merged, in_link) {
            match segment {
                Segment::Text(text) => {
                    out.plain.push_str(text);
                    out.plain.push(' ');
                    result.push(Event::Text(CowStr::from(text.to_string())));
                }
                Segment::Node { node, offset } => {
                    let html = match node {
                        InlineNode::WikiLink(wiki) => {
                            out.plain.push_str(wiki.text());
                            out.plain.push(' ');
                            let html = (self.config.wiki_link_renderer)(&wiki);
                            out.wiki_links.push(wiki);
                            html
                        }
                        InlineNode::Hashtag(tag) => {
                            out.plain.push('#');
                            out.plain.push_str(&tag);
                            out.plain.push(' ');
                            let html = render_hashtag(&tag);
                            out.hashtags.push(tag);
                            html
                        }
                        InlineNode::Shortcode(name) => {
                            let html = (self.config.shortcode_renderer)(&name);
                            out.shortcodes.push(Shortcode {
                                name,
                                position: source_offset(pieces, offset),
                            });
                            html
                        }
                        InlineNode::Raw { html, text } => {
                            out.plain.push_str(&text);
                            out.plain.push(' ');
                            html
                        }
                    };
                    result.push(Event::InlineHtml(CowStr::from(html)));
                }
            }
        }
    }
}

impl Default for MarkdownParser {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}

#[derive(Default)]
struct Rendered {
    html: String,
    plain: String,
    hashtags: Vec<String>,
    wiki_links: Vec<WikiLink>,
    shortcodes: Vec<Shortcode>,
    images: Vec<ImageData>,
    links: Vec<LinkData>,
    code_blocks: Vec<CodeBlockData>,
}

/// Map an offset in merged text back to the body
fn source_offset(pieces: &[(usize, usize)], merged_offset: usize) -> usize {
    pieces
        .iter()
        .rev()
        .find(|(start, _)| *start <= merged_offset)
        .map(|(start, source)| source + (merged_offset - start))
        .unwrap_or(merged_offset)
}

fn collect_headings(events: &[Event]) -> Vec<HeadingData> {
    let mut headings = Vec::new();
    let mut ids = HeadingIds::new();
    let mut current: Option<(u8, Option<String>, String)> = None;

    for event in events {
        match event {
            Event::Start(Tag::Heading { level, id, .. }) => {
                current = Some((*level as u8, id.as_ref().map(|s| s.to_string()), String::new()));
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some((_, _, ref mut title)) = current {
                    title.push_str(text);
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some((level, explicit, text)) = current.take() {
                    let text = text.trim().to_string();
                    let id = match explicit {
                        Some(explicit) => ids.claim(explicit),
                        None => ids.next_id(&text),
                    };
                    headings.push(HeadingData { level, text, id });
                }
            }
            _ => {}
        }
    }

    headings
}

/// Remove the first `# ` line within the first `max_lines` lines
///
/// Lines inside fenced code are ignored. Returns the heading text and the
/// remaining body; blank lines around the heading are left in place.
pub fn strip_title(body: &str, max_lines: usize) -> (Option<String>, String) {
    let mut offset = 0;
    let mut in_fence = false;

    for line in body.split_inclusive('\n').take(max_lines) {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        let fence_probe = trimmed.trim_start();
        if fence_probe.starts_with("```") || fence_probe.starts_with("~~~") {
            in_fence = !in_fence;
        } else if !in_fence {
            if let Some(text) = title_heading_text(trimmed) {
                let mut rest = String::with_capacity(body.len() - line.len());
                rest.push_str(&body[..offset]);
                rest.push_str(&body[offset + line.len()..]);
                return (Some(text), rest);
            }
        }
        offset += line.len();
    }

    (None, body.to_string())
}

fn title_heading_text(line: &str) -> Option<String> {
    let rest = line.strip_prefix('#')?;
    if !rest.starts_with([' ', '\t']) {
        return None;
    }

    let text = rest.trim();
    // optional closing sequence: "# Title ##"
    let without_closing = text.trim_end_matches('#');
    let text = if without_closing.is_empty() || without_closing.ends_with([' ', '\t']) {
        without_closing.trim_end()
    } else {
        text
    };
    Some(text.to_string())
}

fn default_wiki_link_html(link: &WikiLink) -> String {
    format!(
        "<a href=\"{}\">{}</a>",
        escape_html(&link.target),
        escape_html(link.text())
    )
}

fn lazy_image_html(image: &ImageData, title: Option<&str>) -> String {
    let title_attr = title
        .map(|t| format!(" title=\"{}\"", escape_html(t)))
        .unwrap_or_default();
    format!(
        "<img src=\"{}\" alt=\"{}\"{} loading=\"lazy\" />",
        escape_html(&image.dest),
        escape_html(&image.alt),
        title_attr
    )
}

pub(crate) fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
