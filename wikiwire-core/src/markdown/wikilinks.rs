//! Wikilink syntax: `[[target]]` and `[[target|label]]`.

use super::inline::{InlineContext, InlineExtension, InlineNode};
use super::WikiLink;

pub struct WikiLinkExtension;

impl InlineExtension for WikiLinkExtension {
    fn name(&self) -> &'static str {
        "wikilink"
    }

    fn trigger(&self) -> char {
        '['
    }

    fn priority(&self) -> u8 {
        10
    }

    fn try_parse(&self, input: &str, _ctx: &InlineContext) -> Option<(usize, InlineNode)> {
        let rest = input.strip_prefix("[[")?;
        let end = rest.find("]]")?;
        let inner = &rest[..end];

        if inner.contains('\n') || inner.contains("[[") {
            return None;
        }

        let (target, label) = match inner.split_once('|') {
            Some((target, label)) => (target.trim(), Some(label.trim())),
            None => (inner.trim(), None),
        };
        if target.is_empty() {
            return None;
        }

        let label = label.filter(|l| !l.is_empty());
        Some((end + 4, InlineNode::WikiLink(WikiLink::new(target, label))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Option<(usize, InlineNode)> {
        WikiLinkExtension.try_parse(input, &InlineContext::default())
    }

    #[test]
    fn test_simple_target() {
        let (consumed, node) = parse("[[Home Page]] rest").unwrap();
        assert_eq!(consumed, 13);
        assert_eq!(node, InlineNode::WikiLink(WikiLink::new("Home Page", None)));
    }

    #[test]
    fn test_target_with_label() {
        let (consumed, node) = parse("[[blog/post | Read this]]").unwrap();
        assert_eq!(consumed, 25);
        assert_eq!(
            node,
            InlineNode::WikiLink(WikiLink::new("blog/post", Some("Read this")))
        );
    }

    #[test]
    fn test_empty_label_ignored() {
        let (_, node) = parse("[[target|]]").unwrap();
        assert_eq!(node, InlineNode::WikiLink(WikiLink::new("target", None)));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(parse("[single]").is_none());
        assert!(parse("[[unclosed").is_none());
        assert!(parse("[[ ]]").is_none());
        assert!(parse("[[|label]]").is_none());
        assert!(parse("[[line\nbreak]]").is_none());
    }
}
