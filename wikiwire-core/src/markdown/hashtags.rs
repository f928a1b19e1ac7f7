//! Hashtag syntax: `#word` with word characters `[A-Za-z0-9_-]`.

use super::inline::{InlineContext, InlineExtension, InlineNode};

pub struct HashtagExtension;

fn is_hashtag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

impl InlineExtension for HashtagExtension {
    fn name(&self) -> &'static str {
        "hashtag"
    }

    fn trigger(&self) -> char {
        '#'
    }

    fn priority(&self) -> u8 {
        20
    }

    fn try_parse(&self, input: &str, ctx: &InlineContext) -> Option<(usize, InlineNode)> {
        // "C#", "page/#anchor" and "&#38;" are not tags
        if let Some(prev) = ctx.prev {
            if prev.is_alphanumeric() || matches!(prev, '_' | '/' | '#' | '&') {
                return None;
            }
        }

        let rest = input.strip_prefix('#')?;
        let len = rest
            .find(|c: char| !is_hashtag_char(c))
            .unwrap_or(rest.len());
        if len == 0 {
            return None;
        }

        Some((len + 1, InlineNode::Hashtag(rest[..len].to_string())))
    }
}

/// Search link for a tag; underscores read as spaces in the label
pub fn render_hashtag(tag: &str) -> String {
    format!(
        "<a class=\"tag\" href=\"/search/?q=%23{}\">#{}</a>",
        tag,
        tag.replace('_', " ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_after(prev: Option<char>, input: &str) -> Option<(usize, InlineNode)> {
        let ctx = InlineContext {
            prev,
            in_link: false,
        };
        HashtagExtension.try_parse(input, &ctx)
    }

    #[test]
    fn test_basic_tag() {
        let (consumed, node) = parse_after(None, "#rust-lang, more").unwrap();
        assert_eq!(consumed, 10);
        assert_eq!(node, InlineNode::Hashtag("rust-lang".into()));
    }

    #[test]
    fn test_tag_after_space_and_punctuation() {
        assert!(parse_after(Some(' '), "#tag").is_some());
        assert!(parse_after(Some('('), "#tag)").is_some());
    }

    #[test]
    fn test_not_a_tag() {
        assert!(parse_after(Some('C'), "# sharp").is_none());
        assert!(parse_after(Some('C'), "#sharp").is_none());
        assert!(parse_after(Some('/'), "#anchor").is_none());
        assert!(parse_after(None, "#").is_none());
        assert!(parse_after(None, "# heading").is_none());
    }

    #[test]
    fn test_render_hashtag() {
        assert_eq!(
            render_hashtag("machine_learning"),
            r#"<a class="tag" href="/search/?q=%23machine_learning">#machine learning</a>"#
        );
    }
}
