//! Shortcode syntax: `{{name}}`.

use super::inline::{InlineContext, InlineExtension, InlineNode};

pub struct ShortcodeExtension;

impl InlineExtension for ShortcodeExtension {
    fn name(&self) -> &'static str {
        "shortcode"
    }

    fn trigger(&self) -> char {
        '{'
    }

    fn priority(&self) -> u8 {
        30
    }

    fn fires_inside_links(&self) -> bool {
        true
    }

    fn try_parse(&self, input: &str, _ctx: &InlineContext) -> Option<(usize, InlineNode)> {
        let rest = input.strip_prefix("{{")?;
        let end = rest.find("}}")?;
        let name = rest[..end].trim();
        if name.is_empty() || name.contains('\n') || name.contains("{{") {
            return None;
        }
        Some((end + 4, InlineNode::Shortcode(name.to_string())))
    }
}

/// Placeholder comment used when no renderer is configured
pub fn default_shortcode_html(name: &str) -> String {
    format!("<!-- shortcode:{} -->", name.replace("--", "-"))
}
