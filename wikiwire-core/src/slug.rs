//! Slug generation for heading ids and document URLs.

use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use unicode_segmentation::UnicodeSegmentation;

static HYPHEN_RUN_REGEX: OnceLock<Regex> = OnceLock::new();

fn hyphen_run_regex() -> &'static Regex {
    HYPHEN_RUN_REGEX.get_or_init(|| Regex::new(r"-+").unwrap())
}

/// Convert heading text to an anchor id
///
/// Lowercases, turns whitespace and underscores into hyphens, drops
/// punctuation, collapses hyphen runs and trims them from both ends.
///
/// # Examples
///
/// ```
/// use wikiwire_core::slugify;
///
/// assert_eq!(slugify("Hello World"), "hello-world");
/// assert_eq!(slugify("Rust & Safety"), "rust-safety");
/// assert_eq!(slugify("Café au lait"), "café-au-lait");
/// ```
pub fn slugify(input: &str) -> String {
    let cleaned = input
        .to_lowercase()
        .graphemes(true)
        .filter_map(|g| {
            let c = g.chars().next()?;
            if c.is_whitespace() || c == '_' || c == '-' {
                Some("-")
            } else if c.is_alphanumeric() {
                Some(g)
            } else {
                None
            }
        })
        .collect::<String>();

    hyphen_run_regex()
        .replace_all(&cleaned, "-")
        .trim_matches('-')
        .to_string()
}

/// Hands out unique heading ids within one document
#[derive(Debug, Default)]
pub struct HeadingIds {
    seen: HashMap<String, usize>,
}

impl HeadingIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slugify `text`, suffixing `-1`, `-2`, ... on repeats
    pub fn next_id(&mut self, text: &str) -> String {
        let base = slugify(text);
        self.claim(base)
    }

    /// Reserve an explicit id so generated ones do not collide with it
    pub fn claim(&mut self, id: String) -> String {
        match self.seen.get_mut(&id) {
            None => {
                self.seen.insert(id.clone(), 0);
                id
            }
            Some(count) => {
                *count += 1;
                let candidate = format!("{id}-{count}");
                self.seen.insert(candidate.clone(), 0);
                candidate
            }
        }
    }
}

/// Public slug of a document
///
/// A frontmatter override is placed in the document's directory; otherwise
/// the relative path minus its extension is used. Separators are always `/`.
pub fn document_slug(rel_path: &str, slug_override: Option<&str>) -> String {
    let rel_path = rel_path.replace('\\', "/");

    if let Some(custom) = slug_override.map(str::trim).filter(|s| !s.is_empty()) {
        let custom = custom.trim_matches('/');
        return match parent_dir(&rel_path) {
            Some(dir) => format!("{dir}/{custom}"),
            None => custom.to_string(),
        };
    }

    let path = Path::new(&rel_path);
    match path.extension() {
        Some(ext) => {
            let cut = rel_path.len() - ext.len() - 1;
            rel_path[..cut].to_string()
        }
        None => rel_path,
    }
}

/// Parent directory of a relative `/`-separated path, if any
pub fn parent_dir(rel_path: &str) -> Option<&str> {
    rel_path
        .rsplit_once('/')
        .map(|(dir, _)| dir)
        .filter(|dir| !dir.is_empty())
}
