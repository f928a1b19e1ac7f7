//! Path patterns for the `path` query attribute.
//!
//! `*` stays within one path segment, so `blog/*` selects direct children
//! of `blog` only. `**` spans any number of segments, including none.

use crate::slug::parent_dir;
use glob::{MatchOptions, Pattern};

const SEGMENT_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Whether a content path is selected by `pattern`
pub fn matches_path_pattern(path: &str, pattern: &str) -> bool {
    let path = clean(path);
    let pattern = clean(pattern);
    if pattern.is_empty() {
        return true;
    }

    if glob_matches(&pattern, &path) {
        return true;
    }

    if pattern.contains("**") {
        return match_components(&split(&path), &split(&pattern));
    }

    if let Some(dir) = pattern.strip_suffix("/*") {
        if !has_meta(dir) {
            return parent_dir(&path) == Some(dir);
        }
    }

    if let Some(prefix) = pattern.strip_suffix('*') {
        if !has_meta(prefix) {
            return path.starts_with(prefix);
        }
    }

    if !has_meta(&pattern) {
        // a bare directory name selects everything below it
        return path == pattern
            || (path.starts_with(pattern.as_str())
                && path.as_bytes().get(pattern.len()) == Some(&b'/'));
    }

    if pattern.contains('/') {
        return match_components(&split(&path), &split(&pattern));
    }

    let name = path.rsplit('/').next().unwrap_or(&path);
    glob_matches(&pattern, name)
}

fn clean(raw: &str) -> String {
    let unified = raw.trim().replace('\\', "/");
    let mut rest = unified.as_str();
    while let Some(stripped) = rest.strip_prefix("./") {
        rest = stripped;
    }
    rest.trim_start_matches('/').to_string()
}

fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn has_meta(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

fn glob_matches(pattern: &str, candidate: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(p) => p.matches_with(candidate, SEGMENT_OPTIONS),
        Err(_) => pattern == candidate,
    }
}

/// Segment-wise match where `**` consumes zero or more segments
fn match_components(path: &[&str], pattern: &[&str]) -> bool {
    let Some((&head, rest)) = pattern.split_first() else {
        return path.is_empty();
    };

    if head == "**" {
        return (0..=path.len()).any(|skip| match_components(&path[skip..], rest));
    }

    match path.split_first() {
        Some((&segment, path_rest)) => {
            glob_matches(head, segment) && match_components(path_rest, rest)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_children_only() {
        assert!(matches_path_pattern("blog/post1.md", "blog/*"));
        assert!(!matches_path_pattern("blog/sub/post2.md", "blog/*"));
        assert!(!matches_path_pattern("blogroll/post.md", "blog/*"));
    }

    #[test]
    fn test_double_star() {
        assert!(matches_path_pattern("blog/post1.md", "blog/**"));
        assert!(matches_path_pattern("blog/sub/post2.md", "blog/**"));
        assert!(matches_path_pattern("blog/a/b/c.md", "blog/**/*.md"));
        assert!(matches_path_pattern("blog/c.md", "blog/**/*.md"));
        assert!(matches_path_pattern("x/y/notes/n.md", "**/notes/*"));
        assert!(!matches_path_pattern("docs/a.md", "blog/**"));
    }

    #[test]
    fn test_trailing_star_prefix() {
        assert!(matches_path_pattern("blog/2024-01-post.md", "blog/2024-*"));
        assert!(matches_path_pattern("blog/2024-01/post.md", "blog/2024-*"));
        assert!(!matches_path_pattern("blog/2023-01-post.md", "blog/2024-*"));
    }

    #[test]
    fn test_basename_pattern() {
        assert!(matches_path_pattern("deep/dir/readme.md", "*.md"));
        assert!(!matches_path_pattern("deep/dir/page.html", "*.md"));
    }

    #[test]
    fn test_component_glob() {
        assert!(matches_path_pattern("blog/2024/post.md", "blog/20??/*.md"));
        assert!(!matches_path_pattern("blog/2024/x/post.md", "blog/20??/*.md"));
    }

    #[test]
    fn test_literal_directory_and_normalization() {
        assert!(matches_path_pattern("blog/sub/post.md", "blog"));
        assert!(!matches_path_pattern("blogroll/post.md", "blog"));
        assert!(matches_path_pattern("blog/post.md", "./blog/*"));
        assert!(matches_path_pattern("blog/post.md", "/blog/*"));
        assert!(matches_path_pattern("anything.md", ""));
    }
}
