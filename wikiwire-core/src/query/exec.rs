//! Query evaluation against a [`ContentStore`].

use super::glob::matches_path_pattern;
use super::{MdFormat, QueryAst, QueryFilter, QueryType, SortKey, SortOrder};
use crate::models::Document;
use crate::slug::{document_slug, slugify};
use crate::store::ContentStore;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::path::Path;

/// Evaluates queries on behalf of a requesting document
pub struct QueryExecutor<'a> {
    store: &'a ContentStore,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(store: &'a ContentStore) -> Self {
        Self { store }
    }

    /// Run `query` and render the results as markdown lines
    pub fn execute(&self, requesting: &Document, query: &QueryAst) -> Vec<String> {
        let selected = self.select(requesting, query);
        tracing::debug!(
            "Query [{}] from {} selected {} documents",
            query,
            requesting.path,
            selected.len()
        );
        format_results(&selected, query.md_format)
    }

    /// Candidates after path, access, field filters, sort and limit
    pub fn select(&self, requesting: &Document, query: &QueryAst) -> Vec<&'a Document> {
        let pattern = query.path.as_deref().unwrap_or("");
        let viewer_private = self.store.is_private(requesting);

        let mut selected: Vec<&'a Document> = self
            .candidates(requesting, query.query_type)
            .into_iter()
            .filter(|doc| matches_path_pattern(&doc.path, pattern))
            .filter(|doc| viewer_private || query.include_private || !self.store.is_private(doc))
            .filter(|doc| query.filters.iter().all(|f| matches_filter(doc, f)))
            .collect();

        sort_documents(&mut selected, query.sort, query.order);

        if query.limit > 0 {
            selected.truncate(query.limit);
        }
        selected
    }

    fn candidates(&self, requesting: &Document, query_type: QueryType) -> Vec<&'a Document> {
        let documents = self.store.documents().into_iter();
        match query_type {
            QueryType::Posts | QueryType::Pages => documents.filter(|doc| !doc.is_index()).collect(),
            QueryType::Backlinks => documents
                .filter(|doc| doc.path != requesting.path)
                .filter(|doc| {
                    doc.parsed.as_ref().is_some_and(|p| {
                        p.wiki_links
                            .iter()
                            .any(|link| link_points_to(&link.target, requesting))
                    })
                })
                .collect(),
        }
    }
}

fn matches_filter(doc: &Document, filter: &QueryFilter) -> bool {
    match filter.field.to_lowercase().as_str() {
        "tag" | "tags" => {
            let wanted = normalize_tag(&filter.value);
            match filter.operator.to_lowercase().as_str() {
                "contains" | "equals" | "=" | "==" => doc
                    .hashtags()
                    .iter()
                    .any(|tag| normalize_tag(tag) == wanted),
                _ => false,
            }
        }
        _ => false,
    }
}

fn normalize_tag(tag: &str) -> String {
    tag.trim().trim_start_matches('#').to_lowercase()
}

/// Stable sort; undated documents go last in either direction
fn sort_documents(docs: &mut Vec<&Document>, sort: SortKey, order: SortOrder) {
    if sort == SortKey::Title {
        let mut keyed: Vec<(String, &Document)> =
            docs.iter().map(|doc| (doc.title().to_lowercase(), *doc)).collect();
        keyed.sort_by(|(a, _), (b, _)| match order {
            SortOrder::Asc => a.cmp(b),
            SortOrder::Desc => b.cmp(a),
        });
        *docs = keyed.into_iter().map(|(_, doc)| doc).collect();
        return;
    }

    let mut keyed: Vec<(Option<DateTime<Utc>>, &Document)> = docs
        .iter()
        .map(|doc| {
            let date = match sort {
                SortKey::Modified => doc.date_modified(),
                _ => doc.date_created(),
            };
            (date, *doc)
        })
        .collect();

    keyed.sort_by(|(a, _), (b, _)| match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match order {
            SortOrder::Asc => a.cmp(b),
            SortOrder::Desc => b.cmp(a),
        },
    });
    *docs = keyed.into_iter().map(|(_, doc)| doc).collect();
}

/// Render documents as markdown lines
pub fn format_results(docs: &[&Document], format: MdFormat) -> Vec<String> {
    let mut lines = Vec::with_capacity(docs.len());
    if format == MdFormat::Table && !docs.is_empty() {
        lines.push("| Title | Date |".to_string());
        lines.push("| --- | --- |".to_string());
    }

    for doc in docs {
        let link = format!("[{}]({})", escape_link_text(&doc.title()), doc.url());
        let date = doc
            .date_created()
            .map(|d| d.format("%Y-%m-%d").to_string());

        match format {
            MdFormat::List => lines.push(format!("- {link}")),
            MdFormat::ListWithDate => match &date {
                Some(date) => lines.push(format!("- {date} - {link}")),
                None => lines.push(format!("- {link}")),
            },
            MdFormat::Detailed => {
                lines.push(format!("- {link}"));
                if let Some(date) = &date {
                    lines.push(format!("  Date: {date}"));
                }
                let tags = unique_tags(doc.hashtags());
                if !tags.is_empty() {
                    lines.push(format!("  Tags: {}", tags.join(", ")));
                }
            }
            MdFormat::Table => lines.push(format!(
                "| {} | {} |",
                link.replace('|', "\\|"),
                date.unwrap_or_default()
            )),
        }
    }
    lines
}

fn escape_link_text(text: &str) -> String {
    text.replace('[', "\\[").replace(']', "\\]")
}

fn unique_tags(tags: &[String]) -> Vec<&str> {
    let mut seen = Vec::new();
    for tag in tags {
        if !seen.contains(&tag.as_str()) {
            seen.push(tag.as_str());
        }
    }
    seen
}

/// Whether a wiki-link target names `doc`
///
/// Targets resolve case-insensitively against the slug, the path, the path
/// without its extension, the file stem (for bare names) and the title.
pub(crate) fn link_points_to(target: &str, doc: &Document) -> bool {
    let target = target.split('#').next().unwrap_or("").trim();
    let target = target.trim_start_matches('/').to_lowercase();
    if target.is_empty() {
        return false;
    }

    let path = doc.path.to_lowercase();
    let without_ext = document_slug(&path, None);
    if target == doc.slug().to_lowercase() || target == path || target == without_ext {
        return true;
    }

    if !target.contains('/') {
        let stem = Path::new(&path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        if !stem.is_empty() && slugify(&target) == slugify(stem) {
            return true;
        }
    }

    doc.title().to_lowercase() == target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::ParserConfig;
    use crate::query::parse_query;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, rel: &str, content: &str) {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn store(dir: &TempDir) -> ContentStore {
        let mut store = ContentStore::new(dir.path(), ParserConfig::default());
        store.load_content().unwrap();
        store
    }

    fn blog() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(&dir, "blog/index.md", "# Blog\n");
        write(&dir, "blog/one.md", "---\ntitle: One\ndate: 2024-01-01\n---\nFirst #rust\n");
        write(&dir, "blog/two.md", "---\ntitle: Two\ndate: 2024-01-02\n---\nSecond #go\n");
        write(&dir, "blog/three.md", "---\ntitle: Three\ndate: 2024-01-03\n---\nThird #Rust\n");
        write(&dir, "blog/sub/deep.md", "---\ntitle: Deep\ndate: 2024-02-01\n---\nDeep\n");
        dir
    }

    fn run(store: &ContentStore, from: &str, query: &str) -> Vec<String> {
        let requesting = store.do_path(from).unwrap();
        let query = parse_query(query).unwrap();
        QueryExecutor::new(store).execute(requesting, &query)
    }

    #[test]
    fn test_posts_recent_limit() {
        let dir = blog();
        let store = store(&dir);
        let lines = run(
            &store,
            "blog/index.md",
            r#"<query type="posts" path="blog/*" sort="recent" limit="2">"#,
        );
        assert_eq!(
            lines,
            vec![
                "- 2024-01-03 - [Three](/blog/three)",
                "- 2024-01-02 - [Two](/blog/two)",
            ]
        );
    }

    #[test]
    fn test_index_files_excluded() {
        let dir = blog();
        let store = store(&dir);
        let lines = run(&store, "blog/index.md", r#"<query type="pages" md-format="list">"#);
        assert_eq!(lines.len(), 4);
        assert!(!lines.iter().any(|l| l.contains("[Blog]")));
    }

    #[test]
    fn test_tag_filter_case_insensitive() {
        let dir = blog();
        let store = store(&dir);
        let lines = run(
            &store,
            "blog/index.md",
            r##"<query type="posts" tag="#rust" sort="date" order="asc" md-format="list">"##,
        );
        assert_eq!(lines, vec!["- [One](/blog/one)", "- [Three](/blog/three)"]);

        let lines = run(&store, "blog/index.md", r#"<query type="posts" where="author is bob">"#);
        assert!(lines.is_empty());
    }

    #[test]
    fn test_sort_documents_missing_dates_last() {
        let parser = crate::markdown::MarkdownParser::default();
        let make = |path: &str, content: &str| {
            Document::with_content(path, crate::models::FileKind::Markdown, parser.parse(content).unwrap())
        };
        let a = make("a.md", "---\ndate: 2024-01-01\n---\n");
        let b = make("b.md", "no date");
        let c = make("c.md", "---\ndate: 2024-01-02\n---\n");

        for order in [SortOrder::Asc, SortOrder::Desc] {
            let mut docs = vec![&b, &a, &c];
            sort_documents(&mut docs, SortKey::Recent, order);
            assert_eq!(docs[2].path, "b.md");
        }

        let mut docs = vec![&b, &a, &c];
        sort_documents(&mut docs, SortKey::Date, SortOrder::Asc);
        let paths: Vec<&str> = docs.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "c.md", "b.md"]);
    }

    #[test]
    fn test_title_sort() {
        let dir = blog();
        let store = store(&dir);
        let lines = run(
            &store,
            "blog/index.md",
            r#"<query type="posts" sort="title" md-format="list">"#,
        );
        assert_eq!(
            lines,
            vec![
                "- [Deep](/blog/sub/deep)",
                "- [One](/blog/one)",
                "- [Three](/blog/three)",
                "- [Two](/blog/two)",
            ]
        );
    }

    #[test]
    fn test_access_control() {
        let dir = TempDir::new().unwrap();
        write(&dir, "public.md", "public page");
        write(&dir, "secret.md", "---\nprivate: true\n---\nsecret");
        write(&dir, "hidden/index.md", "---\nprivate: true\n---\n");
        write(&dir, "hidden/note.md", "---\ntitle: Note\n---\n");
        write(&dir, "other-private.md", "---\nprivate: true\n---\n");
        let store = store(&dir);

        let from_public = run(&store, "public.md", r#"<query type="posts" md-format="list">"#);
        assert!(!from_public.iter().any(|l| l.contains("/secret")));
        assert!(!from_public.iter().any(|l| l.contains("/hidden/note")));

        let from_private =
            run(&store, "other-private.md", r#"<query type="posts" md-format="list">"#);
        assert!(from_private.iter().any(|l| l.contains("/secret")));
        assert!(from_private.iter().any(|l| l.contains("/hidden/note")));

        let opted_in = run(
            &store,
            "public.md",
            r#"<query type="posts" md-format="list" include-private="true">"#,
        );
        assert!(opted_in.iter().any(|l| l.contains("/secret")));
    }

    #[test]
    fn test_backlinks() {
        let dir = TempDir::new().unwrap();
        write(&dir, "target.md", "# Target Page\n");
        write(&dir, "by-name.md", "# A\nSee [[target]].");
        write(&dir, "by-path.md", "# B\nSee [[/target.md|here]].");
        write(&dir, "by-title.md", "# C\nSee [[Target Page#intro]].");
        write(&dir, "unrelated.md", "# D\nSee [[elsewhere]].");
        let store = store(&dir);

        let lines = run(
            &store,
            "target.md",
            r#"<query type="backlinks" sort="title" md-format="list">"#,
        );
        assert_eq!(
            lines,
            vec!["- [A](/by-name)", "- [B](/by-path)", "- [C](/by-title)"]
        );
    }

    #[test]
    fn test_formats() {
        let parser = crate::markdown::MarkdownParser::default();
        let doc = Document::with_content(
            "blog/post.md",
            crate::models::FileKind::Markdown,
            parser
                .parse("---\ntitle: A [draft] | note\ndate: 2024-03-04\n---\n#x and #y and #x\n")
                .unwrap(),
        );
        let undated = Document::with_content(
            "blog/plain.md",
            crate::models::FileKind::Markdown,
            parser.parse("# Plain\n").unwrap(),
        );
        let docs = vec![&doc, &undated];

        assert_eq!(
            format_results(&docs, MdFormat::List),
            vec![
                "- [A \\[draft\\] | note](/blog/post)",
                "- [Plain](/blog/plain)"
            ]
        );
        assert_eq!(
            format_results(&docs, MdFormat::ListWithDate),
            vec![
                "- 2024-03-04 - [A \\[draft\\] | note](/blog/post)",
                "- [Plain](/blog/plain)"
            ]
        );
        assert_eq!(
            format_results(&docs, MdFormat::Detailed),
            vec![
                "- [A \\[draft\\] | note](/blog/post)",
                "  Date: 2024-03-04",
                "  Tags: x, y",
                "- [Plain](/blog/plain)",
            ]
        );
        assert_eq!(
            format_results(&docs, MdFormat::Table),
            vec![
                "| Title | Date |",
                "| --- | --- |",
                "| [A \\[draft\\] \\| note](/blog/post) | 2024-03-04 |",
                "| [Plain](/blog/plain) |  |",
            ]
        );
        assert!(format_results(&[], MdFormat::Table).is_empty());
    }

    #[test]
    fn test_link_points_to() {
        let parser = crate::markdown::MarkdownParser::default();
        let doc = Document::with_content(
            "notes/My Note.md",
            crate::models::FileKind::Markdown,
            parser.parse("# Heading Title\n").unwrap(),
        );
        assert!(link_points_to("notes/My Note", &doc));
        assert!(link_points_to("/notes/my note.md", &doc));
        assert!(link_points_to("my-note", &doc));
        assert!(link_points_to("heading title", &doc));
        assert!(!link_points_to("other", &doc));
        assert!(!link_points_to("#only-fragment", &doc));
    }
}
