//! Sanctioned write path for edited documents.
//!
//! Editors hand a [`Document`] to [`save_file_detail`], which serializes it,
//! writes it, keeps the store and query registry in step, and re-renders the
//! query blocks of every page that lists it. Callers serialize concurrent
//! saves themselves; nothing here takes a lock.

use crate::frontmatter::FrontmatterError;
use crate::models::{Document, FileKind};
use crate::slug::parent_dir;
use crate::store::{normalize_path, ContentStore, StoreError};
use crate::wire::{Wire, WireError};
use thiserror::Error;
use wikiwire_types::ContentChange;

#[derive(Error, Debug)]
pub enum SaveError {
    #[error("Document path is empty")]
    EmptyPath,

    #[error("Document {0} has no parsed content to save")]
    MissingContent(String),

    #[error("Cannot save {path}: {kind} entries are not editable")]
    UnsupportedKind { path: String, kind: FileKind },

    #[error("Failed to serialize frontmatter: {0}")]
    Frontmatter(#[from] FrontmatterError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Persist `doc` and bring every dependent view up to date
///
/// Steps run in a fixed order: serialize, write, refresh the file, rescan
/// its query blocks, materialize them, refresh the parent directory, refresh
/// the file again, then re-materialize dependents. Failures while updating
/// dependents are logged, not returned.
pub fn save_file_detail(
    store: &mut ContentStore,
    wire: &mut Wire,
    doc: &Document,
) -> Result<(), SaveError> {
    let path = normalize_path(&doc.path)?;
    if path.is_empty() {
        return Err(SaveError::EmptyPath);
    }

    let content = serialize(doc, &path)?;
    store.write_content_file(&path, &content)?;
    store.refresh_content(&path)?;
    wire.scan_content_file_for_queries(store, &path)?;
    wire.notify_file_changed(store, &path)?;
    store.refresh_content(parent_dir(&path).unwrap_or(""))?;
    store.refresh_content(&path)?;

    tracing::info!("Saved {}", path);
    propagate(store, wire, &ContentChange::Saved { path });
    Ok(())
}

/// Move a document and update everything that listed either path
pub fn rename_file_detail(
    store: &mut ContentStore,
    wire: &mut Wire,
    from: &str,
    to: &str,
) -> Result<(), SaveError> {
    let from = normalize_path(from)?;
    let to = normalize_path(to)?;
    if from.is_empty() || to.is_empty() {
        return Err(SaveError::EmptyPath);
    }

    store.rename_content_file(&from, &to)?;
    store.refresh_content(&from)?;
    store.refresh_content(&to)?;

    wire.forget(&from);
    wire.scan_content_file_for_queries(store, &to)?;
    wire.notify_file_changed(store, &to)?;
    store.refresh_content(&to)?;

    tracing::info!("Renamed {} to {}", from, to);
    propagate(store, wire, &ContentChange::Renamed { from, to });
    Ok(())
}

fn serialize(doc: &Document, path: &str) -> Result<String, SaveError> {
    let parsed = match doc.kind {
        FileKind::Markdown | FileKind::Html => doc
            .parsed
            .as_ref()
            .ok_or_else(|| SaveError::MissingContent(path.to_string()))?,
        kind => {
            return Err(SaveError::UnsupportedKind {
                path: path.to_string(),
                kind,
            })
        }
    };

    // html pages carry frontmatter too
    Ok(parsed.to_markdown()?)
}

/// Re-materialize, refresh and rescan every dependent of a change
fn propagate(store: &mut ContentStore, wire: &mut Wire, change: &ContentChange) {
    let mut dependents: Vec<String> = Vec::new();
    for path in change.affected_paths() {
        for dependent in wire.find_dependencies(store, path) {
            if !dependents.contains(&dependent) {
                dependents.push(dependent);
            }
        }
    }

    for dependent in dependents {
        if let Err(e) = update_dependent(store, wire, &dependent) {
            tracing::error!(
                "Failed to update {} after change to {}: {}",
                dependent,
                change.current_path(),
                e
            );
        }
    }
}

fn update_dependent(
    store: &mut ContentStore,
    wire: &mut Wire,
    path: &str,
) -> Result<(), SaveError> {
    wire.notify_file_changed(store, path)?;
    store.refresh_content(path)?;
    wire.scan_content_file_for_queries(store, path)?;
    tracing::debug!("Updated dependent {}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::ParserConfig;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, rel: &str, content: &str) {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn setup(dir: &TempDir) -> (ContentStore, Wire) {
        let mut store = ContentStore::new(dir.path(), ParserConfig::default());
        store.load_content().unwrap();
        let mut wire = Wire::new();
        wire.scan_for_queries(&store).unwrap();
        (store, wire)
    }

    #[test]
    fn test_save_updates_parent_listing() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "blog/index.md",
            "<!-- <query type=\"posts\" path=\"blog/*\" md-format=\"list\"> -->\n<!-- </query> -->\n",
        );
        let (mut store, mut wire) = setup(&dir);

        let parsed = store
            .parser()
            .parse("---\ntitle: Fresh\ndate: 2024-05-01\n---\nHello")
            .unwrap();
        let doc = Document::with_content("blog/fresh.md", FileKind::Markdown, parsed);
        save_file_detail(&mut store, &mut wire, &doc).unwrap();

        assert_eq!(store.do_path("blog/fresh").unwrap().title(), "Fresh");
        let index = store.read_content_file("blog/index.md").unwrap();
        assert!(index.contains("- [Fresh](/blog/fresh)"));
    }

    #[test]
    fn test_save_materializes_own_queries() {
        let dir = TempDir::new().unwrap();
        write(&dir, "notes/a.md", "# A\n");
        let (mut store, mut wire) = setup(&dir);

        let parsed = store
            .parser()
            .parse("# Notes\n<!-- <query type=\"pages\" path=\"notes/*\" md-format=\"list\"> -->\n<!-- </query> -->")
            .unwrap();
        let doc = Document::with_content("notes/index.md", FileKind::Markdown, parsed);
        save_file_detail(&mut store, &mut wire, &doc).unwrap();

        assert!(wire.post_has_queries("notes/index.md"));
        let text = store.read_content_file("notes/index.md").unwrap();
        assert_eq!(
            text,
            "# Notes\n<!-- <query type=\"pages\" path=\"notes/*\" md-format=\"list\"> -->\n- [A](/notes/a)\n<!-- </query> -->"
        );
        let indexed = store.do_path("notes/index.md").unwrap();
        assert!(indexed.parsed.as_ref().unwrap().body.contains("[A](/notes/a)"));
    }

    #[test]
    fn test_save_rejects_bad_documents() {
        let dir = TempDir::new().unwrap();
        let (mut store, mut wire) = setup(&dir);

        let parsed = store.parser().parse("x").unwrap();
        let empty = Document::with_content("", FileKind::Markdown, parsed.clone());
        assert!(matches!(
            save_file_detail(&mut store, &mut wire, &empty),
            Err(SaveError::EmptyPath)
        ));

        let folder = Document::directory("blog");
        assert!(matches!(
            save_file_detail(&mut store, &mut wire, &folder),
            Err(SaveError::UnsupportedKind { .. })
        ));

        let mut bare = Document::with_content("a.md", FileKind::Markdown, parsed);
        bare.parsed = None;
        assert!(matches!(
            save_file_detail(&mut store, &mut wire, &bare),
            Err(SaveError::MissingContent(_))
        ));
    }

    #[test]
    fn test_save_html_writes_body() {
        let dir = TempDir::new().unwrap();
        let (mut store, mut wire) = setup(&dir);

        let parsed = store.parser().parse("<p>hello</p>").unwrap();
        let doc = Document::with_content("page.html", FileKind::Html, parsed);
        save_file_detail(&mut store, &mut wire, &doc).unwrap();
        assert_eq!(store.read_content_file("page.html").unwrap(), "<p>hello</p>");
    }

    #[test]
    fn test_save_html_keeps_frontmatter() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "page.html",
            "---\nprivate: true\ntitle: Secret\n---\n<p>hi</p>\n",
        );
        let (mut store, mut wire) = setup(&dir);

        let doc = store.do_path("page.html").unwrap().clone();
        save_file_detail(&mut store, &mut wire, &doc).unwrap();

        let on_disk = store.read_content_file("page.html").unwrap();
        assert!(on_disk.starts_with("---\n"));
        assert!(on_disk.contains("private: true"));
        assert!(on_disk.contains("<p>hi</p>"));

        let saved = store.do_path("page.html").unwrap();
        assert!(store.is_private(saved));
        assert_eq!(saved.title(), "Secret");
    }

    #[test]
    fn test_rename_moves_listing() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "blog/index.md",
            "<!-- <query type=\"posts\" path=\"blog/*\" md-format=\"list\"> -->\n<!-- </query> -->\n",
        );
        write(
            &dir,
            "drafts/index.md",
            "<!-- <query type=\"posts\" path=\"drafts/*\" md-format=\"list\"> -->\n<!-- </query> -->\n",
        );
        write(&dir, "drafts/post.md", "# Post\n");
        let (mut store, mut wire) = setup(&dir);
        wire.notify_file_changed(&store, "drafts/index.md").unwrap();
        assert!(store
            .read_content_file("drafts/index.md")
            .unwrap()
            .contains("[Post](/drafts/post)"));

        rename_file_detail(&mut store, &mut wire, "drafts/post.md", "blog/post.md").unwrap();

        assert!(store.do_path("drafts/post.md").is_none());
        assert!(store.do_path("blog/post.md").is_some());
        let drafts = store.read_content_file("drafts/index.md").unwrap();
        let blog = store.read_content_file("blog/index.md").unwrap();
        assert!(!drafts.contains("[Post]"));
        assert!(blog.contains("- [Post](/blog/post)"));
    }
}
