//! File-backed content index.
//!
//! Documents are keyed by their `/`-separated path relative to the content
//! root, with a secondary slug index for public URL resolution. The store
//! never refreshes itself after a write; callers decide when to re-index.

use crate::config::Config;
use crate::markdown::{MarkdownParser, ParseError, ParserConfig};
use crate::models::{Document, FileKind};
use crate::slug::parent_dir;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to walk content directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: ParseError,
    },

    #[error("{path} is not valid UTF-8: {source}")]
    Encoding {
        path: String,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("Invalid content path: {0}")]
    InvalidPath(String),

    #[error("Path already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid ignore pattern {pattern:?}: {source}")]
    IgnorePattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// In-memory index over a content directory
pub struct ContentStore {
    root: PathBuf,
    parser: MarkdownParser,
    ignore: Vec<Regex>,
    files: HashMap<String, Document>,
    slugs: HashMap<String, String>,
    fingerprints: HashMap<String, u64>,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>, parser_config: ParserConfig) -> Self {
        Self {
            root: root.into(),
            parser: MarkdownParser::new(parser_config),
            ignore: Vec::new(),
            files: HashMap::new(),
            slugs: HashMap::new(),
            fingerprints: HashMap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        Self::new(config.content_dir(), config.parser_config())
            .with_ignore_patterns(&config.ignore_patterns)
    }

    pub fn with_ignore_patterns(mut self, patterns: &[String]) -> Result<Self, StoreError> {
        for pattern in patterns {
            let re = Regex::new(pattern).map_err(|source| StoreError::IgnorePattern {
                pattern: pattern.clone(),
                source,
            })?;
            self.ignore.push(re);
        }
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn parser(&self) -> &MarkdownParser {
        &self.parser
    }

    /// Index the whole content tree
    ///
    /// Files that fail to parse are logged and left out; I/O failures abort.
    pub fn load_content(&mut self) -> Result<(), StoreError> {
        let meta = fs::metadata(&self.root).map_err(io_error(&self.root))?;
        if !meta.is_dir() {
            return Err(StoreError::Io {
                path: self.root.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "content root is not a directory"),
            });
        }

        self.scan_tree("")?;

        tracing::info!(
            "Indexed {} documents ({} entries) under {}",
            self.documents().len(),
            self.files.len(),
            self.root.display()
        );
        Ok(())
    }

    /// Drop the index and load from scratch
    pub fn reload_content(&mut self) -> Result<(), StoreError> {
        self.files.clear();
        self.slugs.clear();
        self.fingerprints.clear();
        self.load_content()
    }

    /// Re-index one file or directory subtree
    ///
    /// Unchanged files are skipped. A path that no longer exists is removed
    /// from the index. For a single file, parse failures are returned.
    pub fn refresh_content(&mut self, path: &str) -> Result<(), StoreError> {
        let rel = normalize_path(path)?;
        let full = self.root.join(&rel);

        let meta = match fs::metadata(&full) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("Dropping {} from index: no longer on disk", rel);
                self.forget_tree(&rel);
                return Ok(());
            }
            Err(e) => return Err(io_error(&full)(e)),
        };

        if meta.is_dir() {
            return self.scan_tree(&rel);
        }

        if self.is_excluded(&rel) {
            self.forget(&rel);
            return Ok(());
        }

        if let Some(dir) = parent_dir(&rel) {
            self.insert_directory(dir);
        }
        self.scan_file(&rel, &full, &meta, true)
    }

    /// Look up by path first, then by slug
    pub fn do_path(&self, path: &str) -> Option<&Document> {
        let rel = normalize_path(path).ok()?;
        self.files.get(&rel).or_else(|| {
            self.slugs
                .get(&rel)
                .and_then(|target| self.files.get(target))
        })
    }

    /// Every indexed entry, sorted by path
    pub fn all_files(&self) -> Vec<&Document> {
        let mut files: Vec<&Document> = self.files.values().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }

    /// Markdown and html documents, sorted by path
    pub fn documents(&self) -> Vec<&Document> {
        let mut docs: Vec<&Document> = self.files.values().filter(|d| d.is_document()).collect();
        docs.sort_by(|a, b| a.path.cmp(&b.path));
        docs
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Private itself, or below a directory whose index page is private
    ///
    /// Every ancestor is checked up to the root, so a private root
    /// `index.md` hides the whole site.
    pub fn is_private(&self, doc: &Document) -> bool {
        if doc.is_private() {
            return true;
        }

        let mut dir = parent_dir(&doc.path);
        loop {
            for index in ["index.md", "index.html"] {
                let candidate = match dir {
                    Some(d) => format!("{d}/{index}"),
                    None => index.to_string(),
                };
                if candidate == doc.path {
                    continue;
                }
                if self.files.get(&candidate).is_some_and(Document::is_private) {
                    return true;
                }
            }
            match dir {
                Some(d) => dir = parent_dir(d),
                None => return false,
            }
        }
    }

    /// Write a file below the root, creating parent directories
    ///
    /// The index is not touched; follow with [`ContentStore::refresh_content`].
    pub fn write_content_file(&self, path: &str, content: &str) -> Result<(), StoreError> {
        let full = self.file_path(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        fs::write(&full, content).map_err(io_error(&full))
    }

    pub fn read_content_file(&self, path: &str) -> Result<String, StoreError> {
        let full = self.file_path(path)?;
        read_text(&full, &normalize_path(path)?)
    }

    /// Move a file; the index is not touched
    pub fn rename_content_file(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let source = self.file_path(from)?;
        let target = self.file_path(to)?;
        if target.exists() {
            return Err(StoreError::AlreadyExists(normalize_path(to)?));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        fs::rename(&source, &target).map_err(io_error(&source))
    }

    fn file_path(&self, path: &str) -> Result<PathBuf, StoreError> {
        let rel = normalize_path(path)?;
        if rel.is_empty() {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(rel))
    }

    fn is_excluded(&self, rel: &str) -> bool {
        rel.split('/').any(|part| part.starts_with('.'))
            || self.ignore.iter().any(|re| re.is_match(rel))
    }

    fn scan_tree(&mut self, rel_dir: &str) -> Result<(), StoreError> {
        let start = self.root.join(rel_dir);
        let root = self.root.clone();
        let ignore = self.ignore.clone();
        let mut seen: HashSet<String> = HashSet::new();

        let walker = WalkDir::new(&start)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let hidden = entry.file_name().to_string_lossy().starts_with('.');
                let ignored = relative_path(&root, entry.path())
                    .is_some_and(|rel| ignore.iter().any(|re| re.is_match(&rel)));
                !hidden && !ignored
            });

        for entry in walker {
            let entry = entry?;
            let Some(rel) = relative_path(&self.root, entry.path()) else {
                continue;
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                if !rel.is_empty() {
                    self.insert_directory(&rel);
                    seen.insert(rel);
                }
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let meta = entry.metadata()?;
            seen.insert(rel.clone());
            match self.scan_file(&rel, entry.path(), &meta, false) {
                Ok(()) => {}
                Err(e @ (StoreError::Parse { .. } | StoreError::Encoding { .. })) => {
                    tracing::error!("{}", e);
                    self.forget(&rel);
                }
                Err(e) => return Err(e),
            }
        }

        let stale: Vec<String> = self
            .files
            .keys()
            .filter(|path| is_within(path, rel_dir) && !seen.contains(*path))
            .cloned()
            .collect();
        for path in stale {
            tracing::debug!("Dropping {} from index: no longer on disk", path);
            self.forget(&path);
        }

        Ok(())
    }

    fn scan_file(
        &mut self,
        rel: &str,
        full: &Path,
        meta: &fs::Metadata,
        verify_content: bool,
    ) -> Result<(), StoreError> {
        let kind = FileKind::from_extension(full.extension().and_then(|e| e.to_str()));
        let modified = meta.modified().ok().map(DateTime::<Utc>::from);
        let size = meta.len();

        let unchanged_stat = self.files.get(rel).is_some_and(|doc| {
            doc.kind == kind && doc.size == size && doc.modified_at.is_some() && doc.modified_at == modified
        });
        if unchanged_stat && (!verify_content || !kind.is_document()) {
            return Ok(());
        }

        let mut doc = Document {
            path: rel.to_string(),
            kind,
            loaded_at: Utc::now(),
            created_at: modified,
            modified_at: modified,
            size,
            parsed: None,
        };

        if kind.is_document() {
            let content = read_text(full, rel)?;
            let fingerprint = fingerprint(&content);
            if unchanged_stat && self.fingerprints.get(rel) == Some(&fingerprint) {
                return Ok(());
            }

            let parsed = self
                .parser
                .parse(&content)
                .map_err(|source| StoreError::Parse {
                    path: rel.to_string(),
                    source,
                })?;
            doc.parsed = Some(parsed);
            self.fingerprints.insert(rel.to_string(), fingerprint);
        }

        self.insert(doc);
        Ok(())
    }

    fn insert_directory(&mut self, rel: &str) {
        let mut dir = Some(rel);
        while let Some(d) = dir {
            if self.files.contains_key(d) {
                break;
            }
            self.files.insert(d.to_string(), Document::directory(d));
            dir = parent_dir(d);
        }
    }

    fn insert(&mut self, doc: Document) {
        let released = self.files.get(&doc.path).and_then(|previous| {
            let old_slug = previous.slug();
            (old_slug != doc.slug() && self.slugs.get(&old_slug) == Some(&doc.path))
                .then_some(old_slug)
        });

        if doc.is_document() {
            let slug = doc.slug();
            if !slug.is_empty() {
                if let Some(existing) = self.slugs.get(&slug) {
                    if existing != &doc.path {
                        tracing::warn!(
                            "Slug collision: '{}' claimed by {} and {}; using {}",
                            slug,
                            existing,
                            doc.path,
                            doc.path
                        );
                    }
                }
                self.slugs.insert(slug, doc.path.clone());
            }
        }

        let path = doc.path.clone();
        self.files.insert(path.clone(), doc);
        if let Some(old_slug) = released {
            self.release_slug(&old_slug, &path);
        }
    }

    fn forget(&mut self, rel: &str) {
        self.fingerprints.remove(rel);
        let Some(doc) = self.files.remove(rel) else {
            return;
        };

        self.release_slug(&doc.slug(), rel);
    }

    /// Drop `owner`'s claim on `slug`, handing it to the remaining claimant
    /// with the greatest path
    fn release_slug(&mut self, slug: &str, owner: &str) {
        if self.slugs.get(slug).map(String::as_str) != Some(owner) {
            return;
        }
        self.slugs.remove(slug);

        let next = self
            .files
            .values()
            .filter(|d| d.path != owner && d.is_document() && d.slug() == slug)
            .map(|d| d.path.clone())
            .max();
        if let Some(path) = next {
            self.slugs.insert(slug.to_string(), path);
        }
    }

    fn forget_tree(&mut self, rel: &str) {
        let doomed: Vec<String> = self
            .files
            .keys()
            .filter(|path| is_within(path, rel))
            .cloned()
            .collect();
        for path in doomed {
            self.forget(&path);
        }
    }
}

/// Clean a caller-supplied path into the index key form
///
/// Backslashes become `/`, empty and `.` segments are dropped, and `..` is
/// rejected. The content root itself normalizes to the empty string.
pub fn normalize_path(path: &str) -> Result<String, StoreError> {
    let unified = path.replace('\\', "/");
    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(StoreError::InvalidPath(path.to_string())),
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}

fn read_text(full: &Path, rel: &str) -> Result<String, StoreError> {
    let bytes = fs::read(full).map_err(io_error(full))?;
    String::from_utf8(bytes).map_err(|source| StoreError::Encoding {
        path: rel.to_string(),
        source,
    })
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

fn is_within(path: &str, dir: &str) -> bool {
    dir.is_empty()
        || path == dir
        || (path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/')
}

fn fingerprint(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn test_load_indexes_files_and_directories() {
        let dir = TempDir::new().unwrap();
        write(&dir, "index.md", "# Home");
        write(&dir, "blog/post.md", "# Post");
        write(&dir, "blog/deep/page.html", "<p>hi</p>");
        write(&dir, "img/cat.png", "binary");
        write(&dir, ".git/config", "hidden");

        let store = store(&dir);
        let paths: Vec<&str> = store.all_files().iter().map(|d| d.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "blog",
                "blog/deep",
                "blog/deep/page.html",
                "blog/post.md",
                "img",
                "img/cat.png",
                "index.md"
            ]
        );

        assert_eq!(store.do_path("blog").unwrap().kind, FileKind::Directory);
        assert_eq!(store.do_path("img/cat.png").unwrap().kind, FileKind::Static);
        assert!(store.do_path("img/cat.png").unwrap().parsed.is_none());
        assert_eq!(store.documents().len(), 3);
    }

    #[test]
    fn test_do_path_by_path_then_slug() {
        let dir = TempDir::new().unwrap();
        write(&dir, "blog/post.md", "---\nslug: hello\n---\nBody");

        let store = store(&dir);
        assert!(store.do_path("blog/post.md").is_some());
        assert!(store.do_path("./blog/post.md").is_some());
        assert_eq!(store.do_path("blog/hello").unwrap().path, "blog/post.md");
        assert_eq!(store.do_path("/blog/hello").unwrap().path, "blog/post.md");
        assert!(store.do_path("blog/post").is_none());
        assert!(store.do_path("../etc/passwd").is_none());
    }

    #[test]
    fn test_parse_failure_skipped_on_load() {
        let dir = TempDir::new().unwrap();
        write(&dir, "good.md", "fine");
        write(&dir, "bad.md", "---\nkey: [oops\n---\nbody");

        let mut store = store(&dir);
        assert!(store.do_path("good.md").is_some());
        assert!(store.do_path("bad.md").is_none());

        let err = store.refresh_content("bad.md").unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
    }

    #[test]
    fn test_refresh_picks_up_changes() {
        let dir = TempDir::new().unwrap();
        write(&dir, "note.md", "# First");
        let mut store = store(&dir);
        assert_eq!(store.do_path("note.md").unwrap().title(), "First");

        // same length content so only the fingerprint can tell
        write(&dir, "note.md", "# Other");
        store.refresh_content("note.md").unwrap();
        assert_eq!(store.do_path("note.md").unwrap().title(), "Other");
    }

    #[test]
    fn test_refresh_unchanged_is_noop() {
        let dir = TempDir::new().unwrap();
        write(&dir, "note.md", "# Same");
        let mut store = store(&dir);
        let loaded_at = store.do_path("note.md").unwrap().loaded_at;

        store.refresh_content("note.md").unwrap();
        store.refresh_content("").unwrap();
        assert_eq!(store.do_path("note.md").unwrap().loaded_at, loaded_at);
    }

    #[test]
    fn test_refresh_removed_file() {
        let dir = TempDir::new().unwrap();
        write(&dir, "blog/a.md", "---\nslug: alpha\n---\n");
        write(&dir, "blog/b.md", "b");
        let mut store = store(&dir);

        fs::remove_file(dir.path().join("blog/a.md")).unwrap();
        store.refresh_content("blog/a.md").unwrap();
        assert!(store.do_path("blog/a.md").is_none());
        assert!(store.do_path("blog/alpha").is_none());

        fs::remove_file(dir.path().join("blog/b.md")).unwrap();
        store.refresh_content("blog").unwrap();
        assert!(store.do_path("blog/b.md").is_none());
        assert!(store.do_path("blog").is_some());
    }

    #[test]
    fn test_refresh_new_file_creates_directories() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        store
            .write_content_file("notes/2024/new.md", "# New")
            .unwrap();
        // write alone does not index
        assert!(store.do_path("notes/2024/new.md").is_none());

        store.refresh_content("notes/2024/new.md").unwrap();
        assert!(store.do_path("notes/2024/new.md").is_some());
        assert_eq!(store.do_path("notes").unwrap().kind, FileKind::Directory);
        assert_eq!(store.do_path("notes/2024").unwrap().kind, FileKind::Directory);
    }

    #[test]
    fn test_slug_collision_last_writer_wins() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.md", "---\nslug: same\n---\n");
        write(&dir, "b.md", "---\nslug: same\n---\n");

        let mut store = store(&dir);
        assert_eq!(store.do_path("same").unwrap().path, "b.md");

        fs::remove_file(dir.path().join("b.md")).unwrap();
        store.refresh_content("b.md").unwrap();
        assert_eq!(store.do_path("same").unwrap().path, "a.md");
    }

    #[test]
    fn test_slug_handed_over_when_winner_changes_slug() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.md", "---\nslug: same\n---\n");
        write(&dir, "b.md", "---\nslug: same\n---\n");

        let mut store = store(&dir);
        assert_eq!(store.do_path("same").unwrap().path, "b.md");

        write(&dir, "b.md", "---\nslug: other\n---\n");
        store.refresh_content("b.md").unwrap();
        assert_eq!(store.do_path("same").unwrap().path, "a.md");
        assert_eq!(store.do_path("other").unwrap().path, "b.md");
    }

    #[test]
    fn test_invalid_utf8_skipped_on_load() {
        let dir = TempDir::new().unwrap();
        write(&dir, "good.md", "# Good");
        fs::write(dir.path().join("latin1.md"), b"# Caf\xe9\n").unwrap();

        let mut store = store(&dir);
        assert!(store.do_path("good.md").is_some());
        assert!(store.do_path("latin1.md").is_none());

        assert!(matches!(
            store.refresh_content("latin1.md"),
            Err(StoreError::Encoding { .. })
        ));
        assert!(matches!(
            store.read_content_file("latin1.md"),
            Err(StoreError::Encoding { .. })
        ));
    }

    #[test]
    fn test_private_cascade() {
        let dir = TempDir::new().unwrap();
        write(&dir, "secret/index.md", "---\nprivate: true\n---\n");
        write(&dir, "secret/deeper/note.md", "note");
        write(&dir, "public/note.md", "note");
        write(&dir, "public/own.md", "---\nprivate: true\n---\n");

        let store = store(&dir);
        let check = |p: &str| store.is_private(store.do_path(p).unwrap());
        assert!(check("secret/index.md"));
        assert!(check("secret/deeper/note.md"));
        assert!(!check("public/note.md"));
        assert!(check("public/own.md"));
    }

    #[test]
    fn test_private_root_index_hides_everything() {
        let dir = TempDir::new().unwrap();
        write(&dir, "index.md", "---\nprivate: true\n---\n");
        write(&dir, "blog/deep/post.md", "post");

        let store = store(&dir);
        assert!(store.is_private(store.do_path("blog/deep/post.md").unwrap()));
    }

    #[test]
    fn test_ignore_patterns() {
        let dir = TempDir::new().unwrap();
        write(&dir, "drafts/wip.md", "wip");
        write(&dir, "post.md", "post");

        let mut store = ContentStore::new(dir.path(), ParserConfig::default())
            .with_ignore_patterns(&["^drafts".to_string()])
            .unwrap();
        store.load_content().unwrap();
        assert!(store.do_path("drafts/wip.md").is_none());
        assert!(store.do_path("post.md").is_some());

        let bad = ContentStore::new(dir.path(), ParserConfig::default())
            .with_ignore_patterns(&["(".to_string()]);
        assert!(matches!(bad, Err(StoreError::IgnorePattern { .. })));
    }

    #[test]
    fn test_read_write_rename() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.write_content_file("a/b.md", "hello").unwrap();
        assert_eq!(store.read_content_file("a/b.md").unwrap(), "hello");

        store.rename_content_file("a/b.md", "c/d.md").unwrap();
        assert!(matches!(
            store.read_content_file("a/b.md"),
            Err(StoreError::Io { .. })
        ));
        assert_eq!(store.read_content_file("c/d.md").unwrap(), "hello");

        store.write_content_file("e.md", "x").unwrap();
        assert!(matches!(
            store.rename_content_file("e.md", "c/d.md"),
            Err(StoreError::AlreadyExists(_))
        ));
        assert!(matches!(
            store.write_content_file("../escape.md", "x"),
            Err(StoreError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_missing_root_is_error() {
        let mut store = ContentStore::new("/definitely/not/here", ParserConfig::default());
        assert!(matches!(store.load_content(), Err(StoreError::Io { .. })));
    }

    #[test]
    fn test_reload_content() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.md", "a");
        let mut store = store(&dir);

        write(&dir, "b.md", "b");
        store.reload_content().unwrap();
        assert_eq!(store.documents().len(), 2);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./blog//post.md").unwrap(), "blog/post.md");
        assert_eq!(normalize_path("\\blog\\post.md").unwrap(), "blog/post.md");
        assert_eq!(normalize_path(".").unwrap(), "");
        assert!(normalize_path("blog/../../x").is_err());
    }
}
