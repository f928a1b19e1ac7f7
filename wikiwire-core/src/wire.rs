//! Query materialization.
//!
//! Documents embed query blocks between two sentinel comments:
//!
//! ```text
//! <!-- <query type="posts" path="blog/*" limit="5"> -->
//! - 2024-01-03 - [Newest](/blog/newest)
//! <!-- </query> -->
//! ```
//!
//! [`Wire`] remembers where each block lives and rewrites the lines between
//! the sentinels with fresh query output. The sentinel lines themselves are
//! never touched. Rewrites are plain file writes, so a crash mid-write can
//! leave a torn file.

use crate::models::{Document, FileKind};
use crate::query::{matches_path_pattern, parse_query, QueryAst, QueryExecutor, QueryType};
use crate::store::{normalize_path, ContentStore, StoreError};
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

static QUERY_START_REGEX: OnceLock<Regex> = OnceLock::new();
static QUERY_END_REGEX: OnceLock<Regex> = OnceLock::new();

fn query_start_regex() -> &'static Regex {
    QUERY_START_REGEX.get_or_init(|| Regex::new(r"<!--\s*<query\s+([^>]+)>\s*-->").unwrap())
}

fn query_end_regex() -> &'static Regex {
    QUERY_END_REGEX.get_or_init(|| Regex::new(r"<!--\s*</query>\s*-->").unwrap())
}

#[derive(Error, Debug)]
pub enum WireError {
    #[error("File not found in content store: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Query region at {path}:{line} no longer matches its sentinels")]
    StaleRegion { path: String, line: usize },
}

/// One query block inside a document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryLocation {
    pub file_path: String,
    /// Zero-based line of the opening sentinel
    pub start_line: usize,
    /// Zero-based line of the closing sentinel
    pub end_line: usize,
    pub query: QueryAst,
    /// Generated lines between the sentinels at scan time
    pub content: Vec<String>,
    pub open_line: String,
    pub close_line: String,
}

impl QueryLocation {
    /// Swap the generated lines for `replacement`
    ///
    /// Fails without touching `lines` when the sentinels are no longer where
    /// the scan found them.
    pub fn replace_region(
        &self,
        lines: &mut Vec<String>,
        replacement: Vec<String>,
    ) -> Result<(), WireError> {
        let intact = self.start_line < self.end_line
            && lines.get(self.start_line) == Some(&self.open_line)
            && lines.get(self.end_line) == Some(&self.close_line);
        if !intact {
            return Err(WireError::StaleRegion {
                path: self.file_path.clone(),
                line: self.start_line + 1,
            });
        }

        lines.splice(self.start_line + 1..self.end_line, replacement);
        Ok(())
    }
}

/// Find every well-formed query block in `text`
///
/// Blocks whose tag fails to parse are skipped. An opening sentinel without
/// a matching close is dropped.
pub fn extract_queries(file_path: &str, text: &str) -> Vec<QueryLocation> {
    struct Open<'t> {
        line: usize,
        raw: &'t str,
        sentinel: &'t str,
        content: Vec<String>,
    }

    let mut found = Vec::new();
    let mut open: Option<Open<'_>> = None;

    for (i, line) in text.split('\n').enumerate() {
        if let Some(caps) = query_start_regex().captures(line) {
            if let Some(prev) = &open {
                tracing::debug!(
                    "{}:{}: query block never closed, discarding",
                    file_path,
                    prev.line + 1
                );
            }
            open = Some(Open {
                line: i,
                raw: caps.get(1).map_or("", |m| m.as_str()),
                sentinel: line,
                content: Vec::new(),
            });
        } else if query_end_regex().is_match(line) {
            let Some(block) = open.take() else {
                continue;
            };
            match parse_query(&format!("<query {}>", block.raw)) {
                Ok(query) => found.push(QueryLocation {
                    file_path: file_path.to_string(),
                    start_line: block.line,
                    end_line: i,
                    query,
                    content: block.content,
                    open_line: block.sentinel.to_string(),
                    close_line: line.to_string(),
                }),
                Err(e) => tracing::debug!(
                    "{}:{}: skipping query block: {}",
                    file_path,
                    block.line + 1,
                    e
                ),
            }
        } else if let Some(block) = open.as_mut() {
            block.content.push(line.to_string());
        }
    }

    found
}

/// Registry of query blocks, keyed by document path
#[derive(Debug, Default)]
pub struct Wire {
    queries: HashMap<String, Vec<QueryLocation>>,
}

impl Wire {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the registry from every markdown and html document
    ///
    /// Documents that can no longer be read are logged and skipped.
    pub fn scan_for_queries(&mut self, store: &ContentStore) -> Result<(), WireError> {
        self.queries.clear();
        for doc in store.documents() {
            match store.read_content_file(&doc.path) {
                Ok(text) => self.set_locations(&doc.path, extract_queries(&doc.path, &text)),
                Err(e) => tracing::warn!("Skipping {} while scanning for queries: {}", doc.path, e),
            }
        }
        tracing::info!(
            "Found {} query blocks in {} documents",
            self.query_count(),
            self.queries.len()
        );
        Ok(())
    }

    /// Replace the registry entry for one document
    pub fn scan_content_file_for_queries(
        &mut self,
        store: &ContentStore,
        path: &str,
    ) -> Result<(), WireError> {
        let doc = store
            .do_path(path)
            .ok_or_else(|| WireError::NotFound(path.to_string()))?;
        if !doc.is_document() {
            self.queries.remove(&doc.path);
            return Ok(());
        }

        let text = store.read_content_file(&doc.path)?;
        let key = doc.path.clone();
        let locations = extract_queries(&key, &text);
        self.set_locations(&key, locations);
        Ok(())
    }

    /// Re-materialize every query block owned by `path`
    ///
    /// Each block is rewritten independently; a stale block is logged and
    /// left alone while the others still update. The file is only written
    /// when its text changes. Refreshing the store afterwards is the
    /// caller's job.
    pub fn notify_file_changed(
        &mut self,
        store: &ContentStore,
        path: &str,
    ) -> Result<(), WireError> {
        let doc = store
            .do_path(path)
            .ok_or_else(|| WireError::NotFound(path.to_string()))?;
        let Some(locations) = self.queries.get(&doc.path).filter(|l| !l.is_empty()) else {
            return Ok(());
        };

        let original = store.read_content_file(&doc.path)?;
        let mut lines: Vec<String> = original.split('\n').map(str::to_string).collect();
        let crlf = original.contains("\r\n");
        let executor = QueryExecutor::new(store);

        // bottom-up so earlier line numbers stay valid
        let mut order: Vec<&QueryLocation> = locations.iter().collect();
        order.sort_by(|a, b| b.start_line.cmp(&a.start_line));

        let mut updated = 0;
        for location in order {
            let mut results = executor.execute(doc, &location.query);
            if crlf {
                for line in &mut results {
                    line.push('\r');
                }
            }
            match location.replace_region(&mut lines, results) {
                Ok(()) => updated += 1,
                Err(e) => tracing::warn!("Skipping query block: {}", e),
            }
        }

        let text = lines.join("\n");
        if text != original {
            store.write_content_file(&doc.path, &text)?;
            tracing::info!("Materialized {} query blocks in {}", updated, doc.path);
        } else {
            tracing::debug!("Query output for {} unchanged", doc.path);
        }

        let key = doc.path.clone();
        let fresh = extract_queries(&key, &text);
        self.set_locations(&key, fresh);
        Ok(())
    }

    /// Documents whose query blocks could include `path`, sorted by path
    pub fn find_dependencies(&self, store: &ContentStore, path: &str) -> Vec<String> {
        let Ok(changed) = normalize_path(path) else {
            return Vec::new();
        };
        let doc = store.do_path(&changed);
        let changed = doc.map_or(changed, |d| d.path.clone());

        let mut dependents: Vec<String> = self
            .queries
            .iter()
            .filter(|(owner, _)| **owner != changed)
            .filter(|(_, locations)| {
                locations
                    .iter()
                    .any(|loc| query_may_include(&loc.query, &changed, doc))
            })
            .map(|(owner, _)| owner.clone())
            .collect();
        dependents.sort();
        dependents
    }

    /// Notify every dependent of `path`, returning those that succeeded
    pub fn trigger_dependency_updates(&mut self, store: &ContentStore, path: &str) -> Vec<String> {
        let mut updated = Vec::new();
        for dependent in self.find_dependencies(store, path) {
            match self.notify_file_changed(store, &dependent) {
                Ok(()) => updated.push(dependent),
                Err(e) => tracing::error!(
                    "Failed to update {} after change to {}: {}",
                    dependent,
                    path,
                    e
                ),
            }
        }
        updated
    }

    /// Documents currently selected by the query blocks of `path`
    ///
    /// Results from several blocks are merged in first-seen order.
    pub fn get_query_results_for_post<'s>(
        &self,
        store: &'s ContentStore,
        path: &str,
    ) -> Vec<&'s Document> {
        let Some(doc) = store.do_path(path) else {
            return Vec::new();
        };
        let Some(locations) = self.queries.get(&doc.path) else {
            return Vec::new();
        };

        let executor = QueryExecutor::new(store);
        let mut seen = HashSet::new();
        let mut results = Vec::new();
        for location in locations {
            for found in executor.select(doc, &location.query) {
                if seen.insert(found.path.as_str()) {
                    results.push(found);
                }
            }
        }
        results
    }

    pub fn post_has_queries(&self, path: &str) -> bool {
        self.locations(path).is_some_and(|l| !l.is_empty())
    }

    pub fn locations(&self, path: &str) -> Option<&[QueryLocation]> {
        let key = normalize_path(path).ok()?;
        self.queries.get(&key).map(Vec::as_slice)
    }

    pub fn query_count(&self) -> usize {
        self.queries.values().map(Vec::len).sum()
    }

    /// Drop every block registered for `path`
    pub fn forget(&mut self, path: &str) {
        if let Ok(key) = normalize_path(path) {
            self.queries.remove(&key);
        }
    }

    fn set_locations(&mut self, path: &str, locations: Vec<QueryLocation>) {
        if locations.is_empty() {
            self.queries.remove(path);
        } else {
            self.queries.insert(path.to_string(), locations);
        }
    }
}

fn query_may_include(query: &QueryAst, changed: &str, doc: Option<&Document>) -> bool {
    let is_document = match doc {
        Some(d) => d.is_document(),
        None => FileKind::from_extension(Path::new(changed).extension().and_then(|e| e.to_str()))
            .is_document(),
    };
    if !is_document {
        return false;
    }

    match query.query_type {
        QueryType::Posts | QueryType::Pages => {
            // index pages are never listed, but their privacy cascades
            let in_scope = query
                .path
                .as_deref()
                .map_or(true, |pattern| matches_path_pattern(changed, pattern));
            in_scope || crate::models::is_index_path(changed)
        }
        // a removed document may have carried links
        QueryType::Backlinks => doc.map_or(true, |d| {
            d.parsed.as_ref().is_some_and(|p| !p.wiki_links.is_empty())
        }),
    }
}
