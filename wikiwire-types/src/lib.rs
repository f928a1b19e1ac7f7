//! Shared types for wikiwire
//!
//! This crate provides plain-data types used across the wikiwire crates,
//! including file kinds and content change events.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of entry tracked by the content store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Markdown,
    Html,
    Static,
    Directory,
}

impl FileKind {
    /// Classify a file by its extension (case-insensitive).
    pub fn from_extension(ext: Option<&str>) -> Self {
        match ext.map(|e| e.to_ascii_lowercase()).as_deref() {
            Some("md") => FileKind::Markdown,
            Some("html") => FileKind::Html,
            _ => FileKind::Static,
        }
    }

    /// Markdown and HTML documents carry parsed content and may own query blocks
    pub fn is_document(&self) -> bool {
        matches!(self, FileKind::Markdown | FileKind::Html)
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileKind::Markdown => "markdown",
            FileKind::Html => "html",
            FileKind::Static => "static",
            FileKind::Directory => "directory",
        };
        f.write_str(name)
    }
}

/// Content change event
///
/// Emitted by the save path after a mutation has hit the disk, and used to
/// decide which other documents need their query blocks re-materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentChange {
    /// A document was created or edited in place
    Saved { path: String },

    /// A document was moved
    Renamed { from: String, to: String },
}

impl ContentChange {
    /// Every path whose listings may have changed
    pub fn affected_paths(&self) -> Vec<&str> {
        match self {
            ContentChange::Saved { path } => vec![path.as_str()],
            ContentChange::Renamed { from, to } => vec![from.as_str(), to.as_str()],
        }
    }

    /// Path of the document as it exists after the change
    pub fn current_path(&self) -> &str {
        match self {
            ContentChange::Saved { path } => path,
            ContentChange::Renamed { to, .. } => to,
        }
    }
}
