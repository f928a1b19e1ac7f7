//! # wikiwire-core
//!
//! Core library for wikiwire, a file-backed content store whose pages can
//! embed self-updating query blocks.
//!
//! This crate provides the frontmatter codec, the markdown parser with its
//! inline extensions, the in-memory content index, the query language and
//! executor, and the materialization engine that rewrites query blocks when
//! content changes.

pub mod config;
pub mod frontmatter;
pub mod markdown;
pub mod models;
pub mod query;
pub mod save;
pub mod slug;
pub mod store;
pub mod wire;

pub use config::Config;
pub use frontmatter::{Frontmatter, FrontmatterStyle, FrontmatterValue};
pub use markdown::{MarkdownParser, ParsedContent, ParserConfig};
pub use models::{Document, FileKind};
pub use query::{parse_query, QueryAst, QueryExecutor};
pub use save::{rename_file_detail, save_file_detail, SaveError};
pub use slug::slugify;
pub use store::{ContentStore, StoreError};
pub use wire::{QueryLocation, Wire, WireError};
pub use wikiwire_types::ContentChange;
