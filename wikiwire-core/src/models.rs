//! Core data models for indexed content.

use crate::frontmatter::{Frontmatter, FrontmatterValue};
use crate::markdown::ParsedContent;
use crate::slug::document_slug;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::path::Path;
pub use wikiwire_types::FileKind;

/// Frontmatter keys consulted for the creation date, in order
const CREATED_KEYS: [&str; 3] = ["created", "_created", "date"];

/// Frontmatter keys consulted for the modification date, in order
const MODIFIED_KEYS: [&str; 3] = ["modified", "_modified", "updated"];

/// Unix timestamps above this are read as milliseconds
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// One entry of the content tree
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Path relative to the content root, `/`-separated
    pub path: String,
    pub kind: FileKind,
    pub loaded_at: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub size: u64,
    /// Present for markdown and html documents
    pub parsed: Option<ParsedContent>,
}

impl Document {
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::Directory,
            loaded_at: Utc::now(),
            created_at: None,
            modified_at: None,
            size: 0,
            parsed: None,
        }
    }

    /// Document built from parsed content, not yet on disk
    pub fn with_content(path: impl Into<String>, kind: FileKind, parsed: ParsedContent) -> Self {
        Self {
            path: path.into(),
            kind,
            loaded_at: Utc::now(),
            created_at: None,
            modified_at: None,
            size: 0,
            parsed: Some(parsed),
        }
    }

    pub fn is_document(&self) -> bool {
        self.kind.is_document()
    }

    /// File name is `index.md` or `index.html`
    pub fn is_index(&self) -> bool {
        is_index_path(&self.path)
    }

    pub fn frontmatter(&self) -> Option<&Frontmatter> {
        self.parsed.as_ref().and_then(|p| p.frontmatter.as_ref())
    }

    /// Display title, falling back to the file stem
    pub fn title(&self) -> String {
        if let Some(title) = self
            .parsed
            .as_ref()
            .map(|p| p.title.trim())
            .filter(|t| !t.is_empty())
        {
            return title.to_string();
        }

        Path::new(&self.path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.path)
            .to_string()
    }

    /// Public identifier, without a leading slash
    pub fn slug(&self) -> String {
        if self.kind == FileKind::Directory {
            return self.path.clone();
        }
        let custom = self.frontmatter().and_then(|fm| fm.get_string("slug"));
        document_slug(&self.path, custom.as_deref())
    }

    /// Public URL path: the slug with a leading slash
    pub fn url(&self) -> String {
        format!("/{}", self.slug())
    }

    pub fn hashtags(&self) -> &[String] {
        self.parsed
            .as_ref()
            .map(|p| p.hashtags.as_slice())
            .unwrap_or(&[])
    }

    pub fn date_created(&self) -> Option<DateTime<Utc>> {
        self.frontmatter_date(&CREATED_KEYS).or(self.created_at)
    }

    pub fn date_modified(&self) -> Option<DateTime<Utc>> {
        self.frontmatter_date(&MODIFIED_KEYS).or(self.modified_at)
    }

    /// Frontmatter `private: true`; directory inheritance is the store's job
    pub fn is_private(&self) -> bool {
        self.frontmatter()
            .and_then(|fm| fm.get_bool("private"))
            .unwrap_or(false)
    }

    fn frontmatter_date(&self, keys: &[&str]) -> Option<DateTime<Utc>> {
        let fm = self.frontmatter()?;
        keys.iter()
            .filter_map(|key| fm.get_value(key))
            .find_map(parse_date_value)
    }
}

pub fn is_index_path(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.eq_ignore_ascii_case("index.md") || name.eq_ignore_ascii_case("index.html")
}

/// Read a frontmatter value as a UTC timestamp
///
/// Accepts unix seconds or milliseconds (number or digit string), RFC 3339,
/// `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DD`.
pub fn parse_date_value(value: &FrontmatterValue) -> Option<DateTime<Utc>> {
    match value {
        FrontmatterValue::Integer(ts) => from_unix(*ts),
        FrontmatterValue::Float(ts) if ts.fract() == 0.0 => from_unix(*ts as i64),
        FrontmatterValue::String(s) | FrontmatterValue::DateTime(s) => parse_date_str(s),
        _ => None,
    }
}

fn from_unix(ts: i64) -> Option<DateTime<Utc>> {
    if ts <= 0 {
        return None;
    }
    if ts > MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(ts).single()
    } else {
        Utc.timestamp_opt(ts, 0).single()
    }
}

pub fn parse_date_str(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse::<i64>().ok().and_then(from_unix);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}
