//! Query blocks: the `<query ...>` tag language and its executor.
//!
//! A query is a single pseudo-XML tag, usually wrapped in an HTML comment:
//!
//! ```text
//! <!-- <query type="posts" path="blog/*" sort="recent" limit="5"> -->
//! ```

pub mod exec;
pub mod glob;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub use exec::{format_results, QueryExecutor};
pub use glob::matches_path_pattern;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Failed to parse query XML: {0}")]
    Xml(String),

    #[error("Expected a <query> tag, found <{0}>")]
    NotAQuery(String),

    #[error("Query has no type attribute")]
    MissingType,

    #[error("Unknown query type: {0}")]
    UnknownType(String),

    #[error("Invalid where clause: {0}")]
    InvalidWhere(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Posts,
    Pages,
    Backlinks,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Posts => "posts",
            QueryType::Pages => "pages",
            QueryType::Backlinks => "backlinks",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Recent,
    Date,
    Modified,
    Title,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Recent => "recent",
            SortKey::Date => "date",
            SortKey::Modified => "modified",
            SortKey::Title => "title",
        }
    }

    /// Sorts by a timestamp rather than by text
    pub fn is_time_based(&self) -> bool {
        !matches!(self, SortKey::Title)
    }

    pub fn default_order(&self) -> SortOrder {
        if self.is_time_based() {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Markdown rendering of query results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MdFormat {
    List,
    ListWithDate,
    Detailed,
    Table,
}

impl MdFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MdFormat::List => "list",
            MdFormat::ListWithDate => "list-with-date",
            MdFormat::Detailed => "detailed",
            MdFormat::Table => "table",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "list" => Some(MdFormat::List),
            "list-with-date" | "list-date" => Some(MdFormat::ListWithDate),
            "detailed" => Some(MdFormat::Detailed),
            "table" => Some(MdFormat::Table),
            _ => None,
        }
    }
}

/// `field operator value`, e.g. `tag contains 'rust'`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryFilter {
    pub field: String,
    pub operator: String,
    pub value: String,
}

impl QueryFilter {
    pub fn new(field: &str, operator: &str, value: &str) -> Self {
        Self {
            field: field.to_string(),
            operator: operator.to_string(),
            value: value.to_string(),
        }
    }
}

/// A parsed query tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryAst {
    pub query_type: QueryType,
    /// Path glob restricting candidates
    pub path: Option<String>,
    pub sort: SortKey,
    pub order: SortOrder,
    /// Zero means unlimited
    pub limit: usize,
    pub filters: Vec<QueryFilter>,
    pub md_format: MdFormat,
    pub html_template: Option<String>,
    pub include_private: bool,
}

impl QueryAst {
    pub fn new(query_type: QueryType) -> Self {
        Self {
            query_type,
            path: None,
            sort: SortKey::Recent,
            order: SortKey::Recent.default_order(),
            limit: 0,
            filters: Vec::new(),
            md_format: MdFormat::ListWithDate,
            html_template: None,
            include_private: false,
        }
    }
}

impl fmt::Display for QueryAst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.query_type.as_str())?;
        if let Some(path) = &self.path {
            write!(f, " path:{path}")?;
        }
        write!(f, " sort:{} order:{}", self.sort.as_str(), self.order.as_str())?;
        if self.limit > 0 {
            write!(f, " limit:{}", self.limit)?;
        }
        for filter in &self.filters {
            write!(
                f,
                " where:{} {} '{}'",
                filter.field, filter.operator, filter.value
            )?;
        }
        if let Some(template) = &self.html_template {
            write!(f, " template:{template}")?;
        }
        write!(f, " format:{}", self.md_format.as_str())?;
        if self.include_private {
            write!(f, " include-private")?;
        }
        Ok(())
    }
}

/// Raw attribute values of a query tag
#[derive(Default)]
struct QueryAttrs {
    query_type: Option<String>,
    path: Option<String>,
    sort: Option<String>,
    order: Option<String>,
    limit: Option<String>,
    html_template: Option<String>,
    md_format: Option<String>,
    where_clause: Option<String>,
    tag: Option<String>,
    include_private: Option<String>,
}

/// Parse a query tag
///
/// Surrounding comment markers are stripped and an open tag is treated as
/// self-closing. `type` is required; every other attribute has a default.
pub fn parse_query(input: &str) -> Result<QueryAst, QueryError> {
    let mut source = input.trim();
    source = source.strip_prefix("<!--").unwrap_or(source);
    source = source.strip_suffix("-->").unwrap_or(source);
    let source = source.trim();

    let tag = if !source.ends_with("/>") && source.ends_with('>') {
        format!("{}/>", &source[..source.len() - 1])
    } else {
        source.to_string()
    };

    let attrs = read_query_tag(&tag)?;
    build_ast(attrs)
}

fn read_query_tag(xml: &str) -> Result<QueryAttrs, QueryError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) => return collect_attrs(&e),
            Ok(Event::Eof) => return Err(QueryError::Xml("no element found".to_string())),
            Ok(_) => continue,
            Err(e) => return Err(QueryError::Xml(e.to_string())),
        }
    }
}

fn collect_attrs(element: &BytesStart<'_>) -> Result<QueryAttrs, QueryError> {
    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    if name != "query" {
        return Err(QueryError::NotAQuery(name));
    }

    let mut attrs = QueryAttrs::default();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| QueryError::Xml(e.to_string()))?;
        let raw = std::str::from_utf8(attr.value.as_ref())
            .map_err(|e| QueryError::Xml(e.to_string()))?;
        let value = quick_xml::escape::unescape(raw)
            .map_err(|e| QueryError::Xml(e.to_string()))?
            .into_owned();

        let slot = match attr.key.as_ref() {
            b"type" => &mut attrs.query_type,
            b"path" => &mut attrs.path,
            b"sort" => &mut attrs.sort,
            b"order" => &mut attrs.order,
            b"limit" => &mut attrs.limit,
            b"html-template" => &mut attrs.html_template,
            b"md-format" => &mut attrs.md_format,
            b"where" => &mut attrs.where_clause,
            b"tag" => &mut attrs.tag,
            b"include-private" => &mut attrs.include_private,
            other => {
                tracing::debug!(
                    "Ignoring unknown query attribute '{}'",
                    String::from_utf8_lossy(other)
                );
                continue;
            }
        };
        *slot = Some(value);
    }
    Ok(attrs)
}

fn build_ast(attrs: QueryAttrs) -> Result<QueryAst, QueryError> {
    let query_type = match attrs.query_type.as_deref().map(str::to_lowercase) {
        None => return Err(QueryError::MissingType),
        Some(t) => match t.as_str() {
            "posts" => QueryType::Posts,
            "pages" => QueryType::Pages,
            "backlinks" => QueryType::Backlinks,
            _ => return Err(QueryError::UnknownType(t)),
        },
    };

    let mut query = QueryAst::new(query_type);
    query.path = non_empty(attrs.path);
    query.html_template = non_empty(attrs.html_template);

    if let Some(sort) = non_empty(attrs.sort) {
        query.sort = match sort.to_lowercase().as_str() {
            "recent" => SortKey::Recent,
            "date" => SortKey::Date,
            "modified" => SortKey::Modified,
            "title" => SortKey::Title,
            other => {
                tracing::warn!("Unknown query sort '{}', using recent", other);
                SortKey::Recent
            }
        };
    }

    query.order = match non_empty(attrs.order).map(|o| o.to_lowercase()) {
        Some(o) if o == "asc" => SortOrder::Asc,
        Some(o) if o == "desc" => SortOrder::Desc,
        Some(o) => {
            tracing::warn!("Unknown query order '{}', using default", o);
            query.sort.default_order()
        }
        None => query.sort.default_order(),
    };

    if let Some(limit) = attrs.limit {
        // non-numeric and negative limits leave the query unlimited
        if let Ok(n) = limit.trim().parse::<i64>() {
            query.limit = usize::try_from(n).unwrap_or(0);
        }
    }

    if let Some(format) = non_empty(attrs.md_format) {
        let lowered = format.to_lowercase();
        query.md_format = MdFormat::parse(&lowered).unwrap_or_else(|| {
            tracing::warn!("Unknown md-format '{}', using list", lowered);
            MdFormat::List
        });
    }

    if let Some(clause) = non_empty(attrs.where_clause) {
        query.filters.push(parse_where(&clause)?);
    }

    if let Some(tag) = non_empty(attrs.tag) {
        query.filters.push(QueryFilter::new("tag", "contains", &tag));
    }

    query.include_private = attrs
        .include_private
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false);

    Ok(query)
}

fn parse_where(clause: &str) -> Result<QueryFilter, QueryError> {
    let parts: Vec<&str> = clause.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(QueryError::InvalidWhere(clause.to_string()));
    }

    let value = parts[2..].join(" ");
    let value = value.trim_matches(|c| c == '"' || c == '\'');
    Ok(QueryFilter::new(parts[0], parts[1], value))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
