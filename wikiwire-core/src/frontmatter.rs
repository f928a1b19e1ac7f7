//! Frontmatter extraction, mutation and serialization.
//!
//! Two delimiter styles are recognized at the very start of a document:
//! YAML between `---` lines and TOML between `+++` lines. Key order is kept
//! across edit-and-marshal cycles; new keys are appended at the end.

use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrontmatterError {
    #[error("Invalid YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Frontmatter must be a mapping, found {0}")]
    NotAMapping(&'static str),
}

/// Delimiter style of a frontmatter block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontmatterStyle {
    /// `---` delimited YAML
    Yaml,
    /// `+++` delimited TOML
    Toml,
}

impl FrontmatterStyle {
    pub fn delimiter(&self) -> &'static str {
        match self {
            FrontmatterStyle::Yaml => "---",
            FrontmatterStyle::Toml => "+++",
        }
    }
}

/// A single frontmatter value
#[derive(Debug, Clone, PartialEq)]
pub enum FrontmatterValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// TOML datetime, kept in its literal form
    DateTime(String),
    List(Vec<FrontmatterValue>),
    /// Nested mapping in source order
    Map(Vec<(String, FrontmatterValue)>),
}

impl FrontmatterValue {
    /// Render scalars as text; lists, maps and null have no text form.
    pub fn as_text(&self) -> Option<String> {
        match self {
            FrontmatterValue::String(s) | FrontmatterValue::DateTime(s) => Some(s.clone()),
            FrontmatterValue::Integer(i) => Some(i.to_string()),
            FrontmatterValue::Float(f) => Some(f.to_string()),
            FrontmatterValue::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FrontmatterValue::Bool(b) => Some(*b),
            FrontmatterValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FrontmatterValue::Integer(i) => Some(*i),
            FrontmatterValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }
}

impl From<&str> for FrontmatterValue {
    fn from(value: &str) -> Self {
        FrontmatterValue::String(value.to_string())
    }
}

impl From<String> for FrontmatterValue {
    fn from(value: String) -> Self {
        FrontmatterValue::String(value)
    }
}

impl From<bool> for FrontmatterValue {
    fn from(value: bool) -> Self {
        FrontmatterValue::Bool(value)
    }
}

impl From<i64> for FrontmatterValue {
    fn from(value: i64) -> Self {
        FrontmatterValue::Integer(value)
    }
}

impl From<Vec<String>> for FrontmatterValue {
    fn from(value: Vec<String>) -> Self {
        FrontmatterValue::List(value.into_iter().map(FrontmatterValue::String).collect())
    }
}

/// Ordered key/value metadata block
#[derive(Debug, Clone)]
pub struct Frontmatter {
    style: FrontmatterStyle,
    raw: String,
    order: Vec<String>,
    values: HashMap<String, FrontmatterValue>,
}

static YAML_BLOCK_REGEX: OnceLock<Regex> = OnceLock::new();
static TOML_BLOCK_REGEX: OnceLock<Regex> = OnceLock::new();

fn yaml_block_regex() -> &'static Regex {
    YAML_BLOCK_REGEX.get_or_init(|| {
        Regex::new(r"(?s)\A---[ \t]*\r?\n(?:(.*?)\r?\n)?---[ \t]*(?:\r?\n|\z)").unwrap()
    })
}

fn toml_block_regex() -> &'static Regex {
    TOML_BLOCK_REGEX.get_or_init(|| {
        Regex::new(r"(?s)\A\+\+\+[ \t]*\r?\n(?:(.*?)\r?\n)?\+\+\+[ \t]*(?:\r?\n|\z)").unwrap()
    })
}

/// Split a leading frontmatter block from the document body
///
/// Returns `None` and the untouched input when no block starts at offset 0.
/// A block that is present but fails to decode is an error.
///
/// # Example
///
/// ```
/// use wikiwire_core::frontmatter::extract;
///
/// let content = "---\ntitle: My Post\ntags: [a, b]\n---\nHello\n";
/// let (fm, body) = extract(content).unwrap();
/// let fm = fm.unwrap();
/// assert_eq!(fm.get_string("title").as_deref(), Some("My Post"));
/// assert_eq!(fm.get_string_slice("tags"), vec!["a", "b"]);
/// assert_eq!(body, "Hello\n");
/// ```
pub fn extract(content: &str) -> Result<(Option<Frontmatter>, &str), FrontmatterError> {
    for (style, re) in [
        (FrontmatterStyle::Yaml, yaml_block_regex()),
        (FrontmatterStyle::Toml, toml_block_regex()),
    ] {
        if let Some(captures) = re.captures(content) {
            let raw = captures.get(1).map(|m| m.as_str()).unwrap_or("");
            let whole = captures.get(0).map(|m| m.end()).unwrap_or(0);
            let frontmatter = Frontmatter::from_raw(style, raw)?;
            return Ok((Some(frontmatter), &content[whole..]));
        }
    }

    Ok((None, content))
}

impl Frontmatter {
    /// Empty frontmatter of the given style
    pub fn new(style: FrontmatterStyle) -> Self {
        Self {
            style,
            raw: String::new(),
            order: Vec::new(),
            values: HashMap::new(),
        }
    }

    /// Decode a block body (without delimiters)
    pub fn from_raw(style: FrontmatterStyle, raw: &str) -> Result<Self, FrontmatterError> {
        let mut frontmatter = Self::new(style);
        frontmatter.set_raw(raw)?;
        Ok(frontmatter)
    }

    pub fn style(&self) -> FrontmatterStyle {
        self.style
    }

    /// Block body as last decoded
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Replace the whole block body and re-decode it
    pub fn set_raw(&mut self, raw: &str) -> Result<(), FrontmatterError> {
        let entries = match self.style {
            FrontmatterStyle::Yaml => decode_yaml(raw)?,
            FrontmatterStyle::Toml => decode_toml(raw)?,
        };

        self.raw = raw.to_string();
        self.order.clear();
        self.values.clear();
        for (key, value) in entries {
            if !self.values.contains_key(&key) {
                self.order.push(key.clone());
            }
            self.values.insert(key, value);
        }
        Ok(())
    }

    /// Keys in serialization order
    pub fn keys(&self) -> Vec<&str> {
        self.synced_order().into_iter().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_value(&self, key: &str) -> Option<&FrontmatterValue> {
        self.values.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.values.get(key).and_then(FrontmatterValue::as_text)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(FrontmatterValue::as_bool)
    }

    /// Lists of scalars, or a comma separated string
    pub fn get_string_slice(&self, key: &str) -> Vec<String> {
        match self.values.get(key) {
            Some(FrontmatterValue::List(items)) => {
                items.iter().filter_map(FrontmatterValue::as_text).collect()
            }
            Some(FrontmatterValue::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Set a value; a key seen for the first time goes to the end
    pub fn set_value(&mut self, key: &str, value: impl Into<FrontmatterValue>) {
        if !self.values.contains_key(key) && !self.order.iter().any(|k| k == key) {
            self.order.push(key.to_string());
        }
        self.values.insert(key.to_string(), value.into());
    }

    pub fn set_string(&mut self, key: &str, value: &str) {
        self.set_value(key, value);
    }

    pub fn remove(&mut self, key: &str) -> Option<FrontmatterValue> {
        self.order.retain(|k| k != key);
        self.values.remove(key)
    }

    /// Serialize with the original delimiters
    ///
    /// The output has no trailing newline after the closing delimiter.
    pub fn marshal(&self) -> Result<String, FrontmatterError> {
        let order = self.synced_order();
        let body = match self.style {
            FrontmatterStyle::Yaml => {
                let mut mapping = serde_yaml::Mapping::new();
                for key in order {
                    if let Some(value) = self.values.get(key) {
                        mapping.insert(serde_yaml::Value::String(key.clone()), to_yaml(value));
                    }
                }
                if mapping.is_empty() {
                    String::new()
                } else {
                    serde_yaml::to_string(&mapping)?
                }
            }
            FrontmatterStyle::Toml => {
                let mut table = toml::Table::new();
                for key in order {
                    match self.values.get(key).and_then(to_toml) {
                        Some(value) => {
                            table.insert(key.clone(), value);
                        }
                        None => tracing::debug!("Dropping null TOML frontmatter key {}", key),
                    }
                }
                toml::to_string(&table)?
            }
        };

        let delimiter = self.style.delimiter();
        Ok(format!("{delimiter}\n{body}{delimiter}"))
    }

    /// Ordered keys still present, followed by keys only present in the map
    fn synced_order(&self) -> Vec<&String> {
        let mut order: Vec<&String> = self
            .order
            .iter()
            .filter(|k| self.values.contains_key(k.as_str()))
            .collect();
        let mut extra: Vec<&String> = self
            .values
            .keys()
            .filter(|k| !self.order.contains(k))
            .collect();
        extra.sort();
        order.extend(extra);
        order
    }
}

// raw text is formatting only; equal keys, order and values are equal blocks
impl PartialEq for Frontmatter {
    fn eq(&self, other: &Self) -> bool {
        self.style == other.style
            && self.keys() == other.keys()
            && self.values == other.values
    }
}

impl fmt::Display for Frontmatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.marshal() {
            Ok(text) => f.write_str(&text),
            Err(_) => Err(fmt::Error),
        }
    }
}

fn decode_yaml(raw: &str) -> Result<Vec<(String, FrontmatterValue)>, FrontmatterError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    match serde_yaml::from_str::<serde_yaml::Value>(raw)? {
        serde_yaml::Value::Null => Ok(Vec::new()),
        serde_yaml::Value::Mapping(mapping) => Ok(mapping
            .into_iter()
            .filter_map(|(k, v)| yaml_key(&k).map(|k| (k, from_yaml(v))))
            .collect()),
        serde_yaml::Value::Sequence(_) => Err(FrontmatterError::NotAMapping("a sequence")),
        _ => Err(FrontmatterError::NotAMapping("a scalar")),
    }
}

fn decode_toml(raw: &str) -> Result<Vec<(String, FrontmatterValue)>, FrontmatterError> {
    let table: toml::Table = raw.parse()?;
    Ok(table.into_iter().map(|(k, v)| (k, from_toml(v))).collect())
}

fn yaml_key(key: &serde_yaml::Value) -> Option<String> {
    match key {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn from_yaml(value: serde_yaml::Value) -> FrontmatterValue {
    match value {
        serde_yaml::Value::Null => FrontmatterValue::Null,
        serde_yaml::Value::Bool(b) => FrontmatterValue::Bool(b),
        serde_yaml::Value::Number(n) => match n.as_i64() {
            Some(i) => FrontmatterValue::Integer(i),
            None => FrontmatterValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_yaml::Value::String(s) => FrontmatterValue::String(s),
        serde_yaml::Value::Sequence(items) => {
            FrontmatterValue::List(items.into_iter().map(from_yaml).collect())
        }
        serde_yaml::Value::Mapping(mapping) => FrontmatterValue::Map(
            mapping
                .into_iter()
                .filter_map(|(k, v)| yaml_key(&k).map(|k| (k, from_yaml(v))))
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => from_yaml(tagged.value),
    }
}

fn to_yaml(value: &FrontmatterValue) -> serde_yaml::Value {
    match value {
        FrontmatterValue::Null => serde_yaml::Value::Null,
        FrontmatterValue::Bool(b) => serde_yaml::Value::Bool(*b),
        FrontmatterValue::Integer(i) => serde_yaml::Value::Number((*i).into()),
        FrontmatterValue::Float(f) => serde_yaml::Value::Number((*f).into()),
        FrontmatterValue::String(s) | FrontmatterValue::DateTime(s) => {
            serde_yaml::Value::String(s.clone())
        }
        FrontmatterValue::List(items) => {
            serde_yaml::Value::Sequence(items.iter().map(to_yaml).collect())
        }
        FrontmatterValue::Map(entries) => {
            let mut mapping = serde_yaml::Mapping::new();
            for (k, v) in entries {
                mapping.insert(serde_yaml::Value::String(k.clone()), to_yaml(v));
            }
            serde_yaml::Value::Mapping(mapping)
        }
    }
}

fn from_toml(value: toml::Value) -> FrontmatterValue {
    match value {
        toml::Value::String(s) => FrontmatterValue::String(s),
        toml::Value::Integer(i) => FrontmatterValue::Integer(i),
        toml::Value::Float(f) => FrontmatterValue::Float(f),
        toml::Value::Boolean(b) => FrontmatterValue::Bool(b),
        toml::Value::Datetime(dt) => FrontmatterValue::DateTime(dt.to_string()),
        toml::Value::Array(items) => {
            FrontmatterValue::List(items.into_iter().map(from_toml).collect())
        }
        toml::Value::Table(table) => {
            FrontmatterValue::Map(table.into_iter().map(|(k, v)| (k, from_toml(v))).collect())
        }
    }
}

fn to_toml(value: &FrontmatterValue) -> Option<toml::Value> {
    let converted = match value {
        FrontmatterValue::Null => return None,
        FrontmatterValue::Bool(b) => toml::Value::Boolean(*b),
        FrontmatterValue::Integer(i) => toml::Value::Integer(*i),
        FrontmatterValue::Float(f) => toml::Value::Float(*f),
        FrontmatterValue::String(s) => toml::Value::String(s.clone()),
        FrontmatterValue::DateTime(s) => match s.parse::<toml::value::Datetime>() {
            Ok(dt) => toml::Value::Datetime(dt),
            Err(_) => toml::Value::String(s.clone()),
        },
        FrontmatterValue::List(items) => {
            toml::Value::Array(items.iter().filter_map(to_toml).collect())
        }
        FrontmatterValue::Map(entries) => {
            let mut table = toml::Table::new();
            for (k, v) in entries {
                if let Some(v) = to_toml(v) {
                    table.insert(k.clone(), v);
                }
            }
            toml::Value::Table(table)
        }
    };
    Some(converted)
}
