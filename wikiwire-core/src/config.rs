//! Configuration parsing and management.

use crate::markdown::ParserConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// Store configuration, usually read from `wikiwire.yml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Content root; relative paths resolve against the config file
    pub content_dir: PathBuf,

    /// Regexes matched against relative paths; matches are not indexed
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    #[serde(default)]
    pub parser: ParserSettings,

    // Internal: path to config file (for relative path resolution)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

/// Serializable parser switches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserSettings {
    #[serde(default = "default_true")]
    pub enable_wiki_links: bool,

    #[serde(default = "default_true")]
    pub enable_hashtags: bool,

    #[serde(default = "default_true")]
    pub enable_frontmatter: bool,

    #[serde(default = "default_true")]
    pub lazy_load_images: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            enable_wiki_links: true,
            enable_hashtags: true,
            enable_frontmatter: true,
            lazy_load_images: true,
        }
    }
}

impl Config {
    pub fn new(content_dir: impl Into<PathBuf>) -> Self {
        Self {
            content_dir: content_dir.into(),
            ignore_patterns: Vec::new(),
            parser: ParserSettings::default(),
            config_path: None,
        }
    }

    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Content root, resolved relative to the config file
    pub fn content_dir(&self) -> PathBuf {
        if self.content_dir.is_absolute() {
            return self.content_dir.clone();
        }
        match self.config_path.as_deref().and_then(Path::parent) {
            Some(parent) => parent.join(&self.content_dir),
            None => self.content_dir.clone(),
        }
    }

    /// Parser configuration with the default renderers
    pub fn parser_config(&self) -> ParserConfig {
        ParserConfig {
            enable_wiki_links: self.parser.enable_wiki_links,
            enable_hashtags: self.parser.enable_hashtags,
            enable_frontmatter: self.parser.enable_frontmatter,
            lazy_load_images: self.parser.lazy_load_images,
            ..ParserConfig::default()
        }
    }
}
