//! Configuration: an optional TOML file plus environment overrides.
//!
//! Lookup order for the file is the `--config` argument, then
//! `<config dir>/obo-term-index/config.toml`. Environment variables
//! (`OBOIDX_*`, also read from a `.env` file) override file values.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::search::backend::DEFAULT_ROWS;
use crate::search::cache::DEFAULT_CACHE_CAPACITY;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Read-path tuning for a vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub cache_capacity: usize,
    pub backend_timeout_ms: u64,
    /// Ask the backend for spelling suggestions and retry with them.
    pub spellcheck: bool,
    /// Retry a missed id lookup against `alt_id`.
    pub resolve_alt_ids: bool,
    pub default_rows: usize,
    /// Threads that run backend calls for one vocabulary.
    pub backend_workers: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            backend_timeout_ms: 5_000,
            spellcheck: true,
            resolve_alt_ids: true,
            default_rows: DEFAULT_ROWS,
            backend_workers: 4,
        }
    }
}

impl ServiceConfig {
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delimiter {
    Tab,
    Comma,
}

impl Delimiter {
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Tab => b'\t',
            Self::Comma => b',',
        }
    }

    /// Only comma-separated sources use double-quote quoting.
    pub fn is_quoted(self) -> bool {
        self == Self::Comma
    }
}

/// One delimited annotation file merged into a vocabulary while it is indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationSourceConfig {
    pub name: String,
    /// Local path or URL.
    pub source: String,
    /// Vocabularies the annotations apply to.
    pub vocabularies: Vec<String>,
    pub delimiter: Delimiter,
    pub skip_header: bool,
    pub db_column: usize,
    pub entity_column: usize,
    pub term_column: usize,
    /// Database name in the file → id prefix of the annotated entities.
    pub db_prefixes: BTreeMap<String, String>,
    pub direct_field: String,
    pub expanded_field: String,
    /// Index of the vocabulary the annotated term ids belong to. Without it
    /// terms are not expanded with their ancestors.
    pub resolve_index: Option<PathBuf>,
}

impl Default for AnnotationSourceConfig {
    fn default() -> Self {
        let db_prefixes = [("ORPHANET", "ORPHA"), ("OMIM", "MIM"), ("DECIPHER", "DECIPHER")]
            .into_iter()
            .map(|(db, prefix)| (db.to_string(), prefix.to_string()))
            .collect();
        Self {
            name: "annotations".to_string(),
            source: String::new(),
            vocabularies: Vec::new(),
            delimiter: Delimiter::Tab,
            skip_header: false,
            db_column: 0,
            entity_column: 1,
            term_column: 4,
            db_prefixes,
            direct_field: "actual_symptom".to_string(),
            expanded_field: "symptom".to_string(),
            resolve_index: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub fetch_timeout_secs: u64,
    pub annotations: Vec<AnnotationSourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            fetch_timeout_secs: crate::connectors::DEFAULT_FETCH_TIMEOUT.as_secs(),
            annotations: Vec::new(),
        }
    }
}

/// `<config dir>/obo-term-index/config.toml`, if a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "obo-term-index", "obo-term-index")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

impl Config {
    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content, path)
    }

    /// Load the explicit file if given (it must exist), else the default file
    /// if present, else defaults; then apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => {
                tracing::info!(path = %path.display(), "loading config");
                Self::from_file(path)?
            }
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => {
                    tracing::info!(path = %path.display(), "loading config");
                    Self::from_file(&path)?
                }
                None => {
                    tracing::debug!("no config file, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(n) = env_parse::<usize>("OBOIDX_CACHE_CAPACITY") {
            self.service.cache_capacity = n;
        }
        if let Some(ms) = env_parse::<u64>("OBOIDX_BACKEND_TIMEOUT_MS") {
            self.service.backend_timeout_ms = ms;
        }
        if let Some(secs) = env_parse::<u64>("OBOIDX_FETCH_TIMEOUT_SECS") {
            self.fetch_timeout_secs = secs;
        }
        if let Some(on) = env_flag("OBOIDX_SPELLCHECK") {
            self.service.spellcheck = on;
        }
        if let Some(on) = env_flag("OBOIDX_RESOLVE_ALT_IDS") {
            self.service.resolve_alt_ids = on;
        }
        if let Some(n) = env_parse::<usize>("OBOIDX_DEFAULT_ROWS") {
            self.service.default_rows = n;
        }
        if let Some(n) = env_parse::<usize>("OBOIDX_BACKEND_WORKERS") {
            self.service.backend_workers = n;
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.service.default_rows == 0 {
            return Err(ConfigError::Invalid(
                "service.default_rows must be at least 1".to_string(),
            ));
        }
        if self.service.backend_workers == 0 {
            return Err(ConfigError::Invalid(
                "service.backend_workers must be at least 1".to_string(),
            ));
        }
        for source in &self.annotations {
            if source.source.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "annotation source {:?} has no source location",
                    source.name
                )));
            }
            if source.direct_field == source.expanded_field {
                return Err(ConfigError::Invalid(format!(
                    "annotation source {:?} writes direct and expanded terms to the same field",
                    source.name
                )));
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = dotenvy::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key = key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

fn env_flag(key: &str) -> Option<bool> {
    let raw = dotenvy::var(key).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(key = key, value = %raw, "ignoring unparsable environment flag");
            None
        }
    }
}
