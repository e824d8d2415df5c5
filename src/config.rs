//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to defaults.
//!
//! ```toml
//! [db]
//! path = "./data/tablegraph.sqlite"
//!
//! [sessions]
//! timeout_secs = 3600
//! preview_rows = 5
//!
//! [graph]
//! # path = "./data/graph.sqlite"   # defaults to [db].path
//! batch_size = 1000
//! join = "inner"                    # or "right"
//!
//! [ingest]
//! max_upload_bytes = 104857600
//! allowed_extensions = ["csv", "tsv", "dsv", "txt", "json", "jsonl"]
//!
//! [server]
//! bind = "127.0.0.1:8000"
//!
//! [logging]
//! level = "info"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use tablegraph_core::{JoinKind, DEFAULT_BATCH_SIZE};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_preview_rows")]
    pub preview_rows: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            preview_rows: default_preview_rows(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    3600
}
fn default_preview_rows() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    /// SQLite file holding the graph. Defaults to `[db].path`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_join")]
    pub join: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            path: None,
            batch_size: default_batch_size(),
            join: default_join(),
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_join() -> String {
    "inner".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

fn default_max_upload_bytes() -> u64 {
    100 * 1024 * 1024
}
fn default_allowed_extensions() -> Vec<String> {
    ["csv", "tsv", "dsv", "txt", "json", "jsonl"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `tablegraph=debug,sqlx=warn`.
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl Config {
    /// Defaults for commands run without a config file.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/tablegraph.sqlite"),
            },
            sessions: SessionsConfig::default(),
            graph: GraphConfig::default(),
            ingest: IngestConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Defaults with the database at `path`.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        let mut cfg = Self::minimal();
        cfg.db.path = path.into();
        cfg
    }

    pub fn graph_path(&self) -> &Path {
        self.graph.path.as_deref().unwrap_or(&self.db.path)
    }

    /// Parsed `[graph].join`. Validated by [`load_config`].
    pub fn join_kind(&self) -> JoinKind {
        self.graph.join.parse().unwrap_or_default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.sessions.timeout_secs == 0 {
        anyhow::bail!("sessions.timeout_secs must be > 0");
    }
    if config.sessions.preview_rows > 100 {
        anyhow::bail!("sessions.preview_rows must be <= 100");
    }
    if config.graph.batch_size == 0 {
        anyhow::bail!("graph.batch_size must be > 0");
    }
    if let Err(e) = config.graph.join.parse::<JoinKind>() {
        anyhow::bail!("graph.join: {}", e);
    }
    if config.ingest.max_upload_bytes == 0 {
        anyhow::bail!("ingest.max_upload_bytes must be > 0");
    }
    if config.ingest.allowed_extensions.is_empty() {
        anyhow::bail!("ingest.allowed_extensions must not be empty");
    }
    Ok(())
}
