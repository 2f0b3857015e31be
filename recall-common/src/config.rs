//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration comes from a TOML file. Every field has a
//! built-in default, so a missing file is a warning, never a startup failure.
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "RECALL_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "recall.db";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Folder holding the database and uploaded files
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Gemini API key (lowest priority source, see recall-forge config)
    #[serde(default)]
    pub gemini_api_key: Option<String>,

    /// Qdrant REST endpoint; in-memory index when absent
    #[serde(default)]
    pub qdrant_url: Option<String>,

    /// Qdrant collection holding card vectors
    #[serde(default = "default_collection")]
    pub qdrant_collection: String,

    /// Embedding dimensionality shared by the generator and the index
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    /// Maximum pipeline tasks running at once
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Maximum concurrent per-card embedding calls inside one batch
    #[serde(default = "default_embedding_concurrency")]
    pub embedding_concurrency: usize,

    /// Number of cards requested per text source
    #[serde(default)]
    pub cards_per_source: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            port: default_port(),
            logging: LoggingConfig::default(),
            gemini_api_key: None,
            qdrant_url: None,
            qdrant_collection: default_collection(),
            embedding_dimension: default_embedding_dimension(),
            worker_count: default_worker_count(),
            embedding_concurrency: default_embedding_concurrency(),
            cards_per_source: None,
        }
    }
}

fn default_port() -> u16 {
    5780
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_collection() -> String {
    "cards".to_string()
}

fn default_embedding_dimension() -> usize {
    768
}

fn default_worker_count() -> usize {
    4
}

fn default_embedding_concurrency() -> usize {
    4
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the service unusable
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dimension == 0 {
            return Err(Error::Config("embedding_dimension must be positive".to_string()));
        }
        if self.worker_count == 0 {
            return Err(Error::Config("worker_count must be positive".to_string()));
        }
        if self.embedding_concurrency == 0 {
            return Err(Error::Config("embedding_concurrency must be positive".to_string()));
        }
        Ok(())
    }
}

/// Load TOML config, falling back to defaults when the file is missing
///
/// An explicit path that does not exist is an error; the implicit default
/// location is allowed to be absent.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!("Config file not found: {}", path.display())));
            }
            path.to_path_buf()
        }
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => {
                warn!("No config file found, using built-in defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config = TomlConfig::from_toml_str(&content)?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Platform config file location (`<config dir>/recall-forge/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("recall-forge").join("config.toml"))
}

/// Resolve the root folder following the priority order above
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("recall-forge"))
        .unwrap_or_else(|| PathBuf::from("./recall_data"))
}

/// Create the root folder if missing and return the database path inside it
pub fn prepare_root_folder(root_folder: &Path) -> Result<PathBuf> {
    if !root_folder.exists() {
        std::fs::create_dir_all(root_folder)?;
        info!("Created root folder: {}", root_folder.display());
    }
    Ok(root_folder.join(DATABASE_FILE_NAME))
}
