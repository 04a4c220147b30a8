use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CatalogError, Result};

/// Environment variable overriding the catalog home directory.
pub const HOME_ENV: &str = "A3S_CATALOG_HOME";

/// Catalog cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Root of all on-disk state (~/.a3s/catalog)
    pub home: PathBuf,

    /// Registry access
    pub oci: OciConfig,

    /// Web downloads
    pub http: HttpConfig,

    /// Events buffered per progress subscriber
    pub progress_capacity: usize,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            oci: OciConfig::default(),
            http: HttpConfig::default(),
            progress_capacity: 1024,
            log_level: LogLevel::Warn,
        }
    }
}

impl CatalogConfig {
    /// Load `<home>/config.yaml`, falling back to defaults when absent.
    ///
    /// The home directory itself always wins over a `home` key in the file.
    pub fn load(home: &Path) -> Result<Self> {
        let path = home.join("config.yaml");
        let mut config = if path.is_file() {
            let data = std::fs::read_to_string(&path).map_err(|e| {
                CatalogError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
            })?;
            serde_yaml::from_str::<CatalogConfig>(&data).map_err(|e| {
                CatalogError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
            })?
        } else {
            CatalogConfig::default()
        };
        config.home = home.to_path_buf();
        Ok(config)
    }

    /// Load from `$A3S_CATALOG_HOME` or the default home.
    pub fn load_default() -> Result<Self> {
        let home = std::env::var_os(HOME_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(default_home);
        Self::load(&home)
    }

    /// Content cache root: `<home>/unpack`.
    pub fn unpack_dir(&self) -> PathBuf {
        self.home.join("unpack")
    }

    /// Declarative records: `<home>/records`.
    pub fn records_dir(&self) -> PathBuf {
        self.home.join("records")
    }

    /// Flattened single-file catalogs: `<home>/catalogs`.
    pub fn flat_dir(&self) -> PathBuf {
        self.home.join("catalogs")
    }

    /// Trust policy file; defaults to `<home>/policy.json`.
    pub fn policy_path(&self) -> PathBuf {
        self.oci
            .policy_path
            .clone()
            .unwrap_or_else(|| self.home.join("policy.json"))
    }
}

fn default_home() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".a3s"))
        .unwrap_or_else(|| PathBuf::from(".a3s"))
        .join("catalog")
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OciConfig {
    /// Trust policy file (JSON)
    pub policy_path: Option<PathBuf>,

    /// Registries contacted over plain HTTP
    pub insecure_registries: Vec<String>,

    /// Keep entries for superseded digests after a successful pull
    pub keep_history: bool,
}

impl Default for OciConfig {
    fn default() -> Self {
        Self {
            policy_path: None,
            insecure_registries: Vec::new(),
            keep_history: true,
        }
    }
}

/// HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in seconds (0 disables)
    pub timeout_secs: u64,

    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            connect_timeout_secs: 30,
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl LogLevel {
    /// Directive string for an `EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
