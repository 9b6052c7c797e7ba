//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (TIDINGS_HOST, TIDINGS_PORT)
//! - TOML configuration file
//! - Command line arguments (see `main.rs`)

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tidings_core::category::DEFAULT_CATEGORIES;
use tidings_core::store::DEFAULT_MAX_ITEMS;
use tidings_core::{CategoryError, CategorySet};
use tidings_protocol::codec::DEFAULT_MAX_INBOUND_FRAME;
use tidings_transport::TcpConfig;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// News categories clients may subscribe and publish to.
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    /// History storage.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// History storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON file holding the news history.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    /// Maximum number of retained news items.
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Write the history to disk. When false the history lives in memory only.
    #[serde(default = "default_true")]
    pub persist: bool,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound frame size in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Bytes reserved for each socket read.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Write timeout in milliseconds for a single outbound frame.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("TIDINGS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("TIDINGS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5555)
}

fn default_categories() -> Vec<String> {
    DEFAULT_CATEGORIES.iter().map(|c| (*c).to_string()).collect()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/news.json")
}

fn default_max_items() -> usize {
    DEFAULT_MAX_ITEMS
}

fn default_true() -> bool {
    true
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_INBOUND_FRAME
}

fn default_read_buffer_size() -> usize {
    4096
}

fn default_write_timeout() -> u64 {
    5_000 // 5 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            categories: default_categories(),
            storage: StorageConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            max_items: default_max_items(),
            persist: true,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            read_buffer_size: default_read_buffer_size(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default locations.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let config_paths = [
            "tidings.toml",
            "/etc/tidings/tidings.toml",
            "~/.config/tidings/tidings.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        let storage_path = config.storage.path.to_string_lossy().into_owned();
        config.storage.path = PathBuf::from(shellexpand::tilde(&storage_path).as_ref());

        Ok(config)
    }

    /// Check the configuration for values the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        self.category_set()?;
        ensure!(self.storage.max_items >= 1, "storage.max_items must be at least 1");
        ensure!(self.limits.max_frame_size >= 1, "limits.max_frame_size must be at least 1");
        ensure!(self.limits.write_timeout_ms >= 1, "limits.write_timeout_ms must be at least 1");
        Ok(())
    }

    /// Build the configured category set.
    ///
    /// # Errors
    ///
    /// Returns an error if a category name is invalid or none are configured.
    pub fn category_set(&self) -> Result<CategorySet, CategoryError> {
        CategorySet::new(&self.categories)
    }

    /// The address to bind to, as `host:port`.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Transport settings derived from the limits section.
    #[must_use]
    pub fn tcp_config(&self) -> TcpConfig {
        TcpConfig {
            max_frame_size: self.limits.max_frame_size,
            read_buffer_size: self.limits.read_buffer_size,
            write_timeout: Duration::from_millis(self.limits.write_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.categories.len(), 6);
        assert_eq!(config.storage.max_items, 100);
        assert!(config.storage.persist);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config {
            host: "localhost".to_string(),
            port: 6000,
            ..Config::default()
        };
        assert_eq!(config.bind_addr(), "localhost:6000");
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000
            categories = ["Tech", "weather"]

            [storage]
            max_items = 20
            persist = false

            [limits]
            max_frame_size = 1024
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.storage.max_items, 20);
        assert!(!config.storage.persist);
        assert_eq!(config.limits.max_frame_size, 1024);
        assert_eq!(config.limits.read_buffer_size, 4096);

        let categories = config.category_set().unwrap();
        assert_eq!(categories.sorted(), vec!["tech", "weather"]);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.categories.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.storage.max_items = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tidings.toml");
        std::fs::write(&path, "port = 7000\n[storage]\npath = \"/tmp/tidings/news.json\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.storage.path, PathBuf::from("/tmp/tidings/news.json"));

        assert!(Config::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
