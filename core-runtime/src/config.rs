//! # Mirror Configuration
//!
//! A single [`MirrorConfig`] value is constructed at startup, validated, and
//! then passed by reference into every component constructor. Nothing reads
//! configuration lazily or from globals.
//!
//! ## Usage
//!
//! ### From a JSON file
//!
//! ```ignore
//! use core_runtime::config::MirrorConfig;
//!
//! let config = MirrorConfig::from_json_file("config.json")?;
//! ```
//!
//! ### With the builder
//!
//! ```ignore
//! use core_runtime::config::{MirrorConfig, RemoteSourceConfig};
//!
//! let config = MirrorConfig::builder()
//!     .source(RemoteSourceConfig::new("indexer.internal", "mainnet"))
//!     .gateway_root("https://gateway.example/ipfs")
//!     .root_dir("/srv/media")
//!     .temp_dir("/tmp/mintmirror")
//!     .root_url("https://media.example")
//!     .build()?;
//! ```
//!
//! ## Example file
//!
//! ```json
//! {
//!   "sources": [
//!     { "name": "mainnet", "host": "10.0.0.5", "port": 5432, "user": "mirror", "password": "..." }
//!   ],
//!   "local_database": "/var/lib/mintmirror/local.db",
//!   "gateway_root": "https://gateway.example/ipfs",
//!   "root_dir": "/srv/media",
//!   "temp_dir": "/tmp/mintmirror",
//!   "root_url": "https://media.example",
//!   "worker_concurrency": 16,
//!   "pinning": { "ipfs_path": "/ipfs" }
//! }
//! ```

use crate::error::{Error, Result};
use crate::logging::LogFormat;
use bridge_traits::http::TimeoutBudget;
use bridge_traits::time::LogLevel;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection settings for one remote ledger database
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteSourceConfig {
    /// Database name
    pub name: String,
    /// Database host
    pub host: String,
    #[serde(default = "default_remote_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl RemoteSourceConfig {
    pub fn new(host: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: default_remote_port(),
            user: None,
            password: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }
}

impl std::fmt::Debug for RemoteSourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSourceConfig")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Local content pinning settings. Present means enabled.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PinningConfig {
    /// Exported as `IPFS_PATH` for the pin command
    #[serde(default)]
    pub ipfs_path: Option<PathBuf>,
    /// `ipfs` executable
    #[serde(default = "default_ipfs_binary")]
    pub binary: PathBuf,
}

/// Complete runtime configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MirrorConfig {
    /// Remote ledgers to mirror from
    pub sources: Vec<RemoteSourceConfig>,

    /// SQLite file for the local mirror
    #[serde(default = "default_local_database")]
    pub local_database: PathBuf,

    /// Base URL used for content-addressed media
    pub gateway_root: String,

    /// Rows fetched per remote and token kind each cycle
    #[serde(default = "default_sync_page_size")]
    pub sync_page_size: u32,

    /// Records handed to the worker pool each cycle
    #[serde(default = "default_selection_page_size")]
    pub selection_page_size: u32,

    /// Maximum concurrent media acquisitions
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Directory renditions are published under
    pub root_dir: PathBuf,

    /// Directory for in-flight downloads
    pub temp_dir: PathBuf,

    /// Public URL prefix matching `root_dir`
    pub root_url: String,

    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Enables local pinning when present
    #[serde(default)]
    pub pinning: Option<PinningConfig>,

    /// Pause between driver cycles
    #[serde(default = "default_cycle_delay_ms")]
    pub cycle_delay_ms: u64,

    /// Growth step for fork detection batches
    #[serde(default = "default_reconcile_batch_step")]
    pub reconcile_batch_step: u32,

    /// Pause before repeating a fork detection pass that found no agreement
    #[serde(default = "default_reconcile_retry_delay_ms")]
    pub reconcile_retry_delay_ms: u64,

    #[serde(default)]
    pub timeouts: TimeoutBudget,

    #[serde(default = "default_max_url_length")]
    pub max_url_length: usize,

    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: u64,

    /// Lossy WebP quality, 0-100
    #[serde(default = "default_webp_quality")]
    pub webp_quality: f32,

    /// Pool size per remote source
    #[serde(default = "default_remote_max_connections")]
    pub remote_max_connections: u32,
}

fn default_remote_port() -> u16 {
    5432
}

fn default_ipfs_binary() -> PathBuf {
    PathBuf::from("ipfs")
}

fn default_local_database() -> PathBuf {
    PathBuf::from("mintmirror.db")
}

fn default_sync_page_size() -> u32 {
    50
}

fn default_selection_page_size() -> u32 {
    500
}

fn default_worker_concurrency() -> usize {
    16
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

fn default_cycle_delay_ms() -> u64 {
    5_000
}

fn default_reconcile_batch_step() -> u32 {
    100
}

fn default_reconcile_retry_delay_ms() -> u64 {
    5_000
}

fn default_max_url_length() -> usize {
    5_000
}

fn default_max_download_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_webp_quality() -> f32 {
    80.0
}

fn default_remote_max_connections() -> u32 {
    5
}

impl MirrorConfig {
    /// Creates a new builder
    pub fn builder() -> MirrorConfigBuilder {
        MirrorConfigBuilder::default()
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: MirrorConfig = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read configuration {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&contents)
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - At least one remote source, none duplicated by host and name
    /// - Gateway root and public URL are HTTP(S)
    /// - Storage directories are set
    /// - Sizes, concurrency and quality are in range
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(Error::Config(
                "At least one remote source is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.host.trim().is_empty() || source.name.trim().is_empty() {
                return Err(Error::Config(
                    "Remote sources need both a host and a database name".to_string(),
                ));
            }
            if !seen.insert((source.host.as_str(), source.name.as_str())) {
                return Err(Error::Config(format!(
                    "Remote source {}/{} is configured twice",
                    source.host, source.name
                )));
            }
        }

        if !is_http_url(&self.gateway_root) {
            return Err(Error::Config(format!(
                "Gateway root must be an HTTP(S) URL, got '{}'",
                self.gateway_root
            )));
        }

        if !is_http_url(&self.root_url) {
            return Err(Error::Config(format!(
                "Root URL must be an HTTP(S) URL, got '{}'",
                self.root_url
            )));
        }

        if self.root_dir.as_os_str().is_empty() {
            return Err(Error::Config("Root directory cannot be empty".to_string()));
        }

        if self.temp_dir.as_os_str().is_empty() {
            return Err(Error::Config("Temp directory cannot be empty".to_string()));
        }

        if self.worker_concurrency == 0 || self.worker_concurrency > 1024 {
            return Err(Error::Config(
                "Worker concurrency must be between 1 and 1024".to_string(),
            ));
        }

        if self.sync_page_size == 0 || self.selection_page_size == 0 {
            return Err(Error::Config(
                "Page sizes must be greater than 0".to_string(),
            ));
        }

        if self.reconcile_batch_step == 0 {
            return Err(Error::Config(
                "Reconcile batch step must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=100.0).contains(&self.webp_quality) {
            return Err(Error::Config(
                "WebP quality must be between 0 and 100".to_string(),
            ));
        }

        if self.timeouts.total_ms == 0 || self.timeouts.idle_ms == 0 {
            return Err(Error::Config(
                "Download timeouts must be greater than 0".to_string(),
            ));
        }

        if self.max_url_length == 0 || self.max_download_bytes == 0 {
            return Err(Error::Config(
                "URL and download limits must be greater than 0".to_string(),
            ));
        }

        if self.remote_max_connections == 0 {
            return Err(Error::Config(
                "Remote pools need at least one connection".to_string(),
            ));
        }

        Ok(())
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_millis(self.cycle_delay_ms)
    }

    pub fn reconcile_retry_delay(&self) -> Duration {
        Duration::from_millis(self.reconcile_retry_delay_ms)
    }

    /// Gateway root without trailing slashes
    pub fn gateway_root(&self) -> &str {
        self.gateway_root.trim_end_matches('/')
    }

    /// Public URL prefix without trailing slashes
    pub fn root_url(&self) -> &str {
        self.root_url.trim_end_matches('/')
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Builder for [`MirrorConfig`]
#[derive(Debug, Default)]
pub struct MirrorConfigBuilder {
    sources: Vec<RemoteSourceConfig>,
    local_database: Option<PathBuf>,
    gateway_root: Option<String>,
    root_dir: Option<PathBuf>,
    temp_dir: Option<PathBuf>,
    root_url: Option<String>,
    sync_page_size: Option<u32>,
    selection_page_size: Option<u32>,
    worker_concurrency: Option<usize>,
    log_level: Option<LogLevel>,
    pinning: Option<PinningConfig>,
    cycle_delay_ms: Option<u64>,
    timeouts: Option<TimeoutBudget>,
}

impl MirrorConfigBuilder {
    /// Adds a remote source
    pub fn source(mut self, source: RemoteSourceConfig) -> Self {
        self.sources.push(source);
        self
    }

    pub fn local_database<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.local_database = Some(path.into());
        self
    }

    pub fn gateway_root(mut self, root: impl Into<String>) -> Self {
        self.gateway_root = Some(root.into());
        self
    }

    pub fn root_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.root_dir = Some(path.into());
        self
    }

    pub fn temp_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.temp_dir = Some(path.into());
        self
    }

    pub fn root_url(mut self, url: impl Into<String>) -> Self {
        self.root_url = Some(url.into());
        self
    }

    pub fn sync_page_size(mut self, size: u32) -> Self {
        self.sync_page_size = Some(size);
        self
    }

    pub fn selection_page_size(mut self, size: u32) -> Self {
        self.selection_page_size = Some(size);
        self
    }

    pub fn worker_concurrency(mut self, workers: usize) -> Self {
        self.worker_concurrency = Some(workers);
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    pub fn pinning(mut self, pinning: PinningConfig) -> Self {
        self.pinning = Some(pinning);
        self
    }

    pub fn cycle_delay_ms(mut self, delay_ms: u64) -> Self {
        self.cycle_delay_ms = Some(delay_ms);
        self
    }

    pub fn timeouts(mut self, budget: TimeoutBudget) -> Self {
        self.timeouts = Some(budget);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<MirrorConfig> {
        let gateway_root = self.gateway_root.ok_or_else(|| {
            Error::Config("Gateway root is required. Use .gateway_root() to set it.".to_string())
        })?;

        let root_dir = self.root_dir.ok_or_else(|| {
            Error::Config("Root directory is required. Use .root_dir() to set it.".to_string())
        })?;

        let temp_dir = self.temp_dir.ok_or_else(|| {
            Error::Config("Temp directory is required. Use .temp_dir() to set it.".to_string())
        })?;

        let root_url = self.root_url.ok_or_else(|| {
            Error::Config("Root URL is required. Use .root_url() to set it.".to_string())
        })?;

        let config = MirrorConfig {
            sources: self.sources,
            local_database: self.local_database.unwrap_or_else(default_local_database),
            gateway_root,
            sync_page_size: self.sync_page_size.unwrap_or_else(default_sync_page_size),
            selection_page_size: self
                .selection_page_size
                .unwrap_or_else(default_selection_page_size),
            worker_concurrency: self
                .worker_concurrency
                .unwrap_or_else(default_worker_concurrency),
            root_dir,
            temp_dir,
            root_url,
            log_level: self.log_level.unwrap_or_else(default_log_level),
            log_format: default_log_format(),
            pinning: self.pinning,
            cycle_delay_ms: self.cycle_delay_ms.unwrap_or_else(default_cycle_delay_ms),
            reconcile_batch_step: default_reconcile_batch_step(),
            reconcile_retry_delay_ms: default_reconcile_retry_delay_ms(),
            timeouts: self.timeouts.unwrap_or_default(),
            max_url_length: default_max_url_length(),
            max_download_bytes: default_max_download_bytes(),
            webp_quality: default_webp_quality(),
            remote_max_connections: default_remote_max_connections(),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_builder() -> MirrorConfigBuilder {
        MirrorConfig::builder()
            .source(RemoteSourceConfig::new("db.internal", "mainnet"))
            .gateway_root("https://gw.example/ipfs/")
            .root_dir("/srv/media")
            .temp_dir("/tmp/mirror")
            .root_url("https://media.example/")
    }

    #[test]
    fn test_builder_applies_defaults() {
        let config = minimal_builder().build().unwrap();

        assert_eq!(config.worker_concurrency, 16);
        assert_eq!(config.selection_page_size, 500);
        assert_eq!(config.sync_page_size, 50);
        assert_eq!(config.cycle_delay(), Duration::from_secs(5));
        assert_eq!(config.gateway_root(), "https://gw.example/ipfs");
        assert_eq!(config.root_url(), "https://media.example");
        assert!(config.pinning.is_none());
    }

    #[test]
    fn test_builder_requires_gateway_root() {
        let result = MirrorConfig::builder()
            .source(RemoteSourceConfig::new("db.internal", "mainnet"))
            .root_dir("/srv/media")
            .temp_dir("/tmp/mirror")
            .root_url("https://media.example")
            .build();

        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("Gateway root")));
    }

    #[test]
    fn test_validation_rejects_missing_sources() {
        let result = MirrorConfig::builder()
            .gateway_root("https://gw.example/ipfs")
            .root_dir("/srv/media")
            .temp_dir("/tmp/mirror")
            .root_url("https://media.example")
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_duplicate_sources() {
        let result = minimal_builder()
            .source(RemoteSourceConfig::new("db.internal", "mainnet"))
            .build();

        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("twice")));
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        assert!(minimal_builder().worker_concurrency(0).build().is_err());
    }

    #[test]
    fn test_validation_rejects_non_http_gateway() {
        assert!(minimal_builder()
            .gateway_root("ipfs://gateway")
            .build()
            .is_err());
    }

    #[test]
    fn test_from_json_with_defaults() {
        let json = r#"{
            "sources": [
                { "name": "mainnet", "host": "10.0.0.5", "user": "mirror", "password": "secret" }
            ],
            "gateway_root": "https://gw.example/ipfs",
            "root_dir": "/srv/media",
            "temp_dir": "/tmp/mirror",
            "root_url": "https://media.example",
            "log_level": "debug",
            "timeouts": { "total_ms": 60000 },
            "pinning": { "ipfs_path": "/ipfs" }
        }"#;

        let config = MirrorConfig::from_json_str(json).unwrap();

        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].port, 5432);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.timeouts.total_ms, 60_000);
        assert_eq!(config.timeouts.lookup_ms, 1_000);
        let pinning = config.pinning.unwrap();
        assert_eq!(pinning.binary, PathBuf::from("ipfs"));
        assert_eq!(pinning.ipfs_path, Some(PathBuf::from("/ipfs")));
    }

    #[test]
    fn test_from_json_missing_required_field() {
        let json = r#"{ "sources": [], "gateway_root": "https://gw.example" }"#;
        assert!(matches!(
            MirrorConfig::from_json_str(json),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_debug_redacts_password() {
        let source = RemoteSourceConfig::new("db", "mainnet").with_credentials("mirror", "hunter2");
        let rendered = format!("{:?}", source);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
