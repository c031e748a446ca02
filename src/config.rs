//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `TIERSTORE_*` environment variable
//! overrides.

use crate::archive::{ArchiverConfig, ChunkCompression, ColdReadMode, DEFAULT_ARCHIVE_PREFIX};
use crate::events::{LogStoreConfig, WalSyncMode};
use crate::objects::{ObjectStoreClientConfig, DEFAULT_PAGE_SIZE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub object_store: ObjectStoreConfig,

    #[serde(default)]
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub hot_store: HotStoreConfig,

    #[serde(default)]
    pub tiered: TieredConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which blob store backs the cold tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectBackend {
    /// Process-local, lost on exit
    Memory,
    #[default]
    Filesystem,
}

/// Blob store and client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
    #[serde(default)]
    pub backend: ObjectBackend,

    /// Root directory of the filesystem backend
    #[serde(default = "default_object_root")]
    pub root: String,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity_bytes: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
}

fn default_object_root() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("tierstore").join("objects").to_string_lossy().to_string())
        .unwrap_or_else(|| "./tierstore_objects".to_string())
}

fn default_cache_capacity() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_list_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            backend: ObjectBackend::default(),
            root: default_object_root(),
            cache_capacity_bytes: default_cache_capacity(),
            request_timeout_ms: default_request_timeout(),
            list_page_size: default_list_page_size(),
        }
    }
}

impl ObjectStoreConfig {
    pub fn client_config(&self) -> ObjectStoreClientConfig {
        ObjectStoreClientConfig {
            cache_capacity_bytes: self.cache_capacity_bytes,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

/// Archiver configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_bucket")]
    pub bucket: String,

    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default = "default_window_size")]
    pub window_size_millis: i64,

    #[serde(default)]
    pub compression: ChunkCompression,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_max_write_retries")]
    pub max_write_retries: u32,
}

fn default_bucket() -> String {
    "tierstore".to_string()
}

fn default_prefix() -> String {
    DEFAULT_ARCHIVE_PREFIX.to_string()
}

fn default_window_size() -> i64 {
    3_600_000 // 1 hour
}

fn default_max_concurrency() -> usize {
    8
}

fn default_max_write_retries() -> u32 {
    5
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            prefix: default_prefix(),
            window_size_millis: default_window_size(),
            compression: ChunkCompression::default(),
            max_concurrency: default_max_concurrency(),
            max_write_retries: default_max_write_retries(),
        }
    }
}

/// Log-backed hot store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HotStoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default)]
    pub wal_sync: WalSyncMode,

    #[serde(default = "default_compact_after")]
    pub compact_after_entries: u64,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("tierstore").join("hot").to_string_lossy().to_string())
        .unwrap_or_else(|| "./tierstore_data".to_string())
}

fn default_compact_after() -> u64 {
    10_000
}

impl Default for HotStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            wal_sync: WalSyncMode::default(),
            compact_after_entries: default_compact_after(),
        }
    }
}

impl HotStoreConfig {
    pub fn log_store_config(&self) -> LogStoreConfig {
        LogStoreConfig {
            data_dir: PathBuf::from(&self.data_dir),
            wal_sync: self.wal_sync,
            compact_after_entries: self.compact_after_entries,
        }
    }
}

/// Tiered facade configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TieredConfig {
    #[serde(default)]
    pub cold_reads: ColdReadMode,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tierstore").join("config.toml")),
            Some(PathBuf::from("/etc/tierstore/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Settings for the chunk archiver
    pub fn archiver_config(&self) -> ArchiverConfig {
        ArchiverConfig {
            bucket: self.archive.bucket.clone(),
            prefix: self.archive.prefix.clone(),
            window_size_millis: self.archive.window_size_millis,
            compression: self.archive.compression,
            max_concurrency: self.archive.max_concurrency,
            max_write_retries: self.archive.max_write_retries,
            cold_reads: self.tiered.cold_reads,
        }
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Object store overrides
        if let Some(backend) = lookup("TIERSTORE_OBJECT_BACKEND") {
            match backend.to_lowercase().as_str() {
                "memory" => self.object_store.backend = ObjectBackend::Memory,
                "filesystem" => self.object_store.backend = ObjectBackend::Filesystem,
                other => tracing::warn!("Ignoring unknown object backend {:?}", other),
            }
        }
        if let Some(root) = lookup("TIERSTORE_OBJECT_ROOT") {
            self.object_store.root = root;
        }
        if let Some(capacity) = lookup("TIERSTORE_CACHE_CAPACITY_BYTES") {
            if let Ok(c) = capacity.parse() {
                self.object_store.cache_capacity_bytes = c;
            }
        }

        // Archive overrides
        if let Some(bucket) = lookup("TIERSTORE_ARCHIVE_BUCKET") {
            self.archive.bucket = bucket;
        }
        if let Some(window) = lookup("TIERSTORE_WINDOW_SIZE_MILLIS") {
            if let Ok(w) = window.parse() {
                self.archive.window_size_millis = w;
            }
        }
        if let Some(compression) = lookup("TIERSTORE_ARCHIVE_COMPRESSION") {
            match compression.to_lowercase().as_str() {
                "none" => self.archive.compression = ChunkCompression::None,
                "lz4" => self.archive.compression = ChunkCompression::Lz4,
                other => tracing::warn!("Ignoring unknown compression {:?}", other),
            }
        }

        // Hot store overrides
        if let Some(data_dir) = lookup("TIERSTORE_DATA_DIR") {
            self.hot_store.data_dir = data_dir;
        }

        // Tiered overrides
        if let Some(mode) = lookup("TIERSTORE_COLD_READS") {
            match mode.to_lowercase().as_str() {
                "restore" => self.tiered.cold_reads = ColdReadMode::Restore,
                "select" => self.tiered.cold_reads = ColdReadMode::Select,
                other => tracing::warn!("Ignoring unknown cold read mode {:?}", other),
            }
        }

        // Logging overrides
        if let Some(level) = lookup("TIERSTORE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("TIERSTORE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Tierstore Configuration
#
# Environment variables override these settings:
# - TIERSTORE_OBJECT_BACKEND
# - TIERSTORE_OBJECT_ROOT
# - TIERSTORE_CACHE_CAPACITY_BYTES
# - TIERSTORE_ARCHIVE_BUCKET
# - TIERSTORE_ARCHIVE_COMPRESSION
# - TIERSTORE_WINDOW_SIZE_MILLIS
# - TIERSTORE_DATA_DIR
# - TIERSTORE_COLD_READS
# - TIERSTORE_LOG_LEVEL
# - TIERSTORE_LOG_FORMAT

[object_store]
# Blob store backend: memory or filesystem
backend = "filesystem"

# Root directory for the filesystem backend
root = "~/.local/share/tierstore/objects"

# Read cache size (bytes)
cache_capacity_bytes = 1073741824

# Timeout for each blob store call (ms)
request_timeout_ms = 30000

# Keys per listing page
list_page_size = 1000

[archive]
# Bucket holding archived chunks
bucket = "tierstore"

# Key prefix for chunks
prefix = "events-archive"

# Width of one chunk window (ms)
window_size_millis = 3600000

# Chunk compression: none or lz4
compression = "none"

# Chunks archived or restored at once
max_concurrency = 8

# Retries after losing a concurrent chunk write
max_write_retries = 5

[hot_store]
# Directory for the write-ahead log
data_dir = "~/.local/share/tierstore/hot"

# WAL sync mode: every_write, batched or none
wal_sync = "batched"

# Compact the log after this many records (0 disables)
compact_after_entries = 10000

[tiered]
# Cold read strategy: restore (fetch whole chunks) or select (push range into chunk reads)
cold_reads = "restore"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
