//! Configuration module for the C++ code-intelligence service.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `CPPSCOUT_` and use double
//! underscores to separate nested levels:
//! - `CPPSCOUT_INDEXING__PARALLEL_THREADS=8` sets `indexing.parallel_threads`
//! - `CPPSCOUT_QUERY__BEHAVIOR_POLICY=block` sets `query.behavior_policy`
//! - `CPPSCOUT_CACHE__USE_SQLITE=false` sets `cache.use_sqlite`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Policy for handling queries while indexing is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPolicy {
    /// Answer immediately and mark results as partial (default)
    #[default]
    AllowPartial,
    /// Wait (bounded) for indexing to finish before answering
    Block,
    /// Refuse with an error that explains how to wait
    Reject,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Root directory that holds per-project cache directories
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,

    /// Indexing configuration
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Cache backend and resilience settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Query behavior settings
    #[serde(default)]
    pub query: QueryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexingConfig {
    /// Number of parallel parser threads
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,

    /// Patterns to ignore during file enumeration
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Index files outside the project root (external headers)
    #[serde(default = "default_false")]
    pub include_dependencies: bool,

    /// Path to compile_commands.json; its mtime is part of cache validity
    #[serde(default)]
    pub compile_commands: Option<PathBuf>,

    /// Per-file parse retry ceiling before a failing file is skipped
    #[serde(default = "default_max_parse_retries")]
    pub max_parse_retries: u32,

    /// Watch the project tree and refresh incrementally on changes
    #[serde(default = "default_false")]
    pub auto_refresh: bool,

    /// Debounce window for the file watcher, in milliseconds
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    /// Prefer the SQLite backend; fall through to the document backend on
    /// initialization errors
    #[serde(default = "default_true")]
    pub use_sqlite: bool,

    /// Sliding window for error-rate monitoring, in seconds
    #[serde(default = "default_error_window_seconds")]
    pub error_window_seconds: f64,

    /// Error rate (0..1) that triggers automatic backend fallback
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,

    /// Skip vacuum below this database size
    #[serde(default = "default_vacuum_threshold_mb")]
    pub vacuum_threshold_mb: u64,

    /// Skip vacuum below this much reclaimable space
    #[serde(default = "default_vacuum_min_waste_mb")]
    pub vacuum_min_waste_mb: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueryConfig {
    /// How to answer queries while indexing is still running
    #[serde(default)]
    pub behavior_policy: QueryPolicy,

    /// Ceiling for the `block` policy, in seconds
    #[serde(default = "default_block_timeout_secs")]
    pub block_timeout_secs: u64,

    /// Default timeout for `wait_for_indexing`, in seconds
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,

    /// Default node cap for hierarchy queries
    #[serde(default = "default_hierarchy_max_nodes")]
    pub hierarchy_max_nodes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `indexing = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("cppscout"))
        .unwrap_or_else(|| PathBuf::from(".cppscout"))
}
fn default_parallel_threads() -> usize {
    num_cpus::get()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_max_parse_retries() -> u32 {
    3
}
fn default_watch_debounce_ms() -> u64 {
    500
}
fn default_error_window_seconds() -> f64 {
    300.0
}
fn default_error_rate_threshold() -> f64 {
    0.05
}
fn default_vacuum_threshold_mb() -> u64 {
    50
}
fn default_vacuum_min_waste_mb() -> u64 {
    10
}
fn default_block_timeout_secs() -> u64 {
    30
}
fn default_wait_timeout_secs() -> u64 {
    60
}
fn default_hierarchy_max_nodes() -> usize {
    200
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            cache_root: default_cache_root(),
            indexing: IndexingConfig::default(),
            cache: CacheConfig::default(),
            query: QueryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            parallel_threads: default_parallel_threads(),
            ignore_patterns: vec![
                "build/**".to_string(),
                "cmake-build-*/**".to_string(),
                ".git/**".to_string(),
                "third_party/**".to_string(),
            ],
            include_dependencies: false,
            compile_commands: None,
            max_parse_retries: default_max_parse_retries(),
            auto_refresh: false,
            watch_debounce_ms: default_watch_debounce_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            use_sqlite: true,
            error_window_seconds: default_error_window_seconds(),
            error_rate_threshold: default_error_rate_threshold(),
            vacuum_threshold_mb: default_vacuum_threshold_mb(),
            vacuum_min_waste_mb: default_vacuum_min_waste_mb(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            behavior_policy: QueryPolicy::AllowPartial,
            block_timeout_secs: default_block_timeout_secs(),
            wait_timeout_secs: default_wait_timeout_secs(),
            hierarchy_max_nodes: default_hierarchy_max_nodes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, figment::Error> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(".cppscout/settings.toml"));

        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("CPPSCOUT_").map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".")
                    .into()
            }))
            .extract()
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .extract()
    }

    /// Find the workspace root by looking for a .cppscout directory,
    /// searching from the current directory up to the filesystem root.
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(".cppscout");
            if config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }

        None
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> std::io::Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        std::fs::write(path, toml_string)
    }

    /// Create a default settings file in `.cppscout/settings.toml`
    pub fn init_config_file(force: bool) -> std::io::Result<PathBuf> {
        let config_path = PathBuf::from(".cppscout/settings.toml");

        if !force && config_path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "Configuration file already exists. Use --force to overwrite",
            ));
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}
