//! Persistent symbol storage
//!
//! Two backends implement the same [`SymbolStore`] contract: the primary
//! SQLite store ([`sqlite::SqliteStore`]) with trigger-maintained FTS5
//! search, and the secondary document store ([`document::DocumentStore`])
//! used for legacy caches and as the failover target. The cache orchestrator
//! holds a boxed store and swaps it on fallback, so everything above this
//! module is backend-agnostic.

pub mod document;
pub mod migrations;
pub mod orchestrator;
pub mod sqlite;

pub use document::DocumentStore;
pub use orchestrator::{CacheOrchestrator, ParseErrorLog, ParseErrorRecord};
pub use sqlite::SqliteStore;

use crate::error::StorageResult;
use crate::relations::{CallSite, FileDependency, FileMetadata, TypeAlias};
use crate::symbol::{Symbol, SymbolKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which backend a store instance is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Sqlite,
    Document,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite => f.write_str("sqlite"),
            Self::Document => f.write_str("document"),
        }
    }
}

/// Cached parse result for a single file.
#[derive(Debug, Clone)]
pub struct FileCacheEntry {
    pub symbols: Vec<Symbol>,
    pub success: bool,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

/// Aggregate health report for a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub integrity_ok: bool,
    pub size_bytes: u64,
    pub symbol_rows: u64,
    pub fts_rows: u64,
    /// FTS row count must equal symbol row count at quiescence
    pub fts_in_sync: bool,
    pub journal_mode: String,
    pub table_counts: HashMap<String, u64>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// What `auto_maintenance` actually did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub vacuumed: bool,
    pub analyzed: bool,
    pub fts_optimized: bool,
    pub size_before_bytes: u64,
    pub size_after_bytes: u64,
}

/// Symbol counts broken down for status reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_symbols: u64,
    pub by_kind: HashMap<String, u64>,
    pub project_symbols: u64,
    pub dependency_symbols: u64,
    pub total_files: u64,
    pub db_size_bytes: u64,
}

/// The storage contract shared by both backends.
///
/// Every operation returns `StorageResult`; the orchestrator wraps each call,
/// classifies failures, and decides on retry, repair, or fallback. Methods
/// take `&self`: implementations handle their own locking.
pub trait SymbolStore: Send + Sync {
    fn backend_kind(&self) -> BackendKind;

    // Symbols

    fn save_symbol(&self, symbol: &Symbol) -> StorageResult<()>;

    /// Upsert a batch of symbols in one transaction. Partial failure rolls
    /// the whole batch back. Returns the number of symbols written.
    fn save_symbols_batch(&self, symbols: &[Symbol]) -> StorageResult<usize>;

    fn load_symbol_by_usr(&self, usr: &str) -> StorageResult<Option<Symbol>>;
    fn load_symbols_by_name(&self, name: &str) -> StorageResult<Vec<Symbol>>;
    fn load_symbols_by_file(&self, file: &str) -> StorageResult<Vec<Symbol>>;
    fn load_symbols_by_kind(
        &self,
        kind: SymbolKind,
        project_only: bool,
    ) -> StorageResult<Vec<Symbol>>;
    fn load_all_symbols(&self) -> StorageResult<Vec<Symbol>>;
    fn count_symbols(&self) -> StorageResult<u64>;

    /// Delete all symbols from a file, cascading to FTS rows and call sites.
    /// Returns the number of symbols deleted.
    fn delete_symbols_by_file(&self, file: &str) -> StorageResult<u64>;

    /// Full-text search over `name` and `qualified_name`. Falls back to the
    /// regex path on FTS syntax errors.
    fn search_fts(
        &self,
        pattern: &str,
        kind: Option<SymbolKind>,
        project_only: bool,
    ) -> StorageResult<Vec<Symbol>>;

    /// Regex fullmatch against `name` or `qualified_name`. An invalid
    /// pattern yields an empty result with a logged warning, not an error.
    fn search_regex(
        &self,
        pattern: &str,
        kind: Option<SymbolKind>,
        project_only: bool,
    ) -> StorageResult<Vec<Symbol>>;

    // File metadata

    fn update_file_metadata(&self, meta: &FileMetadata) -> StorageResult<()>;
    fn get_file_metadata(&self, file: &str) -> StorageResult<Option<FileMetadata>>;
    fn load_all_file_metadata(&self) -> StorageResult<Vec<FileMetadata>>;

    // Composite per-file cache operations

    /// Replace a file's symbols and its metadata receipt in one step
    /// (delete-then-insert, as the index lifecycle requires).
    #[allow(clippy::too_many_arguments)]
    fn save_file_cache(
        &self,
        file: &str,
        symbols: &[Symbol],
        file_hash: &str,
        compile_args_hash: Option<&str>,
        success: bool,
        error_message: Option<&str>,
        retry_count: u32,
    ) -> StorageResult<()>;

    /// Load cached symbols for a file iff both hashes still match.
    fn load_file_cache(
        &self,
        file: &str,
        current_hash: &str,
        compile_args_hash: Option<&str>,
    ) -> StorageResult<Option<FileCacheEntry>>;

    /// Drop everything recorded for a deleted file.
    fn remove_file_cache(&self, file: &str) -> StorageResult<()>;

    // Call sites

    /// Replace all call sites recorded from `caller_file`.
    fn replace_call_sites(&self, caller_file: &str, sites: &[CallSite]) -> StorageResult<()>;
    fn call_sites_by_caller(&self, caller_usr: &str) -> StorageResult<Vec<CallSite>>;
    /// Call sites whose callee matches by USR or by name.
    fn call_sites_by_callee(&self, callee: &str) -> StorageResult<Vec<CallSite>>;
    fn load_all_call_sites(&self) -> StorageResult<Vec<CallSite>>;

    // Type aliases

    /// Replace all aliases recorded from `file`.
    fn replace_type_aliases(&self, file: &str, aliases: &[TypeAlias]) -> StorageResult<()>;
    fn load_type_aliases(&self) -> StorageResult<Vec<TypeAlias>>;

    // File dependencies

    fn replace_file_dependencies(
        &self,
        source_file: &str,
        deps: &[FileDependency],
    ) -> StorageResult<()>;
    fn load_file_dependencies(&self) -> StorageResult<Vec<FileDependency>>;

    // Cache metadata (global key/value)

    fn set_cache_metadata(&self, key: &str, value: &str) -> StorageResult<()>;
    fn get_cache_metadata(&self, key: &str) -> StorageResult<Option<String>>;

    // Maintenance

    fn vacuum(&self) -> StorageResult<()>;
    fn analyze(&self) -> StorageResult<()>;
    fn optimize_fts(&self) -> StorageResult<()>;
    fn rebuild_fts(&self) -> StorageResult<()>;

    /// Run vacuum/analyze/optimize as needed, gated by the configured size
    /// and waste thresholds.
    fn auto_maintenance(
        &self,
        vacuum_threshold_bytes: u64,
        vacuum_min_waste_bytes: u64,
    ) -> StorageResult<MaintenanceReport>;

    /// Integrity check; `full` runs the exhaustive variant.
    fn check_integrity(&self, full: bool) -> StorageResult<bool>;

    fn health_status(&self) -> StorageResult<HealthStatus>;

    fn stats(&self) -> StorageResult<StoreStats>;

    /// Attempt in-place repair (dump + restore for corruption). Returns true
    /// when the store is usable afterwards.
    fn repair(&self) -> StorageResult<bool>;

    /// Persist any buffered state (no-op for SQLite).
    fn flush(&self) -> StorageResult<()>;

    /// Remove all stored data, keeping the schema.
    fn clear(&self) -> StorageResult<()>;
}
