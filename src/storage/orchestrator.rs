//! Cache orchestrator
//!
//! Thin layer between callers and a storage backend. Picks the backend at
//! construction (SQLite preferred, document store on init failure or by
//! config), auto-migrates legacy document caches into SQLite, wraps every
//! backend call with error classification and sliding-window tracking, and
//! swaps to the document backend once the error rate crosses the threshold.
//! Corruption-class errors get a backup + repair attempt first; disk-full and
//! permission errors clear the cache.
//!
//! The orchestrator itself implements [`SymbolStore`], so everything above
//! it is oblivious to which backend is live.

use crate::config::Settings;
use crate::error::{StorageError, StorageErrorClass, StorageResult};
use crate::project::ProjectIdentity;
use crate::relations::{now_unix, CallSite, FileDependency, FileMetadata, TypeAlias};
use crate::resilience::{ErrorTracker, RecoveryManager};
use crate::storage::document::DOCUMENT_FILE_NAME;
use crate::storage::{
    BackendKind, DocumentStore, FileCacheEntry, HealthStatus, MaintenanceReport, SqliteStore,
    StoreStats, SymbolStore,
};
use crate::symbol::{Symbol, SymbolKind};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DB_FILE_NAME: &str = "symbols.db";
const MIGRATION_MARKER: &str = ".migrated_to_sqlite";
pub const PARSE_ERROR_LOG: &str = "parse_errors.jsonl";

/// One line of the append-only parse-error log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseErrorRecord {
    pub timestamp: f64,
    pub file: String,
    pub error_type: String,
    pub message: String,
    #[serde(default)]
    pub file_hash: Option<String>,
    #[serde(default)]
    pub compile_args_hash: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
}

/// Append-only line-delimited JSON log of parse failures.
pub struct ParseErrorLog {
    path: PathBuf,
}

impl ParseErrorLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &ParseErrorRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!("failed to serialize parse error record: {e}");
                return;
            }
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            warn!("failed to append to parse error log: {e}");
        }
    }

    pub fn read_all(&self) -> Vec<ParseErrorRecord> {
        let Ok(text) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        text.lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    pub fn records_for_file(&self, file: &str) -> Vec<ParseErrorRecord> {
        self.read_all()
            .into_iter()
            .filter(|r| r.file == file)
            .collect()
    }

    /// Counts of errors grouped by error type.
    pub fn summary(&self) -> std::collections::HashMap<String, usize> {
        let mut counts = std::collections::HashMap::new();
        for record in self.read_all() {
            *counts.entry(record.error_type).or_default() += 1;
        }
        counts
    }

    /// Drop records older than `max_age_days`, rewriting the log.
    pub fn expire(&self, max_age_days: f64) -> usize {
        let cutoff = now_unix() - max_age_days * 86_400.0;
        let records = self.read_all();
        let kept: Vec<&ParseErrorRecord> =
            records.iter().filter(|r| r.timestamp >= cutoff).collect();
        let expired = records.len() - kept.len();
        if expired > 0 {
            let mut text = String::new();
            for record in &kept {
                if let Ok(line) = serde_json::to_string(record) {
                    text.push_str(&line);
                    text.push('\n');
                }
            }
            if let Err(e) = std::fs::write(&self.path, text) {
                warn!("failed to rewrite parse error log: {e}");
                return 0;
            }
        }
        expired
    }
}

/// Orchestrates backend selection, error tracking, recovery, and fallback.
pub struct CacheOrchestrator {
    cache_dir: PathBuf,
    backend: RwLock<Arc<dyn SymbolStore>>,
    tracker: ErrorTracker,
    fallback_active: RwLock<bool>,
    initial_backend: BackendKind,
    parse_errors: ParseErrorLog,
}

impl CacheOrchestrator {
    /// Create the orchestrator for a project identity, selecting and
    /// initializing the backend.
    pub fn new(identity: &ProjectIdentity, settings: &Settings) -> StorageResult<Self> {
        let cache_dir = settings.cache_root.join(identity.cache_directory_name());
        std::fs::create_dir_all(&cache_dir).map_err(|e| StorageError::Io {
            path: cache_dir.clone(),
            source: e,
        })?;

        let tracker = ErrorTracker::new(
            settings.cache.error_window_seconds,
            settings.cache.error_rate_threshold,
        );

        let (backend, kind): (Arc<dyn SymbolStore>, BackendKind) = if settings.cache.use_sqlite {
            match Self::create_sqlite_backend(&cache_dir) {
                Ok(store) => (store, BackendKind::Sqlite),
                Err(e) => {
                    warn!("failed to initialize SQLite backend: {e}; falling back to document store");
                    tracker.record_error(
                        "InitializationError",
                        &e.to_string(),
                        "backend_init",
                        false,
                    );
                    (
                        Arc::new(DocumentStore::open(cache_dir.join(DOCUMENT_FILE_NAME))?),
                        BackendKind::Document,
                    )
                }
            }
        } else {
            debug!("document backend selected by configuration");
            (
                Arc::new(DocumentStore::open(cache_dir.join(DOCUMENT_FILE_NAME))?),
                BackendKind::Document,
            )
        };

        let fallback_active = kind == BackendKind::Document && settings.cache.use_sqlite;
        Ok(Self {
            parse_errors: ParseErrorLog::new(cache_dir.join(PARSE_ERROR_LOG)),
            cache_dir,
            backend: RwLock::new(backend),
            tracker,
            fallback_active: RwLock::new(fallback_active),
            initial_backend: kind,
        })
    }

    /// Open the SQLite store, auto-migrating a legacy document cache first.
    fn create_sqlite_backend(cache_dir: &Path) -> StorageResult<Arc<dyn SymbolStore>> {
        Self::maybe_migrate_from_document(cache_dir)?;
        let store = SqliteStore::open(cache_dir.join(DB_FILE_NAME))?;
        Ok(Arc::new(store))
    }

    /// One-time migration of a legacy document cache into SQLite, with a
    /// backup first, verification after, and a marker file so it never
    /// re-runs.
    fn maybe_migrate_from_document(cache_dir: &Path) -> StorageResult<()> {
        let doc_path = cache_dir.join(DOCUMENT_FILE_NAME);
        let marker_path = cache_dir.join(MIGRATION_MARKER);
        let db_path = cache_dir.join(DB_FILE_NAME);

        if !doc_path.exists() || marker_path.exists() {
            return Ok(());
        }

        info!("migrating legacy document cache to SQLite");
        let backup = RecoveryManager::backup_file(&doc_path)?;

        let doc = DocumentStore::open(&doc_path)?;
        let sqlite = SqliteStore::open(&db_path)?;

        let symbols = doc.load_all_symbols()?;
        sqlite.save_symbols_batch(&symbols)?;
        for meta in doc.load_all_file_metadata()? {
            sqlite.update_file_metadata(&meta)?;
        }
        let sites = doc.load_all_call_sites()?;
        let mut by_file = std::collections::HashMap::<String, Vec<CallSite>>::new();
        for site in sites {
            by_file.entry(site.file.clone()).or_default().push(site);
        }
        for (file, sites) in by_file {
            sqlite.replace_call_sites(&file, &sites)?;
        }
        let aliases = doc.load_type_aliases()?;
        let mut aliases_by_file = std::collections::HashMap::<String, Vec<TypeAlias>>::new();
        for alias in aliases {
            aliases_by_file
                .entry(alias.file.clone())
                .or_default()
                .push(alias);
        }
        for (file, aliases) in aliases_by_file {
            sqlite.replace_type_aliases(&file, &aliases)?;
        }

        // Verify before committing to the new format.
        if sqlite.count_symbols()? != doc.count_symbols()? {
            return Err(StorageError::Unavailable(
                "document-to-sqlite migration verification failed".to_string(),
            ));
        }

        let marker = serde_json::json!({
            "migrated_at": now_unix(),
            "backup_path": backup.display().to_string(),
            "symbols": sqlite.count_symbols()?,
        });
        std::fs::write(&marker_path, marker.to_string()).map_err(|e| StorageError::Io {
            path: marker_path.clone(),
            source: e,
        })?;
        info!("document cache migrated to SQLite");
        Ok(())
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn parse_error_log(&self) -> &ParseErrorLog {
        &self.parse_errors
    }

    pub fn active_backend(&self) -> BackendKind {
        self.backend.read().backend_kind()
    }

    pub fn initial_backend(&self) -> BackendKind {
        self.initial_backend
    }

    pub fn fallback_active(&self) -> bool {
        *self.fallback_active.read()
    }

    pub fn error_summary(&self) -> crate::resilience::ErrorSummary {
        self.tracker.summary()
    }

    /// Switch to the document backend (one-way).
    fn fall_back_to_document(&self) -> StorageResult<()> {
        if *self.fallback_active.read() && self.active_backend() == BackendKind::Document {
            return Ok(());
        }

        warn!("switching to document backend");
        let doc = DocumentStore::open(self.cache_dir.join(DOCUMENT_FILE_NAME))?;
        *self.backend.write() = Arc::new(doc);
        *self.fallback_active.write() = true;
        Ok(())
    }

    /// Try to recover a SQLite backend from a non-recoverable error.
    fn attempt_recovery(&self, class: StorageErrorClass) -> bool {
        match class {
            StorageErrorClass::Corruption => {
                info!("corruption detected, attempting backup + repair");
                let db_path = self.cache_dir.join(DB_FILE_NAME);
                if db_path.exists() {
                    if let Err(e) = RecoveryManager::backup_file(&db_path) {
                        warn!("failed to back up before repair: {e}");
                        return false;
                    }
                }
                let backend = self.backend.read().clone();
                if !RecoveryManager::attempt_repair(backend.as_ref()) {
                    return false;
                }
                // Reconnect to the repaired database.
                match SqliteStore::open(&db_path) {
                    Ok(store) => {
                        *self.backend.write() = Arc::new(store);
                        true
                    }
                    Err(e) => {
                        warn!("failed to reconnect after repair: {e}");
                        false
                    }
                }
            }
            StorageErrorClass::Permission | StorageErrorClass::DiskFull => {
                warn!("resource error, clearing cache");
                RecoveryManager::clear_cache(&self.cache_dir).is_ok()
            }
            _ => false,
        }
    }

    /// Run a backend operation with counting, classification, recovery, and
    /// fallback. Retries once against the replacement backend after a swap.
    fn call<T>(
        &self,
        operation: &'static str,
        f: impl Fn(&dyn SymbolStore) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let backend = self.backend.read().clone();
        match f(backend.as_ref()) {
            Ok(value) => {
                self.tracker.record_operation(operation);
                Ok(value)
            }
            Err(e) => {
                let class = e.class();
                let recoverable = e.is_recoverable();
                let should_fallback = self.tracker.record_error(
                    &format!("{class:?}"),
                    &e.to_string(),
                    operation,
                    recoverable,
                );

                if should_fallback && !self.fallback_active() {
                    self.fall_back_to_document()?;
                    let replacement = self.backend.read().clone();
                    return f(replacement.as_ref());
                }

                if !recoverable && !self.fallback_active() {
                    if self.attempt_recovery(class) {
                        let recovered = self.backend.read().clone();
                        return f(recovered.as_ref());
                    }
                    // Recovery failed: last resort is the document backend.
                    self.fall_back_to_document()?;
                    let replacement = self.backend.read().clone();
                    return f(replacement.as_ref());
                }

                Err(e)
            }
        }
    }
}

impl SymbolStore for CacheOrchestrator {
    fn backend_kind(&self) -> BackendKind {
        self.active_backend()
    }

    fn save_symbol(&self, symbol: &Symbol) -> StorageResult<()> {
        self.call("save_symbol", |s| s.save_symbol(symbol))
    }

    fn save_symbols_batch(&self, symbols: &[Symbol]) -> StorageResult<usize> {
        self.call("save_symbols_batch", |s| s.save_symbols_batch(symbols))
    }

    fn load_symbol_by_usr(&self, usr: &str) -> StorageResult<Option<Symbol>> {
        self.call("load_symbol_by_usr", |s| s.load_symbol_by_usr(usr))
    }

    fn load_symbols_by_name(&self, name: &str) -> StorageResult<Vec<Symbol>> {
        self.call("load_symbols_by_name", |s| s.load_symbols_by_name(name))
    }

    fn load_symbols_by_file(&self, file: &str) -> StorageResult<Vec<Symbol>> {
        self.call("load_symbols_by_file", |s| s.load_symbols_by_file(file))
    }

    fn load_symbols_by_kind(
        &self,
        kind: SymbolKind,
        project_only: bool,
    ) -> StorageResult<Vec<Symbol>> {
        self.call("load_symbols_by_kind", |s| {
            s.load_symbols_by_kind(kind, project_only)
        })
    }

    fn load_all_symbols(&self) -> StorageResult<Vec<Symbol>> {
        self.call("load_all_symbols", |s| s.load_all_symbols())
    }

    fn count_symbols(&self) -> StorageResult<u64> {
        self.call("count_symbols", |s| s.count_symbols())
    }

    fn delete_symbols_by_file(&self, file: &str) -> StorageResult<u64> {
        self.call("delete_symbols_by_file", |s| s.delete_symbols_by_file(file))
    }

    fn search_fts(
        &self,
        pattern: &str,
        kind: Option<SymbolKind>,
        project_only: bool,
    ) -> StorageResult<Vec<Symbol>> {
        self.call("search_fts", |s| s.search_fts(pattern, kind, project_only))
    }

    fn search_regex(
        &self,
        pattern: &str,
        kind: Option<SymbolKind>,
        project_only: bool,
    ) -> StorageResult<Vec<Symbol>> {
        self.call("search_regex", |s| {
            s.search_regex(pattern, kind, project_only)
        })
    }

    fn update_file_metadata(&self, meta: &FileMetadata) -> StorageResult<()> {
        self.call("update_file_metadata", |s| s.update_file_metadata(meta))
    }

    fn get_file_metadata(&self, file: &str) -> StorageResult<Option<FileMetadata>> {
        self.call("get_file_metadata", |s| s.get_file_metadata(file))
    }

    fn load_all_file_metadata(&self) -> StorageResult<Vec<FileMetadata>> {
        self.call("load_all_file_metadata", |s| s.load_all_file_metadata())
    }

    fn save_file_cache(
        &self,
        file: &str,
        symbols: &[Symbol],
        file_hash: &str,
        compile_args_hash: Option<&str>,
        success: bool,
        error_message: Option<&str>,
        retry_count: u32,
    ) -> StorageResult<()> {
        self.call("save_file_cache", |s| {
            s.save_file_cache(
                file,
                symbols,
                file_hash,
                compile_args_hash,
                success,
                error_message,
                retry_count,
            )
        })
    }

    fn load_file_cache(
        &self,
        file: &str,
        current_hash: &str,
        compile_args_hash: Option<&str>,
    ) -> StorageResult<Option<FileCacheEntry>> {
        self.call("load_file_cache", |s| {
            s.load_file_cache(file, current_hash, compile_args_hash)
        })
    }

    fn remove_file_cache(&self, file: &str) -> StorageResult<()> {
        self.call("remove_file_cache", |s| s.remove_file_cache(file))
    }

    fn replace_call_sites(&self, caller_file: &str, sites: &[CallSite]) -> StorageResult<()> {
        self.call("replace_call_sites", |s| {
            s.replace_call_sites(caller_file, sites)
        })
    }

    fn call_sites_by_caller(&self, caller_usr: &str) -> StorageResult<Vec<CallSite>> {
        self.call("call_sites_by_caller", |s| s.call_sites_by_caller(caller_usr))
    }

    fn call_sites_by_callee(&self, callee: &str) -> StorageResult<Vec<CallSite>> {
        self.call("call_sites_by_callee", |s| s.call_sites_by_callee(callee))
    }

    fn load_all_call_sites(&self) -> StorageResult<Vec<CallSite>> {
        self.call("load_all_call_sites", |s| s.load_all_call_sites())
    }

    fn replace_type_aliases(&self, file: &str, aliases: &[TypeAlias]) -> StorageResult<()> {
        self.call("replace_type_aliases", |s| {
            s.replace_type_aliases(file, aliases)
        })
    }

    fn load_type_aliases(&self) -> StorageResult<Vec<TypeAlias>> {
        self.call("load_type_aliases", |s| s.load_type_aliases())
    }

    fn replace_file_dependencies(
        &self,
        source_file: &str,
        deps: &[FileDependency],
    ) -> StorageResult<()> {
        self.call("replace_file_dependencies", |s| {
            s.replace_file_dependencies(source_file, deps)
        })
    }

    fn load_file_dependencies(&self) -> StorageResult<Vec<FileDependency>> {
        self.call("load_file_dependencies", |s| s.load_file_dependencies())
    }

    fn set_cache_metadata(&self, key: &str, value: &str) -> StorageResult<()> {
        self.call("set_cache_metadata", |s| s.set_cache_metadata(key, value))
    }

    fn get_cache_metadata(&self, key: &str) -> StorageResult<Option<String>> {
        self.call("get_cache_metadata", |s| s.get_cache_metadata(key))
    }

    fn vacuum(&self) -> StorageResult<()> {
        self.call("vacuum", |s| s.vacuum())
    }

    fn analyze(&self) -> StorageResult<()> {
        self.call("analyze", |s| s.analyze())
    }

    fn optimize_fts(&self) -> StorageResult<()> {
        self.call("optimize_fts", |s| s.optimize_fts())
    }

    fn rebuild_fts(&self) -> StorageResult<()> {
        self.call("rebuild_fts", |s| s.rebuild_fts())
    }

    fn auto_maintenance(
        &self,
        vacuum_threshold_bytes: u64,
        vacuum_min_waste_bytes: u64,
    ) -> StorageResult<MaintenanceReport> {
        self.call("auto_maintenance", |s| {
            s.auto_maintenance(vacuum_threshold_bytes, vacuum_min_waste_bytes)
        })
    }

    fn check_integrity(&self, full: bool) -> StorageResult<bool> {
        self.call("check_integrity", |s| s.check_integrity(full))
    }

    fn health_status(&self) -> StorageResult<HealthStatus> {
        self.call("health_status", |s| s.health_status())
    }

    fn stats(&self) -> StorageResult<StoreStats> {
        self.call("stats", |s| s.stats())
    }

    fn repair(&self) -> StorageResult<bool> {
        self.call("repair", |s| s.repair())
    }

    fn flush(&self) -> StorageResult<()> {
        self.call("flush", |s| s.flush())
    }

    fn clear(&self) -> StorageResult<()> {
        self.call("clear", |s| s.clear())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings_with_cache_root(dir: &TempDir) -> Settings {
        let mut settings = Settings::default();
        settings.cache_root = dir.path().to_path_buf();
        settings
    }

    fn sample(usr: &str, name: &str) -> Symbol {
        Symbol::new(usr, name, name, SymbolKind::Class, "/p/a.h", 1)
    }

    #[test]
    fn prefers_sqlite_by_default() {
        let dir = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let identity = ProjectIdentity::new(project.path(), None);
        let orchestrator =
            CacheOrchestrator::new(&identity, &settings_with_cache_root(&dir)).unwrap();
        assert_eq!(orchestrator.active_backend(), BackendKind::Sqlite);
        assert!(!orchestrator.fallback_active());
    }

    #[test]
    fn honors_document_feature_flag() {
        let dir = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let identity = ProjectIdentity::new(project.path(), None);
        let mut settings = settings_with_cache_root(&dir);
        settings.cache.use_sqlite = false;
        let orchestrator = CacheOrchestrator::new(&identity, &settings).unwrap();
        assert_eq!(orchestrator.active_backend(), BackendKind::Document);
    }

    #[test]
    fn migrates_legacy_document_cache_once() {
        let dir = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let identity = ProjectIdentity::new(project.path(), None);
        let settings = settings_with_cache_root(&dir);

        // Seed a legacy document cache before the first SQLite open.
        let cache_dir = settings.cache_root.join(identity.cache_directory_name());
        std::fs::create_dir_all(&cache_dir).unwrap();
        let doc = DocumentStore::open(cache_dir.join(DOCUMENT_FILE_NAME)).unwrap();
        doc.save_symbols_batch(&[sample("u1", "Legacy"), sample("u2", "Other")])
            .unwrap();
        drop(doc);

        let orchestrator = CacheOrchestrator::new(&identity, &settings).unwrap();
        assert_eq!(orchestrator.active_backend(), BackendKind::Sqlite);
        assert_eq!(orchestrator.count_symbols().unwrap(), 2);
        assert!(cache_dir.join(MIGRATION_MARKER).exists());

        // A backup of the document cache was taken.
        let backups: Vec<_> = std::fs::read_dir(&cache_dir)
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().contains("_backup_"))
            .collect();
        assert!(!backups.is_empty());

        // Re-opening must not re-migrate (marker present).
        drop(orchestrator);
        let again = CacheOrchestrator::new(&identity, &settings).unwrap();
        assert_eq!(again.count_symbols().unwrap(), 2);
    }

    #[test]
    fn operations_are_counted() {
        let dir = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let identity = ProjectIdentity::new(project.path(), None);
        let orchestrator =
            CacheOrchestrator::new(&identity, &settings_with_cache_root(&dir)).unwrap();

        orchestrator.save_symbol(&sample("u1", "A")).unwrap();
        orchestrator.count_symbols().unwrap();

        let summary = orchestrator.error_summary();
        assert_eq!(summary.total_operations, 2);
        assert_eq!(summary.total_errors, 0);
    }

    #[test]
    fn parse_error_log_appends_filters_and_expires() {
        let dir = TempDir::new().unwrap();
        let log = ParseErrorLog::new(dir.path().join(PARSE_ERROR_LOG));

        log.append(&ParseErrorRecord {
            timestamp: now_unix(),
            file: "/p/a.cpp".into(),
            error_type: "SyntaxError".into(),
            message: "unbalanced braces".into(),
            file_hash: Some("h1".into()),
            compile_args_hash: None,
            retry_count: 1,
        });
        log.append(&ParseErrorRecord {
            timestamp: now_unix() - 10.0 * 86_400.0,
            file: "/p/b.cpp".into(),
            error_type: "Timeout".into(),
            message: "parser hung".into(),
            file_hash: None,
            compile_args_hash: None,
            retry_count: 0,
        });

        assert_eq!(log.read_all().len(), 2);
        assert_eq!(log.records_for_file("/p/a.cpp").len(), 1);
        assert_eq!(log.summary().get("SyntaxError"), Some(&1));

        let expired = log.expire(7.0);
        assert_eq!(expired, 1);
        assert_eq!(log.read_all().len(), 1);
    }
}
