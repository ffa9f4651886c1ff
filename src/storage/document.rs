//! Document-file fallback store
//!
//! Serializes the entire cache into a single JSON document. Same contract as
//! the SQLite store, used as the legacy cache format and as the failover
//! target when the primary backend errors out. Every mutation writes through
//! to disk (atomic temp-file + rename), which is slow on large projects but
//! keeps the file consistent after a crash.

use crate::error::{StorageError, StorageResult};
use crate::relations::{now_unix, CallSite, FileDependency, FileMetadata, TypeAlias};
use crate::storage::{
    BackendKind, FileCacheEntry, HealthStatus, MaintenanceReport, StoreStats, SymbolStore,
};
use crate::symbol::{Symbol, SymbolKind};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DOCUMENT_FILE_NAME: &str = "symbols.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct DocumentData {
    #[serde(default)]
    version: u32,
    /// Symbols keyed by USR
    #[serde(default)]
    symbols: HashMap<String, Symbol>,
    #[serde(default)]
    file_metadata: HashMap<String, FileMetadata>,
    #[serde(default)]
    call_sites: Vec<CallSite>,
    #[serde(default)]
    type_aliases: Vec<TypeAlias>,
    #[serde(default)]
    file_dependencies: Vec<FileDependency>,
    #[serde(default)]
    cache_metadata: HashMap<String, String>,
}

pub struct DocumentStore {
    path: PathBuf,
    data: RwLock<DocumentData>,
}

impl DocumentStore {
    /// Open (or create) the document store at `path`.
    ///
    /// An unreadable or malformed file is treated as empty with a warning;
    /// the next write replaces it.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let data = if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(text) => match serde_json::from_str(&text) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("document store at {} is malformed ({e}), starting empty", path.display());
                        DocumentData::default()
                    }
                },
                Err(e) => {
                    return Err(StorageError::Io { path, source: e });
                }
            }
        } else {
            DocumentData::default()
        };

        debug!("document store opened at {}", path.display());
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &DocumentData) -> StorageResult<()> {
        let text = serde_json::to_string(data)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(|e| StorageError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StorageError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(())
    }

    /// Whitespace-separated terms, all of which must appear in the name or
    /// qualified name (case-insensitive). A trailing `*` makes a term a
    /// prefix query, matching the FTS5 syntax the primary backend accepts.
    fn matches_fts(symbol: &Symbol, terms: &[(String, bool)]) -> bool {
        let name = symbol.name.to_lowercase();
        let qualified = symbol.qualified_name.to_lowercase();
        terms.iter().all(|(term, prefix)| {
            if *prefix {
                name.starts_with(term.as_str())
                    || qualified
                        .split("::")
                        .any(|part| part.starts_with(term.as_str()))
            } else {
                name == *term || qualified.split("::").any(|part| part == term)
            }
        })
    }
}

impl SymbolStore for DocumentStore {
    fn backend_kind(&self) -> BackendKind {
        BackendKind::Document
    }

    fn save_symbol(&self, symbol: &Symbol) -> StorageResult<()> {
        let mut data = self.data.write();
        data.symbols.insert(symbol.usr.clone(), symbol.clone());
        self.persist(&data)
    }

    fn save_symbols_batch(&self, symbols: &[Symbol]) -> StorageResult<usize> {
        if symbols.is_empty() {
            return Ok(0);
        }
        let mut data = self.data.write();
        for symbol in symbols {
            data.symbols.insert(symbol.usr.clone(), symbol.clone());
        }
        self.persist(&data)?;
        Ok(symbols.len())
    }

    fn load_symbol_by_usr(&self, usr: &str) -> StorageResult<Option<Symbol>> {
        Ok(self.data.read().symbols.get(usr).cloned())
    }

    fn load_symbols_by_name(&self, name: &str) -> StorageResult<Vec<Symbol>> {
        let data = self.data.read();
        let mut out: Vec<Symbol> = data
            .symbols
            .values()
            .filter(|s| s.name == name)
            .cloned()
            .collect();
        out.sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
        Ok(out)
    }

    fn load_symbols_by_file(&self, file: &str) -> StorageResult<Vec<Symbol>> {
        let data = self.data.read();
        let mut out: Vec<Symbol> = data
            .symbols
            .values()
            .filter(|s| s.file == file)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.line);
        Ok(out)
    }

    fn load_symbols_by_kind(
        &self,
        kind: SymbolKind,
        project_only: bool,
    ) -> StorageResult<Vec<Symbol>> {
        let data = self.data.read();
        let mut out: Vec<Symbol> = data
            .symbols
            .values()
            .filter(|s| s.kind == kind && (!project_only || s.is_project))
            .cloned()
            .collect();
        out.sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
        Ok(out)
    }

    fn load_all_symbols(&self) -> StorageResult<Vec<Symbol>> {
        let data = self.data.read();
        let mut out: Vec<Symbol> = data.symbols.values().cloned().collect();
        out.sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
        Ok(out)
    }

    fn count_symbols(&self) -> StorageResult<u64> {
        Ok(self.data.read().symbols.len() as u64)
    }

    fn delete_symbols_by_file(&self, file: &str) -> StorageResult<u64> {
        let mut data = self.data.write();
        let before = data.symbols.len();
        data.symbols.retain(|_, s| s.file != file);
        data.call_sites.retain(|c| c.file != file);
        let deleted = (before - data.symbols.len()) as u64;
        self.persist(&data)?;
        Ok(deleted)
    }

    fn search_fts(
        &self,
        pattern: &str,
        kind: Option<SymbolKind>,
        project_only: bool,
    ) -> StorageResult<Vec<Symbol>> {
        let terms: Vec<(String, bool)> = pattern
            .split_whitespace()
            .map(|t| {
                let t = t.trim_matches('"');
                match t.strip_suffix('*') {
                    Some(stem) => (stem.to_lowercase(), true),
                    None => (t.to_lowercase(), false),
                }
            })
            .filter(|(t, _)| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let data = self.data.read();
        let mut out: Vec<Symbol> = data
            .symbols
            .values()
            .filter(|s| {
                (!project_only || s.is_project)
                    && kind.is_none_or(|k| s.kind == k)
                    && Self::matches_fts(s, &terms)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| (&a.name, &a.qualified_name).cmp(&(&b.name, &b.qualified_name)));
        Ok(out)
    }

    fn search_regex(
        &self,
        pattern: &str,
        kind: Option<SymbolKind>,
        project_only: bool,
    ) -> StorageResult<Vec<Symbol>> {
        let regex = match crate::query::pattern::compile_fullmatch(pattern) {
            Ok(re) => re,
            Err(e) => {
                warn!("invalid regex pattern '{pattern}': {e}");
                return Ok(Vec::new());
            }
        };

        let data = self.data.read();
        let mut out: Vec<Symbol> = data
            .symbols
            .values()
            .filter(|s| {
                (!project_only || s.is_project)
                    && kind.is_none_or(|k| s.kind == k)
                    && (regex.is_match(&s.name) || regex.is_match(&s.qualified_name))
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
        Ok(out)
    }

    fn update_file_metadata(&self, meta: &FileMetadata) -> StorageResult<()> {
        let mut data = self.data.write();
        data.file_metadata
            .insert(meta.file_path.clone(), meta.clone());
        self.persist(&data)
    }

    fn get_file_metadata(&self, file: &str) -> StorageResult<Option<FileMetadata>> {
        Ok(self.data.read().file_metadata.get(file).cloned())
    }

    fn load_all_file_metadata(&self) -> StorageResult<Vec<FileMetadata>> {
        let data = self.data.read();
        let mut out: Vec<FileMetadata> = data.file_metadata.values().cloned().collect();
        out.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        Ok(out)
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
        let mut data = self.data.write();
        data.symbols.retain(|_, s| s.file != file);
        data.call_sites.retain(|c| c.file != file);
        for symbol in symbols {
            data.symbols.insert(symbol.usr.clone(), symbol.clone());
        }
        data.file_metadata.insert(
            file.to_string(),
            FileMetadata {
                file_path: file.to_string(),
                file_hash: file_hash.to_string(),
                compile_args_hash: compile_args_hash.map(str::to_string),
                indexed_at: now_unix(),
                symbol_count: symbols.len() as u32,
                success,
                error_message: error_message.map(str::to_string),
                retry_count,
            },
        );
        self.persist(&data)
    }

    fn load_file_cache(
        &self,
        file: &str,
        current_hash: &str,
        compile_args_hash: Option<&str>,
    ) -> StorageResult<Option<FileCacheEntry>> {
        let data = self.data.read();
        let Some(meta) = data.file_metadata.get(file) else {
            return Ok(None);
        };
        if meta.file_hash != current_hash {
            return Ok(None);
        }
        if let Some(args_hash) = compile_args_hash {
            if meta.compile_args_hash.as_deref() != Some(args_hash) {
                return Ok(None);
            }
        }

        let mut symbols: Vec<Symbol> = data
            .symbols
            .values()
            .filter(|s| s.file == file)
            .cloned()
            .collect();
        symbols.sort_by_key(|s| s.line);
        Ok(Some(FileCacheEntry {
            symbols,
            success: meta.success,
            error_message: meta.error_message.clone(),
            retry_count: meta.retry_count,
        }))
    }

    fn remove_file_cache(&self, file: &str) -> StorageResult<()> {
        let mut data = self.data.write();
        data.symbols.retain(|_, s| s.file != file);
        data.call_sites.retain(|c| c.file != file);
        data.type_aliases.retain(|a| a.file != file);
        data.file_dependencies.retain(|d| d.source_file != file);
        data.file_metadata.remove(file);
        self.persist(&data)
    }

    fn replace_call_sites(&self, caller_file: &str, sites: &[CallSite]) -> StorageResult<()> {
        let mut data = self.data.write();
        data.call_sites.retain(|c| c.file != caller_file);
        data.call_sites.extend_from_slice(sites);
        self.persist(&data)
    }

    fn call_sites_by_caller(&self, caller_usr: &str) -> StorageResult<Vec<CallSite>> {
        let data = self.data.read();
        let mut out: Vec<CallSite> = data
            .call_sites
            .iter()
            .filter(|c| c.caller_usr == caller_usr)
            .cloned()
            .collect();
        out.sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
        Ok(out)
    }

    fn call_sites_by_callee(&self, callee: &str) -> StorageResult<Vec<CallSite>> {
        let data = self.data.read();
        let mut out: Vec<CallSite> = data
            .call_sites
            .iter()
            .filter(|c| c.callee_usr == callee || c.callee_name == callee)
            .cloned()
            .collect();
        out.sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
        Ok(out)
    }

    fn load_all_call_sites(&self) -> StorageResult<Vec<CallSite>> {
        let data = self.data.read();
        let mut out = data.call_sites.clone();
        out.sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
        Ok(out)
    }

    fn replace_type_aliases(&self, file: &str, aliases: &[TypeAlias]) -> StorageResult<()> {
        let mut data = self.data.write();
        data.type_aliases.retain(|a| a.file != file);
        data.type_aliases.extend_from_slice(aliases);
        self.persist(&data)
    }

    fn load_type_aliases(&self) -> StorageResult<Vec<TypeAlias>> {
        let data = self.data.read();
        let mut out = data.type_aliases.clone();
        out.sort_by(|a, b| a.alias_qualified_name.cmp(&b.alias_qualified_name));
        Ok(out)
    }

    fn replace_file_dependencies(
        &self,
        source_file: &str,
        deps: &[FileDependency],
    ) -> StorageResult<()> {
        let mut data = self.data.write();
        data.file_dependencies.retain(|d| d.source_file != source_file);
        data.file_dependencies.extend_from_slice(deps);
        self.persist(&data)
    }

    fn load_file_dependencies(&self) -> StorageResult<Vec<FileDependency>> {
        let data = self.data.read();
        let mut out = data.file_dependencies.clone();
        out.sort_by(|a, b| {
            (&a.source_file, &a.included_file).cmp(&(&b.source_file, &b.included_file))
        });
        Ok(out)
    }

    fn set_cache_metadata(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut data = self.data.write();
        data.cache_metadata
            .insert(key.to_string(), value.to_string());
        self.persist(&data)
    }

    fn get_cache_metadata(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.data.read().cache_metadata.get(key).cloned())
    }

    fn vacuum(&self) -> StorageResult<()> {
        Ok(())
    }

    fn analyze(&self) -> StorageResult<()> {
        Ok(())
    }

    fn optimize_fts(&self) -> StorageResult<()> {
        Ok(())
    }

    fn rebuild_fts(&self) -> StorageResult<()> {
        Ok(())
    }

    fn auto_maintenance(
        &self,
        _vacuum_threshold_bytes: u64,
        _vacuum_min_waste_bytes: u64,
    ) -> StorageResult<MaintenanceReport> {
        let size = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        Ok(MaintenanceReport {
            size_before_bytes: size,
            size_after_bytes: size,
            ..Default::default()
        })
    }

    fn check_integrity(&self, _full: bool) -> StorageResult<bool> {
        if !self.path.exists() {
            return Ok(true);
        }
        let text = std::fs::read_to_string(&self.path).map_err(|e| StorageError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(serde_json::from_str::<DocumentData>(&text).is_ok())
    }

    fn health_status(&self) -> StorageResult<HealthStatus> {
        let data = self.data.read();
        let symbol_rows = data.symbols.len() as u64;
        let size_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);

        let mut table_counts = HashMap::new();
        table_counts.insert("symbols".to_string(), symbol_rows);
        table_counts.insert(
            "file_metadata".to_string(),
            data.file_metadata.len() as u64,
        );
        table_counts.insert("call_sites".to_string(), data.call_sites.len() as u64);
        table_counts.insert("type_aliases".to_string(), data.type_aliases.len() as u64);
        table_counts.insert(
            "file_dependencies".to_string(),
            data.file_dependencies.len() as u64,
        );

        Ok(HealthStatus {
            healthy: true,
            integrity_ok: true,
            size_bytes,
            symbol_rows,
            fts_rows: symbol_rows,
            fts_in_sync: true,
            journal_mode: "document".to_string(),
            table_counts,
            warnings: Vec::new(),
            errors: Vec::new(),
        })
    }

    fn stats(&self) -> StorageResult<StoreStats> {
        let data = self.data.read();
        let mut by_kind: HashMap<String, u64> = HashMap::new();
        let mut project_symbols = 0u64;
        for symbol in data.symbols.values() {
            *by_kind.entry(symbol.kind.as_str().to_string()).or_default() += 1;
            if symbol.is_project {
                project_symbols += 1;
            }
        }
        let total_symbols = data.symbols.len() as u64;
        Ok(StoreStats {
            total_symbols,
            by_kind,
            project_symbols,
            dependency_symbols: total_symbols - project_symbols,
            total_files: data.file_metadata.len() as u64,
            db_size_bytes: std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0),
        })
    }

    fn repair(&self) -> StorageResult<bool> {
        // Whatever is in memory is authoritative; rewriting the file fixes
        // on-disk corruption.
        let data = self.data.read();
        self.persist(&data)?;
        Ok(true)
    }

    fn flush(&self) -> StorageResult<()> {
        let data = self.data.read();
        self.persist(&data)
    }

    fn clear(&self) -> StorageResult<()> {
        let mut data = self.data.write();
        *data = DocumentData::default();
        self.persist(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(usr: &str, name: &str, file: &str) -> Symbol {
        Symbol::new(usr, name, name, SymbolKind::Class, file, 1)
    }

    fn open_store(dir: &TempDir) -> DocumentStore {
        DocumentStore::open(dir.path().join(DOCUMENT_FILE_NAME)).unwrap()
    }

    #[test]
    fn round_trip_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir);
            store
                .save_symbols_batch(&[sample("u1", "A", "/p/a.h"), sample("u2", "B", "/p/b.h")])
                .unwrap();
            store.set_cache_metadata("indexed_file_count", "2").unwrap();
        }

        let store = open_store(&dir);
        assert_eq!(store.count_symbols().unwrap(), 2);
        assert_eq!(
            store
                .get_cache_metadata("indexed_file_count")
                .unwrap()
                .as_deref(),
            Some("2")
        );
    }

    #[test]
    fn fts_emulation_matches_components_and_prefixes() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut s = sample("u1", "Handler", "/p/h.h");
        s.qualified_name = "app::ui::Handler".into();
        store.save_symbols_batch(&[s]).unwrap();

        assert_eq!(store.search_fts("Handler", None, true).unwrap().len(), 1);
        assert_eq!(store.search_fts("handler", None, true).unwrap().len(), 1);
        assert_eq!(store.search_fts("Hand*", None, true).unwrap().len(), 1);
        assert_eq!(store.search_fts("ui", None, true).unwrap().len(), 1);
        assert!(store.search_fts("Widget", None, true).unwrap().is_empty());
    }

    #[test]
    fn malformed_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DOCUMENT_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();

        let store = DocumentStore::open(&path).unwrap();
        assert_eq!(store.count_symbols().unwrap(), 0);
        assert!(!store.check_integrity(false).unwrap());

        // Repair rewrites the file from the (empty) in-memory state.
        assert!(store.repair().unwrap());
        assert!(store.check_integrity(false).unwrap());
    }

    #[test]
    fn same_contract_as_sqlite_for_file_cache() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .save_file_cache("/p/a.h", &[sample("u1", "A", "/p/a.h")], "h1", None, true, None, 0)
            .unwrap();

        assert!(store.load_file_cache("/p/a.h", "h1", None).unwrap().is_some());
        assert!(store.load_file_cache("/p/a.h", "h2", None).unwrap().is_none());

        store.remove_file_cache("/p/a.h").unwrap();
        assert!(store.get_file_metadata("/p/a.h").unwrap().is_none());
        assert_eq!(store.count_symbols().unwrap(), 0);
    }
}
