//! Index lifecycle: cold build, warm load, incremental refresh
//!
//! The cold path walks the project, parses files on a rayon worker pool (one
//! parser per worker), and batch-writes each file's symbols in a single
//! transaction. The warm path validates stored cache metadata against the
//! current configuration and skips parsing entirely. The refresh path diffs
//! file-content hashes against stored metadata, expands the changed set
//! through include dependencies, and re-parses only what moved.

pub mod walker;

pub use walker::FileWalker;

use crate::config::Settings;
use crate::error::{IndexError, IndexResult};
use crate::parsing::{
    compile_commands::compile_args_hash, is_header, CompileCommands, ParseContext, ParserFactory,
};
use crate::relations::{now_unix, FileDependency};
use crate::state::{AnalyzerState, IndexingProgress, StateManager};
use crate::storage::orchestrator::ParseErrorRecord;
use crate::storage::{CacheOrchestrator, SymbolStore};
use crate::symbol::{is_richer_definition, Symbol};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Progress callback. Must never block the indexer; panics inside it are
/// caught and ignored.
pub type ProgressCallback = Arc<dyn Fn(&IndexingProgress) + Send + Sync>;

/// Content digest of a file: SHA-256, first 16 bytes as hex.
pub fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(content.as_bytes());
    digest
        .iter()
        .take(16)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Modification time of a file as Unix seconds, stringified for cache
/// metadata comparison.
pub fn mtime_string(path: &Path) -> Option<String> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let secs = modified
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .as_secs();
    Some(secs.to_string())
}

/// What an incremental refresh actually did.
#[derive(Debug, Default, Clone, Copy)]
pub struct RefreshReport {
    pub changed: usize,
    pub deleted: usize,
    pub reparsed: usize,
}

enum FileOutcome {
    CacheHit,
    Indexed,
    Failed,
    Cancelled,
}

/// Drives the index lifecycle against a storage orchestrator.
pub struct ProjectIndexer {
    project_root: PathBuf,
    config_file: Option<PathBuf>,
    settings: Arc<Settings>,
    store: Arc<CacheOrchestrator>,
    parser_factory: Arc<dyn ParserFactory>,
    state: Arc<StateManager>,
    cancel: Arc<AtomicBool>,
}

impl ProjectIndexer {
    pub fn new(
        project_root: PathBuf,
        config_file: Option<PathBuf>,
        settings: Arc<Settings>,
        store: Arc<CacheOrchestrator>,
        parser_factory: Arc<dyn ParserFactory>,
        state: Arc<StateManager>,
    ) -> Self {
        Self {
            project_root,
            config_file,
            settings,
            store,
            parser_factory,
            state,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn compile_commands(&self) -> CompileCommands {
        match &self.settings.indexing.compile_commands {
            Some(path) => CompileCommands::load(path),
            None => CompileCommands::default(),
        }
    }

    /// Warm path: if stored cache metadata matches the current configuration,
    /// skip indexing and transition straight to INDEXED.
    pub fn try_warm_load(&self) -> bool {
        if self.store.count_symbols().unwrap_or(0) == 0 {
            return false;
        }
        if !self.cache_metadata_valid() {
            return false;
        }

        let cached_files = self
            .store
            .load_all_file_metadata()
            .map(|m| m.len())
            .unwrap_or(0);
        let mut progress = IndexingProgress::new(cached_files);
        progress.indexed_files = cached_files;
        progress.cache_hits = cached_files;
        self.state.update_progress(progress);
        self.state.transition_to(AnalyzerState::Indexed);
        info!("warm load: {cached_files} files served from cache");
        true
    }

    /// Invariant: cache load rejects if any of the stored configuration
    /// fingerprints differs from the current one.
    fn cache_metadata_valid(&self) -> bool {
        // Absent keys and empty values compare equal: both mean "not set".
        let matches = |key: &str, current: Option<String>| -> bool {
            let stored = self
                .store
                .get_cache_metadata(key)
                .unwrap_or(None)
                .unwrap_or_default();
            stored == current.unwrap_or_default()
        };

        if !matches(
            "include_dependencies",
            Some(self.settings.indexing.include_dependencies.to_string()),
        ) {
            debug!("cache invalid: include_dependencies changed");
            return false;
        }

        let config_ok = matches(
            "config_file_path",
            self.config_file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        ) && matches(
            "config_file_mtime",
            self.config_file.as_deref().and_then(mtime_string),
        );
        if !config_ok {
            debug!("cache invalid: config file changed");
            return false;
        }

        let cc_ok = matches(
            "compile_commands_path",
            self.settings
                .indexing
                .compile_commands
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        ) && matches(
            "compile_commands_mtime",
            self.settings
                .indexing
                .compile_commands
                .as_deref()
                .and_then(mtime_string),
        );
        if !cc_ok {
            debug!("cache invalid: compile_commands changed");
            return false;
        }

        true
    }

    fn write_cache_metadata(&self, indexed_file_count: usize) {
        let set = |key: &str, value: Option<String>| {
            let value = value.unwrap_or_default();
            if let Err(e) = self.store.set_cache_metadata(key, &value) {
                warn!("failed to write cache metadata {key}: {e}");
            }
        };

        set(
            "include_dependencies",
            Some(self.settings.indexing.include_dependencies.to_string()),
        );
        set(
            "config_file_path",
            self.config_file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        );
        set(
            "config_file_mtime",
            self.config_file.as_deref().and_then(mtime_string),
        );
        set(
            "compile_commands_path",
            self.settings
                .indexing
                .compile_commands
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        );
        set(
            "compile_commands_mtime",
            self.settings
                .indexing
                .compile_commands
                .as_deref()
                .and_then(mtime_string),
        );
        set("indexed_file_count", Some(indexed_file_count.to_string()));
    }

    /// Cold build. Transitions INDEXING -> INDEXED, or ERROR on failure.
    /// Returns the number of files processed (indexed + cache hits).
    pub fn index_project(
        &self,
        force: bool,
        progress_cb: Option<ProgressCallback>,
    ) -> IndexResult<usize> {
        self.cancel.store(false, Ordering::SeqCst);
        self.state.transition_to(AnalyzerState::Indexing);

        match self.run_build(force, progress_cb) {
            Ok(count) => {
                self.state.transition_to(AnalyzerState::Indexed);
                Ok(count)
            }
            Err(e) => {
                self.state.transition_to(AnalyzerState::Error);
                Err(e)
            }
        }
    }

    fn run_build(&self, force: bool, progress_cb: Option<ProgressCallback>) -> IndexResult<usize> {
        let files = FileWalker::new(Arc::clone(&self.settings)).walk(&self.project_root);
        info!(
            "indexing {} files under {}",
            files.len(),
            self.project_root.display()
        );

        self.state.update_progress(IndexingProgress::new(files.len()));
        let commands = self.compile_commands();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.indexing.parallel_threads.max(1))
            .build()
            .map_err(|e| IndexError::General(format!("failed to build worker pool: {e}")))?;

        let processed = AtomicUsize::new(0);
        let cancelled = AtomicBool::new(false);

        pool.install(|| {
            files
                .par_iter()
                .map_init(
                    || self.parser_factory.create(),
                    |parser, file| {
                        if self.cancel.load(Ordering::SeqCst) {
                            cancelled.store(true, Ordering::SeqCst);
                            return FileOutcome::Cancelled;
                        }
                        let outcome = match parser {
                            Ok(parser) => {
                                self.index_one_file(parser.as_mut(), file, &commands, force)
                            }
                            Err(e) => {
                                warn!("parser unavailable: {e}");
                                FileOutcome::Failed
                            }
                        };
                        self.bump_progress(file, &outcome, &progress_cb);
                        if !matches!(outcome, FileOutcome::Cancelled | FileOutcome::Failed) {
                            processed.fetch_add(1, Ordering::Relaxed);
                        }
                        outcome
                    },
                )
                .collect::<Vec<_>>()
        });

        if cancelled.load(Ordering::SeqCst) {
            return Err(IndexError::Cancelled);
        }

        self.write_cache_metadata(files.len());
        Ok(processed.load(Ordering::Relaxed))
    }

    fn bump_progress(
        &self,
        file: &Path,
        outcome: &FileOutcome,
        progress_cb: &Option<ProgressCallback>,
    ) {
        let snapshot = self.state.with_progress(|p| {
            match outcome {
                FileOutcome::CacheHit => {
                    p.cache_hits += 1;
                    p.indexed_files += 1;
                }
                FileOutcome::Indexed => p.indexed_files += 1,
                FileOutcome::Failed => p.failed_files += 1,
                FileOutcome::Cancelled => {}
            }
            p.current_file = Some(file.to_string_lossy().into_owned());
        });

        if let (Some(cb), Some(progress)) = (progress_cb, snapshot) {
            // Callback bugs must never take down the indexer.
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(&progress)));
        }
    }

    /// Parse one file and replace its rows. Failure caches the error so the
    /// file is skipped until its content or compile args change.
    fn index_one_file(
        &self,
        parser: &mut dyn crate::parsing::SourceParser,
        file: &Path,
        commands: &CompileCommands,
        force: bool,
    ) -> FileOutcome {
        let file_str = file.to_string_lossy().into_owned();

        let content = match std::fs::read_to_string(file) {
            Ok(content) => content,
            Err(e) => {
                warn!("cannot read {}: {e}", file.display());
                return FileOutcome::Failed;
            }
        };
        let hash = content_hash(&content);
        let args = commands.args_for(file);
        let args_hash = args.map(compile_args_hash);

        let mut prior_retries = 0;
        if !force {
            match self
                .store
                .load_file_cache(&file_str, &hash, args_hash.as_deref())
            {
                Ok(Some(entry)) if entry.success => return FileOutcome::CacheHit,
                Ok(Some(entry)) => {
                    if entry.retry_count >= self.settings.indexing.max_parse_retries {
                        debug!(
                            "skipping {} after {} failed parses",
                            file.display(),
                            entry.retry_count
                        );
                        return FileOutcome::Failed;
                    }
                    prior_retries = entry.retry_count;
                }
                _ => {}
            }
        }

        let context = ParseContext {
            project_root: self.project_root.clone(),
            compile_args: args.map(<[_]>::to_vec).unwrap_or_default(),
        };

        let unit = match parser.parse(file, &content, &context) {
            Ok(unit) => unit,
            Err(e) => {
                let retry_count = prior_retries + 1;
                self.store.parse_error_log().append(&ParseErrorRecord {
                    timestamp: now_unix(),
                    file: file_str.clone(),
                    error_type: "ParseError".to_string(),
                    message: e.to_string(),
                    file_hash: Some(hash.clone()),
                    compile_args_hash: args_hash.clone(),
                    retry_count,
                });
                let _ = self.store.save_file_cache(
                    &file_str,
                    &[],
                    &hash,
                    args_hash.as_deref(),
                    false,
                    Some(&e.to_string()),
                    retry_count,
                );
                return FileOutcome::Failed;
            }
        };

        let mut symbols = dedup_file_symbols(unit.symbols);
        for symbol in &mut symbols {
            symbol.is_project = Path::new(&symbol.file).starts_with(&self.project_root);
            self.merge_with_store(symbol);
        }

        let saved = self.store.save_file_cache(
            &file_str,
            &symbols,
            &hash,
            args_hash.as_deref(),
            true,
            None,
            0,
        );
        if let Err(e) = saved {
            warn!("failed to save cache for {}: {e}", file.display());
            return FileOutcome::Failed;
        }
        let _ = self.store.replace_call_sites(&file_str, &unit.call_sites);
        let _ = self.store.replace_type_aliases(&file_str, &unit.type_aliases);

        let deps = self.resolve_includes(file, &unit.includes);
        let _ = self.store.replace_file_dependencies(&file_str, &deps);

        FileOutcome::Indexed
    }

    /// Keep a stored definition when this file only re-declares the symbol,
    /// attaching header coordinates to the surviving definition. The reverse
    /// direction (this file defines, a header declared) also fills the
    /// header fields.
    fn merge_with_store(&self, symbol: &mut Symbol) {
        let Ok(Some(existing)) = self.store.load_symbol_by_usr(&symbol.usr) else {
            return;
        };
        if existing.file == symbol.file {
            return;
        }

        if !symbol.is_definition && existing.is_definition {
            let mut definition = existing;
            if is_header(Path::new(&symbol.file)) {
                definition.header_file = Some(symbol.file.clone());
                definition.header_line = Some(symbol.line);
                definition.header_start_line = symbol.start_line;
                definition.header_end_line = symbol.end_line;
            }
            *symbol = definition;
        } else if symbol.is_definition
            && !existing.is_definition
            && is_header(Path::new(&existing.file))
        {
            symbol.header_file = Some(existing.file);
            symbol.header_line = Some(existing.line);
            symbol.header_start_line = existing.start_line;
            symbol.header_end_line = existing.end_line;
        }
    }

    fn resolve_includes(&self, source: &Path, includes: &[String]) -> Vec<FileDependency> {
        let source_dir = source.parent();
        let mut deps = Vec::new();
        for include in includes {
            let candidates = [
                source_dir.map(|d| d.join(include)),
                Some(self.project_root.join(include)),
            ];
            let resolved = candidates
                .into_iter()
                .flatten()
                .find(|c| c.is_file())
                .map(|c| c.canonicalize().unwrap_or(c));
            if let Some(resolved) = resolved {
                deps.push(FileDependency {
                    source_file: source.to_string_lossy().into_owned(),
                    included_file: resolved.to_string_lossy().into_owned(),
                    is_direct: true,
                    include_depth: 1,
                });
            }
        }
        deps
    }

    /// Incremental refresh. Transitions REFRESHING -> INDEXED; a cancelled
    /// refresh also reverts to INDEXED since the previous index is intact.
    pub fn refresh(&self, progress_cb: Option<ProgressCallback>) -> IndexResult<RefreshReport> {
        self.cancel.store(false, Ordering::SeqCst);
        self.state.transition_to(AnalyzerState::Refreshing);

        match self.run_refresh(progress_cb) {
            Ok(report) => {
                self.state.transition_to(AnalyzerState::Indexed);
                info!(
                    "refresh complete: {} changed, {} deleted, {} reparsed",
                    report.changed, report.deleted, report.reparsed
                );
                Ok(report)
            }
            Err(IndexError::Cancelled) => {
                self.state.transition_to(AnalyzerState::Indexed);
                Err(IndexError::Cancelled)
            }
            Err(e) => {
                self.state.transition_to(AnalyzerState::Error);
                Err(e)
            }
        }
    }

    fn run_refresh(&self, progress_cb: Option<ProgressCallback>) -> IndexResult<RefreshReport> {
        let on_disk = FileWalker::new(Arc::clone(&self.settings)).walk(&self.project_root);
        let stored: HashMap<String, String> = self
            .store
            .load_all_file_metadata()
            .map_err(|e| IndexError::Storage {
                operation: "load_all_file_metadata",
                source: e,
            })?
            .into_iter()
            .map(|m| (m.file_path, m.file_hash))
            .collect();

        // Changed = modified + added.
        let mut changed: Vec<PathBuf> = Vec::new();
        let mut present: HashSet<String> = HashSet::new();
        for file in &on_disk {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(IndexError::Cancelled);
            }
            let file_str = file.to_string_lossy().into_owned();
            present.insert(file_str.clone());
            let current = std::fs::read_to_string(file).map(|c| content_hash(&c)).ok();
            match (current, stored.get(&file_str)) {
                (Some(hash), Some(stored_hash)) if hash == *stored_hash => {}
                (Some(_), _) => changed.push(file.clone()),
                (None, _) => {}
            }
        }

        // Deleted = in store, gone from disk.
        let deleted: Vec<String> = stored
            .keys()
            .filter(|path| !present.contains(*path))
            .cloned()
            .collect();

        // Fan out through include dependencies: anything that (transitively)
        // includes a changed file must be re-parsed too.
        let reparse = self.expand_dependents(&changed);

        let report = RefreshReport {
            changed: changed.len(),
            deleted: deleted.len(),
            reparsed: reparse.len(),
        };

        for path in &deleted {
            self.store
                .remove_file_cache(path)
                .map_err(|e| IndexError::Storage {
                    operation: "remove_file_cache",
                    source: e,
                })?;
            debug!("removed deleted file from index: {path}");
        }

        self.state.update_progress(IndexingProgress::new(reparse.len()));
        let commands = self.compile_commands();
        let mut parser = self
            .parser_factory
            .create()
            .map_err(|e| IndexError::General(e.to_string()))?;
        for file in &reparse {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(IndexError::Cancelled);
            }
            let outcome = self.index_one_file(parser.as_mut(), file, &commands, true);
            self.bump_progress(file, &outcome, &progress_cb);
        }

        self.write_cache_metadata(on_disk.len());
        Ok(report)
    }

    /// Transitive consumers of the changed files via stored include edges.
    fn expand_dependents(&self, changed: &[PathBuf]) -> Vec<PathBuf> {
        let deps = self.store.load_file_dependencies().unwrap_or_default();
        let mut consumers: HashMap<&str, Vec<&str>> = HashMap::new();
        for dep in &deps {
            consumers
                .entry(dep.included_file.as_str())
                .or_default()
                .push(dep.source_file.as_str());
        }

        let mut result: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        for file in changed {
            let s = file.to_string_lossy().into_owned();
            if result.insert(s.clone()) {
                queue.push_back(s);
            }
        }
        while let Some(current) = queue.pop_front() {
            if let Some(sources) = consumers.get(current.as_str()) {
                for source in sources {
                    if result.insert((*source).to_string()) {
                        queue.push_back((*source).to_string());
                    }
                }
            }
        }

        let mut out: Vec<PathBuf> = result.into_iter().map(PathBuf::from).collect();
        out.sort();
        out
    }
}

/// Dedup a parsed batch by USR: definitions beat declarations, and between
/// two definitions the richer one wins (non-empty base classes, then larger
/// line span; ties keep the earlier entry).
pub fn dedup_file_symbols(symbols: Vec<Symbol>) -> Vec<Symbol> {
    let mut order: Vec<String> = Vec::new();
    let mut by_usr: HashMap<String, Symbol> = HashMap::new();

    for symbol in symbols {
        match by_usr.get_mut(&symbol.usr) {
            None => {
                order.push(symbol.usr.clone());
                by_usr.insert(symbol.usr.clone(), symbol);
            }
            Some(existing) => {
                let replace = if symbol.is_definition && !existing.is_definition {
                    true
                } else if !symbol.is_definition && existing.is_definition {
                    false
                } else if symbol.is_definition && existing.is_definition {
                    is_richer_definition(&symbol, existing)
                } else {
                    false
                };
                if replace {
                    *existing = symbol;
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|usr| by_usr.remove(&usr))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolKind;

    fn class(usr: &str, def: bool, bases: &[&str], start: u32, end: u32) -> Symbol {
        let mut s = Symbol::new(usr, "W", "W", SymbolKind::Struct, "/p/w.h", start);
        s.is_definition = def;
        s.base_classes = bases.iter().map(|b| b.to_string()).collect();
        s.start_line = Some(start);
        s.end_line = Some(end);
        s
    }

    #[test]
    fn definition_beats_forward_declaration() {
        let out = dedup_file_symbols(vec![
            class("u", false, &[], 5, 5),
            class("u", true, &["Base"], 10, 13),
        ]);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_definition);
        assert_eq!(out[0].base_classes, vec!["Base"]);
    }

    #[test]
    fn declaration_never_displaces_definition() {
        let out = dedup_file_symbols(vec![
            class("u", true, &["Base"], 10, 13),
            class("u", false, &[], 5, 5),
        ]);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_definition);
    }

    #[test]
    fn richer_definition_wins_regardless_of_order() {
        let empty_stub = class("u", true, &[], 1, 1);
        let real = class("u", true, &["Base"], 10, 40);

        let forward = dedup_file_symbols(vec![empty_stub.clone(), real.clone()]);
        assert_eq!(forward[0].base_classes, vec!["Base"]);

        let backward = dedup_file_symbols(vec![real, empty_stub]);
        assert_eq!(backward[0].base_classes, vec!["Base"]);
    }

    #[test]
    fn distinct_usrs_all_survive_in_order() {
        let out = dedup_file_symbols(vec![
            class("u1", true, &[], 1, 2),
            class("u2", true, &[], 3, 4),
            class("u3", false, &[], 5, 5),
        ]);
        let usrs: Vec<&str> = out.iter().map(|s| s.usr.as_str()).collect();
        assert_eq!(usrs, vec!["u1", "u2", "u3"]);
    }

    #[test]
    fn content_hash_is_stable_and_sensitive() {
        let a = content_hash("class A {};");
        let b = content_hash("class A {};");
        let c = content_hash("class B {};");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }
}
