//! Analyzer facade: one object owning the whole core
//!
//! Wires the project identity, cache orchestrator, state machine, indexer,
//! and query engine together, and applies the query policy + result
//! envelope on every tool operation. The RPC layer is a thin wrapper around
//! this type; nothing here is transport-aware.

use crate::config::{QueryPolicy, Settings};
use crate::error::{IndexError, IndexResult, StorageResult};
use crate::indexing::{ProgressCallback, ProjectIndexer, RefreshReport};
use crate::parsing::ParserFactory;
use crate::project::ProjectIdentity;
use crate::query::envelope::QueryResult;
use crate::query::{QueryEngine, SearchFilters};
use crate::state::{AnalyzerState, StateManager};
use crate::storage::{CacheOrchestrator, SymbolStore};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SESSION_FILE: &str = "last_session.json";
const PROGRESS_FILE: &str = "indexing_progress.json";

pub struct CppAnalyzer {
    settings: Arc<Settings>,
    identity: ProjectIdentity,
    project_root: PathBuf,
    store: Arc<CacheOrchestrator>,
    state: Arc<StateManager>,
    engine: QueryEngine,
    indexer: ProjectIndexer,
}

impl CppAnalyzer {
    /// Create an analyzer for one project identity. The cache directory is
    /// derived from the identity; a matching cache is picked up warm later.
    pub fn new(
        project_root: &Path,
        config_file: Option<&Path>,
        settings: Arc<Settings>,
        parser_factory: Arc<dyn ParserFactory>,
    ) -> IndexResult<Self> {
        let identity = ProjectIdentity::new(project_root, config_file);
        let store = Arc::new(CacheOrchestrator::new(&identity, &settings).map_err(|e| {
            IndexError::Storage {
                operation: "backend_init",
                source: e,
            }
        })?);
        let state = Arc::new(StateManager::new());
        state.transition_to(AnalyzerState::Initializing);

        let indexer = ProjectIndexer::new(
            identity.source_directory.clone(),
            identity.config_file_path.clone(),
            Arc::clone(&settings),
            Arc::clone(&store),
            parser_factory,
            Arc::clone(&state),
        );

        Ok(Self {
            engine: QueryEngine::new(Arc::clone(&store)),
            project_root: identity.source_directory.clone(),
            identity,
            settings,
            store,
            state,
            indexer,
        })
    }

    pub fn identity(&self) -> &ProjectIdentity {
        &self.identity
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn store(&self) -> &CacheOrchestrator {
        &self.store
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    pub fn cancel_token(&self) -> Arc<std::sync::atomic::AtomicBool> {
        self.indexer.cancel_token()
    }

    /// Warm-load if the cached metadata still matches, otherwise run a cold
    /// build. Returns the number of files served or indexed.
    pub fn ensure_indexed(
        &self,
        force: bool,
        progress_cb: Option<ProgressCallback>,
    ) -> IndexResult<usize> {
        if !force && self.indexer.try_warm_load() {
            self.engine.invalidate();
            return Ok(self
                .state
                .progress()
                .map(|p| p.indexed_files)
                .unwrap_or(0));
        }
        self.index_project(force, progress_cb)
    }

    /// Cold build.
    pub fn index_project(
        &self,
        force: bool,
        progress_cb: Option<ProgressCallback>,
    ) -> IndexResult<usize> {
        let count = self.indexer.index_project(force, progress_cb)?;
        self.engine.invalidate();
        self.persist_progress_snapshot();
        Ok(count)
    }

    /// Refresh: incremental by default, with automatic escalation to a full
    /// rebuild when the incremental path fails outright.
    pub fn refresh(
        &self,
        incremental: bool,
        force_full: bool,
        progress_cb: Option<ProgressCallback>,
    ) -> IndexResult<RefreshReport> {
        if force_full || !incremental {
            let count = self.index_project(true, progress_cb)?;
            return Ok(RefreshReport {
                changed: count,
                deleted: 0,
                reparsed: count,
            });
        }

        match self.indexer.refresh(progress_cb.clone()) {
            Ok(report) => {
                self.engine.invalidate();
                self.persist_progress_snapshot();
                Ok(report)
            }
            Err(IndexError::Cancelled) => Err(IndexError::Cancelled),
            Err(e) => {
                warn!("incremental refresh failed ({e}), falling back to full re-index");
                let count = self.index_project(true, progress_cb)?;
                Ok(RefreshReport {
                    changed: count,
                    deleted: 0,
                    reparsed: count,
                })
            }
        }
    }

    pub fn wait_for_indexing(&self, timeout: Option<Duration>) -> bool {
        let timeout =
            timeout.or(Some(Duration::from_secs(self.settings.query.wait_timeout_secs)));
        self.state.wait_for_indexed(timeout)
    }

    fn persist_progress_snapshot(&self) {
        let Some(progress) = self.state.progress() else {
            return;
        };
        let path = self.store.cache_dir().join(PROGRESS_FILE);
        if let Ok(text) = serde_json::to_string_pretty(&progress.to_json()) {
            let _ = std::fs::write(path, text);
        }
    }

    // ------------------------------------------------------------------
    // Query policy gating and envelopes
    // ------------------------------------------------------------------

    /// Gate a query on the current state and configured policy.
    fn check_query_policy(&self) -> IndexResult<()> {
        if self.state.is_fully_indexed() {
            return Ok(());
        }
        match self.state.state() {
            AnalyzerState::Uninitialized => return Err(IndexError::NoProject),
            AnalyzerState::Indexing | AnalyzerState::Refreshing => {}
            // Initializing or Error: serve whatever the store has.
            _ => return Ok(()),
        }

        match self.settings.query.behavior_policy {
            QueryPolicy::AllowPartial => Ok(()),
            QueryPolicy::Block => {
                let timeout = Duration::from_secs(self.settings.query.block_timeout_secs);
                if self.state.wait_for_indexed(Some(timeout)) {
                    Ok(())
                } else {
                    Err(IndexError::InvalidState {
                        state: self.state.state().as_str().to_string(),
                        reason: format!(
                            "indexing did not finish within {}s; use 'wait_for_indexing' or \
                             set query.behavior_policy=allow_partial",
                            timeout.as_secs()
                        ),
                    })
                }
            }
            QueryPolicy::Reject => Err(IndexError::InvalidState {
                state: self.state.state().as_str().to_string(),
                reason: "queries are rejected while indexing is in progress; use \
                         'wait_for_indexing' or set query.behavior_policy=allow_partial"
                    .to_string(),
            }),
        }
    }

    /// Run a query op and wrap it in the result envelope, with smart
    /// fallback analysis on empty results.
    fn enveloped<F>(
        &self,
        tool_name: &str,
        fallback_pattern: Option<&str>,
        file_name: Option<&str>,
        max_results: Option<usize>,
        f: F,
    ) -> IndexResult<Value>
    where
        F: FnOnce(&QueryEngine) -> StorageResult<(Value, usize, Option<usize>)>,
    {
        self.check_query_policy()?;

        let (data, count, total_matches) =
            f(&self.engine).map_err(|e| IndexError::Storage {
                operation: "query",
                source: e,
            })?;

        let fallback = if count == 0 && self.state.is_fully_indexed() {
            fallback_pattern
                .and_then(|pattern| self.engine.fallback_for(pattern, tool_name, file_name))
        } else {
            None
        };

        Ok(QueryResult::build(
            data,
            count,
            &self.state,
            tool_name,
            max_results,
            total_matches,
            fallback,
            None,
        )
        .to_value())
    }

    // ------------------------------------------------------------------
    // Tool surface
    // ------------------------------------------------------------------

    pub fn search_classes(&self, pattern: &str, filters: SearchFilters) -> IndexResult<Value> {
        let file_name = filters.file_name.clone();
        self.enveloped(
            "search_classes",
            Some(pattern),
            file_name.as_deref(),
            filters.max_results,
            |engine| {
                let outcome = engine.search_classes(pattern, &filters)?;
                let count = outcome.items.len();
                Ok((json!(outcome.items), count, Some(outcome.total_matches)))
            },
        )
    }

    pub fn search_functions(&self, pattern: &str, filters: SearchFilters) -> IndexResult<Value> {
        let file_name = filters.file_name.clone();
        self.enveloped(
            "search_functions",
            Some(pattern),
            file_name.as_deref(),
            filters.max_results,
            |engine| {
                let outcome = engine.search_functions(pattern, &filters)?;
                let count = outcome.items.len();
                Ok((json!(outcome.items), count, Some(outcome.total_matches)))
            },
        )
    }

    pub fn search_symbols(&self, pattern: &str, filters: SearchFilters) -> IndexResult<Value> {
        let file_name = filters.file_name.clone();
        self.enveloped(
            "search_symbols",
            Some(pattern),
            file_name.as_deref(),
            filters.max_results,
            |engine| {
                let (data, count) = engine.search_symbols(pattern, &filters)?;
                Ok((data, count, None))
            },
        )
    }

    pub fn get_class_info(&self, class_name: &str) -> IndexResult<Value> {
        self.enveloped("get_class_info", Some(class_name), None, None, |engine| {
            let info = engine.class_info(class_name)?;
            let count = if info.get("error").is_some() && info.get("is_ambiguous").is_none() {
                0
            } else {
                1
            };
            Ok((info, count, None))
        })
    }

    pub fn get_function_signature(
        &self,
        name: &str,
        class_name: Option<&str>,
    ) -> IndexResult<Value> {
        self.enveloped(
            "get_function_signature",
            Some(name),
            None,
            None,
            |engine| {
                let signatures = engine.function_signatures(name, class_name)?;
                let count = signatures.len();
                Ok((json!(signatures), count, None))
            },
        )
    }

    pub fn get_type_alias_info(&self, name: &str) -> IndexResult<Value> {
        self.enveloped("get_type_alias_info", Some(name), None, None, |engine| {
            let info = engine.type_alias_info(name)?;
            let count = if info.as_object().is_some_and(|o| o.is_empty()) {
                0
            } else {
                1
            };
            Ok((info, count, None))
        })
    }

    pub fn find_in_file(
        &self,
        file_pattern: &str,
        pattern: &str,
        max_results: Option<usize>,
    ) -> IndexResult<Value> {
        self.enveloped(
            "find_in_file",
            Some(pattern),
            Some(file_pattern),
            max_results,
            |engine| {
                let outcome = engine.find_in_file(file_pattern, pattern, max_results)?;
                let count = outcome.items.len();
                Ok((json!(outcome.items), count, Some(outcome.total_matches)))
            },
        )
    }

    pub fn get_files_containing_symbol(&self, name: &str) -> IndexResult<Value> {
        self.enveloped(
            "get_files_containing_symbol",
            Some(name),
            None,
            None,
            |engine| {
                let result = engine.files_containing_symbol(name)?;
                let count = result["files"].as_array().map(|f| f.len()).unwrap_or(0);
                Ok((result, count, None))
            },
        )
    }

    pub fn get_class_hierarchy(
        &self,
        class_name: &str,
        max_nodes: Option<usize>,
        max_depth: Option<usize>,
    ) -> IndexResult<Value> {
        let max_nodes = max_nodes.unwrap_or(self.settings.query.hierarchy_max_nodes);
        self.enveloped(
            "get_class_hierarchy",
            Some(class_name),
            None,
            None,
            |engine| {
                let result = engine.class_hierarchy(class_name, max_nodes, max_depth)?;
                let count = if result.get("error").is_some() {
                    0
                } else {
                    result["classes"].as_object().map(|c| c.len()).unwrap_or(0)
                };
                Ok((result, count, None))
            },
        )
    }

    pub fn find_callers(&self, name: &str, class_name: Option<&str>) -> IndexResult<Value> {
        self.enveloped("find_callers", Some(name), None, None, |engine| {
            let result = engine.call_graph().find_callers(name, class_name)?;
            let count = result["callers"].as_array().map(|c| c.len()).unwrap_or(0);
            Ok((result, count, None))
        })
    }

    pub fn find_callees(&self, name: &str, class_name: Option<&str>) -> IndexResult<Value> {
        self.enveloped("find_callees", Some(name), None, None, |engine| {
            let result = engine.call_graph().find_callees(name, class_name)?;
            let count = result["callees"].as_array().map(|c| c.len()).unwrap_or(0);
            Ok((result, count, None))
        })
    }

    pub fn get_call_sites(&self, name: &str, class_name: Option<&str>) -> IndexResult<Value> {
        self.enveloped("get_call_sites", Some(name), None, None, |engine| {
            let result = engine.call_graph().call_sites(name, class_name)?;
            let count = result["call_sites"]
                .as_array()
                .map(|c| c.len())
                .unwrap_or(0);
            Ok((result, count, None))
        })
    }

    pub fn get_call_path(
        &self,
        from: &str,
        to: &str,
        max_depth: Option<usize>,
    ) -> IndexResult<Value> {
        let depth = max_depth.unwrap_or(crate::query::calls::DEFAULT_CALL_PATH_DEPTH);
        self.enveloped("get_call_path", None, None, None, |engine| {
            let result = engine.call_graph().call_path(from, to, depth)?;
            let count = result["paths"].as_array().map(|p| p.len()).unwrap_or(0);
            Ok((result, count, None))
        })
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    pub fn get_indexing_status(&self) -> Value {
        self.state.status_json()
    }

    pub fn get_server_status(&self) -> Value {
        let stats = self.store.stats().ok();
        json!({
            "project": {
                "source_directory": self.project_root.display().to_string(),
                "config_file": self
                    .identity
                    .config_file_path
                    .as_ref()
                    .map(|p| p.display().to_string()),
                "identity_hash": self.identity.compute_hash(),
                "cache_directory": self.store.cache_dir().display().to_string(),
            },
            "state": self.state.status_json(),
            "backend": {
                "active": self.store.active_backend().to_string(),
                "initial": self.store.initial_backend().to_string(),
                "fallback_active": self.store.fallback_active(),
            },
            "errors": self.store.error_summary(),
            "cache_stats": stats,
        })
    }
}

/// Record the last opened project so `serve` can resume the session.
pub fn save_session(cache_root: &Path, project: &Path, config: Option<&Path>) {
    let payload = json!({
        "project_path": project.display().to_string(),
        "config_file": config.map(|c| c.display().to_string()),
    });
    let _ = std::fs::create_dir_all(cache_root);
    if let Err(e) = std::fs::write(cache_root.join(SESSION_FILE), payload.to_string()) {
        warn!("failed to save session file: {e}");
    }
}

/// Load the last opened project, if any.
pub fn load_session(cache_root: &Path) -> Option<(PathBuf, Option<PathBuf>)> {
    let text = std::fs::read_to_string(cache_root.join(SESSION_FILE)).ok()?;
    let value: Value = serde_json::from_str(&text).ok()?;
    let project = PathBuf::from(value.get("project_path")?.as_str()?);
    let config = value
        .get("config_file")
        .and_then(|c| c.as_str())
        .map(PathBuf::from);
    info!("resuming session for {}", project.display());
    Some((project, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::CppParserFactory;
    use tempfile::TempDir;

    fn analyzer_for(project: &TempDir, cache: &TempDir) -> CppAnalyzer {
        let mut settings = Settings::default();
        settings.cache_root = cache.path().to_path_buf();
        CppAnalyzer::new(
            project.path(),
            None,
            Arc::new(settings),
            Arc::new(CppParserFactory),
        )
        .unwrap()
    }

    #[test]
    fn uninitialized_state_rejects_queries() {
        let project = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let analyzer = analyzer_for(&project, &cache);
        analyzer.state.transition_to(AnalyzerState::Uninitialized);
        let err = analyzer
            .search_classes("X", SearchFilters::default())
            .unwrap_err();
        assert!(matches!(err, IndexError::NoProject));
    }

    #[test]
    fn index_and_query_round_trip() {
        let project = TempDir::new().unwrap();
        std::fs::write(project.path().join("handler.h"), "class Handler {};\n").unwrap();
        let cache = TempDir::new().unwrap();
        let analyzer = analyzer_for(&project, &cache);

        analyzer.ensure_indexed(false, None).unwrap();
        assert!(analyzer.state.is_fully_indexed());

        let result = analyzer
            .search_classes("Handler", SearchFilters::default())
            .unwrap();
        let data = result["data"].as_array().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["qualified_name"], "Handler");
        assert_eq!(data[0]["line"], 1);
        assert!(
            data[0]["file"].as_str().unwrap().ends_with("handler.h"),
            "file was {}",
            data[0]["file"]
        );
        // Normal result: no metadata block.
        assert!(result.get("metadata").is_none());
    }

    #[test]
    fn second_ensure_indexed_is_warm() {
        let project = TempDir::new().unwrap();
        std::fs::write(project.path().join("a.h"), "class A {};\n").unwrap();
        let cache = TempDir::new().unwrap();

        let analyzer = analyzer_for(&project, &cache);
        analyzer.ensure_indexed(false, None).unwrap();
        drop(analyzer);

        // Fresh analyzer over the same cache: warm path, no re-index.
        let analyzer = analyzer_for(&project, &cache);
        assert!(analyzer.indexer.try_warm_load());
        assert!(analyzer.state.is_fully_indexed());
        let result = analyzer
            .search_classes("A", SearchFilters::default())
            .unwrap();
        assert_eq!(result["data"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn empty_result_carries_metadata() {
        let project = TempDir::new().unwrap();
        std::fs::write(project.path().join("a.h"), "class A {};\n").unwrap();
        let cache = TempDir::new().unwrap();
        let analyzer = analyzer_for(&project, &cache);
        analyzer.ensure_indexed(false, None).unwrap();

        let result = analyzer
            .search_classes("Missing", SearchFilters::default())
            .unwrap();
        assert_eq!(result["metadata"]["status"], "empty");
    }

    #[test]
    fn session_round_trip() {
        let cache = TempDir::new().unwrap();
        let project = PathBuf::from("/some/project");
        save_session(cache.path(), &project, None);
        let (loaded, config) = load_session(cache.path()).unwrap();
        assert_eq!(loaded, project);
        assert!(config.is_none());
    }
}
