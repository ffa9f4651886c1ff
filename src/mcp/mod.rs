//! MCP (Model Context Protocol) server for the C++ code-intelligence core
//!
//! Thin transport wrapper: every tool parses its arguments, offloads the
//! blocking core call onto the worker pool with `spawn_blocking` so the
//! event loop never stalls, and returns the core's JSON envelope verbatim.
//!
//! `set_project_directory` and `refresh_project` kick off background
//! indexing and return immediately; queries issued while indexing runs are
//! answered according to the configured query policy, with partial results
//! marked in the envelope metadata.

use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult, Content, ErrorCode, ErrorData as McpError, Implementation,
        InitializeRequestParams, InitializeResult, ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    schemars,
    service::{RequestContext, RoleServer},
    tool, tool_handler, tool_router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::analyzer::{save_session, CppAnalyzer};
use crate::config::Settings;
use crate::parsing::{CppParserFactory, ParserFactory};
use crate::query::SearchFilters;
use crate::symbol::SymbolKind;
use crate::watcher::FileWatcher;

const VALID_SEARCH_SCOPES: &[&str] = &["project_code_only", "include_external_libraries"];

fn parse_search_scope(scope: Option<&str>) -> Result<bool, McpError> {
    match scope {
        None | Some("project_code_only") => Ok(true),
        Some("include_external_libraries") => Ok(false),
        Some(other) => Err(McpError::new(
            ErrorCode::INVALID_PARAMS,
            format!("Invalid search_scope '{other}'. Valid values: {VALID_SEARCH_SCOPES:?}"),
            None,
        )),
    }
}

fn parse_kinds(kinds: &Option<Vec<String>>) -> Result<Option<Vec<SymbolKind>>, McpError> {
    let Some(kinds) = kinds else {
        return Ok(None);
    };
    let mut parsed = Vec::new();
    for kind in kinds {
        match SymbolKind::from_str_opt(kind) {
            Some(k) => parsed.push(k),
            None => {
                return Err(McpError::new(
                    ErrorCode::INVALID_PARAMS,
                    format!("Unknown symbol kind '{kind}'"),
                    None,
                ));
            }
        }
    }
    Ok(Some(parsed))
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct SetProjectDirectoryRequest {
    /// Path to the C++ project source directory
    pub project_path: String,
    /// Optional analyzer configuration file; part of the project identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
    /// Watch the tree and refresh incrementally on changes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_refresh: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct RefreshProjectRequest {
    /// Incremental refresh (default true): only changed files and their
    /// dependents are re-parsed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incremental: Option<bool>,
    /// Force a full rebuild regardless of cached state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_full: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct GetServerStatusRequest {}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct GetIndexingStatusRequest {}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct WaitForIndexingRequest {
    /// Maximum seconds to wait (default 60)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct SearchClassesRequest {
    /// Name pattern: unqualified, qualified suffix (`ui::Handler`), exact
    /// global (`::Handler`), or regex (fullmatch)
    pub pattern: String,
    /// 'project_code_only' (default) or 'include_external_libraries'
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_scope: Option<String>,
    /// Restrict to a file: bare name, path suffix, or glob
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Namespace filter, matched at :: boundaries ('' = global only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct SearchFunctionsRequest {
    /// Name pattern (same four modes as search_classes)
    pub pattern: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Exact parent class for methods
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    /// Case-insensitive substring over the prototype
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct SearchSymbolsRequest {
    pub pattern: String,
    /// Subset of: class, struct, union, enum, class_template, function,
    /// method, constructor, destructor, function_template, type_alias
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct GetClassInfoRequest {
    /// Exact class name (simple or qualified); ambiguous simple names
    /// return an is_ambiguous envelope listing every match
    pub class_name: String,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct GetFunctionSignatureRequest {
    pub function_name: String,
    /// Disambiguate methods by containing class
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct GetTypeAliasInfoRequest {
    /// Alias name (simple or qualified) or a canonical type
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct FindInFileRequest {
    /// File to enumerate: bare name, path suffix, or glob
    pub file_name: String,
    /// Optional name pattern; empty enumerates every symbol in the file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct GetFilesContainingSymbolRequest {
    pub symbol_name: String,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct GetClassHierarchyRequest {
    pub class_name: String,
    /// Node cap (default 200); truncated=true appears when it bites
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_nodes: Option<usize>,
    /// BFS depth cap (default unlimited)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct FindCallersRequest {
    pub function_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct FindCalleesRequest {
    pub function_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct GetCallSitesRequest {
    pub function_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, schemars::JsonSchema)]
pub struct GetCallPathRequest {
    pub from_function: String,
    pub to_function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
}

#[derive(Clone)]
pub struct CodeIntelligenceServer {
    analyzer: Arc<RwLock<Option<Arc<CppAnalyzer>>>>,
    settings: Arc<Settings>,
    parser_factory: Arc<dyn ParserFactory>,
    watcher: Arc<Mutex<Option<FileWatcher>>>,
    tool_router: ToolRouter<Self>,
}

impl CodeIntelligenceServer {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            analyzer: Arc::new(RwLock::new(None)),
            settings,
            parser_factory: Arc::new(CppParserFactory),
            watcher: Arc::new(Mutex::new(None)),
            tool_router: Self::tool_router(),
        }
    }

    async fn current_analyzer(&self) -> Result<Arc<CppAnalyzer>, McpError> {
        self.analyzer.read().await.clone().ok_or_else(|| {
            McpError::new(
                ErrorCode::INVALID_REQUEST,
                "No project set. Call 'set_project_directory' first.",
                None,
            )
        })
    }

    /// Open a project and start indexing in the background. Used both by
    /// the tool and by session resume at startup.
    pub async fn open_project(
        &self,
        project_path: PathBuf,
        config_file: Option<PathBuf>,
        auto_refresh: bool,
    ) -> Result<Arc<CppAnalyzer>, McpError> {
        let settings = Arc::clone(&self.settings);
        let factory = Arc::clone(&self.parser_factory);
        let path_for_new = project_path.clone();
        let config_for_new = config_file.clone();

        let analyzer = tokio::task::spawn_blocking(move || {
            CppAnalyzer::new(
                &path_for_new,
                config_for_new.as_deref(),
                settings,
                factory,
            )
        })
        .await
        .map_err(|e| McpError::new(ErrorCode::INTERNAL_ERROR, e.to_string(), None))?
        .map_err(|e| McpError::new(ErrorCode::INTERNAL_ERROR, e.to_string(), None))?;
        let analyzer = Arc::new(analyzer);

        *self.analyzer.write().await = Some(Arc::clone(&analyzer));
        save_session(&self.settings.cache_root, &project_path, config_file.as_deref());

        // Background cold build (or warm load); the tool returns at once.
        let background = Arc::clone(&analyzer);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = background.ensure_indexed(false, None) {
                warn!("background indexing failed: {e}");
            }
        });

        if auto_refresh {
            let refresh_target = Arc::clone(&analyzer);
            let debounce = Duration::from_millis(self.settings.indexing.watch_debounce_ms);
            match FileWatcher::spawn(&project_path, debounce, move || {
                if let Err(e) = refresh_target.refresh(true, false, None) {
                    warn!("auto-refresh failed: {e}");
                }
            }) {
                Ok(watcher) => *self.watcher.lock().await = Some(watcher),
                Err(e) => warn!("failed to start file watcher: {e}"),
            }
        }

        Ok(analyzer)
    }

    /// Offload a blocking query and convert the outcome to a tool result.
    async fn run_query<F>(&self, f: F) -> Result<CallToolResult, McpError>
    where
        F: FnOnce(Arc<CppAnalyzer>) -> crate::error::IndexResult<serde_json::Value>
            + Send
            + 'static,
    {
        let analyzer = self.current_analyzer().await?;
        let result = tokio::task::spawn_blocking(move || f(analyzer))
            .await
            .map_err(|e| McpError::new(ErrorCode::INTERNAL_ERROR, e.to_string(), None))?;

        match result {
            Ok(value) => Ok(CallToolResult::success(vec![Content::text(
                value.to_string(),
            )])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }
}

#[tool_router]
impl CodeIntelligenceServer {
    #[tool(
        description = "Initialize a C++ project and start background indexing. Returns \
                       immediately; use get_indexing_status / wait_for_indexing to track \
                       progress. Queries during indexing return partial results marked in \
                       metadata."
    )]
    pub async fn set_project_directory(
        &self,
        Parameters(SetProjectDirectoryRequest {
            project_path,
            config_file,
            auto_refresh,
        }): Parameters<SetProjectDirectoryRequest>,
    ) -> Result<CallToolResult, McpError> {
        let path = PathBuf::from(&project_path);
        if !path.is_dir() {
            return Ok(CallToolResult::error(vec![Content::text(format!(
                "Project path is not a directory: {project_path}"
            ))]));
        }

        let analyzer = self
            .open_project(
                path,
                config_file.map(PathBuf::from),
                auto_refresh.unwrap_or(false),
            )
            .await?;

        info!("project set: {}", analyzer.identity());
        Ok(CallToolResult::success(vec![Content::text(
            serde_json::json!({
                "status": "indexing_started",
                "project": analyzer.project_root().display().to_string(),
                "cache_directory": analyzer.store().cache_dir().display().to_string(),
            })
            .to_string(),
        )]))
    }

    #[tool(
        description = "Refresh the index in the background: changed files and their \
                       transitive includers are re-parsed; deleted files are dropped. \
                       Returns immediately."
    )]
    pub async fn refresh_project(
        &self,
        Parameters(RefreshProjectRequest {
            incremental,
            force_full,
        }): Parameters<RefreshProjectRequest>,
    ) -> Result<CallToolResult, McpError> {
        let analyzer = self.current_analyzer().await?;
        let incremental = incremental.unwrap_or(true);
        let force_full = force_full.unwrap_or(false);

        tokio::task::spawn_blocking(move || {
            if let Err(e) = analyzer.refresh(incremental, force_full, None) {
                warn!("background refresh failed: {e}");
            }
        });

        Ok(CallToolResult::success(vec![Content::text(
            serde_json::json!({ "status": "refresh_started", "incremental": incremental })
                .to_string(),
        )]))
    }

    #[tool(description = "Server status: project identity, state, backend, error summary, \
                          cache statistics.")]
    pub async fn get_server_status(
        &self,
        Parameters(_params): Parameters<GetServerStatusRequest>,
    ) -> Result<CallToolResult, McpError> {
        let analyzer = self.current_analyzer().await?;
        let status = tokio::task::spawn_blocking(move || analyzer.get_server_status())
            .await
            .map_err(|e| McpError::new(ErrorCode::INTERNAL_ERROR, e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(
            status.to_string(),
        )]))
    }

    #[tool(description = "Current indexing state and progress (files done, failed, cache \
                          hits, completion percentage, ETA).")]
    pub async fn get_indexing_status(
        &self,
        Parameters(_params): Parameters<GetIndexingStatusRequest>,
    ) -> Result<CallToolResult, McpError> {
        let analyzer = self.current_analyzer().await?;
        Ok(CallToolResult::success(vec![Content::text(
            analyzer.get_indexing_status().to_string(),
        )]))
    }

    #[tool(description = "Block until indexing completes or the timeout (default 60s) \
                          expires. Returns whether the index is complete.")]
    pub async fn wait_for_indexing(
        &self,
        Parameters(WaitForIndexingRequest { timeout_seconds }): Parameters<WaitForIndexingRequest>,
    ) -> Result<CallToolResult, McpError> {
        let analyzer = self.current_analyzer().await?;
        let timeout = timeout_seconds.map(Duration::from_secs);
        let completed =
            tokio::task::spawn_blocking(move || analyzer.wait_for_indexing(timeout))
                .await
                .map_err(|e| McpError::new(ErrorCode::INTERNAL_ERROR, e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(
            serde_json::json!({ "indexed": completed }).to_string(),
        )]))
    }

    #[tool(
        description = "Search C++ class/struct/union/enum definitions by name pattern. \
                       Patterns: unqualified (any namespace), qualified suffix \
                       ('ui::Handler'), exact global ('::Handler'), or regex (fullmatch). \
                       Results include location, base classes, template metadata, and \
                       documentation."
    )]
    pub async fn search_classes(
        &self,
        Parameters(SearchClassesRequest {
            pattern,
            search_scope,
            file_name,
            namespace,
            max_results,
        }): Parameters<SearchClassesRequest>,
    ) -> Result<CallToolResult, McpError> {
        let project_only = parse_search_scope(search_scope.as_deref())?;
        self.run_query(move |analyzer| {
            let filters = SearchFilters {
                project_only,
                file_name,
                namespace,
                max_results,
                ..Default::default()
            };
            analyzer.search_classes(&pattern, filters)
        })
        .await
    }

    #[tool(
        description = "Search C++ functions and methods by name pattern (same four \
                       pattern modes as search_classes). Supports class_name and \
                       signature_pattern filters; results carry full prototypes."
    )]
    pub async fn search_functions(
        &self,
        Parameters(SearchFunctionsRequest {
            pattern,
            search_scope,
            file_name,
            namespace,
            class_name,
            signature_pattern,
            max_results,
        }): Parameters<SearchFunctionsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let project_only = parse_search_scope(search_scope.as_deref())?;
        self.run_query(move |analyzer| {
            let filters = SearchFilters {
                project_only,
                file_name,
                namespace,
                class_name,
                signature_pattern,
                max_results,
                ..Default::default()
            };
            analyzer.search_functions(&pattern, filters)
        })
        .await
    }

    #[tool(description = "Search classes and functions together; returns {classes: [...], \
                          functions: [...]}. Optional kind subset filter.")]
    pub async fn search_symbols(
        &self,
        Parameters(SearchSymbolsRequest {
            pattern,
            kinds,
            search_scope,
            file_name,
            max_results,
        }): Parameters<SearchSymbolsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let project_only = parse_search_scope(search_scope.as_deref())?;
        let kinds = parse_kinds(&kinds)?;
        self.run_query(move |analyzer| {
            let filters = SearchFilters {
                project_only,
                file_name,
                kinds,
                max_results,
                ..Default::default()
            };
            analyzer.search_symbols(&pattern, filters)
        })
        .await
    }

    #[tool(
        description = "Comprehensive class information: methods (sorted by line, with \
                       access and virtual/const/static flags), base classes, direct \
                       project subclasses, location, documentation. Ambiguous simple \
                       names return is_ambiguous with every match."
    )]
    pub async fn get_class_info(
        &self,
        Parameters(GetClassInfoRequest { class_name }): Parameters<GetClassInfoRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.run_query(move |analyzer| analyzer.get_class_info(&class_name))
            .await
    }

    #[tool(description = "Formatted prototype strings for every overload of a function. \
                          Use search_functions when you need locations or metadata.")]
    pub async fn get_function_signature(
        &self,
        Parameters(GetFunctionSignatureRequest {
            function_name,
            class_name,
        }): Parameters<GetFunctionSignatureRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.run_query(move |analyzer| {
            analyzer.get_function_signature(&function_name, class_name.as_deref())
        })
        .await
    }

    #[tool(description = "Resolve a type alias to its canonical type, or list every \
                          alias of a canonical type.")]
    pub async fn get_type_alias_info(
        &self,
        Parameters(GetTypeAliasInfoRequest { name }): Parameters<GetTypeAliasInfoRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.run_query(move |analyzer| analyzer.get_type_alias_info(&name))
            .await
    }

    #[tool(description = "Enumerate symbols in files matching a name, path suffix, or \
                          glob. An empty pattern lists every symbol in the file.")]
    pub async fn find_in_file(
        &self,
        Parameters(FindInFileRequest {
            file_name,
            pattern,
            max_results,
        }): Parameters<FindInFileRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.run_query(move |analyzer| {
            analyzer.find_in_file(&file_name, pattern.as_deref().unwrap_or(""), max_results)
        })
        .await
    }

    #[tool(description = "Files that define or reference a symbol, for targeted reading \
                          or grep.")]
    pub async fn get_files_containing_symbol(
        &self,
        Parameters(GetFilesContainingSymbolRequest { symbol_name }): Parameters<
            GetFilesContainingSymbolRequest,
        >,
    ) -> Result<CallToolResult, McpError> {
        self.run_query(move |analyzer| analyzer.get_files_containing_symbol(&symbol_name))
            .await
    }

    #[tool(
        description = "Complete inheritance graph of a class as a flat adjacency list: \
                       BFS in both directions (ancestors and descendants), diamond-safe. \
                       Capped at max_nodes (default 200) with truncated=true when the cap \
                       bites."
    )]
    pub async fn get_class_hierarchy(
        &self,
        Parameters(GetClassHierarchyRequest {
            class_name,
            max_nodes,
            max_depth,
        }): Parameters<GetClassHierarchyRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.run_query(move |analyzer| {
            analyzer.get_class_hierarchy(&class_name, max_nodes, max_depth)
        })
        .await
    }

    #[tool(description = "Every function that calls the target, with the exact \
                          file/line/column of each call site.")]
    pub async fn find_callers(
        &self,
        Parameters(FindCallersRequest {
            function_name,
            class_name,
        }): Parameters<FindCallersRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.run_query(move |analyzer| {
            analyzer.find_callers(&function_name, class_name.as_deref())
        })
        .await
    }

    #[tool(description = "Definition sites of every function the target calls.")]
    pub async fn find_callees(
        &self,
        Parameters(FindCalleesRequest {
            function_name,
            class_name,
        }): Parameters<FindCalleesRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.run_query(move |analyzer| {
            analyzer.find_callees(&function_name, class_name.as_deref())
        })
        .await
    }

    #[tool(description = "Call locations (file/line/column) inside the target \
                          function's body.")]
    pub async fn get_call_sites(
        &self,
        Parameters(GetCallSitesRequest {
            function_name,
            class_name,
        }): Parameters<GetCallSitesRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.run_query(move |analyzer| {
            analyzer.get_call_sites(&function_name, class_name.as_deref())
        })
        .await
    }

    #[tool(description = "All call chains from one function to another, up to max_depth \
                          edges. Empty list when unconnected.")]
    pub async fn get_call_path(
        &self,
        Parameters(GetCallPathRequest {
            from_function,
            to_function,
            max_depth,
        }): Parameters<GetCallPathRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.run_query(move |analyzer| {
            analyzer.get_call_path(&from_function, &to_function, max_depth)
        })
        .await
    }
}

#[tool_handler]
impl ServerHandler for CodeIntelligenceServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_protocol_version(ProtocolVersion::V_2024_11_05)
            .with_server_info(
                Implementation::new("cppscout", env!("CARGO_PKG_VERSION"))
                    .with_title("cppscout C++ Code Intelligence"),
            )
            .with_instructions(
                "C++ code-intelligence tools over a persistent symbol index. \
                 WORKFLOW: call 'set_project_directory' first; indexing runs in the \
                 background and queries are answered immediately with a 'partial' \
                 metadata marker until it finishes. Use 'search_classes' / \
                 'search_functions' to locate symbols, 'get_class_info' and \
                 'get_class_hierarchy' for structure, and the call-graph tools \
                 (find_callers, find_callees, get_call_path) to trace execution. \
                 Empty results include corrective suggestions in metadata.fallback.",
            )
    }

    async fn initialize(
        &self,
        request: InitializeRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, McpError> {
        if context.peer.peer_info().is_none() {
            context.peer.set_peer_info(request);
        }
        Ok(self.get_info())
    }
}
