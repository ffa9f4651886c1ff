use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cppscout::analyzer::{load_session, save_session, CppAnalyzer};
use cppscout::parsing::CppParserFactory;
use cppscout::query::SearchFilters;
use cppscout::storage::SymbolStore;
use cppscout::{IndexingProgress, Settings};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cppscout")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "C++ code intelligence: persistent symbol index with an MCP tool surface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Index a C++ project directory
    Index {
        /// Path to the project source directory
        path: PathBuf,

        /// Analyzer configuration file (part of the project identity)
        #[arg(long)]
        config_file: Option<PathBuf>,

        /// Force re-indexing even if a valid cache exists
        #[arg(short, long)]
        force: bool,

        /// Show per-file progress
        #[arg(short, long)]
        progress: bool,
    },

    /// Incrementally refresh a previously indexed project
    Refresh {
        /// Path to the project source directory
        path: PathBuf,

        #[arg(long)]
        config_file: Option<PathBuf>,

        /// Full rebuild instead of an incremental diff
        #[arg(long)]
        full: bool,
    },

    /// Query the index
    Retrieve {
        /// Path to the project source directory
        #[arg(long)]
        path: PathBuf,

        #[command(subcommand)]
        query: RetrieveQuery,
    },

    /// Show index status and storage health
    Status {
        path: PathBuf,

        #[arg(long)]
        config_file: Option<PathBuf>,
    },

    /// Run storage maintenance (vacuum, analyze, FTS optimize)
    Maintain {
        path: PathBuf,

        #[arg(long)]
        config_file: Option<PathBuf>,

        /// Run the full (slow) integrity check as well
        #[arg(long)]
        check: bool,
    },

    /// Start the MCP server on stdio
    Serve {
        /// Open this project immediately instead of resuming the last session
        #[arg(long)]
        project: Option<PathBuf>,

        #[arg(long)]
        config_file: Option<PathBuf>,

        /// Watch the project and refresh incrementally on changes
        #[arg(long)]
        auto_refresh: bool,
    },
}

#[derive(Subcommand)]
enum RetrieveQuery {
    /// Find classes by pattern
    Classes { pattern: String },

    /// Find functions by pattern
    Functions { pattern: String },

    /// Full information about one class
    Class { name: String },

    /// Inheritance hierarchy of a class
    Hierarchy {
        name: String,
        #[arg(long)]
        max_nodes: Option<usize>,
        #[arg(long)]
        max_depth: Option<usize>,
    },

    /// Functions calling the target
    Callers { function: String },

    /// Functions the target calls
    Callees { function: String },

    /// Call chains between two functions
    CallPath {
        from: String,
        to: String,
        #[arg(long)]
        max_depth: Option<usize>,
    },

    /// Resolve a type alias
    Alias { name: String },

    /// Files containing a symbol
    Files { symbol: String },
}

fn open_indexed(
    path: &PathBuf,
    config_file: Option<&PathBuf>,
    settings: Arc<Settings>,
    force: bool,
    show_progress: bool,
) -> Result<CppAnalyzer> {
    let analyzer = CppAnalyzer::new(
        path,
        config_file.map(|p| p.as_path()),
        settings,
        Arc::new(CppParserFactory),
    )
    .context("failed to create analyzer")?;

    let progress_cb: Option<cppscout::indexing::ProgressCallback> = if show_progress {
        Some(Arc::new(|p: &IndexingProgress| {
            eprintln!(
                "[{:>5.1}%] {}/{} files ({} cached, {} failed) {}",
                p.completion_percentage(),
                p.indexed_files,
                p.total_files,
                p.cache_hits,
                p.failed_files,
                p.current_file.as_deref().unwrap_or(""),
            );
        }))
    } else {
        None
    };

    let count = analyzer
        .ensure_indexed(force, progress_cb)
        .context("indexing failed")?;
    eprintln!("Index ready: {count} files");
    Ok(analyzer)
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Arc::new(Settings::load().unwrap_or_else(|e| {
        eprintln!("Warning: failed to load configuration ({e}), using defaults");
        Settings::default()
    }));
    cppscout::logging::init_with_config(&settings.logging);

    let cli = Cli::parse();
    match cli.command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(force)
                .context("failed to create configuration file")?;
            println!("Created configuration at: {}", path.display());
        }

        Commands::Index {
            path,
            config_file,
            force,
            progress,
        } => {
            let analyzer = open_indexed(&path, config_file.as_ref(), settings, force, progress)?;
            let stats = analyzer
                .store()
                .stats()
                .context("failed to read store statistics")?;
            println!(
                "Indexed {} symbols across {} files ({} project, {} external)",
                stats.total_symbols, stats.total_files, stats.project_symbols,
                stats.dependency_symbols
            );
        }

        Commands::Refresh {
            path,
            config_file,
            full,
        } => {
            let analyzer = CppAnalyzer::new(
                &path,
                config_file.as_deref(),
                settings,
                Arc::new(CppParserFactory),
            )?;
            // Pick up the cached index so the refresh has a baseline.
            analyzer.ensure_indexed(false, None)?;
            let report = analyzer.refresh(!full, full, None)?;
            println!(
                "Refreshed: {} changed, {} deleted, {} reparsed",
                report.changed, report.deleted, report.reparsed
            );
        }

        Commands::Retrieve { path, query } => {
            let analyzer = open_indexed(&path, None, settings, false, false)?;
            let result = match query {
                RetrieveQuery::Classes { pattern } => {
                    analyzer.search_classes(&pattern, SearchFilters::project_only())?
                }
                RetrieveQuery::Functions { pattern } => {
                    analyzer.search_functions(&pattern, SearchFilters::project_only())?
                }
                RetrieveQuery::Class { name } => analyzer.get_class_info(&name)?,
                RetrieveQuery::Hierarchy {
                    name,
                    max_nodes,
                    max_depth,
                } => analyzer.get_class_hierarchy(&name, max_nodes, max_depth)?,
                RetrieveQuery::Callers { function } => analyzer.find_callers(&function, None)?,
                RetrieveQuery::Callees { function } => analyzer.find_callees(&function, None)?,
                RetrieveQuery::CallPath {
                    from,
                    to,
                    max_depth,
                } => analyzer.get_call_path(&from, &to, max_depth)?,
                RetrieveQuery::Alias { name } => analyzer.get_type_alias_info(&name)?,
                RetrieveQuery::Files { symbol } => {
                    analyzer.get_files_containing_symbol(&symbol)?
                }
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Status { path, config_file } => {
            let analyzer = CppAnalyzer::new(
                &path,
                config_file.as_deref(),
                settings,
                Arc::new(CppParserFactory),
            )?;
            let health = analyzer.store().health_status()?;
            println!("{}", serde_json::to_string_pretty(&analyzer.get_server_status())?);
            println!("{}", serde_json::to_string_pretty(&health)?);
        }

        Commands::Maintain {
            path,
            config_file,
            check,
        } => {
            let analyzer = CppAnalyzer::new(
                &path,
                config_file.as_deref(),
                settings.clone(),
                Arc::new(CppParserFactory),
            )?;
            let report = analyzer.store().auto_maintenance(
                settings.cache.vacuum_threshold_mb * 1024 * 1024,
                settings.cache.vacuum_min_waste_mb * 1024 * 1024,
            )?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if check {
                let ok = analyzer.store().check_integrity(true)?;
                println!("integrity: {}", if ok { "ok" } else { "FAILED" });
            }
        }

        Commands::Serve {
            project,
            config_file,
            auto_refresh,
        } => {
            eprintln!("Starting MCP server on stdio transport");
            let server = cppscout::mcp::CodeIntelligenceServer::new(settings.clone());

            // Explicit project beats session resume.
            let resume = match project {
                Some(project) => {
                    save_session(&settings.cache_root, &project, config_file.as_deref());
                    Some((project, config_file))
                }
                None => load_session(&settings.cache_root),
            };
            if let Some((project, config)) = resume {
                if project.is_dir() {
                    if let Err(e) = server.open_project(project, config, auto_refresh).await {
                        eprintln!("Failed to open project: {e}");
                    }
                } else {
                    eprintln!("Previous project no longer exists: {}", project.display());
                }
            }

            use rmcp::{transport::stdio, ServiceExt};
            let service = server
                .serve(stdio())
                .await
                .context("failed to start MCP server")?;
            service.waiting().await.context("MCP server error")?;
        }
    }

    Ok(())
}
