pub mod analyzer;
pub mod config;
pub mod error;
pub mod indexing;
pub mod logging;
pub mod mcp;
pub mod parsing;
pub mod project;
pub mod query;
pub mod relations;
pub mod resilience;
pub mod state;
pub mod storage;
pub mod symbol;
pub mod watcher;

pub use analyzer::CppAnalyzer;
pub use config::{QueryPolicy, Settings};
pub use error::{IndexError, IndexResult, StorageError, StorageResult};
pub use indexing::{FileWalker, ProjectIndexer};
pub use project::ProjectIdentity;
pub use query::{QueryEngine, SearchFilters};
pub use relations::{CallSite, FileDependency, FileMetadata, TypeAlias};
pub use state::{AnalyzerState, IndexingProgress, StateManager};
pub use storage::{CacheOrchestrator, DocumentStore, SqliteStore, SymbolStore};
pub use symbol::{Symbol, SymbolKind};
