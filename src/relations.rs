//! Relation records stored alongside symbols: call-graph edges, type-alias
//! mappings, include dependencies, and per-file indexing receipts.

use serde::{Deserialize, Serialize};

/// Directed call edge from a caller function to a callee, with the location
/// of the call expression inside the caller's body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub caller_usr: String,
    /// USR of the callee when the parser could resolve it (empty otherwise)
    #[serde(default)]
    pub callee_usr: String,
    /// Callee name as written at the call site; always present
    pub callee_name: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// A `using`/`typedef` mapping from an alias to its canonical type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeAlias {
    pub alias_name: String,
    pub alias_qualified_name: String,
    pub canonical_type: String,
    pub file: String,
    pub line: u32,
}

/// Include edge used for incremental refresh fan-out: when `included_file`
/// changes, `source_file` must be re-parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDependency {
    pub source_file: String,
    pub included_file: String,
    pub is_direct: bool,
    pub include_depth: u32,
}

/// Per-file indexing receipt. `file_hash` is the content digest at the last
/// successful parse; `compile_args_hash` invalidates the entry when compiler
/// flags change even if content did not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_path: String,
    pub file_hash: String,
    #[serde(default)]
    pub compile_args_hash: Option<String>,
    /// Unix timestamp (seconds) of the last parse attempt
    pub indexed_at: f64,
    pub symbol_count: u32,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
}

fn default_success() -> bool {
    true
}

impl FileMetadata {
    pub fn ok(file_path: impl Into<String>, file_hash: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            file_hash: file_hash.into(),
            compile_args_hash: None,
            indexed_at: now_unix(),
            symbol_count: 0,
            success: true,
            error_message: None,
            retry_count: 0,
        }
    }
}

/// Current Unix time in seconds, as a float for sub-second resolution.
pub fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
