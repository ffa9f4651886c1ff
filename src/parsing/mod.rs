//! Parser boundary
//!
//! The core consumes parsed symbols through the [`SourceParser`] trait and
//! never inspects C++ itself. The bundled implementation
//! ([`cpp::CppParser`]) extracts declarations with tree-sitter; an
//! alternative source (a libclang bridge, a test fixture) plugs in through
//! the same trait. Parsers are transient: the indexer creates one per worker
//! via [`ParserFactory`] and they own no persistent state.

pub mod compile_commands;
pub mod cpp;

pub use compile_commands::CompileCommands;
pub use cpp::{CppParser, CppParserFactory};

use crate::relations::{CallSite, TypeAlias};
use crate::symbol::Symbol;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors specific to parsing operations
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to initialize parser: {0}")]
    Init(String),

    #[error("No syntax tree could be produced for '{path}'")]
    TreeUnavailable { path: PathBuf },

    #[error("Invalid UTF-8 in source file '{path}'")]
    InvalidUtf8 { path: PathBuf },
}

/// Result type alias for parse operations
pub type ParseResult<T> = Result<T, ParseError>;

/// Everything a single file contributes to the index.
#[derive(Debug, Default, Clone)]
pub struct ParsedUnit {
    pub symbols: Vec<Symbol>,
    pub call_sites: Vec<CallSite>,
    pub type_aliases: Vec<TypeAlias>,
    /// Include paths as written in the source (`vector`, `"handler.h"`
    /// without the delimiters)
    pub includes: Vec<String>,
}

/// Per-file context handed to the parser.
#[derive(Debug, Clone, Default)]
pub struct ParseContext {
    /// Project source root; symbols under it are marked `is_project`
    pub project_root: PathBuf,
    /// Compilation arguments for this file, when known
    pub compile_args: Vec<String>,
}

/// A source of parsed symbols for one translation unit at a time.
pub trait SourceParser: Send {
    fn parse(
        &mut self,
        path: &Path,
        source: &str,
        context: &ParseContext,
    ) -> ParseResult<ParsedUnit>;
}

/// Creates parser instances, one per indexing worker.
pub trait ParserFactory: Send + Sync {
    fn create(&self) -> ParseResult<Box<dyn SourceParser>>;
}

/// File extensions treated as C/C++ sources.
pub const CPP_EXTENSIONS: &[&str] = &["h", "hh", "hpp", "hxx", "c", "cc", "cpp", "cxx"];

/// Whether a path looks like a C/C++ source or header file.
pub fn is_cpp_source(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| CPP_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Whether a path looks like a header (declaration site tracking).
pub fn is_header(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_lowercase().as_str(), "h" | "hh" | "hpp" | "hxx"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpp_extension_detection() {
        assert!(is_cpp_source(Path::new("/p/handler.h")));
        assert!(is_cpp_source(Path::new("/p/handler.CPP")));
        assert!(is_cpp_source(Path::new("/p/handler.hxx")));
        assert!(!is_cpp_source(Path::new("/p/handler.rs")));
        assert!(!is_cpp_source(Path::new("/p/Makefile")));
    }

    #[test]
    fn header_detection() {
        assert!(is_header(Path::new("/p/a.h")));
        assert!(is_header(Path::new("/p/a.hpp")));
        assert!(!is_header(Path::new("/p/a.cpp")));
    }
}
