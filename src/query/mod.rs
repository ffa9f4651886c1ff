//! Query engine: pattern matching, filters, structural queries, envelopes
//!
//! See [`engine::QueryEngine`] for the entry point. Pattern classification
//! lives in [`pattern`], result envelopes in [`envelope`], and the
//! empty-result suggestion cascade in [`fallback`].

pub mod calls;
pub mod engine;
pub mod envelope;
pub mod fallback;
pub mod filters;
pub mod hierarchy;
pub mod pattern;

pub use calls::CallGraph;
pub use engine::{symbol_json, QueryEngine, SearchOutcome};
pub use envelope::QueryResult;
pub use fallback::SmartFallback;
pub use filters::SearchFilters;
pub use hierarchy::HierarchyGraph;
pub use pattern::PatternMode;
