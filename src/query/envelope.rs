//! Query-result envelope: the "silence = success" contract
//!
//! Normal results carry no metadata block at all. Metadata appears only for
//! the conditions that need LLM guidance: empty (with smart-fallback hints),
//! truncated by `max_results`, large (>20 items with no cap), and partial
//! (indexing still running). Partial takes precedence over everything else.

use crate::state::StateManager;
use serde::Serialize;
use serde_json::{json, Value};

/// Result sets above this size get a `large` metadata block when the caller
/// set no explicit cap.
pub const LARGE_RESULT_THRESHOLD: usize = 20;

#[derive(Debug, Serialize)]
pub struct QueryResult {
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl QueryResult {
    pub fn to_value(&self) -> Value {
        match &self.metadata {
            Some(metadata) => json!({ "data": self.data, "metadata": metadata }),
            None => json!({ "data": self.data }),
        }
    }

    fn normal(data: Value) -> Self {
        Self {
            data,
            metadata: None,
        }
    }

    fn empty(data: Value, suggestions: Option<Vec<String>>, fallback: Option<Value>) -> Self {
        let suggestions = suggestions.unwrap_or_else(|| {
            vec![
                "Check the spelling of the symbol name".to_string(),
                "Try a broader pattern, e.g. 'Name.*' for prefix matching".to_string(),
                "Use search_scope=include_external_libraries to search dependencies".to_string(),
            ]
        });
        let mut metadata = json!({
            "status": "empty",
            "suggestions": suggestions,
        });
        if let Some(fallback) = fallback {
            metadata["fallback"] = fallback;
        }
        Self {
            data,
            metadata: Some(metadata),
        }
    }

    fn truncated(data: Value, returned: usize, total_matches: usize) -> Self {
        Self {
            data,
            metadata: Some(json!({
                "status": "truncated",
                "returned": returned,
                "total_matches": total_matches,
                "hint": format!(
                    "Showing {returned} of {total_matches} matches. \
                     Raise max_results or narrow the pattern."
                ),
            })),
        }
    }

    fn large(data: Value, result_count: usize) -> Self {
        Self {
            data,
            metadata: Some(json!({
                "status": "large",
                "result_count": result_count,
                "hint": "Large result set. Use max_results or add filters \
                         (file_name, namespace, kind) to narrow it.",
            })),
        }
    }

    fn partial(data: Value, state: &StateManager, tool_name: &str) -> Self {
        let progress = state.progress();
        let (indexed, total, completion) = progress
            .as_ref()
            .map(|p| (p.indexed_files, p.total_files, p.completion_percentage()))
            .unwrap_or((0, 0, 0.0));

        let what = if tool_name.contains("class") {
            "classes"
        } else if tool_name.contains("function") {
            "functions"
        } else {
            "symbols"
        };
        let warning = format!(
            "INCOMPLETE RESULTS: only {completion:.1}% of files indexed ({indexed}/{total}). \
             Results may be missing {what}. Use 'get_indexing_status' to check progress \
             or 'wait_for_indexing' to wait for completion."
        );

        Self {
            data,
            metadata: Some(json!({
                "status": "partial",
                "warning": warning,
                "indexed_files": indexed,
                "total_files": total,
                "completion_percentage": completion,
            })),
        }
    }

    /// Apply the priority cascade: partial > empty > truncated > large >
    /// normal.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        data: Value,
        result_count: usize,
        state: &StateManager,
        tool_name: &str,
        max_results: Option<usize>,
        total_matches: Option<usize>,
        fallback: Option<Value>,
        empty_suggestions: Option<Vec<String>>,
    ) -> Self {
        if !state.is_fully_indexed() {
            return Self::partial(data, state, tool_name);
        }
        if result_count == 0 {
            return Self::empty(data, empty_suggestions, fallback);
        }
        if let (Some(max), Some(total)) = (max_results, total_matches) {
            if total > max {
                return Self::truncated(data, result_count, total);
            }
        }
        if max_results.is_none() && result_count > LARGE_RESULT_THRESHOLD {
            return Self::large(data, result_count);
        }
        Self::normal(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AnalyzerState, IndexingProgress};

    fn indexed_state() -> StateManager {
        let state = StateManager::new();
        state.transition_to(AnalyzerState::Indexed);
        state
    }

    #[test]
    fn normal_result_has_no_metadata() {
        let state = indexed_state();
        let result = QueryResult::build(
            json!([{"name": "A"}]),
            1,
            &state,
            "search_classes",
            None,
            None,
            None,
            None,
        );
        assert!(result.metadata.is_none());
        let value = result.to_value();
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn empty_result_carries_suggestions_and_fallback() {
        let state = indexed_state();
        let result = QueryResult::build(
            json!([]),
            0,
            &state,
            "search_classes",
            None,
            None,
            Some(json!({"reason": "regex_hint"})),
            None,
        );
        let metadata = result.metadata.unwrap();
        assert_eq!(metadata["status"], "empty");
        assert!(metadata["suggestions"].as_array().is_some());
        assert_eq!(metadata["fallback"]["reason"], "regex_hint");
    }

    #[test]
    fn truncated_when_total_exceeds_cap() {
        let state = indexed_state();
        let result = QueryResult::build(
            json!([1, 2, 3]),
            3,
            &state,
            "search_classes",
            Some(3),
            Some(10),
            None,
            None,
        );
        let metadata = result.metadata.unwrap();
        assert_eq!(metadata["status"], "truncated");
        assert_eq!(metadata["returned"], 3);
        assert_eq!(metadata["total_matches"], 10);
    }

    #[test]
    fn no_truncation_when_under_cap() {
        let state = indexed_state();
        let result = QueryResult::build(
            json!([1, 2]),
            2,
            &state,
            "search_classes",
            Some(10),
            Some(2),
            None,
            None,
        );
        assert!(result.metadata.is_none());
    }

    #[test]
    fn large_only_without_explicit_cap() {
        let state = indexed_state();
        let many: Vec<u32> = (0..25).collect();
        let result = QueryResult::build(
            json!(many),
            25,
            &state,
            "search_classes",
            None,
            None,
            None,
            None,
        );
        assert_eq!(result.metadata.unwrap()["status"], "large");

        let capped = QueryResult::build(
            json!(many),
            25,
            &state,
            "search_classes",
            Some(100),
            Some(25),
            None,
            None,
        );
        assert!(capped.metadata.is_none());
    }

    #[test]
    fn partial_takes_precedence_over_everything() {
        let state = StateManager::new();
        state.transition_to(AnalyzerState::Indexing);
        let mut progress = IndexingProgress::new(100);
        progress.indexed_files = 40;
        state.update_progress(progress);

        // Empty result during indexing is reported as partial, not empty.
        let result = QueryResult::build(
            json!([]),
            0,
            &state,
            "search_functions",
            None,
            None,
            None,
            None,
        );
        let metadata = result.metadata.unwrap();
        assert_eq!(metadata["status"], "partial");
        assert_eq!(metadata["indexed_files"], 40);
        assert_eq!(metadata["completion_percentage"], 40.0);
        assert!(metadata["warning"]
            .as_str()
            .unwrap()
            .contains("functions"));
    }
}
