//! Search result filters
//!
//! Filters combine with AND. `file_name` accepts a bare name, a relative or
//! absolute path suffix, or a glob; `namespace` matches at `::` boundaries
//! (empty string means global namespace only); `class_name` is an exact
//! parent-class filter for methods; `signature_pattern` is a
//! case-insensitive substring over the prototype.

use crate::symbol::{Symbol, SymbolKind};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub project_only: bool,
    pub file_name: Option<String>,
    pub namespace: Option<String>,
    pub class_name: Option<String>,
    pub signature_pattern: Option<String>,
    pub kinds: Option<Vec<SymbolKind>>,
    pub max_results: Option<usize>,
}

impl SearchFilters {
    pub fn project_only() -> Self {
        Self {
            project_only: true,
            ..Default::default()
        }
    }

    /// AND of every configured filter (except `max_results`, which the
    /// caller applies after sorting).
    pub fn matches(&self, symbol: &Symbol) -> bool {
        if self.project_only && !symbol.is_project {
            return false;
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&symbol.kind) {
                return false;
            }
        }
        if let Some(file_name) = &self.file_name {
            if !file_matches(&symbol.file, file_name) {
                return false;
            }
        }
        if let Some(namespace) = &self.namespace {
            if !namespace_matches(&symbol.namespace, namespace) {
                return false;
            }
        }
        if let Some(class_name) = &self.class_name {
            if !parent_class_matches(&symbol.parent_class, class_name) {
                return false;
            }
        }
        if let Some(signature) = &self.signature_pattern {
            if !symbol
                .signature
                .to_lowercase()
                .contains(&signature.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

/// File filter: glob when the pattern contains glob metacharacters,
/// otherwise a path-component-aware suffix match.
pub fn file_matches(file: &str, pattern: &str) -> bool {
    if pattern.contains(['*', '?', '[']) {
        let Ok(glob) = glob::Pattern::new(pattern) else {
            return false;
        };
        let basename = Path::new(file)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        return glob.matches(file) || glob.matches(&basename);
    }

    if file == pattern {
        return true;
    }
    // Suffix match aligned to a path separator: `handler.h` and
    // `src/handler.h` both match `/project/src/handler.h`, but `andler.h`
    // does not.
    file.strip_suffix(pattern)
        .is_some_and(|head| head.ends_with('/') || head.ends_with('\\'))
}

/// Namespace filter: partial match at `::` boundaries. The empty string
/// selects the global namespace only.
pub fn namespace_matches(namespace: &str, wanted: &str) -> bool {
    if wanted.is_empty() {
        return namespace.is_empty();
    }
    if namespace == wanted {
        return true;
    }
    namespace.starts_with(&format!("{wanted}::"))
        || namespace.ends_with(&format!("::{wanted}"))
        || namespace.contains(&format!("::{wanted}::"))
}

/// Parent-class filter: exact qualified match or simple-name match.
pub fn parent_class_matches(parent_class: &str, wanted: &str) -> bool {
    if parent_class.is_empty() {
        return false;
    }
    parent_class == wanted || parent_class.ends_with(&format!("::{wanted}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym() -> Symbol {
        let mut s = Symbol::new(
            "u",
            "process",
            "app::ui::Handler::process",
            SymbolKind::Method,
            "/project/src/handler.cpp",
            10,
        );
        s.namespace = "app::ui".into();
        s.parent_class = "app::ui::Handler".into();
        s.signature = "virtual void app::ui::Handler::process(const std::string &msg)".into();
        s
    }

    #[test]
    fn file_name_forms() {
        assert!(file_matches("/project/src/handler.cpp", "handler.cpp"));
        assert!(file_matches("/project/src/handler.cpp", "src/handler.cpp"));
        assert!(file_matches(
            "/project/src/handler.cpp",
            "/project/src/handler.cpp"
        ));
        assert!(!file_matches("/project/src/handler.cpp", "andler.cpp"));
        assert!(!file_matches("/project/src/handler.cpp", "Handler.cpp"));
    }

    #[test]
    fn file_name_globs() {
        assert!(file_matches("/project/src/handler.cpp", "*.cpp"));
        assert!(file_matches("/project/src/handler.cpp", "hand*.cpp"));
        assert!(file_matches("/project/src/handler.cpp", "/project/**/*.cpp"));
        assert!(!file_matches("/project/src/handler.cpp", "*.h"));
    }

    #[test]
    fn namespace_boundaries() {
        assert!(namespace_matches("app::ui", "ui"));
        assert!(namespace_matches("app::ui", "app"));
        assert!(namespace_matches("app::ui", "app::ui"));
        assert!(namespace_matches("app::ui::detail", "ui"));
        assert!(!namespace_matches("app::myui", "ui"));
        assert!(!namespace_matches("app::ui", ""));
        assert!(namespace_matches("", ""));
    }

    #[test]
    fn class_name_exact_or_simple() {
        assert!(parent_class_matches("app::ui::Handler", "Handler"));
        assert!(parent_class_matches("app::ui::Handler", "app::ui::Handler"));
        assert!(!parent_class_matches("app::ui::HandlerBase", "Handler"));
        assert!(!parent_class_matches("", "Handler"));
    }

    #[test]
    fn combined_filters_are_anded() {
        let symbol = sym();

        let mut filters = SearchFilters::project_only();
        filters.namespace = Some("ui".into());
        filters.signature_pattern = Some("std::string".into());
        assert!(filters.matches(&symbol));

        filters.class_name = Some("Other".into());
        assert!(!filters.matches(&symbol));
    }

    #[test]
    fn kind_subset_filter() {
        let symbol = sym();
        let mut filters = SearchFilters::default();
        filters.kinds = Some(vec![SymbolKind::Method, SymbolKind::Function]);
        assert!(filters.matches(&symbol));
        filters.kinds = Some(vec![SymbolKind::Class]);
        assert!(!filters.matches(&symbol));
    }

    #[test]
    fn project_only_excludes_external() {
        let mut symbol = sym();
        symbol.is_project = false;
        assert!(!SearchFilters::project_only().matches(&symbol));
        assert!(SearchFilters::default().matches(&symbol));
    }

    #[test]
    fn signature_substring_is_case_insensitive() {
        let symbol = sym();
        let mut filters = SearchFilters::default();
        filters.signature_pattern = Some("STD::STRING".into());
        assert!(filters.matches(&symbol));
    }
}
