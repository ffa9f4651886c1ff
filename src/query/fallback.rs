//! Smart fallback suggestions for empty search results
//!
//! When a search returns nothing, this module analyzes the original pattern
//! for the common mistakes LLM callers make and produces a corrective hint:
//! a signature pasted instead of a name, regex anchoring that fights
//! fullmatch semantics, a wrong namespace in a qualified name, or a
//! file-name filter with the wrong case.
//!
//! The cascade runs in priority order and the first detector that produces
//! something useful wins. It is only invoked on empty results, so the
//! bounded index sampling here is off the hot path.

use crate::query::pattern::{compile_fullmatch, has_regex_metacharacters};
use crate::symbol::Symbol;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::LazyLock;

const MAX_ALTERNATIVES: usize = 10;
const MAX_REGEX_SAMPLE: usize = 200;

static IDENTIFIER_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"[a-zA-Z_][a-zA-Z0-9_]*(?:::[a-zA-Z_][a-zA-Z0-9_]*)*")
        .expect("identifier regex is valid")
});

const TYPE_KEYWORDS: &[&str] = &[
    "void", "bool", "int", "float", "double", "char", "const", "struct", "class", "auto",
    "typename", "unsigned", "long", "short", "static", "virtual", "inline", "extern", "volatile",
    "mutable", "explicit", "template",
];

/// Simple-name index handed in by the query engine.
pub type NameIndex = HashMap<String, Vec<Symbol>>;

/// Structured result of the fallback analysis, attached to empty-result
/// metadata.
#[derive(Debug, Clone)]
pub struct FallbackAnalysis {
    pub reason: &'static str,
    pub searched_for: String,
    pub hint: String,
    pub suggested_pattern: Option<String>,
    pub alternatives: Vec<Value>,
}

impl FallbackAnalysis {
    pub fn to_metadata(&self) -> Value {
        let mut out = json!({
            "reason": self.reason,
            "searched_for": self.searched_for,
            "hint": self.hint,
        });
        if let Some(suggested) = &self.suggested_pattern {
            out["suggested_pattern"] = json!(suggested);
        }
        if !self.alternatives.is_empty() {
            out["alternatives"] = json!(self.alternatives[..self.alternatives.len().min(MAX_ALTERNATIVES)]);
        }
        out
    }
}

fn alternative_json(symbol: &Symbol) -> Value {
    json!({
        "name": symbol.name,
        "qualified_name": symbol.qualified_name,
        "file": symbol.file,
        "line": symbol.line,
    })
}

/// Case-insensitive simple-name lookup into an index.
fn index_lookup(index: &NameIndex, name: &str) -> Vec<Value> {
    let found = index.get(name).map(|v| v.as_slice()).or_else(|| {
        index
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    });
    found
        .unwrap_or_default()
        .iter()
        .take(MAX_ALTERNATIVES)
        .map(alternative_json)
        .collect()
}

/// Probe a candidate regex against a bounded sample of the index.
fn sample_regex_matches(index: &NameIndex, pattern: &str) -> Vec<Value> {
    let Ok(re) = compile_fullmatch(pattern) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut checked = 0usize;
    for symbols in index.values() {
        for symbol in symbols {
            checked += 1;
            if checked > MAX_REGEX_SAMPLE {
                return out;
            }
            if re.is_match(&symbol.name) || re.is_match(&symbol.qualified_name) {
                out.push(alternative_json(symbol));
                if out.len() >= MAX_ALTERNATIVES {
                    return out;
                }
            }
        }
    }
    out
}

fn looks_like_signature(pattern: &str) -> bool {
    if pattern.contains('(') {
        return true;
    }
    let has_keyword = pattern
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .any(|word| TYPE_KEYWORDS.contains(&word.to_lowercase().as_str()));
    has_keyword && pattern.split_whitespace().count() >= 2
}

fn extract_identifier(pattern: &str) -> Option<String> {
    if let Some(paren) = pattern.find('(') {
        let before = &pattern[..paren];
        if let Some(last) = IDENTIFIER_RE.find_iter(before).last() {
            return Some(last.as_str().to_string());
        }
    }

    let identifiers: Vec<&str> = IDENTIFIER_RE
        .find_iter(pattern)
        .map(|m| m.as_str())
        .collect();
    if identifiers.is_empty() {
        return None;
    }
    let non_keywords: Vec<&str> = identifiers
        .iter()
        .copied()
        .filter(|i| !TYPE_KEYWORDS.contains(&i.to_lowercase().as_str()))
        .collect();
    let pool = if non_keywords.is_empty() {
        &identifiers
    } else {
        &non_keywords
    };
    pool.iter().max_by_key(|i| i.len()).map(|i| i.to_string())
}

fn has_double_escapes(pattern: &str) -> bool {
    pattern.contains("\\\\") || (pattern.contains("\\.") && !pattern.contains("\\.*"))
}

fn has_unnecessary_anchors(pattern: &str) -> bool {
    let caret_outside_class = pattern.contains('^') && !pattern.contains("[^");
    caret_outside_class || pattern.ends_with('$')
}

fn strip_anchors(pattern: &str) -> String {
    let mut out = pattern.to_string();
    if let Some(rest) = out.strip_prefix('^') {
        out = rest.to_string();
    }
    if let Some(rest) = out.strip_suffix('$') {
        out = rest.to_string();
    }
    out
}

/// A short regex like `I[A-Z]` only matches two-character names under
/// fullmatch; it probably wants a `.*` suffix.
fn looks_like_short_regex(pattern: &str) -> bool {
    static CHAR_CLASS: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r"\[[^\]]*\]").expect("char class regex is valid"));
    let collapsed = CHAR_CLASS.replace_all(pattern, "X");
    let stripped: String = collapsed
        .chars()
        .filter(|c| !".*+?{}()|\\^$".contains(*c))
        .collect();
    stripped.len() <= 3 && pattern.len() <= 10
}

/// Analyzes failed search patterns and generates corrective suggestions.
pub struct SmartFallback;

impl SmartFallback {
    /// Run the cascade. `primary_index` is the index matching the tool that
    /// was invoked (classes, functions, or both merged).
    pub fn analyze(
        pattern: &str,
        primary_index: &NameIndex,
        function_index: &NameIndex,
        file_names: &[String],
        file_name_filter: Option<&str>,
    ) -> Option<FallbackAnalysis> {
        if pattern.is_empty() && file_name_filter.is_none() {
            return None;
        }

        if let Some(result) = Self::detect_signature(pattern, primary_index, function_index) {
            return Some(result);
        }
        if let Some(result) = Self::detect_regex_issues(pattern, primary_index) {
            return Some(result);
        }
        if let Some(result) = Self::detect_qualified_fallback(pattern, primary_index) {
            return Some(result);
        }
        if let Some(filter) = file_name_filter {
            if let Some(result) = Self::detect_file_case_mismatch(pattern, filter, file_names) {
                return Some(result);
            }
        }
        None
    }

    fn detect_signature(
        pattern: &str,
        primary_index: &NameIndex,
        function_index: &NameIndex,
    ) -> Option<FallbackAnalysis> {
        if !looks_like_signature(pattern) {
            return None;
        }

        let Some(extracted) = extract_identifier(pattern) else {
            return Some(FallbackAnalysis {
                reason: "signature_detected",
                searched_for: pattern.to_string(),
                hint: "Pattern looks like a C++ function signature or type expression, \
                       not a symbol name. Use just the function/class name as the pattern."
                    .to_string(),
                suggested_pattern: None,
                alternatives: Vec::new(),
            });
        };

        // Strip any namespace qualification for the index lookup.
        let simple = extracted.rsplit("::").next().unwrap_or(&extracted);
        let mut alternatives = index_lookup(function_index, simple);
        if alternatives.is_empty() {
            alternatives = index_lookup(primary_index, simple);
        }

        Some(FallbackAnalysis {
            reason: "signature_detected",
            searched_for: pattern.to_string(),
            hint: format!(
                "Pattern looks like a C++ function signature, not a symbol name. \
                 Use just the name '{simple}' as the pattern."
            ),
            suggested_pattern: Some(simple.to_string()),
            alternatives,
        })
    }

    fn detect_regex_issues(pattern: &str, index: &NameIndex) -> Option<FallbackAnalysis> {
        if !has_regex_metacharacters(pattern) {
            return None;
        }

        if has_double_escapes(pattern) {
            let fixed = pattern.replace("\\\\", "\\");
            let alternatives = sample_regex_matches(index, &fixed);
            if !alternatives.is_empty() {
                return Some(FallbackAnalysis {
                    reason: "regex_hint",
                    searched_for: pattern.to_string(),
                    hint: "Pattern appears to have double-escaped characters. Regex patterns \
                           are passed directly, no extra escaping is needed."
                        .to_string(),
                    suggested_pattern: Some(fixed),
                    alternatives,
                });
            }
        }

        if has_unnecessary_anchors(pattern) {
            let stripped = strip_anchors(pattern);
            // `Reporter$` means suffix match, so broaden to `.*Reporter`;
            // `^Console` means prefix match, so broaden to `Console.*`.
            let mut suggested = stripped.clone();
            if pattern.ends_with('$') && !suggested.starts_with(".*") {
                suggested = format!(".*{suggested}");
            }
            if pattern.starts_with('^') && !suggested.ends_with(".*") {
                suggested = format!("{suggested}.*");
            }
            let mut alternatives = sample_regex_matches(index, &suggested);
            if alternatives.is_empty() {
                alternatives = sample_regex_matches(index, &stripped);
                if !alternatives.is_empty() {
                    suggested = stripped;
                }
            }
            if !alternatives.is_empty() {
                return Some(FallbackAnalysis {
                    reason: "regex_hint",
                    searched_for: pattern.to_string(),
                    hint: format!(
                        "Patterns use fullmatch (anchored at both ends), so ^ and $ anchors \
                         are redundant. Try '{suggested}' instead."
                    ),
                    suggested_pattern: Some(suggested),
                    alternatives,
                });
            }
        }

        if looks_like_short_regex(pattern) {
            let broadened = format!("{pattern}.*");
            let alternatives = sample_regex_matches(index, &broadened);
            if !alternatives.is_empty() {
                return Some(FallbackAnalysis {
                    reason: "regex_hint",
                    searched_for: pattern.to_string(),
                    hint: format!(
                        "Patterns use fullmatch (anchored at both ends). '{pattern}' only \
                         matches very short names. Try '{broadened}' to match names starting \
                         with this pattern."
                    ),
                    suggested_pattern: Some(broadened),
                    alternatives,
                });
            }
        }

        if !pattern.starts_with(".*") {
            let mut broadened = format!(".*{pattern}");
            if !broadened.ends_with(".*") {
                broadened.push_str(".*");
            }
            let alternatives = sample_regex_matches(index, &broadened);
            if !alternatives.is_empty() {
                return Some(FallbackAnalysis {
                    reason: "regex_hint",
                    searched_for: pattern.to_string(),
                    hint: format!(
                        "Patterns use fullmatch (anchored at both ends). '{pattern}' requires \
                         an exact full match. Try '{broadened}' for partial matching."
                    ),
                    suggested_pattern: Some(broadened),
                    alternatives,
                });
            }
        }

        None
    }

    fn detect_qualified_fallback(pattern: &str, index: &NameIndex) -> Option<FallbackAnalysis> {
        if !pattern.contains("::") || has_regex_metacharacters(pattern) {
            return None;
        }

        let simple_name = pattern.trim_start_matches("::").rsplit("::").next()?;
        if simple_name.is_empty() {
            return None;
        }

        let alternatives = index_lookup(index, simple_name);
        if alternatives.is_empty() {
            return None;
        }

        Some(FallbackAnalysis {
            reason: "qualified_fallback",
            searched_for: pattern.to_string(),
            hint: format!(
                "No match for '{pattern}'. Found '{simple_name}' in {} location(s). \
                 Use the qualified_name from alternatives for an exact match.",
                alternatives.len()
            ),
            suggested_pattern: Some(simple_name.to_string()),
            alternatives,
        })
    }

    fn detect_file_case_mismatch(
        pattern: &str,
        file_name: &str,
        file_names: &[String],
    ) -> Option<FallbackAnalysis> {
        let wanted_lower = file_name.to_lowercase();
        let matching: Vec<&String> = file_names
            .iter()
            .filter(|candidate| {
                let basename = candidate.rsplit(['/', '\\']).next().unwrap_or(candidate);
                basename.to_lowercase() == wanted_lower && basename != file_name
            })
            .collect();

        let first = matching.first()?;
        let correct = first.rsplit(['/', '\\']).next().unwrap_or(first);

        Some(FallbackAnalysis {
            reason: "file_case_mismatch",
            searched_for: pattern.to_string(),
            hint: format!(
                "No file matching '{file_name}' (case-sensitive). Did you mean '{correct}'? \
                 Use file_name='{correct}' for an exact match."
            ),
            suggested_pattern: Some(pattern.to_string()),
            alternatives: matching
                .iter()
                .take(5)
                .map(|f| {
                    let basename = f.rsplit(['/', '\\']).next().unwrap_or(f);
                    json!({ "suggested_file_name": basename })
                })
                .collect(),
        })
    }
}
