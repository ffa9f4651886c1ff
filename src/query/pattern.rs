//! Search-pattern classification and matching
//!
//! Every query pattern is classified once into one of four modes:
//!
//! 1. **Unqualified** — no `::`, no regex metacharacters: exact simple-name
//!    match in any namespace.
//! 2. **Qualified suffix** — contains `::`, no metacharacters, no leading
//!    `::`: the pattern's components must equal the tail of the candidate's
//!    components. `ui::Handler` matches `app::ui::Handler` but not
//!    `myui::Handler`.
//! 3. **Exact global** — leading `::`: the qualified name must equal the
//!    pattern minus the prefix (a global-scope symbol).
//! 4. **Regex** — any metacharacter present: fullmatch against either the
//!    simple or the qualified name.
//!
//! All modes are case-insensitive.

use crate::symbol::Symbol;
use regex::{Regex, RegexBuilder};

/// Characters that switch a pattern into regex mode.
pub const REGEX_METACHARACTERS: &[char] = &[
    '.', '*', '+', '?', '[', ']', '{', '}', '(', ')', '|', '\\', '^', '$',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternMode {
    Unqualified,
    QualifiedSuffix,
    ExactGlobal,
    Regex,
}

pub fn has_regex_metacharacters(pattern: &str) -> bool {
    pattern.contains(REGEX_METACHARACTERS)
}

pub fn classify(pattern: &str) -> PatternMode {
    if has_regex_metacharacters(pattern) {
        PatternMode::Regex
    } else if pattern.starts_with("::") {
        PatternMode::ExactGlobal
    } else if pattern.contains("::") {
        PatternMode::QualifiedSuffix
    } else {
        PatternMode::Unqualified
    }
}

/// Compile a pattern for fullmatch semantics: the regex must consume the
/// entire candidate. Case-insensitive, with a size limit so pathological
/// patterns are rejected instead of exploding.
pub fn compile_fullmatch(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&format!("^(?:{pattern})$"))
        .case_insensitive(true)
        .size_limit(1 << 20)
        .build()
}

/// Does `symbol` match `pattern` under the given mode?
///
/// For [`PatternMode::Regex`] callers should compile once with
/// [`compile_fullmatch`] and use [`regex_matches`]; this convenience
/// recompiles per call.
pub fn matches(mode: PatternMode, pattern: &str, symbol: &Symbol) -> bool {
    match mode {
        PatternMode::Unqualified => symbol.name.eq_ignore_ascii_case(pattern),
        PatternMode::QualifiedSuffix => qualified_suffix_matches(pattern, &symbol.qualified_name),
        PatternMode::ExactGlobal => {
            let wanted = &pattern[2..];
            symbol.qualified_name.eq_ignore_ascii_case(wanted)
        }
        PatternMode::Regex => match compile_fullmatch(pattern) {
            Ok(re) => regex_matches(&re, symbol),
            Err(_) => false,
        },
    }
}

pub fn regex_matches(re: &Regex, symbol: &Symbol) -> bool {
    re.is_match(&symbol.name) || re.is_match(&symbol.qualified_name)
}

/// Component-level suffix match: the candidate's `::`-separated components
/// must end with the pattern's components.
pub fn qualified_suffix_matches(pattern: &str, qualified_name: &str) -> bool {
    let wanted: Vec<&str> = pattern.split("::").collect();
    let have: Vec<&str> = qualified_name.split("::").collect();
    if wanted.len() > have.len() {
        return false;
    }
    have[have.len() - wanted.len()..]
        .iter()
        .zip(&wanted)
        .all(|(h, w)| h.eq_ignore_ascii_case(w))
}
