//! Symbol data model for the C++ index
//!
//! A [`Symbol`] is one declaration or definition, keyed by its USR (a stable
//! cross-translation-unit identifier supplied by the parser). The module also
//! carries the dedup rule used when two parses of the same USR both claim to
//! be definitions: see [`is_richer_definition`].

use serde::{Deserialize, Serialize};

/// Kinds of C++ symbols tracked by the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Class,
    Struct,
    Union,
    Enum,
    ClassTemplate,
    PartialSpecialization,
    Function,
    Method,
    Constructor,
    Destructor,
    FunctionTemplate,
    TypeAlias,
}

impl SymbolKind {
    /// Class-like kinds participate in hierarchy queries and `search_classes`
    pub fn is_class_like(self) -> bool {
        matches!(
            self,
            Self::Class
                | Self::Struct
                | Self::Union
                | Self::Enum
                | Self::ClassTemplate
                | Self::PartialSpecialization
        )
    }

    /// Function-like kinds participate in call-graph queries and `search_functions`
    pub fn is_function_like(self) -> bool {
        matches!(
            self,
            Self::Function
                | Self::Method
                | Self::Constructor
                | Self::Destructor
                | Self::FunctionTemplate
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Union => "union",
            Self::Enum => "enum",
            Self::ClassTemplate => "class_template",
            Self::PartialSpecialization => "partial_specialization",
            Self::Function => "function",
            Self::Method => "method",
            Self::Constructor => "constructor",
            Self::Destructor => "destructor",
            Self::FunctionTemplate => "function_template",
            Self::TypeAlias => "type_alias",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        Some(match s {
            "class" => Self::Class,
            "struct" => Self::Struct,
            "union" => Self::Union,
            "enum" => Self::Enum,
            "class_template" => Self::ClassTemplate,
            "partial_specialization" => Self::PartialSpecialization,
            "function" => Self::Function,
            "method" => Self::Method,
            "constructor" => Self::Constructor,
            "destructor" => Self::Destructor,
            "function_template" => Self::FunctionTemplate,
            "type_alias" => Self::TypeAlias,
            _ => return None,
        })
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// C++ member access level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    #[default]
    Public,
    Protected,
    Private,
}

impl Access {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Protected => "protected",
            Self::Private => "private",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        Some(match s {
            "public" => Self::Public,
            "protected" => Self::Protected,
            "private" => Self::Private,
            _ => return None,
        })
    }
}

/// Template classification for a symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    ClassTemplate,
    FunctionTemplate,
    PartialSpecialization,
    FullSpecialization,
}

impl TemplateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClassTemplate => "class_template",
            Self::FunctionTemplate => "function_template",
            Self::PartialSpecialization => "partial_specialization",
            Self::FullSpecialization => "full_specialization",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        Some(match s {
            "class_template" => Self::ClassTemplate,
            "function_template" => Self::FunctionTemplate,
            "partial_specialization" => Self::PartialSpecialization,
            "full_specialization" => Self::FullSpecialization,
            _ => return None,
        })
    }
}

/// One template parameter: `template<typename T, int N, template<class> class C>`
/// yields `{T, type}`, `{N, non_type}`, `{C, template}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateParameter {
    pub name: String,
    pub kind: TemplateParamKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateParamKind {
    Type,
    NonType,
    Template,
}

/// One C++ declaration or definition, uniquely identified by USR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    /// Unified Symbol Resolution id, stable across translation units
    pub usr: String,
    /// Simple identifier, e.g. `Handler`
    pub name: String,
    /// Namespace-qualified name, e.g. `app::ui::Handler`
    pub qualified_name: String,
    /// Namespace portion, e.g. `app::ui` (empty for global scope)
    #[serde(default)]
    pub namespace: String,
    pub kind: SymbolKind,
    /// Absolute path of the defining file
    pub file: String,
    /// 1-based line of the declaration name
    pub line: u32,
    /// 1-based column of the declaration name
    pub column: u32,
    /// First line of the full declaration (None when unknown)
    #[serde(default)]
    pub start_line: Option<u32>,
    /// Last line of the full declaration (None when unknown)
    #[serde(default)]
    pub end_line: Option<u32>,

    /// Header declaration site, when distinct from the definition file
    #[serde(default)]
    pub header_file: Option<String>,
    #[serde(default)]
    pub header_line: Option<u32>,
    #[serde(default)]
    pub header_start_line: Option<u32>,
    #[serde(default)]
    pub header_end_line: Option<u32>,

    /// Human-readable prototype, e.g. `virtual void Handler::process(int) const`
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub access: Access,
    /// For methods, the qualified name of the containing class (empty otherwise)
    #[serde(default)]
    pub parent_class: String,
    /// Ordered base-class type strings as written in the source
    #[serde(default)]
    pub base_classes: Vec<String>,
    /// Whether the symbol lives under the project source root
    #[serde(default = "default_true")]
    pub is_project: bool,

    #[serde(default)]
    pub is_definition: bool,
    #[serde(default)]
    pub is_virtual: bool,
    #[serde(default)]
    pub is_pure_virtual: bool,
    #[serde(default)]
    pub is_const: bool,
    #[serde(default)]
    pub is_static: bool,

    #[serde(default)]
    pub template_kind: Option<TemplateKind>,
    #[serde(default)]
    pub template_parameters: Vec<TemplateParameter>,
    /// For specializations, USR of the primary template
    #[serde(default)]
    pub primary_template_usr: Option<String>,

    /// First line of the documentation comment
    #[serde(default)]
    pub brief: Option<String>,
    /// Full documentation comment
    #[serde(default)]
    pub doc_comment: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Symbol {
    /// Create a symbol with the required fields; the rest default to empty.
    pub fn new(
        usr: impl Into<String>,
        name: impl Into<String>,
        qualified_name: impl Into<String>,
        kind: SymbolKind,
        file: impl Into<String>,
        line: u32,
    ) -> Self {
        let name = name.into();
        let qualified_name = qualified_name.into();
        let namespace = namespace_of(&qualified_name);
        Self {
            usr: usr.into(),
            name,
            qualified_name,
            namespace,
            kind,
            file: file.into(),
            line,
            column: 1,
            start_line: None,
            end_line: None,
            header_file: None,
            header_line: None,
            header_start_line: None,
            header_end_line: None,
            signature: String::new(),
            access: Access::Public,
            parent_class: String::new(),
            base_classes: Vec::new(),
            is_project: true,
            is_definition: false,
            is_virtual: false,
            is_pure_virtual: false,
            is_const: false,
            is_static: false,
            template_kind: None,
            template_parameters: Vec::new(),
            primary_template_usr: None,
            brief: None,
            doc_comment: None,
        }
    }

    /// Line span of the declaration; 0 when the range is unknown.
    pub fn line_span(&self) -> u32 {
        match (self.start_line, self.end_line) {
            (Some(s), Some(e)) if e >= s => e - s,
            _ => 0,
        }
    }
}

/// Extract the namespace portion of a qualified name.
///
/// `app::ui::Handler` -> `app::ui`; `Handler` -> ``.
pub fn namespace_of(qualified_name: &str) -> String {
    match qualified_name.rfind("::") {
        Some(pos) => qualified_name[..pos].to_string(),
        None => String::new(),
    }
}

/// Decide whether `new_symbol` is a richer definition than `existing`.
///
/// When two entries share a USR and both claim to be definitions (a
/// macro-generated empty stub and the real class, say), keep the one with
/// more semantic content. Non-empty base classes win outright; otherwise the
/// larger line span wins; on a tie the existing entry is kept, so repeated
/// parses are stable.
pub fn is_richer_definition(new_symbol: &Symbol, existing: &Symbol) -> bool {
    let new_has_bases = !new_symbol.base_classes.is_empty();
    let existing_has_bases = !existing.base_classes.is_empty();
    if new_has_bases && !existing_has_bases {
        return true;
    }
    if existing_has_bases && !new_has_bases {
        return false;
    }

    new_symbol.line_span() > existing.line_span()
}

/// Indices of `base_classes` entries that are template parameter names
/// rather than real classes.
///
/// `template<typename T> class Foo : public T, public Bar` has
/// `base_classes = ["T", "Bar"]` and one type parameter `T`, so this returns
/// `[0]`. Hierarchy traversal must not treat those entries as edges: a class
/// that happens to share a name with a template parameter is unrelated.
pub fn template_param_base_indices(symbol: &Symbol) -> Vec<usize> {
    if symbol.template_parameters.is_empty() || symbol.base_classes.is_empty() {
        return Vec::new();
    }

    symbol
        .base_classes
        .iter()
        .enumerate()
        .filter(|(_, base)| {
            symbol
                .template_parameters
                .iter()
                .any(|p| p.name == **base)
        })
        .map(|(i, _)| i)
        .collect()
}
