//! Tree-sitter based C++ symbol extraction
//!
//! Walks the syntax tree collecting namespaces, classes with their base
//! lists, templates with parameter lists, methods with access and qualifier
//! flags, free functions, `using`/`typedef` aliases, call expressions with
//! their locations, `#include` directives, and Doxygen-style documentation
//! comments.
//!
//! USRs are synthesized from kind + qualified name + normalized parameter
//! list, which keeps them stable for the same declaration across translation
//! units. Method qualifier flags (`virtual`, `const`, `= 0`, `static`) are
//! detected from the declaration text rather than grammar node kinds, which
//! survives grammar revisions.

use crate::parsing::{ParseContext, ParseError, ParseResult, ParsedUnit, ParserFactory, SourceParser};
use crate::relations::{CallSite, TypeAlias};
use crate::symbol::{
    Access, Symbol, SymbolKind, TemplateKind, TemplateParamKind, TemplateParameter,
};
use std::path::Path;
use tree_sitter::{Node, Parser};

pub struct CppParser {
    parser: Parser,
}

impl CppParser {
    pub fn new() -> ParseResult<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_cpp::LANGUAGE.into())
            .map_err(|e| ParseError::Init(format!("failed to set C++ language: {e}")))?;
        Ok(Self { parser })
    }
}

impl SourceParser for CppParser {
    fn parse(
        &mut self,
        path: &Path,
        source: &str,
        _context: &ParseContext,
    ) -> ParseResult<ParsedUnit> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| ParseError::TreeUnavailable {
                path: path.to_path_buf(),
            })?;

        let mut extractor = Extractor {
            source,
            file: path.to_string_lossy().into_owned(),
            out: ParsedUnit::default(),
            namespace_stack: Vec::new(),
            class_stack: Vec::new(),
        };
        extractor.walk(tree.root_node(), None, Access::Public);
        Ok(extractor.out)
    }
}

/// Factory handing each indexing worker its own parser.
pub struct CppParserFactory;

impl ParserFactory for CppParserFactory {
    fn create(&self) -> ParseResult<Box<dyn SourceParser>> {
        Ok(Box::new(CppParser::new()?))
    }
}

struct ClassContext {
    qualified_name: String,
    simple_name: String,
}

struct Extractor<'s> {
    source: &'s str,
    file: String,
    out: ParsedUnit,
    namespace_stack: Vec<String>,
    class_stack: Vec<ClassContext>,
}

impl<'s> Extractor<'s> {
    fn text(&self, node: Node) -> &'s str {
        &self.source[node.byte_range()]
    }

    fn current_namespace(&self) -> String {
        self.namespace_stack.join("::")
    }

    /// Qualify a name with the namespace and enclosing-class stack.
    fn qualify(&self, name: &str) -> String {
        let mut parts: Vec<&str> = self.namespace_stack.iter().map(String::as_str).collect();
        if let Some(class) = self.class_stack.last() {
            return format!("{}::{}", class.qualified_name, name);
        }
        parts.push(name);
        parts.join("::")
    }

    fn walk(&mut self, node: Node, template: Option<&[TemplateParameter]>, access: Access) {
        match node.kind() {
            "namespace_definition" => self.handle_namespace(node),
            "template_declaration" => self.handle_template(node),
            "class_specifier" | "struct_specifier" | "union_specifier" | "enum_specifier" => {
                self.handle_class(node, node, template, access);
            }
            "function_definition" => {
                self.handle_function(node, node, template, access, true);
            }
            "declaration" => self.handle_declaration(node, template, access),
            "alias_declaration" | "type_definition" => self.handle_alias(node),
            "preproc_include" => self.handle_include(node),
            _ => {
                for child in node.children(&mut node.walk()) {
                    self.walk(child, None, access);
                }
            }
        }
    }

    fn handle_namespace(&mut self, node: Node) {
        let name = node
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string());
        let pushed = match name {
            // `namespace a::b` pushes two components
            Some(name) => {
                let count = name.split("::").count();
                for part in name.split("::") {
                    self.namespace_stack.push(part.to_string());
                }
                count
            }
            None => 0,
        };

        if let Some(body) = node.child_by_field_name("body") {
            for child in body.children(&mut body.walk()) {
                self.walk(child, None, Access::Public);
            }
        }

        for _ in 0..pushed {
            self.namespace_stack.pop();
        }
    }

    fn handle_template(&mut self, node: Node) {
        let params = node
            .children(&mut node.walk())
            .find(|c| c.kind() == "template_parameter_list")
            .map(|list| self.template_parameters(list))
            .unwrap_or_default();

        for child in node.children(&mut node.walk()) {
            match child.kind() {
                "class_specifier" | "struct_specifier" | "union_specifier" => {
                    self.handle_class(child, node, Some(&params), Access::Public);
                }
                "function_definition" => {
                    self.handle_function(child, node, Some(&params), Access::Public, true);
                }
                "declaration" => self.handle_declaration(child, Some(&params), Access::Public),
                "alias_declaration" => self.handle_alias(child),
                _ => {}
            }
        }
    }

    fn template_parameters(&self, list: Node) -> Vec<TemplateParameter> {
        let mut params = Vec::new();
        for child in list.children(&mut list.walk()) {
            match child.kind() {
                "type_parameter_declaration"
                | "optional_type_parameter_declaration"
                | "variadic_type_parameter_declaration" => {
                    if let Some(name) = child
                        .children(&mut child.walk())
                        .find(|c| c.kind() == "type_identifier")
                    {
                        params.push(TemplateParameter {
                            name: self.text(name).to_string(),
                            kind: TemplateParamKind::Type,
                        });
                    }
                }
                "parameter_declaration" | "optional_parameter_declaration" => {
                    if let Some(declarator) = child.child_by_field_name("declarator") {
                        params.push(TemplateParameter {
                            name: self.text(declarator).to_string(),
                            kind: TemplateParamKind::NonType,
                        });
                    }
                }
                "template_template_parameter_declaration" => {
                    if let Some(name) = child
                        .children(&mut child.walk())
                        .find(|c| c.kind() == "type_identifier")
                    {
                        params.push(TemplateParameter {
                            name: self.text(name).to_string(),
                            kind: TemplateParamKind::Template,
                        });
                    }
                }
                _ => {}
            }
        }
        params
    }

    /// Forward declarations (`struct Foo;`) and function prototypes both
    /// arrive as `declaration` nodes.
    fn handle_declaration(
        &mut self,
        node: Node,
        template: Option<&[TemplateParameter]>,
        access: Access,
    ) {
        if find_function_declarator(node).is_some() {
            self.handle_function(node, node, template, access, false);
            return;
        }

        // `struct Foo;` -> declaration(type: struct_specifier without body)
        for child in node.children(&mut node.walk()) {
            if matches!(
                child.kind(),
                "class_specifier" | "struct_specifier" | "union_specifier" | "enum_specifier"
            ) && child.child_by_field_name("body").is_none()
            {
                self.handle_class(child, node, template, access);
            }
        }
    }

    fn handle_class(
        &mut self,
        node: Node,
        doc_anchor: Node,
        template: Option<&[TemplateParameter]>,
        access: Access,
    ) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return; // anonymous
        };

        // `template<> struct Foo<int>` / `template<class T> struct Foo<T*>`
        // carry a template_type name node.
        let is_specialization = name_node.kind() == "template_type";
        let simple_name = if is_specialization {
            name_node
                .child_by_field_name("name")
                .map(|n| self.text(n).to_string())
                .unwrap_or_else(|| self.text(name_node).to_string())
        } else {
            self.text(name_node).to_string()
        };

        let qualified_name = self.qualify(&simple_name);
        let body = node.child_by_field_name("body");
        let is_definition = body.is_some();

        let base_kind = match node.kind() {
            "struct_specifier" => SymbolKind::Struct,
            "union_specifier" => SymbolKind::Union,
            "enum_specifier" => SymbolKind::Enum,
            _ => SymbolKind::Class,
        };
        let (kind, template_kind) = match (template, is_specialization) {
            (Some(params), true) if !params.is_empty() => (
                SymbolKind::PartialSpecialization,
                Some(TemplateKind::PartialSpecialization),
            ),
            (_, true) => (
                SymbolKind::PartialSpecialization,
                Some(TemplateKind::FullSpecialization),
            ),
            (Some(_), false) => (SymbolKind::ClassTemplate, Some(TemplateKind::ClassTemplate)),
            (None, false) => (base_kind, None),
        };

        let usr = if is_specialization {
            format!("c:@T@{}{}", qualified_name, self.text(name_node))
        } else {
            format!("c:@T@{qualified_name}")
        };

        let line = name_node.start_position().row as u32 + 1;
        let mut symbol = Symbol::new(
            usr.clone(),
            simple_name.clone(),
            qualified_name.clone(),
            kind,
            self.file.clone(),
            line,
        );
        symbol.namespace = self.current_namespace();
        symbol.column = name_node.start_position().column as u32 + 1;
        symbol.start_line = Some(node.start_position().row as u32 + 1);
        symbol.end_line = Some(node.end_position().row as u32 + 1);
        symbol.is_definition = is_definition;
        symbol.access = access;
        symbol.base_classes = self.base_classes(node);
        symbol.template_kind = template_kind;
        symbol.template_parameters = template.map(<[_]>::to_vec).unwrap_or_default();
        if is_specialization {
            symbol.primary_template_usr = Some(format!("c:@T@{qualified_name}"));
        }
        if let Some(class) = self.class_stack.last() {
            symbol.parent_class = class.qualified_name.clone();
        }
        let (brief, doc) = self.doc_comment(doc_anchor);
        symbol.brief = brief;
        symbol.doc_comment = doc;
        symbol.signature = format!("{} {}", node.kind().replace("_specifier", ""), qualified_name);
        self.out.symbols.push(symbol);

        let Some(body) = body else {
            return;
        };

        // Enum bodies declare no members we track.
        if node.kind() == "enum_specifier" {
            return;
        }

        self.class_stack.push(ClassContext {
            qualified_name,
            simple_name,
        });
        let mut current_access = if node.kind() == "class_specifier" {
            Access::Private
        } else {
            Access::Public
        };
        for child in body.children(&mut body.walk()) {
            if child.kind() == "access_specifier" {
                if let Some(acc) = Access::from_str_opt(self.text(child).trim_end_matches(':').trim())
                {
                    current_access = acc;
                }
                continue;
            }
            match child.kind() {
                "field_declaration" => {
                    if find_function_declarator(child).is_some() {
                        self.handle_function(child, child, None, current_access, false);
                    }
                }
                "function_definition" => {
                    self.handle_function(child, child, None, current_access, true);
                }
                "template_declaration"
                | "class_specifier"
                | "struct_specifier"
                | "union_specifier"
                | "enum_specifier"
                | "alias_declaration"
                | "type_definition"
                | "declaration" => {
                    self.walk(child, None, current_access);
                }
                _ => {}
            }
        }
        self.class_stack.pop();
    }

    fn base_classes(&self, class_node: Node) -> Vec<String> {
        let Some(clause) = class_node
            .children(&mut class_node.walk())
            .find(|c| c.kind() == "base_class_clause")
        else {
            return Vec::new();
        };

        clause
            .children(&mut clause.walk())
            .filter(|c| {
                matches!(
                    c.kind(),
                    "type_identifier" | "qualified_identifier" | "template_type"
                )
            })
            .map(|c| self.text(c).to_string())
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_function(
        &mut self,
        node: Node,
        doc_anchor: Node,
        template: Option<&[TemplateParameter]>,
        access: Access,
        is_definition: bool,
    ) {
        let Some(declarator) = find_function_declarator(node) else {
            return;
        };
        let Some(name_node) = declarator.child_by_field_name("declarator") else {
            return;
        };

        let raw_name = self.text(name_node).to_string();
        // operator overloads and obviously non-name declarators are skipped
        if raw_name.is_empty() || raw_name.starts_with("operator") {
            return;
        }

        let (scope, simple_name) = match raw_name.rfind("::") {
            Some(pos) => (
                Some(raw_name[..pos].to_string()),
                raw_name[pos + 2..].to_string(),
            ),
            None => (None, raw_name.clone()),
        };

        let (qualified_name, parent_class) = match (&scope, self.class_stack.last()) {
            // In-class declaration: qualify with the enclosing class.
            (None, Some(class)) => (
                format!("{}::{}", class.qualified_name, simple_name),
                class.qualified_name.clone(),
            ),
            // Out-of-class definition with explicit scope: `Foo::bar`.
            (Some(scope), _) => {
                let ns = self.current_namespace();
                let full_scope = if ns.is_empty() {
                    scope.clone()
                } else {
                    format!("{ns}::{scope}")
                };
                (format!("{full_scope}::{simple_name}"), full_scope)
            }
            (None, None) => (self.qualify(&simple_name), String::new()),
        };

        let in_class = !parent_class.is_empty();
        let parent_simple = parent_class.rsplit("::").next().unwrap_or("");
        let enclosing_simple = self
            .class_stack
            .last()
            .map(|c| c.simple_name.as_str())
            .unwrap_or(parent_simple);

        let kind = if simple_name.starts_with('~') {
            SymbolKind::Destructor
        } else if in_class && (simple_name == enclosing_simple || simple_name == parent_simple) {
            SymbolKind::Constructor
        } else if in_class {
            SymbolKind::Method
        } else if template.is_some() {
            SymbolKind::FunctionTemplate
        } else {
            SymbolKind::Function
        };

        let params_text = declarator
            .child_by_field_name("parameters")
            .map(|p| self.text(p).to_string())
            .unwrap_or_else(|| "()".to_string());
        let return_type = node
            .child_by_field_name("type")
            .map(|t| self.text(t).to_string())
            .unwrap_or_default();

        // Qualifier flags from the declaration text: grammar-proof. `virtual`
        // and `static` live before the declarator, `const` trails the
        // parameter list inside it, and `= 0` follows the declarator (reading
        // only that region avoids confusing a default argument for a pure
        // virtual marker).
        let node_start = node.start_byte();
        let head = &self.source[node_start..declarator.start_byte()];
        let declarator_text = self.text(declarator);
        let quals = declarator_text.rsplit(')').next().unwrap_or("");
        let after_declarator = &self.source[declarator.end_byte()..node.end_byte()];
        let is_virtual = has_token(head, "virtual");
        let is_static = has_token(head, "static");
        let is_const = has_token(quals, "const");
        let is_pure_virtual = node.kind() != "function_definition"
            && after_declarator.replace([' ', '\t'], "").starts_with("=0");

        let normalized_params: String = params_text.split_whitespace().collect::<String>();
        let usr = if is_const {
            format!("c:@F@{qualified_name}#{normalized_params}#const")
        } else {
            format!("c:@F@{qualified_name}#{normalized_params}")
        };

        let mut signature = String::new();
        if is_virtual {
            signature.push_str("virtual ");
        }
        if is_static {
            signature.push_str("static ");
        }
        if !return_type.is_empty() {
            signature.push_str(&return_type);
            signature.push(' ');
        }
        signature.push_str(&qualified_name);
        signature.push_str(&params_text);
        if is_const {
            signature.push_str(" const");
        }
        if is_pure_virtual {
            signature.push_str(" = 0");
        }

        let line = name_node.start_position().row as u32 + 1;
        let mut symbol = Symbol::new(
            usr.clone(),
            simple_name,
            qualified_name,
            kind,
            self.file.clone(),
            line,
        );
        symbol.namespace = self.current_namespace();
        symbol.column = name_node.start_position().column as u32 + 1;
        symbol.start_line = Some(node.start_position().row as u32 + 1);
        symbol.end_line = Some(node.end_position().row as u32 + 1);
        symbol.is_definition = is_definition;
        symbol.access = access;
        symbol.parent_class = parent_class;
        symbol.signature = signature;
        symbol.is_virtual = is_virtual || is_pure_virtual;
        symbol.is_pure_virtual = is_pure_virtual;
        symbol.is_const = is_const;
        symbol.is_static = is_static;
        if kind == SymbolKind::FunctionTemplate {
            symbol.template_kind = Some(TemplateKind::FunctionTemplate);
        }
        symbol.template_parameters = template.map(<[_]>::to_vec).unwrap_or_default();
        let (brief, doc) = self.doc_comment(doc_anchor);
        symbol.brief = brief;
        symbol.doc_comment = doc;
        self.out.symbols.push(symbol);

        if let Some(body) = node.child_by_field_name("body") {
            self.collect_calls(body, &usr);
        }
    }

    fn handle_alias(&mut self, node: Node) {
        let (name_node, canonical) = match node.kind() {
            "alias_declaration" => {
                let Some(name) = node.child_by_field_name("name") else {
                    return;
                };
                let canonical = node
                    .child_by_field_name("type")
                    .map(|t| self.text(t).to_string())
                    .unwrap_or_default();
                (name, canonical)
            }
            _ => {
                // typedef TYPE NAME;
                let Some(declarator) = node.child_by_field_name("declarator") else {
                    return;
                };
                let canonical = node
                    .child_by_field_name("type")
                    .map(|t| self.text(t).to_string())
                    .unwrap_or_default();
                (declarator, canonical)
            }
        };

        let alias_name = self.text(name_node).to_string();
        let alias_qualified_name = self.qualify(&alias_name);
        let line = name_node.start_position().row as u32 + 1;

        self.out.type_aliases.push(TypeAlias {
            alias_name: alias_name.clone(),
            alias_qualified_name: alias_qualified_name.clone(),
            canonical_type: canonical.trim().to_string(),
            file: self.file.clone(),
            line,
        });

        let mut symbol = Symbol::new(
            format!("c:@A@{alias_qualified_name}"),
            alias_name,
            alias_qualified_name,
            SymbolKind::TypeAlias,
            self.file.clone(),
            line,
        );
        symbol.column = name_node.start_position().column as u32 + 1;
        symbol.start_line = Some(node.start_position().row as u32 + 1);
        symbol.end_line = Some(node.end_position().row as u32 + 1);
        symbol.is_definition = true;
        self.out.symbols.push(symbol);
    }

    fn handle_include(&mut self, node: Node) {
        if let Some(path_node) = node.child_by_field_name("path") {
            let raw = self.text(path_node);
            let cleaned = raw
                .trim_matches(|c| c == '"' || c == '<' || c == '>')
                .to_string();
            if !cleaned.is_empty() {
                self.out.includes.push(cleaned);
            }
        }
    }

    fn collect_calls(&mut self, node: Node, caller_usr: &str) {
        if node.kind() == "call_expression" {
            if let Some(function) = node.child_by_field_name("function") {
                let callee_name = match function.kind() {
                    "identifier" | "qualified_identifier" => self.text(function).to_string(),
                    "field_expression" => function
                        .child_by_field_name("field")
                        .map(|f| self.text(f).to_string())
                        .unwrap_or_default(),
                    "template_function" => function
                        .child_by_field_name("name")
                        .map(|n| self.text(n).to_string())
                        .unwrap_or_default(),
                    _ => String::new(),
                };
                if !callee_name.is_empty() {
                    self.out.call_sites.push(CallSite {
                        caller_usr: caller_usr.to_string(),
                        callee_usr: String::new(),
                        callee_name,
                        file: self.file.clone(),
                        line: function.start_position().row as u32 + 1,
                        column: function.start_position().column as u32 + 1,
                    });
                }
            }
        }

        for child in node.children(&mut node.walk()) {
            self.collect_calls(child, caller_usr);
        }
    }

    /// Contiguous run of comment lines directly above `node`, cleaned of
    /// Doxygen markers. Returns (brief, full doc).
    fn doc_comment(&self, node: Node) -> (Option<String>, Option<String>) {
        let mut comments: Vec<Node> = Vec::new();
        let mut expected_row = node.start_position().row;
        let mut cursor = node.prev_sibling();
        while let Some(sibling) = cursor {
            if sibling.kind() != "comment" {
                break;
            }
            let end_row = sibling.end_position().row;
            if end_row + 1 < expected_row {
                break; // blank line detaches the comment
            }
            expected_row = sibling.start_position().row;
            comments.push(sibling);
            cursor = sibling.prev_sibling();
        }
        if comments.is_empty() {
            return (None, None);
        }
        comments.reverse();

        let raw: String = comments
            .iter()
            .map(|c| self.text(*c))
            .collect::<Vec<_>>()
            .join("\n");

        // Only documentation-style comments count.
        let trimmed = raw.trim_start();
        if !(trimmed.starts_with("///")
            || trimmed.starts_with("//!")
            || trimmed.starts_with("/**")
            || trimmed.starts_with("/*!"))
        {
            return (None, None);
        }

        let cleaned = clean_doc_comment(&raw);
        if cleaned.is_empty() {
            return (None, None);
        }
        let brief = cleaned.lines().find(|l| !l.trim().is_empty()).map(|l| l.trim().to_string());
        let mut doc = cleaned;
        if doc.len() > 4000 {
            doc.truncate(4000);
        }
        (brief, Some(doc))
    }
}

/// Descend through declarator wrappers (`pointer_declarator`,
/// `reference_declarator`, ...) to the function_declarator, if any.
fn find_function_declarator(node: Node) -> Option<Node> {
    if node.kind() == "function_declarator" {
        return Some(node);
    }
    let declarator = node.child_by_field_name("declarator")?;
    find_function_declarator(declarator)
}

/// Whole-word token search, so `virtual` does not match `my_virtual_thing`.
fn has_token(haystack: &str, token: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .any(|word| word == token)
}

fn clean_doc_comment(raw: &str) -> String {
    let mut out = String::new();
    for line in raw.lines() {
        let mut line = line.trim();
        for prefix in ["///<", "///", "//!", "/**", "/*!", "/*", "//"] {
            if let Some(rest) = line.strip_prefix(prefix) {
                line = rest;
                break;
            }
        }
        line = line.strip_suffix("*/").unwrap_or(line);
        let line = line.trim_start_matches('*').trim();
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}
