//! Query engine
//!
//! All queries read through the storage orchestrator. Simple-name lookups
//! are memoized in a read-through cache keyed by lowercased name, and the
//! hierarchy adjacency graph is built once per index generation; both are
//! dropped by [`QueryEngine::invalidate`] after indexing or refresh.

use crate::error::StorageResult;
use crate::query::calls::CallGraph;
use crate::query::fallback::{NameIndex, SmartFallback};
use crate::query::filters::SearchFilters;
use crate::query::hierarchy::HierarchyGraph;
use crate::query::pattern::{self, PatternMode};
use crate::storage::{CacheOrchestrator, SymbolStore};
use crate::symbol::{Symbol, SymbolKind};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct QueryEngine {
    store: Arc<CacheOrchestrator>,
    /// Read-through cache: lowercased simple name -> symbols
    name_cache: DashMap<String, Arc<Vec<Symbol>>>,
    /// Built lazily from all class-like symbols; dropped on invalidate
    hierarchy_cache: RwLock<Option<Arc<HierarchyGraph>>>,
}

/// Full JSON projection of a symbol, as documented on the search tools.
pub fn symbol_json(symbol: &Symbol) -> Value {
    json!({
        "name": symbol.name,
        "qualified_name": symbol.qualified_name,
        "namespace": symbol.namespace,
        "kind": symbol.kind.as_str(),
        "file": symbol.file,
        "line": symbol.line,
        "column": symbol.column,
        "start_line": symbol.start_line,
        "end_line": symbol.end_line,
        "header_file": symbol.header_file,
        "header_line": symbol.header_line,
        "header_start_line": symbol.header_start_line,
        "header_end_line": symbol.header_end_line,
        "signature": symbol.signature,
        "access": symbol.access.as_str(),
        "parent_class": symbol.parent_class,
        "base_classes": symbol.base_classes,
        "is_project": symbol.is_project,
        "is_definition": symbol.is_definition,
        "is_virtual": symbol.is_virtual,
        "is_pure_virtual": symbol.is_pure_virtual,
        "is_const": symbol.is_const,
        "is_static": symbol.is_static,
        "template_kind": symbol.template_kind.map(|k| k.as_str()),
        "template_parameters": symbol.template_parameters,
        "specialization_of": symbol.primary_template_usr,
        "brief": symbol.brief,
        "doc_comment": symbol.doc_comment,
    })
}

/// Paged search output: the returned page plus the pre-cap match count.
pub struct SearchOutcome {
    pub items: Vec<Value>,
    pub total_matches: usize,
}

impl QueryEngine {
    pub fn new(store: Arc<CacheOrchestrator>) -> Self {
        Self {
            store,
            name_cache: DashMap::new(),
            hierarchy_cache: RwLock::new(None),
        }
    }

    /// Drop derived in-memory views; call after indexing or refresh.
    pub fn invalidate(&self) {
        self.name_cache.clear();
        *self.hierarchy_cache.write() = None;
    }

    /// Read-through simple-name lookup, case-insensitive.
    fn by_name(&self, name: &str) -> StorageResult<Arc<Vec<Symbol>>> {
        let key = name.to_lowercase();
        if let Some(cached) = self.name_cache.get(&key) {
            return Ok(Arc::clone(&cached));
        }

        let mut symbols = self.store.load_symbols_by_name(name)?;
        if symbols.is_empty() {
            // Exact lookup is case-sensitive; FTS is not. Quote the term so
            // FTS syntax characters in names cannot break the query.
            let fts_hits = self
                .store
                .search_fts(&format!("\"{name}\""), None, false)?;
            symbols = fts_hits
                .into_iter()
                .filter(|s| s.name.eq_ignore_ascii_case(name))
                .collect();
        }

        let arc = Arc::new(symbols);
        self.name_cache.insert(key, Arc::clone(&arc));
        Ok(arc)
    }

    fn hierarchy_graph(&self) -> StorageResult<Arc<HierarchyGraph>> {
        if let Some(graph) = self.hierarchy_cache.read().as_ref() {
            return Ok(Arc::clone(graph));
        }
        let symbols = self.store.load_all_symbols()?;
        let graph = Arc::new(HierarchyGraph::build(&symbols));
        *self.hierarchy_cache.write() = Some(Arc::clone(&graph));
        Ok(graph)
    }

    /// Candidates for a pattern under its classified mode, before filters.
    fn candidates(&self, pattern: &str, filters: &SearchFilters) -> StorageResult<Vec<Symbol>> {
        // Empty pattern with a file filter enumerates the file.
        if pattern.is_empty() {
            if filters.file_name.is_some() {
                return self.store.load_all_symbols();
            }
            return Ok(Vec::new());
        }

        match pattern::classify(pattern) {
            PatternMode::Unqualified => Ok(self.by_name(pattern)?.as_ref().clone()),
            PatternMode::QualifiedSuffix => {
                let simple = pattern.rsplit("::").next().unwrap_or(pattern);
                let candidates = self.by_name(simple)?;
                Ok(candidates
                    .iter()
                    .filter(|s| pattern::qualified_suffix_matches(pattern, &s.qualified_name))
                    .cloned()
                    .collect())
            }
            PatternMode::ExactGlobal => {
                let wanted = &pattern[2..];
                let candidates = self.by_name(wanted)?;
                Ok(candidates
                    .iter()
                    .filter(|s| s.qualified_name.eq_ignore_ascii_case(wanted))
                    .cloned()
                    .collect())
            }
            PatternMode::Regex => self.store.search_regex(pattern, None, false),
        }
    }

    fn search(
        &self,
        pattern: &str,
        filters: &SearchFilters,
        kind_filter: impl Fn(SymbolKind) -> bool,
    ) -> StorageResult<SearchOutcome> {
        let mut matched: Vec<Symbol> = self
            .candidates(pattern, filters)?
            .into_iter()
            .filter(|s| kind_filter(s.kind))
            .filter(|s| filters.matches(s))
            .collect();
        matched.sort_by(|a, b| {
            (&a.qualified_name, &a.file, a.line).cmp(&(&b.qualified_name, &b.file, b.line))
        });

        let total_matches = matched.len();
        if let Some(max) = filters.max_results {
            matched.truncate(max);
        }

        Ok(SearchOutcome {
            items: matched.iter().map(symbol_json).collect(),
            total_matches,
        })
    }

    pub fn search_classes(
        &self,
        pattern: &str,
        filters: &SearchFilters,
    ) -> StorageResult<SearchOutcome> {
        self.search(pattern, filters, SymbolKind::is_class_like)
    }

    pub fn search_functions(
        &self,
        pattern: &str,
        filters: &SearchFilters,
    ) -> StorageResult<SearchOutcome> {
        self.search(pattern, filters, SymbolKind::is_function_like)
    }

    /// Both kinds at once: `{classes: [...], functions: [...]}`.
    pub fn search_symbols(
        &self,
        pattern: &str,
        filters: &SearchFilters,
    ) -> StorageResult<(Value, usize)> {
        let classes = self.search_classes(pattern, filters)?;
        let functions = self.search_functions(pattern, filters)?;
        let count = classes.items.len() + functions.items.len();
        Ok((
            json!({ "classes": classes.items, "functions": functions.items }),
            count,
        ))
    }

    /// Full class information, or the ambiguity envelope when a simple name
    /// matches classes in several namespaces.
    pub fn class_info(&self, class_name: &str) -> StorageResult<Value> {
        let filters = SearchFilters::default();
        let mut candidates: Vec<Symbol> = self
            .candidates(class_name, &filters)?
            .into_iter()
            .filter(|s| s.kind.is_class_like())
            .collect();

        // Collapse declarations of the same class.
        candidates.sort_by(|a, b| {
            (&a.qualified_name, std::cmp::Reverse(a.is_definition))
                .cmp(&(&b.qualified_name, std::cmp::Reverse(b.is_definition)))
        });
        candidates.dedup_by(|a, b| a.qualified_name == b.qualified_name);

        if candidates.is_empty() {
            return Ok(json!({ "error": format!("Class '{class_name}' not found") }));
        }
        if candidates.len() > 1 {
            let matches: Vec<Value> = candidates
                .iter()
                .map(|s| {
                    json!({
                        "name": s.name,
                        "qualified_name": s.qualified_name,
                        "namespace": s.namespace,
                        "kind": s.kind.as_str(),
                        "file": s.file,
                        "line": s.line,
                    })
                })
                .collect();
            return Ok(json!({
                "error": format!("Class name '{class_name}' is ambiguous"),
                "is_ambiguous": true,
                "matches": matches,
                "suggestion": "Use qualified name",
            }));
        }

        let class = &candidates[0];
        let mut methods: Vec<Symbol> = self
            .store
            .load_all_symbols()?
            .into_iter()
            .filter(|s| s.kind.is_function_like() && s.parent_class == class.qualified_name)
            .collect();
        methods.sort_by_key(|m| m.line);

        let graph = self.hierarchy_graph()?;
        let derived: Vec<Value> = graph
            .direct_derived(&class.qualified_name)
            .into_iter()
            .filter(|d| d.is_project)
            .map(|d| {
                json!({
                    "name": d.name,
                    "qualified_name": d.qualified_name,
                    "kind": d.kind.as_str(),
                    "file": d.file,
                    "line": d.line,
                })
            })
            .collect();

        let method_views: Vec<Value> = methods
            .iter()
            .map(|m| {
                json!({
                    "name": m.name,
                    "prototype": m.signature,
                    "access": m.access.as_str(),
                    "kind": m.kind.as_str(),
                    "file": m.file,
                    "line": m.line,
                    "is_virtual": m.is_virtual,
                    "is_pure_virtual": m.is_pure_virtual,
                    "is_const": m.is_const,
                    "is_static": m.is_static,
                    "is_definition": m.is_definition,
                    "template_kind": m.template_kind.map(|k| k.as_str()),
                    "brief": m.brief,
                    "doc_comment": m.doc_comment,
                })
            })
            .collect();

        Ok(json!({
            "name": class.name,
            "qualified_name": class.qualified_name,
            "namespace": class.namespace,
            "kind": class.kind.as_str(),
            "base_classes": class.base_classes,
            "derived_classes": derived,
            "methods": method_views,
            "is_project": class.is_project,
            "template_kind": class.template_kind.map(|k| k.as_str()),
            "location": {
                "file": class.file,
                "line": class.line,
                "start_line": class.start_line,
                "end_line": class.end_line,
                "header_file": class.header_file,
                "header_line": class.header_line,
            },
            "brief": class.brief,
            "doc_comment": class.doc_comment,
        }))
    }

    /// Formatted prototype strings for every overload of `name`.
    pub fn function_signatures(
        &self,
        name: &str,
        class_name: Option<&str>,
    ) -> StorageResult<Vec<String>> {
        let graph = CallGraph::new(self.store.as_ref());
        let mut functions = graph.resolve_functions(name, class_name)?;
        functions.sort_by(|a, b| {
            (&a.qualified_name, &a.file, a.line).cmp(&(&b.qualified_name, &b.file, b.line))
        });
        functions.dedup_by(|a, b| a.usr == b.usr);
        Ok(functions
            .into_iter()
            .map(|f| {
                if f.signature.is_empty() {
                    f.qualified_name
                } else {
                    f.signature
                }
            })
            .collect())
    }

    /// Inheritance closure; see [`HierarchyGraph::closure`].
    pub fn class_hierarchy(
        &self,
        class_name: &str,
        max_nodes: usize,
        max_depth: Option<usize>,
    ) -> StorageResult<Value> {
        Ok(self.hierarchy_graph()?.closure(class_name, max_nodes, max_depth))
    }

    /// Alias or canonical-type lookup over the type_aliases table.
    pub fn type_alias_info(&self, name: &str) -> StorageResult<Value> {
        let aliases = self.store.load_type_aliases()?;

        let alias_json = |a: &crate::relations::TypeAlias| {
            json!({
                "alias_name": a.alias_name,
                "alias_qualified_name": a.alias_qualified_name,
                "canonical_type": a.canonical_type,
                "file": a.file,
                "line": a.line,
            })
        };

        // Alias query: exact qualified match first, then simple name.
        let by_alias: Vec<&crate::relations::TypeAlias> = aliases
            .iter()
            .filter(|a| a.alias_qualified_name == name || a.alias_name == name)
            .collect();

        if by_alias.len() > 1
            && by_alias
                .iter()
                .map(|a| &a.alias_qualified_name)
                .collect::<BTreeSet<_>>()
                .len()
                > 1
            && !name.contains("::")
        {
            let matches: Vec<Value> = by_alias
                .iter()
                .map(|a| {
                    json!({
                        "name": a.alias_name,
                        "qualified_name": a.alias_qualified_name,
                        "file": a.file,
                        "line": a.line,
                    })
                })
                .collect();
            return Ok(json!({
                "error": format!("Alias name '{name}' is ambiguous"),
                "is_ambiguous": true,
                "matches": matches,
                "suggestion": "Use qualified name",
            }));
        }

        if let Some(found) = by_alias.first() {
            let siblings: Vec<Value> = aliases
                .iter()
                .filter(|a| a.canonical_type == found.canonical_type)
                .map(alias_json)
                .collect();
            return Ok(json!({
                "alias": found.alias_qualified_name,
                "canonical_type": found.canonical_type,
                "aliases": siblings,
            }));
        }

        // Canonical query: every alias pointing at this type.
        let pointing: Vec<Value> = aliases
            .iter()
            .filter(|a| a.canonical_type == name)
            .map(alias_json)
            .collect();
        if !pointing.is_empty() {
            return Ok(json!({
                "canonical_type": name,
                "aliases": pointing,
            }));
        }

        Ok(json!({}))
    }

    /// Every symbol in files matching `file_pattern` (glob supported),
    /// optionally narrowed by a name pattern.
    pub fn find_in_file(
        &self,
        file_pattern: &str,
        pattern: &str,
        max_results: Option<usize>,
    ) -> StorageResult<SearchOutcome> {
        let mut filters = SearchFilters::default();
        filters.file_name = Some(file_pattern.to_string());
        filters.max_results = max_results;
        self.search(pattern, &filters, |_| true)
    }

    /// Files that define or reference a symbol.
    pub fn files_containing_symbol(&self, name: &str) -> StorageResult<Value> {
        let symbols = self.by_name(name)?;
        let mut files: BTreeSet<String> = BTreeSet::new();
        let mut reference_count = 0usize;

        for symbol in symbols.iter() {
            files.insert(symbol.file.clone());
            if let Some(header) = &symbol.header_file {
                files.insert(header.clone());
            }
        }

        // Call sites referencing the symbol by name or qualified name.
        let mut keys: BTreeSet<String> = BTreeSet::new();
        keys.insert(name.to_string());
        for symbol in symbols.iter() {
            keys.insert(symbol.usr.clone());
            keys.insert(symbol.qualified_name.clone());
        }
        for key in keys {
            for site in self.store.call_sites_by_callee(&key)? {
                files.insert(site.file.clone());
                reference_count += 1;
            }
        }

        let kind = symbols.first().map(|s| s.kind.as_str());
        Ok(json!({
            "symbol": name,
            "kind": kind,
            "files": files.iter().collect::<Vec<_>>(),
            "reference_count": reference_count,
        }))
    }

    pub fn call_graph(&self) -> CallGraph<'_> {
        CallGraph::new(self.store.as_ref())
    }

    /// Smart-fallback analysis for an empty result. Builds the simple-name
    /// indexes from the store; only ever runs on the empty path.
    pub fn fallback_for(
        &self,
        pattern: &str,
        tool_name: &str,
        file_name_filter: Option<&str>,
    ) -> Option<Value> {
        let all = self.store.load_all_symbols().ok()?;

        let mut class_index = NameIndex::new();
        let mut function_index = NameIndex::new();
        for symbol in all {
            let target = if symbol.kind.is_class_like() {
                &mut class_index
            } else if symbol.kind.is_function_like() {
                &mut function_index
            } else {
                continue;
            };
            target.entry(symbol.name.clone()).or_default().push(symbol);
        }

        let merged: NameIndex;
        let primary: &NameIndex = match tool_name {
            "search_classes" => &class_index,
            "search_functions" => &function_index,
            _ => {
                merged = {
                    let mut m = class_index.clone();
                    for (name, symbols) in &function_index {
                        m.entry(name.clone()).or_default().extend(symbols.clone());
                    }
                    m
                };
                &merged
            }
        };

        let file_names: Vec<String> = self
            .store
            .load_all_file_metadata()
            .ok()?
            .into_iter()
            .map(|m| m.file_path)
            .collect();

        SmartFallback::analyze(
            pattern,
            primary,
            &function_index,
            &file_names,
            file_name_filter,
        )
        .map(|analysis| analysis.to_metadata())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::project::ProjectIdentity;
    use tempfile::TempDir;

    fn engine_with(symbols: Vec<Symbol>) -> (QueryEngine, TempDir, TempDir) {
        let cache = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.cache_root = cache.path().to_path_buf();
        let identity = ProjectIdentity::new(project.path(), None);
        let store = Arc::new(CacheOrchestrator::new(&identity, &settings).unwrap());
        store.save_symbols_batch(&symbols).unwrap();
        (QueryEngine::new(store), cache, project)
    }

    fn class(usr: &str, name: &str, qualified: &str, file: &str, line: u32) -> Symbol {
        let mut s = Symbol::new(usr, name, qualified, SymbolKind::Class, file, line);
        s.is_definition = true;
        s
    }

    fn method(usr: &str, name: &str, parent: &str, file: &str, line: u32) -> Symbol {
        let mut s = Symbol::new(
            usr,
            name,
            format!("{parent}::{name}"),
            SymbolKind::Method,
            file,
            line,
        );
        s.parent_class = parent.to_string();
        s.is_definition = true;
        s.signature = format!("void {parent}::{name}()");
        s
    }

    #[test]
    fn unqualified_search_finds_across_namespaces() {
        let (engine, _c, _p) = engine_with(vec![
            class("u1", "Handler", "app::Handler", "/p/a.h", 1),
            class("u2", "Handler", "net::Handler", "/p/b.h", 2),
            class("u3", "Widget", "Widget", "/p/w.h", 3),
        ]);
        let outcome = engine
            .search_classes("Handler", &SearchFilters::default())
            .unwrap();
        assert_eq!(outcome.items.len(), 2);
        assert_eq!(outcome.total_matches, 2);
    }

    #[test]
    fn qualified_suffix_search() {
        let (engine, _c, _p) = engine_with(vec![
            class("u1", "Handler", "app::ui::Handler", "/p/a.h", 1),
            class("u2", "Handler", "myui::Handler", "/p/b.h", 2),
        ]);
        let outcome = engine
            .search_classes("ui::Handler", &SearchFilters::default())
            .unwrap();
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0]["qualified_name"], "app::ui::Handler");
    }

    #[test]
    fn exact_global_search() {
        let (engine, _c, _p) = engine_with(vec![
            class("u1", "Handler", "Handler", "/p/a.h", 1),
            class("u2", "Handler", "app::Handler", "/p/b.h", 2),
        ]);
        let outcome = engine
            .search_classes("::Handler", &SearchFilters::default())
            .unwrap();
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0]["qualified_name"], "Handler");
    }

    #[test]
    fn regex_search_with_max_results() {
        let symbols: Vec<Symbol> = (0..5)
            .map(|i| {
                class(
                    &format!("u{i}"),
                    &format!("Widget{i}"),
                    &format!("Widget{i}"),
                    "/p/w.h",
                    i + 1,
                )
            })
            .collect();
        let (engine, _c, _p) = engine_with(symbols);

        let mut filters = SearchFilters::default();
        filters.max_results = Some(2);
        let outcome = engine.search_classes("Widget.*", &filters).unwrap();
        assert_eq!(outcome.items.len(), 2);
        assert_eq!(outcome.total_matches, 5);
    }

    #[test]
    fn empty_pattern_with_file_filter_enumerates_file() {
        let (engine, _c, _p) = engine_with(vec![
            class("u1", "A", "A", "/p/src/one.h", 1),
            class("u2", "B", "B", "/p/src/one.h", 5),
            class("u3", "C", "C", "/p/src/two.h", 1),
        ]);
        let outcome = engine.find_in_file("one.h", "", None).unwrap();
        assert_eq!(outcome.items.len(), 2);
    }

    #[test]
    fn search_symbols_returns_both_groups() {
        let (engine, _c, _p) = engine_with(vec![
            class("u1", "Thing", "Thing", "/p/a.h", 1),
            method("u2", "Thing", "Factory", "/p/a.h", 9),
        ]);
        let (value, count) = engine
            .search_symbols("Thing", &SearchFilters::default())
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(value["classes"].as_array().unwrap().len(), 1);
        assert_eq!(value["functions"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn class_info_ambiguity_envelope() {
        let (engine, _c, _p) = engine_with(vec![
            class("u1", "SomeClass", "ns1::SomeClass", "/p/a.h", 1),
            class("u2", "SomeClass", "ns2::SomeClass", "/p/b.h", 2),
        ]);
        let info = engine.class_info("SomeClass").unwrap();
        assert_eq!(info["is_ambiguous"], json!(true));
        assert_eq!(info["matches"].as_array().unwrap().len(), 2);
        assert_eq!(info["suggestion"], "Use qualified name");

        // Qualified lookup disambiguates.
        let qualified = engine.class_info("ns1::SomeClass").unwrap();
        assert_eq!(qualified["qualified_name"], "ns1::SomeClass");
    }

    #[test]
    fn class_info_lists_methods_sorted_and_derived() {
        let mut base = class("u1", "Base", "Base", "/p/base.h", 1);
        base.base_classes = vec![];
        let mut derived = class("u2", "Impl", "Impl", "/p/impl.h", 1);
        derived.base_classes = vec!["Base".into()];

        let (engine, _c, _p) = engine_with(vec![
            base,
            derived,
            method("m2", "second", "Base", "/p/base.h", 20),
            method("m1", "first", "Base", "/p/base.h", 10),
        ]);

        let info = engine.class_info("Base").unwrap();
        let methods = info["methods"].as_array().unwrap();
        assert_eq!(methods.len(), 2);
        assert_eq!(methods[0]["name"], "first");
        assert_eq!(methods[1]["name"], "second");

        let derived = info["derived_classes"].as_array().unwrap();
        assert_eq!(derived.len(), 1);
        assert_eq!(derived[0]["qualified_name"], "Impl");
    }

    #[test]
    fn class_info_prefers_definition_over_forward_declaration() {
        let mut forward = class("u1", "ConcreteWidget", "ConcreteWidget", "/p/w.h", 5);
        forward.is_definition = false;
        forward.start_line = Some(5);
        forward.end_line = Some(5);
        let mut definition = class("u1d", "ConcreteWidget", "ConcreteWidget", "/p/w.h", 10);
        definition.base_classes = vec!["BaseWidget".into()];
        definition.start_line = Some(10);
        definition.end_line = Some(13);

        let (engine, _c, _p) = engine_with(vec![forward, definition]);
        let info = engine.class_info("ConcreteWidget").unwrap();
        assert_eq!(info["base_classes"], json!(["BaseWidget"]));
        assert_eq!(info["location"]["start_line"], 10);
        assert_eq!(info["location"]["end_line"], 13);
    }

    #[test]
    fn function_signatures_cover_overloads() {
        let mut f1 = Symbol::new("f1", "run", "run", SymbolKind::Function, "/p/r.cpp", 1);
        f1.signature = "void run(int)".into();
        let mut f2 = Symbol::new("f2", "run", "run", SymbolKind::Function, "/p/r.cpp", 5);
        f2.signature = "void run(double)".into();

        let (engine, _c, _p) = engine_with(vec![f1, f2]);
        let signatures = engine.function_signatures("run", None).unwrap();
        assert_eq!(signatures.len(), 2);
        assert!(signatures.contains(&"void run(int)".to_string()));
    }

    #[test]
    fn type_alias_lookup_and_siblings() {
        let (engine, _c, _p) = engine_with(vec![]);
        let store = Arc::clone(&engine.store);
        store
            .replace_type_aliases(
                "/p/t.h",
                &[
                    crate::relations::TypeAlias {
                        alias_name: "Id".into(),
                        alias_qualified_name: "app::Id".into(),
                        canonical_type: "unsigned long".into(),
                        file: "/p/t.h".into(),
                        line: 3,
                    },
                    crate::relations::TypeAlias {
                        alias_name: "Key".into(),
                        alias_qualified_name: "app::Key".into(),
                        canonical_type: "unsigned long".into(),
                        file: "/p/t.h".into(),
                        line: 4,
                    },
                ],
            )
            .unwrap();

        let by_alias = engine.type_alias_info("Id").unwrap();
        assert_eq!(by_alias["canonical_type"], "unsigned long");
        assert_eq!(by_alias["aliases"].as_array().unwrap().len(), 2);

        let by_canonical = engine.type_alias_info("unsigned long").unwrap();
        assert_eq!(by_canonical["aliases"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn files_containing_symbol_includes_references() {
        let (engine, _c, _p) = engine_with(vec![class(
            "u1",
            "Handler",
            "Handler",
            "/p/handler.h",
            1,
        )]);
        engine
            .store
            .replace_call_sites(
                "/p/main.cpp",
                &[crate::relations::CallSite {
                    caller_usr: "f:main".into(),
                    callee_usr: String::new(),
                    callee_name: "Handler".into(),
                    file: "/p/main.cpp".into(),
                    line: 4,
                    column: 2,
                }],
            )
            .unwrap();

        let result = engine.files_containing_symbol("Handler").unwrap();
        let files = result["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(result["reference_count"], 1);
    }

    #[test]
    fn invalidate_drops_cached_names() {
        let (engine, _c, _p) = engine_with(vec![class("u1", "A", "A", "/p/a.h", 1)]);
        assert_eq!(engine.by_name("A").unwrap().len(), 1);

        engine
            .store
            .save_symbols_batch(&[class("u2", "A", "ns::A", "/p/b.h", 1)])
            .unwrap();
        // Stale until invalidated.
        assert_eq!(engine.by_name("A").unwrap().len(), 1);
        engine.invalidate();
        assert_eq!(engine.by_name("A").unwrap().len(), 2);
    }

    #[test]
    fn fallback_produces_metadata_on_empty() {
        let (engine, _c, _p) = engine_with(vec![class(
            "u1",
            "Handler",
            "app::Handler",
            "/p/h.h",
            1,
        )]);
        let fallback = engine
            .fallback_for("wrong::Handler", "search_classes", None)
            .unwrap();
        assert_eq!(fallback["reason"], "qualified_fallback");
    }
}
