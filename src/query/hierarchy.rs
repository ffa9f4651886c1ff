//! Inheritance hierarchy queries
//!
//! Builds an adjacency map over all class-like symbols once, then answers
//! closure queries with a bounded BFS in both directions (bases and
//! derived). Two subtleties are handled here:
//!
//! - A base entry that is the *name of a template parameter* is not a real
//!   edge. `template<class Base> class Adapter2 : public Base` does not make
//!   `Adapter2` derive from a concrete class that happens to be called
//!   `Base`.
//! - When a base is written `Template<Concrete>` and `Template` is known to
//!   inherit from its own template parameter, the derived class also
//!   (indirectly) derives from `Concrete`, so an extra edge is recorded.

use crate::symbol::{is_richer_definition, template_param_base_indices, Symbol};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Adjacency view over the class-like symbols of the index.
pub struct HierarchyGraph {
    /// Deduped class symbols keyed by qualified name
    classes: HashMap<String, Symbol>,
    /// Simple name -> qualified names
    by_simple: HashMap<String, Vec<String>>,
    /// Base qualified name (or unresolved base text) -> derived qualified names
    derived_by_base: HashMap<String, Vec<String>>,
    /// Qualified name -> resolved base keys (template-param bases excluded)
    bases_of: HashMap<String, Vec<String>>,
}

/// Strip template arguments: `Adapter<Base>` -> `Adapter`.
fn strip_template_args(type_name: &str) -> &str {
    match type_name.find('<') {
        Some(pos) => type_name[..pos].trim(),
        None => type_name.trim(),
    }
}

/// Template arguments at the top nesting level: `Map<K, V<X>>` -> [`K`, `V<X>`].
fn template_args(type_name: &str) -> Vec<String> {
    let Some(open) = type_name.find('<') else {
        return Vec::new();
    };
    let Some(close) = type_name.rfind('>') else {
        return Vec::new();
    };
    if close <= open {
        return Vec::new();
    }

    let inner = &type_name[open + 1..close];
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in inner.chars() {
        match ch {
            '<' => {
                depth += 1;
                current.push(ch);
            }
            '>' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        args.push(current.trim().to_string());
    }
    args.retain(|a| !a.is_empty());
    args
}

impl HierarchyGraph {
    /// Build the graph from all class-like symbols in the store.
    pub fn build(symbols: &[Symbol]) -> Self {
        // Dedup by qualified name: definitions beat declarations, richer
        // definitions beat stubs.
        let mut classes: HashMap<String, Symbol> = HashMap::new();
        for symbol in symbols.iter().filter(|s| s.kind.is_class_like()) {
            match classes.get_mut(&symbol.qualified_name) {
                None => {
                    classes.insert(symbol.qualified_name.clone(), symbol.clone());
                }
                Some(existing) => {
                    let replace = if symbol.is_definition && !existing.is_definition {
                        true
                    } else if symbol.is_definition == existing.is_definition {
                        is_richer_definition(symbol, existing)
                    } else {
                        false
                    };
                    if replace {
                        *existing = symbol.clone();
                    }
                }
            }
        }

        let mut by_simple: HashMap<String, Vec<String>> = HashMap::new();
        for (qualified, symbol) in &classes {
            by_simple
                .entry(symbol.name.clone())
                .or_default()
                .push(qualified.clone());
        }
        for list in by_simple.values_mut() {
            list.sort();
        }

        let mut graph = Self {
            classes,
            by_simple,
            derived_by_base: HashMap::new(),
            bases_of: HashMap::new(),
        };

        // Which templates inherit from one of their own parameters.
        let param_inheriting: HashSet<String> = graph
            .classes
            .values()
            .filter(|c| !template_param_base_indices(c).is_empty())
            .map(|c| c.qualified_name.clone())
            .collect();

        let class_list: Vec<Symbol> = graph.classes.values().cloned().collect();
        for class in &class_list {
            let param_bases: HashSet<usize> =
                template_param_base_indices(class).into_iter().collect();
            let mut resolved_bases = Vec::new();

            for (i, base) in class.base_classes.iter().enumerate() {
                if param_bases.contains(&i) {
                    continue; // not a real edge
                }

                let stripped = strip_template_args(base);
                let key = graph
                    .resolve(stripped, &class.namespace)
                    .unwrap_or_else(|| stripped.to_string());
                resolved_bases.push(key.clone());
                graph
                    .derived_by_base
                    .entry(key.clone())
                    .or_default()
                    .push(class.qualified_name.clone());

                // Indirection through param-inheriting templates:
                // `Derived : Template<Concrete>` where `Template<T> : T`
                // also makes Derived a descendant of Concrete.
                if base.contains('<') {
                    if let Some(template_qname) = graph.resolve(stripped, &class.namespace) {
                        if param_inheriting.contains(&template_qname) {
                            for arg in template_args(base) {
                                let arg_stripped = strip_template_args(&arg);
                                if let Some(arg_qname) =
                                    graph.resolve(arg_stripped, &class.namespace)
                                {
                                    graph
                                        .derived_by_base
                                        .entry(arg_qname)
                                        .or_default()
                                        .push(class.qualified_name.clone());
                                }
                            }
                        }
                    }
                }
            }

            resolved_bases.sort();
            resolved_bases.dedup();
            graph
                .bases_of
                .insert(class.qualified_name.clone(), resolved_bases);
        }

        for derived in graph.derived_by_base.values_mut() {
            derived.sort();
            derived.dedup();
        }

        graph
    }

    /// Resolve a type name to a known class: exact qualified match, then
    /// enclosing-namespace prefixes from innermost out, then a unique
    /// simple-name match.
    fn resolve(&self, type_name: &str, from_namespace: &str) -> Option<String> {
        if self.classes.contains_key(type_name) {
            return Some(type_name.to_string());
        }

        if !from_namespace.is_empty() {
            let parts: Vec<&str> = from_namespace.split("::").collect();
            for end in (1..=parts.len()).rev() {
                let candidate = format!("{}::{type_name}", parts[..end].join("::"));
                if self.classes.contains_key(&candidate) {
                    return Some(candidate);
                }
            }
        }

        let simple = type_name.rsplit("::").next().unwrap_or(type_name);
        match self.by_simple.get(simple) {
            Some(qualified) if qualified.len() == 1 => Some(qualified[0].clone()),
            _ => None,
        }
    }

    /// Resolve the queried class name (qualified, suffix, or simple).
    pub fn resolve_query(&self, class_name: &str) -> Option<String> {
        if let Some(found) = self.resolve(class_name, "") {
            return Some(found);
        }
        // Suffix match as a convenience for partially qualified input.
        let mut candidates: Vec<&String> = self
            .classes
            .keys()
            .filter(|q| crate::query::pattern::qualified_suffix_matches(class_name, q))
            .collect();
        candidates.sort();
        candidates.first().map(|q| (*q).to_string())
    }

    /// Direct (one-level) derived classes of a qualified name.
    pub fn direct_derived(&self, qualified_name: &str) -> Vec<&Symbol> {
        self.derived_by_base
            .get(qualified_name)
            .map(|derived| {
                derived
                    .iter()
                    .filter_map(|q| self.classes.get(q))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn class(&self, qualified_name: &str) -> Option<&Symbol> {
        self.classes.get(qualified_name)
    }

    /// BFS closure in both directions, capped at `max_nodes` nodes and
    /// optionally `max_depth` levels. Returns the flat adjacency result.
    pub fn closure(
        &self,
        class_name: &str,
        max_nodes: usize,
        max_depth: Option<usize>,
    ) -> Value {
        let Some(start) = self.resolve_query(class_name) else {
            return json!({ "error": format!("Class '{class_name}' not found") });
        };

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        let mut truncated = false;

        visited.insert(start.clone());
        queue.push_back((start.clone(), 0));

        while let Some((current, depth)) = queue.pop_front() {
            if max_depth.is_some_and(|max| depth >= max) {
                continue;
            }

            let empty = Vec::new();
            let bases = self.bases_of.get(&current).unwrap_or(&empty);
            let derived = self.derived_by_base.get(&current).unwrap_or(&empty);
            for neighbor in bases.iter().chain(derived) {
                if visited.contains(neighbor) {
                    continue;
                }
                if visited.len() >= max_nodes {
                    truncated = true;
                    break;
                }
                visited.insert(neighbor.clone());
                queue.push_back((neighbor.clone(), depth + 1));
            }
            if truncated {
                break;
            }
        }

        let mut nodes = BTreeMap::new();
        for qualified in &visited {
            let derived_in_view: Vec<&String> = self
                .derived_by_base
                .get(qualified)
                .map(|d| d.iter().filter(|q| visited.contains(*q)).collect())
                .unwrap_or_default();

            let entry = match self.classes.get(qualified) {
                Some(class) => {
                    let bases: Vec<&String> = self
                        .bases_of
                        .get(qualified)
                        .map(|b| b.iter().collect())
                        .unwrap_or_default();
                    json!({
                        "name": class.name,
                        "qualified_name": class.qualified_name,
                        "kind": class.kind.as_str(),
                        "is_project": class.is_project,
                        "base_classes": bases,
                        "derived_classes": derived_in_view,
                    })
                }
                None => {
                    // External or template-dependent type we could not
                    // resolve to an indexed class.
                    let simple = qualified.rsplit("::").next().unwrap_or(qualified);
                    json!({
                        "name": simple,
                        "qualified_name": qualified,
                        "kind": "unknown",
                        "is_project": false,
                        "is_unresolved": true,
                        "base_classes": [],
                        "derived_classes": derived_in_view,
                    })
                }
            };
            nodes.insert(qualified.clone(), entry);
        }

        let mut result = json!({
            "queried_class": start,
            "classes": nodes,
        });
        if truncated {
            result["truncated"] = json!(true);
            result["nodes_returned"] = json!(visited.len());
        }
        result
    }
}
