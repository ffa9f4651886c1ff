//! Call-graph queries: callers, callees, call sites, call paths
//!
//! Edges come from the `call_sites` table. Callees recorded only by name are
//! resolved against the symbol store at query time, preferring definitions.
//! The call-path search walks the calls relation breadth-first and collects
//! every simple path up to `max_depth`, with a cap on the number of paths so
//! a recursive mess cannot blow up the response.

use crate::error::StorageResult;
use crate::relations::CallSite;
use crate::storage::SymbolStore;
use crate::symbol::Symbol;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

const MAX_PATHS: usize = 20;
pub const DEFAULT_CALL_PATH_DEPTH: usize = 10;

fn site_json(site: &CallSite) -> Value {
    json!({
        "caller": site.caller_usr,
        "callee": if site.callee_usr.is_empty() { &site.callee_name } else { &site.callee_usr },
        "file": site.file,
        "line": site.line,
        "column": site.column,
    })
}

fn function_json(symbol: &Symbol) -> Value {
    json!({
        "name": symbol.name,
        "qualified_name": symbol.qualified_name,
        "kind": symbol.kind.as_str(),
        "parent_class": symbol.parent_class,
        "file": symbol.file,
        "line": symbol.line,
        "signature": symbol.signature,
        "is_project": symbol.is_project,
    })
}

/// Resolves function names and answers call-graph queries against a store.
pub struct CallGraph<'a> {
    store: &'a dyn SymbolStore,
}

impl<'a> CallGraph<'a> {
    pub fn new(store: &'a dyn SymbolStore) -> Self {
        Self { store }
    }

    /// All function-like symbols matching a simple or qualified name,
    /// optionally restricted to methods of `class_name`.
    pub fn resolve_functions(
        &self,
        name: &str,
        class_name: Option<&str>,
    ) -> StorageResult<Vec<Symbol>> {
        let simple = name.rsplit("::").next().unwrap_or(name);
        let mut candidates: Vec<Symbol> = self
            .store
            .load_symbols_by_name(simple)?
            .into_iter()
            .filter(|s| s.kind.is_function_like())
            .collect();

        if name.contains("::") {
            candidates.retain(|s| {
                crate::query::pattern::qualified_suffix_matches(name, &s.qualified_name)
            });
        }
        if let Some(class_name) = class_name {
            candidates.retain(|s| {
                crate::query::filters::parent_class_matches(&s.parent_class, class_name)
            });
        }
        Ok(candidates)
    }

    /// Call sites whose callee matches any of the target symbols, by USR,
    /// simple name, or qualified name.
    fn sites_calling(&self, targets: &[Symbol], name: &str) -> StorageResult<Vec<CallSite>> {
        let mut keys: HashSet<String> = HashSet::new();
        let simple = name.rsplit("::").next().unwrap_or(name);
        keys.insert(simple.to_string());
        keys.insert(name.to_string());
        for target in targets {
            keys.insert(target.usr.clone());
            keys.insert(target.qualified_name.clone());
        }

        let mut seen: HashSet<(String, u32, u32, String)> = HashSet::new();
        let mut out = Vec::new();
        for key in keys {
            for site in self.store.call_sites_by_callee(&key)? {
                let dedup_key = (
                    site.file.clone(),
                    site.line,
                    site.column,
                    site.caller_usr.clone(),
                );
                if seen.insert(dedup_key) {
                    out.push(site);
                }
            }
        }
        out.sort_by(|a, b| (&a.file, a.line, a.column).cmp(&(&b.file, b.line, b.column)));
        Ok(out)
    }

    /// Who calls `name`: distinct callers plus the exact call locations.
    pub fn find_callers(&self, name: &str, class_name: Option<&str>) -> StorageResult<Value> {
        let targets = self.resolve_functions(name, class_name)?;
        let sites = self.sites_calling(&targets, name)?;

        let mut callers: Vec<Value> = Vec::new();
        let mut seen_callers: HashSet<String> = HashSet::new();
        for site in &sites {
            if !seen_callers.insert(site.caller_usr.clone()) {
                continue;
            }
            match self.store.load_symbol_by_usr(&site.caller_usr)? {
                Some(symbol) => callers.push(function_json(&symbol)),
                None => callers.push(json!({ "usr": site.caller_usr })),
            }
        }

        Ok(json!({
            "function": name,
            "callers": callers,
            "call_sites": sites.iter().map(site_json).collect::<Vec<_>>(),
        }))
    }

    /// Definition sites of everything `name` calls.
    pub fn find_callees(&self, name: &str, class_name: Option<&str>) -> StorageResult<Value> {
        let callers = self.resolve_functions(name, class_name)?;
        let mut callees: Vec<Value> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for caller in &callers {
            for site in self.store.call_sites_by_caller(&caller.usr)? {
                let Some(resolved) = self.resolve_callee(&site)? else {
                    if seen.insert(site.callee_name.clone()) {
                        callees.push(json!({
                            "name": site.callee_name,
                            "is_unresolved": true,
                        }));
                    }
                    continue;
                };
                if seen.insert(resolved.usr.clone()) {
                    callees.push(function_json(&resolved));
                }
            }
        }

        Ok(json!({ "function": name, "callees": callees }))
    }

    /// Call locations inside `name`'s body.
    pub fn call_sites(&self, name: &str, class_name: Option<&str>) -> StorageResult<Value> {
        let callers = self.resolve_functions(name, class_name)?;
        let mut sites: Vec<CallSite> = Vec::new();
        for caller in &callers {
            sites.extend(self.store.call_sites_by_caller(&caller.usr)?);
        }
        sites.sort_by(|a, b| (&a.file, a.line, a.column).cmp(&(&b.file, b.line, b.column)));

        Ok(json!({
            "function": name,
            "call_sites": sites
                .iter()
                .map(|s| json!({
                    "callee": s.callee_name,
                    "file": s.file,
                    "line": s.line,
                    "column": s.column,
                }))
                .collect::<Vec<_>>(),
        }))
    }

    /// Prefer a definition; fall back to any matching function symbol.
    fn resolve_callee(&self, site: &CallSite) -> StorageResult<Option<Symbol>> {
        if !site.callee_usr.is_empty() {
            if let Some(symbol) = self.store.load_symbol_by_usr(&site.callee_usr)? {
                return Ok(Some(symbol));
            }
        }
        let simple = site.callee_name.rsplit("::").next().unwrap_or(&site.callee_name);
        let mut candidates: Vec<Symbol> = self
            .store
            .load_symbols_by_name(simple)?
            .into_iter()
            .filter(|s| s.kind.is_function_like())
            .collect();
        if site.callee_name.contains("::") {
            candidates.retain(|s| {
                crate::query::pattern::qualified_suffix_matches(
                    &site.callee_name,
                    &s.qualified_name,
                )
            });
        }
        candidates.sort_by_key(|s| std::cmp::Reverse(s.is_definition));
        Ok(candidates.into_iter().next())
    }

    /// All simple call paths from `from` to `to`, bounded by depth and path
    /// count. Returns an empty list when the functions are unconnected.
    pub fn call_path(&self, from: &str, to: &str, max_depth: usize) -> StorageResult<Value> {
        let from_symbols = self.resolve_functions(from, None)?;
        let to_symbols = self.resolve_functions(to, None)?;
        if from_symbols.is_empty() || to_symbols.is_empty() {
            return Ok(json!({ "from": from, "to": to, "paths": [] }));
        }

        // Build the adjacency once: caller USR -> resolved callee USRs.
        let all_sites = self.store.load_all_call_sites()?;
        let mut usr_by_name: HashMap<String, Vec<Symbol>> = HashMap::new();
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        for site in &all_sites {
            let callee_usr = if site.callee_usr.is_empty() {
                let simple = site.callee_name.rsplit("::").next().unwrap_or("");
                let candidates = match usr_by_name.get(simple) {
                    Some(hit) => hit.clone(),
                    None => {
                        let loaded: Vec<Symbol> = self
                            .store
                            .load_symbols_by_name(simple)?
                            .into_iter()
                            .filter(|s| s.kind.is_function_like())
                            .collect();
                        usr_by_name.insert(simple.to_string(), loaded.clone());
                        loaded
                    }
                };
                candidates.first().map(|s| s.usr.clone())
            } else {
                Some(site.callee_usr.clone())
            };
            if let Some(callee_usr) = callee_usr {
                adjacency
                    .entry(site.caller_usr.clone())
                    .or_default()
                    .push(callee_usr);
            }
        }
        for callees in adjacency.values_mut() {
            callees.sort();
            callees.dedup();
        }

        let display: HashMap<String, String> = {
            let mut map = HashMap::new();
            for symbol in from_symbols.iter().chain(&to_symbols) {
                map.insert(symbol.usr.clone(), symbol.qualified_name.clone());
            }
            map
        };
        let targets: HashSet<&str> = to_symbols.iter().map(|s| s.usr.as_str()).collect();

        let mut paths: Vec<Vec<String>> = Vec::new();
        for start in &from_symbols {
            let mut current = vec![start.usr.clone()];
            self.dfs_paths(
                &adjacency,
                &targets,
                max_depth,
                &mut current,
                &mut paths,
            )?;
            if paths.len() >= MAX_PATHS {
                break;
            }
        }

        // Render USR paths as qualified names.
        let mut rendered = Vec::new();
        for path in &paths {
            let mut names = Vec::new();
            for usr in path {
                let name = match display.get(usr) {
                    Some(name) => name.clone(),
                    None => self
                        .store
                        .load_symbol_by_usr(usr)?
                        .map(|s| s.qualified_name)
                        .unwrap_or_else(|| usr.clone()),
                };
                names.push(name);
            }
            rendered.push(json!(names));
        }

        Ok(json!({ "from": from, "to": to, "paths": rendered }))
    }

    fn dfs_paths(
        &self,
        adjacency: &HashMap<String, Vec<String>>,
        targets: &HashSet<&str>,
        max_depth: usize,
        current: &mut Vec<String>,
        paths: &mut Vec<Vec<String>>,
    ) -> StorageResult<()> {
        if paths.len() >= MAX_PATHS {
            return Ok(());
        }
        let last = current.last().cloned().unwrap_or_default();
        if targets.contains(last.as_str()) && current.len() > 1 {
            paths.push(current.clone());
            return Ok(());
        }
        if current.len() > max_depth {
            return Ok(());
        }

        let Some(next) = adjacency.get(&last) else {
            return Ok(());
        };
        for callee in next {
            if current.iter().any(|u| u == callee) {
                continue; // simple paths only
            }
            current.push(callee.clone());
            self.dfs_paths(adjacency, targets, max_depth, current, paths)?;
            current.pop();
        }
        Ok(())
    }
}
