//! End-to-end query behavior over a real indexed fixture project.

use cppscout::analyzer::CppAnalyzer;
use cppscout::parsing::CppParserFactory;
use cppscout::query::SearchFilters;
use cppscout::Settings;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn fixture_project() -> TempDir {
    let project = TempDir::new().unwrap();
    std::fs::write(project.path().join("handler.h"), "class Handler {};\n").unwrap();
    std::fs::write(
        project.path().join("ui.h"),
        "namespace app { namespace ui {\n\
         /// Top-level view widget.\n\
         class View {\n\
         public:\n\
             virtual void render() const = 0;\n\
             void resize(int w, int h);\n\
         };\n\
         } }\n\
         namespace legacy { namespace ui { class View {}; } }\n",
    )
    .unwrap();
    std::fs::write(
        project.path().join("core.cpp"),
        "void processData(int value) {}\n\
         void alpha() {\n\
             processData(1);\n\
         }\n",
    )
    .unwrap();
    std::fs::write(
        project.path().join("beta.cpp"),
        "void processData(int value);\n\
         void beta() { processData(2); }\n",
    )
    .unwrap();
    project
}

fn indexed(project: &Path, cache: &Path) -> CppAnalyzer {
    let mut settings = Settings::default();
    settings.cache_root = cache.to_path_buf();
    let core = CppAnalyzer::new(project, None, Arc::new(settings), Arc::new(CppParserFactory))
        .unwrap();
    core.ensure_indexed(false, None).unwrap();
    assert!(core.wait_for_indexing(None));
    core
}

#[test]
fn simple_class_search_returns_clean_envelope() {
    let project = fixture_project();
    let cache = TempDir::new().unwrap();
    let core = indexed(project.path(), cache.path());

    let result = core
        .search_classes("Handler", SearchFilters::project_only())
        .unwrap();
    let data = result["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["qualified_name"], "Handler");
    assert_eq!(data[0]["line"], 1);
    assert!(data[0]["file"].as_str().unwrap().ends_with("handler.h"));
    assert!(result.get("metadata").is_none(), "normal result stays silent");
}

#[test]
fn qualified_suffix_matches_both_namespaces() {
    let project = fixture_project();
    let cache = TempDir::new().unwrap();
    let core = indexed(project.path(), cache.path());

    let result = core
        .search_classes("ui::View", SearchFilters::project_only())
        .unwrap();
    let data = result["data"].as_array().unwrap();
    let qualified: Vec<&str> = data
        .iter()
        .map(|d| d["qualified_name"].as_str().unwrap())
        .collect();
    assert_eq!(qualified, vec!["app::ui::View", "legacy::ui::View"]);
}

#[test]
fn leading_double_colon_matches_global_scope_only() {
    let project = fixture_project();
    let cache = TempDir::new().unwrap();
    let core = indexed(project.path(), cache.path());

    let global = core
        .search_classes("::Handler", SearchFilters::project_only())
        .unwrap();
    assert_eq!(global["data"].as_array().unwrap().len(), 1);

    let nested = core
        .search_classes("::View", SearchFilters::project_only())
        .unwrap();
    assert!(nested["data"].as_array().unwrap().is_empty());
}

#[test]
fn method_search_with_signature_and_class_filters() {
    let project = fixture_project();
    let cache = TempDir::new().unwrap();
    let core = indexed(project.path(), cache.path());

    let mut filters = SearchFilters::project_only();
    filters.class_name = Some("View".to_string());
    let result = core.search_functions("render", filters).unwrap();
    let data = result["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["is_pure_virtual"], json!(true));
    assert_eq!(data[0]["is_const"], json!(true));
    assert_eq!(data[0]["access"], "public");

    let mut filters = SearchFilters::project_only();
    filters.signature_pattern = Some("int w".to_string());
    let result = core.search_functions("resize", filters).unwrap();
    assert_eq!(result["data"].as_array().unwrap().len(), 1);
}

#[test]
fn ambiguous_class_info_lists_all_matches() {
    let project = fixture_project();
    let cache = TempDir::new().unwrap();
    let core = indexed(project.path(), cache.path());

    let info = core.get_class_info("View").unwrap();
    let data = &info["data"];
    assert_eq!(data["is_ambiguous"], json!(true));
    assert_eq!(data["matches"].as_array().unwrap().len(), 2);
    assert_eq!(data["suggestion"], "Use qualified name");

    let resolved = core.get_class_info("app::ui::View").unwrap();
    assert_eq!(resolved["data"]["qualified_name"], "app::ui::View");
    assert_eq!(
        resolved["data"]["brief"],
        json!("Top-level view widget.")
    );
}

#[test]
fn callers_across_files_with_call_sites() {
    let project = fixture_project();
    let cache = TempDir::new().unwrap();
    let core = indexed(project.path(), cache.path());

    let result = core.find_callers("processData", None).unwrap();
    let data = &result["data"];
    let callers = data["callers"].as_array().unwrap();
    assert_eq!(callers.len(), 2, "callers: {data}");

    let sites = data["call_sites"].as_array().unwrap();
    assert_eq!(sites.len(), 2);
    for site in sites {
        assert!(site["line"].as_u64().unwrap() > 0);
        assert!(site["column"].as_u64().unwrap() > 0);
    }
}

#[test]
fn empty_pattern_with_file_filter_enumerates_the_file() {
    let project = fixture_project();
    let cache = TempDir::new().unwrap();
    let core = indexed(project.path(), cache.path());

    let result = core.find_in_file("ui.h", "", None).unwrap();
    let data = result["data"].as_array().unwrap();
    // Two View classes and two methods.
    assert_eq!(data.len(), 4);

    // Glob form works too.
    let globbed = core.find_in_file("*.h", "", None).unwrap();
    assert!(globbed["data"].as_array().unwrap().len() >= 5);
}

#[test]
fn truncation_metadata_when_capped() {
    let project = TempDir::new().unwrap();
    let source: String = (0..8).map(|i| format!("class Widget{i} {{}};\n")).collect();
    std::fs::write(project.path().join("w.h"), source).unwrap();
    let cache = TempDir::new().unwrap();
    let core = indexed(project.path(), cache.path());

    let mut filters = SearchFilters::project_only();
    filters.max_results = Some(3);
    let result = core.search_classes("Widget.*", filters).unwrap();
    assert_eq!(result["data"].as_array().unwrap().len(), 3);
    assert_eq!(result["metadata"]["status"], "truncated");
    assert_eq!(result["metadata"]["returned"], 3);
    assert_eq!(result["metadata"]["total_matches"], 8);
}

#[test]
fn large_result_metadata_without_cap() {
    let project = TempDir::new().unwrap();
    let source: String = (0..25).map(|i| format!("class Widget{i} {{}};\n")).collect();
    std::fs::write(project.path().join("w.h"), source).unwrap();
    let cache = TempDir::new().unwrap();
    let core = indexed(project.path(), cache.path());

    let result = core
        .search_classes("Widget.*", SearchFilters::project_only())
        .unwrap();
    assert_eq!(result["metadata"]["status"], "large");
    assert_eq!(result["metadata"]["result_count"], 25);
}

#[test]
fn empty_result_gets_fallback_suggestion() {
    let project = fixture_project();
    let cache = TempDir::new().unwrap();
    let core = indexed(project.path(), cache.path());

    // Wrong namespace: qualified fallback should point at the real one.
    let result = core
        .search_classes("wrong::Handler", SearchFilters::project_only())
        .unwrap();
    assert_eq!(result["metadata"]["status"], "empty");
    let fallback = &result["metadata"]["fallback"];
    assert_eq!(fallback["reason"], "qualified_fallback");
    assert_eq!(fallback["suggested_pattern"], "Handler");
}

#[test]
fn redos_pattern_answers_quickly_with_guidance() {
    let project = fixture_project();
    let cache = TempDir::new().unwrap();
    let core = indexed(project.path(), cache.path());

    let started = std::time::Instant::now();
    let result = core
        .search_classes("(a+)+b", SearchFilters::project_only())
        .unwrap();
    assert!(
        started.elapsed() < std::time::Duration::from_secs(5),
        "ReDoS-class pattern must not stall"
    );
    assert!(result["data"].as_array().unwrap().is_empty());
    assert_eq!(result["metadata"]["status"], "empty");
}

#[test]
fn type_alias_resolution() {
    let project = TempDir::new().unwrap();
    std::fs::write(
        project.path().join("types.h"),
        "namespace app {\n\
         using Id = unsigned long;\n\
         using Key = unsigned long;\n\
         }\n",
    )
    .unwrap();
    let cache = TempDir::new().unwrap();
    let core = indexed(project.path(), cache.path());

    let by_alias = core.get_type_alias_info("Id").unwrap();
    assert_eq!(by_alias["data"]["canonical_type"], "unsigned long");
    assert_eq!(by_alias["data"]["aliases"].as_array().unwrap().len(), 2);

    let by_canonical = core.get_type_alias_info("unsigned long").unwrap();
    assert_eq!(by_canonical["data"]["aliases"].as_array().unwrap().len(), 2);
}

#[test]
fn files_containing_symbol_spans_definition_and_references() {
    let project = fixture_project();
    let cache = TempDir::new().unwrap();
    let core = indexed(project.path(), cache.path());

    let result = core.get_files_containing_symbol("processData").unwrap();
    let files = result["data"]["files"].as_array().unwrap();
    let names: Vec<&str> = files.iter().map(|f| f.as_str().unwrap()).collect();
    assert!(names.iter().any(|f| f.ends_with("core.cpp")));
    assert!(names.iter().any(|f| f.ends_with("beta.cpp")));
}
