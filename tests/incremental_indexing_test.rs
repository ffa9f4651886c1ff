//! End-to-end index lifecycle: cold build, warm load, incremental refresh.

use cppscout::analyzer::CppAnalyzer;
use cppscout::parsing::CppParserFactory;
use cppscout::query::SearchFilters;
use cppscout::storage::SymbolStore;
use cppscout::Settings;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn analyzer(project: &Path, cache: &Path) -> CppAnalyzer {
    let mut settings = Settings::default();
    settings.cache_root = cache.to_path_buf();
    settings.indexing.parallel_threads = 2;
    CppAnalyzer::new(project, None, Arc::new(settings), Arc::new(CppParserFactory)).unwrap()
}

fn data_array(result: &serde_json::Value) -> &Vec<serde_json::Value> {
    result["data"].as_array().expect("data array")
}

#[test]
fn cold_build_then_incremental_add() {
    let project = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    std::fs::write(
        project.path().join("widget.h"),
        "class Widget {\npublic:\n    void draw();\n};\n",
    )
    .unwrap();

    let core = analyzer(project.path(), cache.path());
    core.ensure_indexed(false, None).unwrap();

    let before = core
        .search_classes("Widget", SearchFilters::project_only())
        .unwrap();
    assert_eq!(data_array(&before).len(), 1);

    // Add a class to the file and refresh incrementally.
    std::fs::write(
        project.path().join("widget.h"),
        "class Widget {\npublic:\n    void draw();\n};\nclass NewClass {};\n",
    )
    .unwrap();
    let report = core.refresh(true, false, None).unwrap();
    assert_eq!(report.changed, 1);
    assert_eq!(report.deleted, 0);
    assert_eq!(report.reparsed, 1, "only the changed file is re-parsed");

    let fresh = core
        .search_classes("NewClass", SearchFilters::project_only())
        .unwrap();
    assert_eq!(data_array(&fresh).len(), 1);

    // Previously indexed symbols are still queryable.
    let still = core
        .search_classes("Widget", SearchFilters::project_only())
        .unwrap();
    assert_eq!(data_array(&still).len(), 1);
}

#[test]
fn unchanged_files_are_cache_hits() {
    let project = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    for i in 0..4 {
        std::fs::write(
            project.path().join(format!("file{i}.h")),
            format!("class Thing{i} {{}};\n"),
        )
        .unwrap();
    }

    let core = analyzer(project.path(), cache.path());
    core.ensure_indexed(false, None).unwrap();

    // Re-index in place without force: every file should be served from
    // the per-file hash cache.
    core.index_project(false, None).unwrap();
    let progress = core.state().progress().unwrap();
    assert_eq!(progress.cache_hits, 4);
    assert_eq!(progress.failed_files, 0);
}

#[test]
fn header_change_fans_out_to_includers() {
    let project = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    std::fs::write(project.path().join("api.h"), "class Api {};\n").unwrap();
    std::fs::write(
        project.path().join("user.cpp"),
        "#include \"api.h\"\nvoid use() {}\n",
    )
    .unwrap();
    std::fs::write(project.path().join("other.cpp"), "void other() {}\n").unwrap();

    let core = analyzer(project.path(), cache.path());
    core.ensure_indexed(false, None).unwrap();

    // Touch only the header; its includer must be re-parsed too.
    std::fs::write(project.path().join("api.h"), "class Api { int v; };\n").unwrap();
    let report = core.refresh(true, false, None).unwrap();
    assert_eq!(report.changed, 1);
    assert_eq!(report.reparsed, 2, "header + its includer");
}

#[test]
fn deleted_file_drops_its_symbols() {
    let project = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    std::fs::write(project.path().join("keep.h"), "class Keep {};\n").unwrap();
    std::fs::write(project.path().join("gone.h"), "class Gone {};\n").unwrap();

    let core = analyzer(project.path(), cache.path());
    core.ensure_indexed(false, None).unwrap();
    assert_eq!(
        data_array(&core.search_classes("Gone", SearchFilters::project_only()).unwrap()).len(),
        1
    );

    std::fs::remove_file(project.path().join("gone.h")).unwrap();
    let report = core.refresh(true, false, None).unwrap();
    assert_eq!(report.deleted, 1);

    let after = core
        .search_classes("Gone", SearchFilters::project_only())
        .unwrap();
    assert!(data_array(&after).is_empty());
    assert_eq!(
        data_array(&core.search_classes("Keep", SearchFilters::project_only()).unwrap()).len(),
        1
    );
}

#[test]
fn reopening_same_project_reuses_cache() {
    let project = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    std::fs::write(project.path().join("a.h"), "class A {};\n").unwrap();

    let first = analyzer(project.path(), cache.path());
    first.ensure_indexed(false, None).unwrap();
    let indexed_at_before = first
        .store()
        .load_all_file_metadata()
        .unwrap()
        .first()
        .unwrap()
        .indexed_at;
    drop(first);

    let second = analyzer(project.path(), cache.path());
    second.ensure_indexed(false, None).unwrap();
    assert!(second.state().is_fully_indexed());

    // Warm load: the file was not re-parsed, so its receipt is untouched.
    let indexed_at_after = second
        .store()
        .load_all_file_metadata()
        .unwrap()
        .first()
        .unwrap()
        .indexed_at;
    assert_eq!(indexed_at_before, indexed_at_after);
}

#[test]
fn parse_failure_is_cached_and_logged() {
    let project = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    std::fs::write(project.path().join("ok.h"), "class Ok {};\n").unwrap();
    // Invalid UTF-8 makes read_to_string fail, counting as a failed file.
    std::fs::write(project.path().join("bad.h"), [0xFFu8, 0xFE, 0x00, 0x01]).unwrap();

    let core = analyzer(project.path(), cache.path());
    core.ensure_indexed(false, None).unwrap();

    let progress = core.state().progress().unwrap();
    assert_eq!(progress.indexed_files, 1);
    assert_eq!(progress.failed_files, 1);

    // The good file is fully queryable regardless.
    let result = core
        .search_classes("Ok", SearchFilters::project_only())
        .unwrap();
    assert_eq!(data_array(&result).len(), 1);
}

#[test]
fn forward_declaration_does_not_displace_definition() {
    let project = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    std::fs::write(
        project.path().join("widget.h"),
        "\n\n\n\nstruct ConcreteWidget;\n\n\n\n\nstruct ConcreteWidget : BaseWidget {\n    void m();\n    int field;\n};\n",
    )
    .unwrap();

    let core = analyzer(project.path(), cache.path());
    core.ensure_indexed(false, None).unwrap();

    let info = core.get_class_info("ConcreteWidget").unwrap();
    let data = &info["data"];
    assert_eq!(data["base_classes"], serde_json::json!(["BaseWidget"]));
    assert_eq!(data["location"]["start_line"], 10);
    assert_eq!(data["location"]["end_line"], 13);
}
