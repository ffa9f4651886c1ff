//! Inheritance hierarchy queries over real parsed C++.

use cppscout::analyzer::CppAnalyzer;
use cppscout::parsing::CppParserFactory;
use cppscout::Settings;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn indexed(project: &Path, cache: &Path) -> CppAnalyzer {
    let mut settings = Settings::default();
    settings.cache_root = cache.to_path_buf();
    let core = CppAnalyzer::new(project, None, Arc::new(settings), Arc::new(CppParserFactory))
        .unwrap();
    core.ensure_indexed(false, None).unwrap();
    core
}

#[test]
fn full_closure_in_both_directions() {
    let project = TempDir::new().unwrap();
    std::fs::write(
        project.path().join("shapes.h"),
        "class Shape {};\n\
         class Polygon : public Shape {};\n\
         class Triangle : public Polygon {};\n\
         class Circle : public Shape {};\n",
    )
    .unwrap();
    let cache = TempDir::new().unwrap();
    let core = indexed(project.path(), cache.path());

    let result = core.get_class_hierarchy("Polygon", None, None).unwrap();
    let classes = result["data"]["classes"].as_object().unwrap();

    // Upward to Shape, downward to Triangle, and sideways through Shape to
    // Circle: the whole connected component.
    assert!(classes.contains_key("Shape"));
    assert!(classes.contains_key("Triangle"));
    assert!(classes.contains_key("Circle"));
    assert_eq!(result["data"]["queried_class"], "Polygon");
    assert_eq!(classes["Polygon"]["base_classes"], json!(["Shape"]));
    assert_eq!(classes["Polygon"]["derived_classes"], json!(["Triangle"]));
}

#[test]
fn template_instantiation_bridges_to_concrete_base() {
    let project = TempDir::new().unwrap();
    std::fs::write(
        project.path().join("adapters.h"),
        "class Base {};\n\
         template<class T> class Adapter : public T {};\n\
         class Bar : public Adapter<Base> {};\n\
         template<class Base> class Adapter2 : public Base {};\n",
    )
    .unwrap();
    let cache = TempDir::new().unwrap();
    let core = indexed(project.path(), cache.path());

    let result = core.get_class_hierarchy("Base", None, None).unwrap();
    let classes = result["data"]["classes"].as_object().unwrap();

    // Bar : Adapter<Base> with Adapter<T> : T means Bar derives from Base.
    assert!(classes.contains_key("Bar"), "got: {result}");
    let derived = classes["Base"]["derived_classes"].as_array().unwrap();
    assert!(derived.contains(&json!("Bar")));

    // Adapter2's template parameter happens to be named Base; that is not
    // an inheritance edge to the concrete Base.
    assert!(!derived.contains(&json!("Adapter2")));
    assert!(!classes.contains_key("Adapter2"));
}

#[test]
fn max_nodes_caps_exactly_with_truncated_flag() {
    let project = TempDir::new().unwrap();
    let mut source = String::from("class Root {};\n");
    for i in 0..30 {
        source.push_str(&format!("class Child{i} : public Root {{}};\n"));
    }
    std::fs::write(project.path().join("wide.h"), source).unwrap();
    let cache = TempDir::new().unwrap();
    let core = indexed(project.path(), cache.path());

    let capped = core.get_class_hierarchy("Root", Some(10), None).unwrap();
    assert_eq!(capped["data"]["truncated"], json!(true));
    assert_eq!(capped["data"]["nodes_returned"], 10);
    assert_eq!(capped["data"]["classes"].as_object().unwrap().len(), 10);

    let full = core.get_class_hierarchy("Root", Some(200), None).unwrap();
    assert!(full["data"].get("truncated").is_none());
    assert_eq!(full["data"]["classes"].as_object().unwrap().len(), 31);
}

#[test]
fn max_depth_restricts_levels() {
    let project = TempDir::new().unwrap();
    std::fs::write(
        project.path().join("chain.h"),
        "class L0 {};\n\
         class L1 : public L0 {};\n\
         class L2 : public L1 {};\n\
         class L3 : public L2 {};\n",
    )
    .unwrap();
    let cache = TempDir::new().unwrap();
    let core = indexed(project.path(), cache.path());

    let result = core.get_class_hierarchy("L0", None, Some(2)).unwrap();
    let classes = result["data"]["classes"].as_object().unwrap();
    assert!(classes.contains_key("L1"));
    assert!(classes.contains_key("L2"));
    assert!(!classes.contains_key("L3"));
}

#[test]
fn external_base_is_marked_unresolved() {
    let project = TempDir::new().unwrap();
    std::fs::write(
        project.path().join("app.h"),
        "class MainWindow : public QWidget {};\n",
    )
    .unwrap();
    let cache = TempDir::new().unwrap();
    let core = indexed(project.path(), cache.path());

    let result = core.get_class_hierarchy("MainWindow", None, None).unwrap();
    let classes = result["data"]["classes"].as_object().unwrap();
    assert_eq!(classes["QWidget"]["is_unresolved"], json!(true));
}

#[test]
fn unknown_class_is_an_empty_envelope() {
    let project = TempDir::new().unwrap();
    std::fs::write(project.path().join("a.h"), "class A {};\n").unwrap();
    let cache = TempDir::new().unwrap();
    let core = indexed(project.path(), cache.path());

    let result = core.get_class_hierarchy("Phantom", None, None).unwrap();
    assert!(result["data"]["error"]
        .as_str()
        .unwrap()
        .contains("Phantom"));
    assert_eq!(result["metadata"]["status"], "empty");
}

#[test]
fn class_info_shows_direct_derived_only() {
    let project = TempDir::new().unwrap();
    std::fs::write(
        project.path().join("tree.h"),
        "class Base {};\n\
         class Direct : public Base {};\n\
         class Grandchild : public Direct {};\n",
    )
    .unwrap();
    let cache = TempDir::new().unwrap();
    let core = indexed(project.path(), cache.path());

    let info = core.get_class_info("Base").unwrap();
    let derived = info["data"]["derived_classes"].as_array().unwrap();
    let names: Vec<&str> = derived
        .iter()
        .map(|d| d["qualified_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Direct"], "direct (one-level) subclasses only");
}
