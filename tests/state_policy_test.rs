//! Queries during indexing: policy gating and partial-result marking.

use cppscout::analyzer::CppAnalyzer;
use cppscout::parsing::{
    CppParserFactory, ParseContext, ParseError, ParseResult, ParsedUnit, ParserFactory,
    SourceParser,
};
use cppscout::query::SearchFilters;
use cppscout::{IndexError, QueryPolicy, Settings};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A parser that stalls per file so tests can observe the INDEXING state.
struct SlowParser {
    inner: Box<dyn SourceParser>,
    delay: Duration,
}

impl SourceParser for SlowParser {
    fn parse(
        &mut self,
        path: &Path,
        source: &str,
        context: &ParseContext,
    ) -> ParseResult<ParsedUnit> {
        std::thread::sleep(self.delay);
        self.inner.parse(path, source, context)
    }
}

struct SlowParserFactory {
    delay: Duration,
}

impl ParserFactory for SlowParserFactory {
    fn create(&self) -> ParseResult<Box<dyn SourceParser>> {
        Ok(Box::new(SlowParser {
            inner: CppParserFactory.create()?,
            delay: self.delay,
        }))
    }
}

/// A parser that always fails, for ERROR-state coverage.
struct FailingParserFactory;

impl ParserFactory for FailingParserFactory {
    fn create(&self) -> ParseResult<Box<dyn SourceParser>> {
        Err(ParseError::Init("deliberately broken".to_string()))
    }
}

fn project_with_files(count: usize) -> TempDir {
    let project = TempDir::new().unwrap();
    for i in 0..count {
        std::fs::write(
            project.path().join(format!("file{i:02}.h")),
            format!("class Thing{i} {{}};\n"),
        )
        .unwrap();
    }
    project
}

fn slow_analyzer(
    project: &Path,
    cache: &Path,
    policy: QueryPolicy,
    delay: Duration,
) -> Arc<CppAnalyzer> {
    let mut settings = Settings::default();
    settings.cache_root = cache.to_path_buf();
    settings.indexing.parallel_threads = 1;
    settings.query.behavior_policy = policy;
    settings.query.block_timeout_secs = 1;
    Arc::new(
        CppAnalyzer::new(
            project,
            None,
            Arc::new(settings),
            Arc::new(SlowParserFactory { delay }),
        )
        .unwrap(),
    )
}

#[test]
fn allow_partial_marks_results_during_indexing() {
    let project = project_with_files(8);
    let cache = TempDir::new().unwrap();
    let core = slow_analyzer(
        project.path(),
        cache.path(),
        QueryPolicy::AllowPartial,
        Duration::from_millis(120),
    );

    let background = Arc::clone(&core);
    let handle = std::thread::spawn(move || background.ensure_indexed(false, None));

    // Give the indexer a moment to enter INDEXING.
    std::thread::sleep(Duration::from_millis(150));
    assert!(core.state().is_ready_for_queries());
    assert!(!core.state().is_fully_indexed());

    let result = core
        .search_classes("Thing0", SearchFilters::project_only())
        .unwrap();
    assert_eq!(result["metadata"]["status"], "partial");
    assert!(result["metadata"]["warning"]
        .as_str()
        .unwrap()
        .contains("INCOMPLETE"));
    assert!(result["metadata"]["total_files"].as_u64().unwrap() >= 1);

    handle.join().unwrap().unwrap();
    assert!(core.state().is_fully_indexed());

    // After completion the same query is clean.
    let result = core
        .search_classes("Thing0", SearchFilters::project_only())
        .unwrap();
    assert!(result.get("metadata").is_none());
}

#[test]
fn reject_policy_refuses_during_indexing() {
    let project = project_with_files(8);
    let cache = TempDir::new().unwrap();
    let core = slow_analyzer(
        project.path(),
        cache.path(),
        QueryPolicy::Reject,
        Duration::from_millis(120),
    );

    let background = Arc::clone(&core);
    let handle = std::thread::spawn(move || background.ensure_indexed(false, None));
    std::thread::sleep(Duration::from_millis(150));

    let err = core
        .search_classes("Thing0", SearchFilters::project_only())
        .unwrap_err();
    assert!(matches!(err, IndexError::InvalidState { .. }));
    assert!(err.to_string().contains("wait_for_indexing"));

    handle.join().unwrap().unwrap();
}

#[test]
fn block_policy_waits_for_completion() {
    let project = project_with_files(3);
    let cache = TempDir::new().unwrap();
    let core = slow_analyzer(
        project.path(),
        cache.path(),
        QueryPolicy::Block,
        Duration::from_millis(50),
    );

    let background = Arc::clone(&core);
    let handle = std::thread::spawn(move || background.ensure_indexed(false, None));
    std::thread::sleep(Duration::from_millis(60));

    // The short index finishes well inside the 1s block ceiling, so the
    // blocked query returns a complete (unmarked) result.
    let result = core
        .search_classes("Thing0", SearchFilters::project_only())
        .unwrap();
    assert!(result.get("metadata").is_none());
    assert_eq!(result["data"].as_array().unwrap().len(), 1);

    handle.join().unwrap().unwrap();
}

#[test]
fn wait_for_indexing_times_out_and_succeeds() {
    let project = project_with_files(6);
    let cache = TempDir::new().unwrap();
    let core = slow_analyzer(
        project.path(),
        cache.path(),
        QueryPolicy::AllowPartial,
        Duration::from_millis(100),
    );

    let background = Arc::clone(&core);
    let handle = std::thread::spawn(move || background.ensure_indexed(false, None));
    std::thread::sleep(Duration::from_millis(50));

    assert!(!core.wait_for_indexing(Some(Duration::from_millis(20))));
    assert!(core.wait_for_indexing(Some(Duration::from_secs(30))));
    handle.join().unwrap().unwrap();
}

#[test]
fn progress_callback_panics_are_swallowed() {
    let project = project_with_files(3);
    let cache = TempDir::new().unwrap();
    let mut settings = Settings::default();
    settings.cache_root = cache.path().to_path_buf();
    let core = CppAnalyzer::new(
        project.path(),
        None,
        Arc::new(settings),
        Arc::new(CppParserFactory),
    )
    .unwrap();

    let cb: cppscout::indexing::ProgressCallback =
        Arc::new(|_| panic!("callback bug must not kill the indexer"));
    core.ensure_indexed(false, Some(cb)).unwrap();
    assert!(core.state().is_fully_indexed());
    assert_eq!(core.state().progress().unwrap().indexed_files, 3);
}

#[test]
fn unavailable_parser_marks_files_failed() {
    let project = project_with_files(2);
    let cache = TempDir::new().unwrap();
    let mut settings = Settings::default();
    settings.cache_root = cache.path().to_path_buf();
    let core = CppAnalyzer::new(
        project.path(),
        None,
        Arc::new(settings),
        Arc::new(FailingParserFactory),
    )
    .unwrap();

    // Every file fails to parse but the build itself completes: files are
    // recorded as failed, state is INDEXED with failures visible.
    core.ensure_indexed(false, None).unwrap();
    let progress = core.state().progress().unwrap();
    assert_eq!(progress.failed_files, 2);
    assert_eq!(progress.indexed_files, 0);
}

#[test]
fn cancellation_during_cold_build_moves_to_error() {
    let project = project_with_files(12);
    let cache = TempDir::new().unwrap();
    let core = slow_analyzer(
        project.path(),
        cache.path(),
        QueryPolicy::AllowPartial,
        Duration::from_millis(100),
    );

    let cancel = core.cancel_token();
    let background = Arc::clone(&core);
    let handle = std::thread::spawn(move || background.ensure_indexed(false, None));
    std::thread::sleep(Duration::from_millis(150));
    cancel.store(true, std::sync::atomic::Ordering::SeqCst);

    let result = handle.join().unwrap();
    assert!(matches!(result, Err(IndexError::Cancelled)));
    assert_eq!(
        core.state().state(),
        cppscout::AnalyzerState::Error,
        "cancelled cold build lands in ERROR"
    );
}

#[test]
fn status_json_shape() {
    let project = project_with_files(1);
    let cache = TempDir::new().unwrap();
    let mut settings = Settings::default();
    settings.cache_root = cache.path().to_path_buf();
    let core = CppAnalyzer::new(
        project.path(),
        None,
        Arc::new(settings),
        Arc::new(CppParserFactory),
    )
    .unwrap();
    core.ensure_indexed(false, None).unwrap();

    let status = core.get_server_status();
    assert_eq!(status["backend"]["active"], "sqlite");
    assert_eq!(status["backend"]["fallback_active"], json!(false));
    assert_eq!(status["state"]["state"], "indexed");
    assert!(status["cache_stats"]["total_symbols"].as_u64().unwrap() >= 1);
}
