//! Analyzer lifecycle state machine and indexing progress
//!
//! Transitions are atomic (mutex-protected). A condition variable stands in
//! for the one-shot "indexed" event: it is set when the analyzer reaches
//! INDEXED and cleared when indexing or refreshing starts, so `BLOCK`-policy
//! queries and `wait_for_indexing` can park until completion.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

/// Analyzer lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerState {
    /// No project set
    Uninitialized,
    /// Analyzer created, preparing to index
    Initializing,
    /// Actively indexing files
    Indexing,
    /// Indexing complete, ready for queries
    Indexed,
    /// Incremental refresh in progress
    Refreshing,
    /// Indexing failed
    Error,
}

impl AnalyzerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Indexing => "indexing",
            Self::Indexed => "indexed",
            Self::Refreshing => "refreshing",
            Self::Error => "error",
        }
    }
}

/// Real-time indexing progress information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingProgress {
    pub total_files: usize,
    pub indexed_files: usize,
    pub failed_files: usize,
    pub cache_hits: usize,
    pub current_file: Option<String>,
    /// Unix seconds when this run started
    pub start_time: f64,
    /// Unix seconds, extrapolated from throughput so far
    pub estimated_completion: Option<f64>,
    #[serde(skip, default = "Instant::now")]
    started: Instant,
}

impl Default for IndexingProgress {
    fn default() -> Self {
        Self::new(0)
    }
}

impl IndexingProgress {
    pub fn new(total_files: usize) -> Self {
        Self {
            total_files,
            indexed_files: 0,
            failed_files: 0,
            cache_hits: 0,
            current_file: None,
            start_time: crate::relations::now_unix(),
            estimated_completion: None,
            started: Instant::now(),
        }
    }

    pub fn completion_percentage(&self) -> f64 {
        if self.total_files == 0 {
            return 0.0;
        }
        self.indexed_files as f64 / self.total_files as f64 * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.indexed_files + self.failed_files >= self.total_files
    }

    /// Re-estimate completion from throughput so far.
    pub fn update_estimate(&mut self) {
        let done = self.indexed_files + self.failed_files;
        if done == 0 || self.total_files == 0 {
            self.estimated_completion = None;
            return;
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        let per_file = elapsed / done as f64;
        let remaining = self.total_files.saturating_sub(done) as f64;
        self.estimated_completion = Some(crate::relations::now_unix() + per_file * remaining);
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "total_files": self.total_files,
            "indexed_files": self.indexed_files,
            "failed_files": self.failed_files,
            "cache_hits": self.cache_hits,
            "completion_percentage": self.completion_percentage(),
            "current_file": self.current_file,
            "start_time": self.start_time,
            "estimated_completion": self.estimated_completion,
            "is_complete": self.is_complete(),
        })
    }
}

struct StateInner {
    state: AnalyzerState,
    indexed_flag: bool,
    progress: Option<IndexingProgress>,
}

/// Thread-safe state management for the analyzer lifecycle
pub struct StateManager {
    inner: Mutex<StateInner>,
    indexed_cv: Condvar,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StateInner {
                state: AnalyzerState::Uninitialized,
                indexed_flag: false,
                progress: None,
            }),
            indexed_cv: Condvar::new(),
        }
    }

    pub fn state(&self) -> AnalyzerState {
        self.inner.lock().state
    }

    /// Transition to a new state, updating the indexed event.
    pub fn transition_to(&self, new_state: AnalyzerState) {
        let mut inner = self.inner.lock();
        let old_state = inner.state;
        inner.state = new_state;
        match new_state {
            AnalyzerState::Indexed => {
                inner.indexed_flag = true;
                self.indexed_cv.notify_all();
            }
            AnalyzerState::Indexing | AnalyzerState::Refreshing => {
                inner.indexed_flag = false;
            }
            _ => {}
        }
        debug!(
            "state transition: {} -> {}",
            old_state.as_str(),
            new_state.as_str()
        );
    }

    /// Wait until indexing completes. Returns false on timeout.
    pub fn wait_for_indexed(&self, timeout: Option<Duration>) -> bool {
        let mut inner = self.inner.lock();
        match timeout {
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !inner.indexed_flag {
                    if self
                        .indexed_cv
                        .wait_until(&mut inner, deadline)
                        .timed_out()
                    {
                        return inner.indexed_flag;
                    }
                }
                true
            }
            None => {
                while !inner.indexed_flag {
                    self.indexed_cv.wait(&mut inner);
                }
                true
            }
        }
    }

    pub fn update_progress(&self, progress: IndexingProgress) {
        self.inner.lock().progress = Some(progress);
    }

    /// Mutate the current progress in place under the lock; returns a clone
    /// for callbacks.
    pub fn with_progress(
        &self,
        f: impl FnOnce(&mut IndexingProgress),
    ) -> Option<IndexingProgress> {
        let mut inner = self.inner.lock();
        let progress = inner.progress.as_mut()?;
        f(progress);
        progress.update_estimate();
        Some(progress.clone())
    }

    pub fn progress(&self) -> Option<IndexingProgress> {
        self.inner.lock().progress.clone()
    }

    /// Queries are allowed while indexing is in progress or complete.
    pub fn is_ready_for_queries(&self) -> bool {
        matches!(
            self.state(),
            AnalyzerState::Indexing | AnalyzerState::Indexed | AnalyzerState::Refreshing
        )
    }

    pub fn is_fully_indexed(&self) -> bool {
        self.state() == AnalyzerState::Indexed
    }

    pub fn status_json(&self) -> serde_json::Value {
        let inner = self.inner.lock();
        serde_json::json!({
            "state": inner.state.as_str(),
            "is_fully_indexed": inner.state == AnalyzerState::Indexed,
            "is_ready_for_queries": matches!(
                inner.state,
                AnalyzerState::Indexing | AnalyzerState::Indexed | AnalyzerState::Refreshing
            ),
            "progress": inner.progress.as_ref().map(|p| p.to_json()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn initial_state_is_uninitialized() {
        let manager = StateManager::new();
        assert_eq!(manager.state(), AnalyzerState::Uninitialized);
        assert!(!manager.is_ready_for_queries());
        assert!(!manager.is_fully_indexed());
    }

    #[test]
    fn readiness_by_state() {
        let manager = StateManager::new();
        for (state, ready, full) in [
            (AnalyzerState::Initializing, false, false),
            (AnalyzerState::Indexing, true, false),
            (AnalyzerState::Indexed, true, true),
            (AnalyzerState::Refreshing, true, false),
            (AnalyzerState::Error, false, false),
        ] {
            manager.transition_to(state);
            assert_eq!(manager.is_ready_for_queries(), ready, "{state:?}");
            assert_eq!(manager.is_fully_indexed(), full, "{state:?}");
        }
    }

    #[test]
    fn wait_for_indexed_times_out() {
        let manager = StateManager::new();
        manager.transition_to(AnalyzerState::Indexing);
        assert!(!manager.wait_for_indexed(Some(Duration::from_millis(20))));
    }

    #[test]
    fn wait_for_indexed_wakes_on_transition() {
        let manager = Arc::new(StateManager::new());
        manager.transition_to(AnalyzerState::Indexing);

        let waiter = Arc::clone(&manager);
        let handle = std::thread::spawn(move || {
            waiter.wait_for_indexed(Some(Duration::from_secs(5)))
        });

        std::thread::sleep(Duration::from_millis(20));
        manager.transition_to(AnalyzerState::Indexed);
        assert!(handle.join().unwrap());
    }

    #[test]
    fn refresh_clears_indexed_event() {
        let manager = StateManager::new();
        manager.transition_to(AnalyzerState::Indexed);
        assert!(manager.wait_for_indexed(Some(Duration::from_millis(1))));
        manager.transition_to(AnalyzerState::Refreshing);
        assert!(!manager.wait_for_indexed(Some(Duration::from_millis(10))));
        manager.transition_to(AnalyzerState::Indexed);
        assert!(manager.wait_for_indexed(Some(Duration::from_millis(1))));
    }

    #[test]
    fn progress_percentage_and_completion() {
        let mut progress = IndexingProgress::new(10);
        assert_eq!(progress.completion_percentage(), 0.0);
        progress.indexed_files = 5;
        assert_eq!(progress.completion_percentage(), 50.0);
        assert!(!progress.is_complete());
        progress.indexed_files = 8;
        progress.failed_files = 2;
        assert!(progress.is_complete());
    }

    #[test]
    fn zero_total_files_is_zero_percent() {
        let progress = IndexingProgress::new(0);
        assert_eq!(progress.completion_percentage(), 0.0);
    }

    #[test]
    fn with_progress_updates_in_place() {
        let manager = StateManager::new();
        manager.update_progress(IndexingProgress::new(4));
        let snapshot = manager
            .with_progress(|p| {
                p.indexed_files += 1;
                p.current_file = Some("/p/a.cpp".into());
            })
            .unwrap();
        assert_eq!(snapshot.indexed_files, 1);
        assert_eq!(manager.progress().unwrap().indexed_files, 1);
    }
}
