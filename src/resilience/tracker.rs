//! Sliding-window error tracking for cache operations.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use tracing::{error, warn};

/// Bounded history size; old records are dropped first.
const MAX_HISTORY: usize = 1000;

/// Record of one error occurrence.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub at: Instant,
    pub error_type: String,
    pub error_message: String,
    pub operation: String,
    pub recoverable: bool,
}

/// Summary of recent errors for status reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorSummary {
    pub total_errors: usize,
    pub total_operations: u64,
    pub error_rate: f64,
    pub errors_by_type: HashMap<String, usize>,
    pub errors_by_operation: HashMap<String, usize>,
    pub fallback_triggered: bool,
    pub fallback_reason: Option<String>,
    pub window_seconds: f64,
}

struct TrackerState {
    history: VecDeque<ErrorRecord>,
    operation_counts: HashMap<String, u64>,
    error_counts: HashMap<String, u64>,
    fallback_triggered: bool,
    fallback_reason: Option<String>,
}

/// Track and monitor errors for cache operations.
///
/// `record_error` returns true exactly once, when the windowed error rate
/// first crosses the configured threshold; the orchestrator uses that to
/// switch backends.
pub struct ErrorTracker {
    window_seconds: f64,
    fallback_threshold: f64,
    state: Mutex<TrackerState>,
}

impl ErrorTracker {
    pub fn new(window_seconds: f64, fallback_threshold: f64) -> Self {
        Self {
            window_seconds,
            fallback_threshold,
            state: Mutex::new(TrackerState {
                history: VecDeque::new(),
                operation_counts: HashMap::new(),
                error_counts: HashMap::new(),
                fallback_triggered: false,
                fallback_reason: None,
            }),
        }
    }

    /// Record a successful operation.
    pub fn record_operation(&self, operation: &str) {
        let mut state = self.state.lock();
        *state
            .operation_counts
            .entry(operation.to_string())
            .or_default() += 1;
    }

    /// Record an error. Returns true when this error pushes the windowed
    /// error rate over the fallback threshold (first crossing only).
    pub fn record_error(
        &self,
        error_type: &str,
        error_message: &str,
        operation: &str,
        recoverable: bool,
    ) -> bool {
        let mut state = self.state.lock();

        if state.history.len() >= MAX_HISTORY {
            state.history.pop_front();
        }
        state.history.push_back(ErrorRecord {
            at: Instant::now(),
            error_type: error_type.to_string(),
            error_message: error_message.to_string(),
            operation: operation.to_string(),
            recoverable,
        });
        *state.error_counts.entry(operation.to_string()).or_default() += 1;

        if recoverable {
            warn!("recoverable error in {operation}: {error_type}: {error_message}");
        } else {
            error!("non-recoverable error in {operation}: {error_type}: {error_message}");
        }

        if state.fallback_triggered {
            return false;
        }

        let recent_errors = self.errors_in_window(&state);
        let total_operations: u64 = state.operation_counts.values().sum();
        if total_operations == 0 {
            return false;
        }

        let rate = recent_errors as f64 / total_operations as f64;
        if rate >= self.fallback_threshold {
            warn!(
                "error rate {:.1}% exceeds threshold {:.1}% ({recent_errors} errors / {total_operations} operations)",
                rate * 100.0,
                self.fallback_threshold * 100.0,
            );
            state.fallback_triggered = true;
            state.fallback_reason = Some(format!("Error rate threshold exceeded: {error_type}"));
            return true;
        }

        false
    }

    fn errors_in_window(&self, state: &TrackerState) -> usize {
        state
            .history
            .iter()
            .filter(|e| e.at.elapsed().as_secs_f64() <= self.window_seconds)
            .count()
    }

    /// Current error rate within the window (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        let state = self.state.lock();
        let total_operations: u64 = state.operation_counts.values().sum();
        if total_operations == 0 {
            return 0.0;
        }
        self.errors_in_window(&state) as f64 / total_operations as f64
    }

    pub fn fallback_triggered(&self) -> bool {
        self.state.lock().fallback_triggered
    }

    pub fn summary(&self) -> ErrorSummary {
        let state = self.state.lock();

        let mut errors_by_type: HashMap<String, usize> = HashMap::new();
        let mut errors_by_operation: HashMap<String, usize> = HashMap::new();
        let mut total_errors = 0usize;
        for record in &state.history {
            if record.at.elapsed().as_secs_f64() > self.window_seconds {
                continue;
            }
            total_errors += 1;
            *errors_by_type.entry(record.error_type.clone()).or_default() += 1;
            *errors_by_operation
                .entry(record.operation.clone())
                .or_default() += 1;
        }

        let total_operations: u64 = state.operation_counts.values().sum();
        let error_rate = if total_operations == 0 {
            0.0
        } else {
            total_errors as f64 / total_operations as f64
        };

        ErrorSummary {
            total_errors,
            total_operations,
            error_rate,
            errors_by_type,
            errors_by_operation,
            fallback_triggered: state.fallback_triggered,
            fallback_reason: state.fallback_reason.clone(),
            window_seconds: self.window_seconds,
        }
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.history.clear();
        state.operation_counts.clear();
        state.error_counts.clear();
        state.fallback_triggered = false;
        state.fallback_reason = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_errors_means_zero_rate() {
        let tracker = ErrorTracker::new(300.0, 0.05);
        for _ in 0..100 {
            tracker.record_operation("save_symbol");
        }
        assert_eq!(tracker.error_rate(), 0.0);
        assert!(!tracker.fallback_triggered());
    }

    #[test]
    fn crossing_threshold_triggers_fallback_once() {
        let tracker = ErrorTracker::new(300.0, 0.05);
        for _ in 0..100 {
            tracker.record_operation("save_symbol");
        }

        // 4 errors over 100 operations: under 5%.
        for _ in 0..4 {
            assert!(!tracker.record_error("Locked", "db locked", "save_symbol", true));
        }
        // Fifth error crosses the threshold.
        assert!(tracker.record_error("Locked", "db locked", "save_symbol", true));
        assert!(tracker.fallback_triggered());
        // Further errors no longer re-trigger.
        assert!(!tracker.record_error("Locked", "db locked", "save_symbol", true));
    }

    #[test]
    fn no_operations_means_no_fallback() {
        let tracker = ErrorTracker::new(300.0, 0.05);
        assert!(!tracker.record_error("Corrupt", "bad page", "load_cache", false));
    }

    #[test]
    fn summary_groups_by_type_and_operation() {
        let tracker = ErrorTracker::new(300.0, 0.5);
        tracker.record_operation("save");
        tracker.record_operation("load");
        tracker.record_error("Locked", "m", "save", true);
        tracker.record_error("Corrupt", "m", "load", false);

        let summary = tracker.summary();
        assert_eq!(summary.total_errors, 2);
        assert_eq!(summary.total_operations, 2);
        assert_eq!(summary.errors_by_type.get("Locked"), Some(&1));
        assert_eq!(summary.errors_by_operation.get("load"), Some(&1));
    }

    #[test]
    fn reset_clears_fallback_state() {
        let tracker = ErrorTracker::new(300.0, 0.01);
        tracker.record_operation("op");
        tracker.record_error("E", "m", "op", true);
        assert!(tracker.fallback_triggered());
        tracker.reset();
        assert!(!tracker.fallback_triggered());
        assert_eq!(tracker.error_rate(), 0.0);
    }

    #[test]
    fn history_is_bounded() {
        let tracker = ErrorTracker::new(300.0, 2.0);
        tracker.record_operation("op");
        for i in 0..1200 {
            tracker.record_error("E", &format!("err {i}"), "op", true);
        }
        let summary = tracker.summary();
        assert!(summary.total_errors <= MAX_HISTORY);
    }
}
