//! Error-rate monitoring and cache recovery
//!
//! [`ErrorTracker`] keeps a sliding window of backend failures and tells the
//! orchestrator when the error rate crosses the fallback threshold.
//! [`RecoveryManager`] owns the blunter instruments: timestamped backups,
//! restore, cache clearing, and repair.

pub mod recovery;
pub mod tracker;

pub use recovery::RecoveryManager;
pub use tracker::{ErrorRecord, ErrorSummary, ErrorTracker};
