//! Filesystem watcher for auto-refresh
//!
//! Watches the project tree with `notify`, debounces bursts of events, and
//! invokes the refresh callback once the tree goes quiet. Only C/C++ source
//! changes count; editor temp files and build output churn are ignored.

use crate::parsing::is_cpp_source;
use crossbeam_channel::RecvTimeoutError;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Handle to a running watcher; dropping it stops watching.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    _thread: std::thread::JoinHandle<()>,
}

impl FileWatcher {
    /// Watch `root` recursively and call `on_change` after `debounce` of
    /// quiet following one or more relevant events.
    pub fn spawn(
        root: &Path,
        debounce: Duration,
        on_change: impl Fn() + Send + 'static,
    ) -> notify::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<Event>();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    let relevant = event.paths.iter().any(|p| is_cpp_source(p));
                    if relevant {
                        let _ = tx.send(event);
                    }
                }
                Err(e) => warn!("watch error: {e}"),
            }
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        debug!("watching {} for changes", root.display());

        let thread = std::thread::spawn(move || {
            // Block for the first event, then drain until quiet.
            while rx.recv().is_ok() {
                loop {
                    match rx.recv_timeout(debounce) {
                        Ok(_) => continue,
                        Err(RecvTimeoutError::Timeout) => break,
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
                debug!("change burst settled, triggering refresh");
                on_change();
            }
        });

        Ok(Self {
            _watcher: watcher,
            _thread: thread,
        })
    }
}
