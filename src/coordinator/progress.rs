//! Progress reporting
//!
//! Prints a single refreshing console line with completed, pending and
//! worker counts. Each tick copies the counters under the coordinator lock
//! and formats outside it.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo(coordinator: std::sync::Arc<sitecollect::Coordinator>) {
//! use sitecollect::coordinator::progress::ProgressReporter;
//! use std::time::Duration;
//!
//! let reporter = ProgressReporter::new(coordinator, Duration::from_secs(1));
//! let last = reporter.run().await;
//! assert!(last.is_finished());
//! # }
//! ```

use super::{Coordinator, ProgressSnapshot};
use log::info;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Periodic progress printer
pub struct ProgressReporter {
    coordinator: Arc<Coordinator>,
    interval: Duration,
}

impl ProgressReporter {
    pub fn new(coordinator: Arc<Coordinator>, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
        }
    }

    /// Report until every sample is collected
    ///
    /// Returns the snapshot that showed completion. Ending the process is
    /// left to the caller.
    pub async fn run(self) -> ProgressSnapshot {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let snapshot = self.coordinator.snapshot();
            if snapshot.is_finished() {
                println!();
                info!(
                    "finished: {} of {} samples collected",
                    snapshot.completed, snapshot.total
                );
                return snapshot;
            }

            print!("\r{}", format_progress(&snapshot));
            let _ = std::io::stdout().flush();
        }
    }
}

/// Render the console progress line
pub fn format_progress(snapshot: &ProgressSnapshot) -> String {
    format!(
        " {:8} done ({:5.1}%), {:8} left to distribute ({:3} workers)",
        snapshot.completed,
        snapshot.percent(),
        snapshot.pending,
        snapshot.workers
    )
}
