//! Coordinator module
//!
//! Owns all mutable collection state behind a single lock:
//!
//! - the work ledger (pending units)
//! - the worker registry (identities seen)
//! - the completed counter
//!
//! `Coordinator::poll` is the only mutating entry point. It records the
//! worker, takes in the worker's previous result, and hands out the next
//! unit, all inside one critical section, so no caller ever observes a
//! half-applied transition.
//!
//! Handed-out units leave the ledger immediately. A worker that vanishes
//! takes its unit with it for the rest of the process lifetime; restarting
//! the coordinator regenerates every unit whose result file is missing.

pub mod ledger;
pub mod progress;
pub mod registry;
pub mod store;

use crate::error::CollectError;
use crate::target::{toggle_www, LoadedWork};
use ledger::{SelectionPolicy, WorkLedger, WorkUnit};
use log::{debug, info};
use parking_lot::Mutex;
use registry::WorkerRegistry;
use store::ResultStore;

/// Parameters attached to every assignment and result check
#[derive(Debug, Clone)]
pub struct AssignmentSettings {
    /// Seconds a worker may spend on one capture; also the idle back-off
    pub timeout_secs: i64,
    /// Ask workers to capture all traffic
    pub all_traffic: bool,
    /// Payloads shorter than this are failed captures
    pub min_payload_len: usize,
}

/// Result reported by a worker for its previous assignment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    /// Unit id; empty on first contact
    pub id: String,
    /// Target the worker captured
    pub target: String,
    /// Captured data
    pub payload: Vec<u8>,
}

impl Report {
    /// Report sent on first contact
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_none(&self) -> bool {
        self.id.is_empty()
    }
}

/// Next unit for a worker, or the "no work" sentinel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Unit id; empty means nothing is pending
    pub id: String,
    pub target: String,
    pub timeout_secs: i64,
    pub all_traffic: bool,
}

impl Assignment {
    /// Sentinel telling the worker to sleep `timeout_secs` and poll again
    pub fn idle(timeout_secs: i64) -> Self {
        Self {
            id: String::new(),
            target: String::new(),
            timeout_secs,
            all_traffic: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.id.is_empty()
    }
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub completed: u64,
    pub pending: usize,
    pub workers: usize,
    pub total: u64,
}

impl ProgressSnapshot {
    pub fn is_finished(&self) -> bool {
        self.completed >= self.total
    }

    /// Completion percentage (100 when there is nothing to do)
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }
}

struct CoordinatorState {
    ledger: WorkLedger,
    registry: WorkerRegistry,
    completed: u64,
    policy: Box<dyn SelectionPolicy>,
}

/// Work-distribution coordinator
pub struct Coordinator {
    settings: AssignmentSettings,
    store: ResultStore,
    total: u64,
    state: Mutex<CoordinatorState>,
}

impl Coordinator {
    /// Create a coordinator from the loader's output
    pub fn new(
        work: LoadedWork,
        store: ResultStore,
        settings: AssignmentSettings,
        policy: Box<dyn SelectionPolicy>,
    ) -> Self {
        Self {
            settings,
            store,
            total: work.total,
            state: Mutex::new(CoordinatorState {
                ledger: work.ledger,
                registry: WorkerRegistry::new(),
                completed: work.completed,
                policy,
            }),
        }
    }

    /// Report the previous result and receive the next assignment
    ///
    /// The whole call runs under the coordinator lock. A store failure
    /// aborts the call: the reported unit is neither counted nor re-queued,
    /// and no new unit is handed out.
    pub fn poll(&self, worker_id: &str, previous: &Report) -> Result<Assignment, CollectError> {
        let mut state = self.state.lock();

        if state.registry.observe(worker_id) {
            info!("worker reporting for work: {}", worker_id);
        }

        if !previous.is_none() {
            if previous.payload.len() >= self.settings.min_payload_len {
                self.store.store(&previous.id, &previous.payload)?;
                state.completed += 1;

                // Only reachable when a restart re-created a unit that was
                // already out with a worker
                if state.ledger.remove(&previous.id).is_some() {
                    debug!("dropped re-created unit {} after late result", previous.id);
                }
            } else {
                let retry = WorkUnit::new(previous.id.clone(), toggle_www(&previous.target));
                debug!(
                    "short result for {} ({} bytes), retrying as {}",
                    previous.id,
                    previous.payload.len(),
                    retry.target
                );
                state.ledger.insert(retry);
            }
        }

        let state = &mut *state;
        match state.ledger.take_next(state.policy.as_mut()) {
            Some(unit) => Ok(Assignment {
                id: unit.id,
                target: unit.target,
                timeout_secs: self.settings.timeout_secs,
                all_traffic: self.settings.all_traffic,
            }),
            None => Ok(Assignment::idle(self.settings.timeout_secs)),
        }
    }

    /// Copy the counters without holding the lock past the copy
    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock();
        ProgressSnapshot {
            completed: state.completed,
            pending: state.ledger.len(),
            workers: state.registry.count(),
            total: self.total,
        }
    }

    /// Name of the active selection policy
    pub fn policy_name(&self) -> &'static str {
        self.state.lock().policy.name()
    }
}
