//! Worker registry
//!
//! Remembers every worker identity that has polled. Used for progress
//! reporting only; identities carry no permissions.

use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct WorkerRegistry {
    seen: HashSet<String>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a worker, returning `true` the first time it is seen
    pub fn observe(&mut self, worker_id: &str) -> bool {
        if self.seen.contains(worker_id) {
            return false;
        }
        self.seen.insert(worker_id.to_string())
    }

    /// Number of distinct workers seen
    pub fn count(&self) -> usize {
        self.seen.len()
    }
}
