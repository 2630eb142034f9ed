//! Work ledger
//!
//! The ledger is the authoritative set of pending work units, keyed by id.
//! A unit leaves the ledger the moment it is handed to a worker; there is no
//! in-flight state. Keys are unique, so inserting an id that is already
//! pending replaces the old unit in place.

use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// One capture to perform: a target and the id its result is stored under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// `<target-id>-<sample>`
    pub id: String,
    /// Locator handed to the worker
    pub target: String,
}

impl WorkUnit {
    pub fn new(id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target: target.into(),
        }
    }
}

/// Pending work, keyed by unit id
#[derive(Debug, Default)]
pub struct WorkLedger {
    units: IndexMap<String, WorkUnit>,
}

impl WorkLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a unit, replacing any pending unit with the same id
    ///
    /// Returns the replaced unit, if any.
    pub fn insert(&mut self, unit: WorkUnit) -> Option<WorkUnit> {
        self.units.insert(unit.id.clone(), unit)
    }

    /// Remove a pending unit by id
    pub fn remove(&mut self, id: &str) -> Option<WorkUnit> {
        self.units.shift_remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&WorkUnit> {
        self.units.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Pending ids in insertion order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }

    /// Take the unit chosen by `policy` out of the ledger
    pub fn take_next(&mut self, policy: &mut dyn SelectionPolicy) -> Option<WorkUnit> {
        if self.units.is_empty() {
            return None;
        }
        policy.select(self)
    }

    /// Remove and return the oldest pending unit
    pub fn pop_oldest(&mut self) -> Option<WorkUnit> {
        self.units.shift_remove_index(0).map(|(_, unit)| unit)
    }

    /// Remove and return the unit at `index`, moving the last unit into its slot
    pub fn swap_take(&mut self, index: usize) -> Option<WorkUnit> {
        self.units.swap_remove_index(index).map(|(_, unit)| unit)
    }
}

/// Chooses which pending unit the next poll receives
///
/// Selection is deliberately unprioritized: any pending unit is a valid
/// answer. Implementations only differ in determinism and cost.
pub trait SelectionPolicy: Send {
    /// Remove one unit from a non-empty ledger and return it
    fn select(&mut self, ledger: &mut WorkLedger) -> Option<WorkUnit>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Hands out units in insertion order
#[derive(Debug, Default)]
pub struct FirstPending;

impl SelectionPolicy for FirstPending {
    fn select(&mut self, ledger: &mut WorkLedger) -> Option<WorkUnit> {
        ledger.pop_oldest()
    }

    fn name(&self) -> &'static str {
        "ordered"
    }
}

/// Hands out a uniformly random pending unit
#[derive(Debug)]
pub struct RandomPending {
    rng: StdRng,
}

impl RandomPending {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible selection sequence
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomPending {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionPolicy for RandomPending {
    fn select(&mut self, ledger: &mut WorkLedger) -> Option<WorkUnit> {
        if ledger.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..ledger.len());
        ledger.swap_take(index)
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
