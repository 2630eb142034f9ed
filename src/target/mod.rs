//! Target loading
//!
//! Turns the `id,target` table into the initial work ledger:
//!
//! - every target is normalized into a URL (default scheme applied when the
//!   table omits one)
//! - every target is expanded into one work unit per sample, `<id>-<sample>`
//! - samples whose result file already exists are counted as completed
//!   instead of queued, so an interrupted collection resumes where it stopped

pub mod table;

pub use table::{parse_table, read_table, TargetRow};

use crate::coordinator::ledger::{WorkLedger, WorkUnit};
use crate::coordinator::store::ResultStore;
use crate::error::CollectError;
use std::collections::HashSet;
use url::{Host, Url};

/// Work derived from the target table at startup
#[derive(Debug)]
pub struct LoadedWork {
    /// Units still to be collected
    pub ledger: WorkLedger,
    /// Samples already present in the data directory
    pub completed: u64,
    /// rows × samples
    pub total: u64,
}

/// Expands target rows into work units
#[derive(Debug, Clone)]
pub struct TargetLoader {
    samples: usize,
    scheme: String,
}

impl TargetLoader {
    /// Create a loader
    ///
    /// # Arguments
    ///
    /// * `samples` - Number of samples per target
    /// * `scheme` - Scheme for targets without one; empty leaves them bare
    pub fn new(samples: usize, scheme: impl Into<String>) -> Self {
        Self {
            samples,
            scheme: scheme.into(),
        }
    }

    /// Build the initial ledger
    ///
    /// Every target is validated before any unit is created, so a bad row
    /// aborts the load without partial state. Identifiers must be unique,
    /// otherwise `total` could never be reached.
    pub fn load(&self, rows: &[TargetRow], store: &ResultStore) -> Result<LoadedWork, CollectError> {
        let mut seen = HashSet::with_capacity(rows.len());
        for row in rows {
            if !seen.insert(row.id.as_str()) {
                return Err(CollectError::DuplicateId { id: row.id.clone() });
            }
        }

        let targets = rows
            .iter()
            .map(|row| normalize_target(&row.id, &row.target, &self.scheme))
            .collect::<Result<Vec<_>, _>>()?;

        let mut ledger = WorkLedger::new();
        let mut completed = 0u64;

        for sample in 0..self.samples {
            for (row, target) in rows.iter().zip(&targets) {
                let id = unit_id(&row.id, sample);
                if store.exists(&id) {
                    completed += 1;
                    continue;
                }
                ledger.insert(WorkUnit::new(id, target.clone()));
            }
        }

        Ok(LoadedWork {
            ledger,
            completed,
            total: (rows.len() * self.samples) as u64,
        })
    }
}

/// Work unit id for one sample of a target
pub fn unit_id(target_id: &str, sample: usize) -> String {
    format!("{}-{}", target_id, sample)
}

/// Normalize a target into a well-formed locator
///
/// Targets carrying a scheme are parsed as-is. Bare targets get `scheme`
/// prepended; with an empty `scheme` they are validated as if they were
/// `http` URLs but returned unchanged.
pub fn normalize_target(id: &str, raw: &str, scheme: &str) -> Result<String, CollectError> {
    let raw = raw.trim();
    let invalid = |reason: String| CollectError::InvalidTarget {
        id: id.to_string(),
        target: raw.to_string(),
        reason,
    };

    if raw.is_empty() {
        return Err(invalid("empty target".to_string()));
    }

    if has_scheme(raw) {
        let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
        return Ok(url.to_string());
    }

    if scheme.is_empty() {
        Url::parse(&format!("http://{}", raw)).map_err(|e| invalid(e.to_string()))?;
        return Ok(raw.to_string());
    }

    let url = Url::parse(&format!("{}://{}", scheme, raw)).map_err(|e| invalid(e.to_string()))?;
    Ok(url.to_string())
}

/// Whether `raw` starts with `<scheme>://`
///
/// Only the leading token counts, so a URL inside the query of a bare
/// target does not make it absolute. `host:port` is not a scheme either.
fn has_scheme(raw: &str) -> bool {
    let end = raw
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')))
        .unwrap_or(raw.len());
    let (scheme, rest) = raw.split_at(end);

    scheme.starts_with(|c: char| c.is_ascii_alphabetic()) && rest.starts_with("://")
}

/// Flip the presence of a leading `www.` on a target
///
/// For URLs with a domain host the prefix is toggled on the host. URLs with
/// an IP host (or none) have nothing to toggle and come back unchanged. Bare
/// targets toggle the literal string prefix.
pub fn toggle_www(target: &str) -> String {
    if !has_scheme(target) {
        return toggle_prefix(target);
    }

    let Ok(mut url) = Url::parse(target) else {
        return toggle_prefix(target);
    };
    let domain = match url.host() {
        Some(Host::Domain(domain)) => domain.to_string(),
        _ => return target.to_string(),
    };

    let toggled = toggle_prefix(&domain);
    if !toggled.is_empty() && url.set_host(Some(&toggled)).is_ok() {
        return url.to_string();
    }
    target.to_string()
}

fn toggle_prefix(s: &str) -> String {
    match s.strip_prefix("www.") {
        Some(bare) => bare.to_string(),
        None => format!("www.{}", s),
    }
}
