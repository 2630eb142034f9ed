//! Configuration validation

use super::*;
use anyhow::Result;

/// Validate coordinator configuration
pub fn validate_coordinator(config: &CoordinatorConfig) -> Result<()> {
    if config.targets_file.is_none() {
        anyhow::bail!("need to specify file with targets as argument");
    }

    if config.samples == 0 {
        anyhow::bail!("samples must be at least 1");
    }

    if config.timeout_secs == 0 {
        anyhow::bail!("timeout must be at least 1 second");
    }

    // An empty suffix would let an id collide with a directory name
    if config.suffix.is_empty() {
        anyhow::bail!("output suffix must not be empty");
    }

    validate_scheme(&config.scheme)?;

    if config.progress_interval_ms == 0 {
        anyhow::bail!("progress interval must be greater than 0 ms");
    }

    if i64::try_from(config.timeout_secs).is_err() {
        anyhow::bail!("timeout {} seconds is out of range", config.timeout_secs);
    }

    Ok(())
}

/// Validate the default scheme (empty means "leave bare targets alone")
fn validate_scheme(scheme: &str) -> Result<()> {
    if scheme.is_empty() {
        return Ok(());
    }

    let mut chars = scheme.chars();
    let starts_alpha = chars.next().map_or(false, |c| c.is_ascii_alphabetic());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !starts_alpha || !rest_ok {
        anyhow::bail!("invalid scheme '{}'", scheme);
    }

    Ok(())
}

/// Validate worker configuration
pub fn validate_worker(config: &WorkerConfig) -> Result<()> {
    if config.coordinator.is_none() {
        anyhow::bail!("need to specify coordinator address with --connect");
    }

    if config.program.is_none() {
        anyhow::bail!("need to specify capture program with --program");
    }

    if config.attempts == 0 {
        anyhow::bail!("attempts must be at least 1");
    }

    Ok(())
}
