//! TOML configuration file parsing

use super::*;
use crate::config::cli::Cli;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Build the effective configuration: file (if any), then CLI overrides
pub fn load_config(cli: &Cli) -> Result<Config> {
    let config = match cli.config {
        Some(ref path) => parse_toml_file(path)?,
        None => Config::default(),
    };

    merge_cli_with_config(cli, config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    let coordinator = &mut config.coordinator;

    if let Some(ref targets) = cli.targets {
        coordinator.targets_file = Some(targets.clone());
    }
    if let Some(timeout) = cli.timeout {
        coordinator.timeout_secs = timeout;
    }
    if let Some(samples) = cli.samples {
        coordinator.samples = samples;
    }
    if let Some(ref data_dir) = cli.data_dir {
        coordinator.data_dir = data_dir.clone();
    }
    if let Some(ref scheme) = cli.scheme {
        coordinator.scheme = scheme.clone();
    }
    // A flag can only switch full capture on
    if cli.all_traffic {
        coordinator.all_traffic = true;
    }
    if let Some(min_len) = cli.min_payload_len {
        coordinator.min_payload_len = min_len;
    }
    if let Some(ref suffix) = cli.suffix {
        coordinator.suffix = suffix.clone();
    }
    if let Some(ref listen) = cli.listen {
        coordinator.listen = listen.clone();
    }
    if let Some(interval) = cli.progress_interval_ms {
        coordinator.progress_interval_ms = interval;
    }
    if let Some(selection) = cli.selection {
        coordinator.selection = selection;
    }

    let worker = &mut config.worker;

    if let Some(ref connect) = cli.connect {
        worker.coordinator = Some(connect.clone());
    }
    if let Some(ref program) = cli.program {
        worker.program = Some(program.clone());
    }
    if !cli.program_args.is_empty() {
        worker.args = cli.program_args.clone();
    }
    if let Some(attempts) = cli.attempts {
        worker.attempts = attempts;
    }
    if let Some(min_len) = cli.min_output_len {
        worker.min_output_len = min_len;
    }

    Ok(config)
}
