//! sitecollect CLI entry point

use anyhow::{Context, Result};
use log::info;
use sitecollect::config::cli::{Cli, ExecutionMode};
use sitecollect::config::validator::{validate_coordinator, validate_worker};
use sitecollect::config::{toml::load_config, CoordinatorConfig, SelectionMode, WorkerConfig};
use sitecollect::coordinator::ledger::{FirstPending, RandomPending, SelectionPolicy};
use sitecollect::coordinator::progress::ProgressReporter;
use sitecollect::coordinator::store::ResultStore;
use sitecollect::coordinator::{AssignmentSettings, Coordinator};
use sitecollect::distributed::{CommandCapture, CoordinatorService, WorkerService};
use sitecollect::target::{read_table, TargetLoader};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    let config = load_config(&cli)?;

    match cli.mode {
        ExecutionMode::Coordinator => run_coordinator(config.coordinator),
        ExecutionMode::Worker => run_worker(config.worker),
    }
}

/// Load the work, serve polls, exit once every sample is collected
fn run_coordinator(config: CoordinatorConfig) -> Result<()> {
    validate_coordinator(&config)?;

    // make sure we can write to the data dir before doing anything else
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create datadir ({})", config.data_dir.display()))?;

    let targets_file = config.targets_file.as_ref()
        .context("need to specify file with targets as argument")?;
    let rows = read_table(targets_file)?;

    let store = ResultStore::new(&config.data_dir, config.suffix.clone());
    let work = TargetLoader::new(config.samples, config.scheme.clone())
        .load(&rows, &store)
        .context("failed to create work")?;

    info!(
        "collecting {} sample(s) of {} sites over {}",
        config.samples,
        rows.len(),
        if config.scheme.is_empty() { "bare targets" } else { config.scheme.as_str() }
    );
    if config.all_traffic {
        info!(
            "{} seconds timeout, results in \"{}\", full capture",
            config.timeout_secs,
            config.data_dir.display()
        );
    } else {
        info!(
            "{} seconds timeout, results in \"{}\", only capturing DNS",
            config.timeout_secs,
            config.data_dir.display()
        );
    }
    info!(
        "{} sample(s) already collected, {} to distribute",
        work.completed,
        work.ledger.len()
    );

    let policy: Box<dyn SelectionPolicy> = match config.selection {
        SelectionMode::Random => Box::new(RandomPending::new()),
        SelectionMode::Ordered => Box::new(FirstPending),
    };

    let settings = AssignmentSettings {
        timeout_secs: i64::try_from(config.timeout_secs).context("timeout out of range")?,
        all_traffic: config.all_traffic,
        min_payload_len: config.min_payload_len,
    };

    let coordinator = Arc::new(Coordinator::new(work, store, settings, policy));
    info!("selecting pending work: {}", coordinator.policy_name());

    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    let result = runtime.block_on(async {
        let service = CoordinatorService::new(Arc::clone(&coordinator));
        let reporter = ProgressReporter::new(
            Arc::clone(&coordinator),
            Duration::from_millis(config.progress_interval_ms),
        );

        tokio::select! {
            served = service.run(&config.listen) => served,
            _ = reporter.run() => Ok(()),
        }
    });

    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

/// Poll the coordinator and run captures until killed
fn run_worker(config: WorkerConfig) -> Result<()> {
    validate_worker(&config)?;

    let addr = config.coordinator
        .context("need to specify coordinator address with --connect")?;
    let program = config.program
        .context("need to specify capture program with --program")?;

    let capture = CommandCapture::new(program, config.args)
        .with_attempts(config.attempts)
        .with_min_output_len(config.min_output_len);

    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(WorkerService::new(addr, capture).run())
}
