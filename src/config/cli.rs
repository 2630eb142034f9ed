//! CLI argument parsing using clap

use super::SelectionMode;
use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Coordinator mode (default) - distribute work and collect results
    Coordinator,
    /// Worker mode - poll a coordinator and run captures
    Worker,
}

/// sitecollect - distribute website captures over a fleet of workers
#[derive(Parser, Debug)]
#[command(name = "sitecollect")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: coordinator or worker
    #[arg(long, value_enum, default_value = "coordinator")]
    pub mode: ExecutionMode,

    /// TOML configuration file (command-line flags take precedence)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,

    /// File with `id,target` rows (coordinator mode)
    #[arg(value_name = "TARGETS")]
    pub targets: Option<PathBuf>,

    // === Coordinator Options ===
    /// Timeout in seconds for each capture [default: 15]
    #[arg(short = 't', long)]
    pub timeout: Option<u64>,

    /// Number of samples to collect for each target [default: 1]
    #[arg(short = 's', long)]
    pub samples: Option<usize>,

    /// Folder to store results in [default: data]
    #[arg(short = 'f', long)]
    pub data_dir: Option<PathBuf>,

    /// Scheme for targets where none is specified [default: http]
    #[arg(long)]
    pub scheme: Option<String>,

    /// Request that workers capture all traffic
    #[arg(short = 'a', long)]
    pub all_traffic: bool,

    /// Minimum number of bytes to accept as a result from a worker [default: 25]
    #[arg(short = 'm', long)]
    pub min_payload_len: Option<usize>,

    /// Suffix for the output files [default: .pcap]
    #[arg(short = 'o', long)]
    pub suffix: Option<String>,

    /// Address to listen on for worker polls [default: 0.0.0.0:55555]
    #[arg(long)]
    pub listen: Option<String>,

    /// Progress refresh interval in milliseconds [default: 1000]
    #[arg(long)]
    pub progress_interval_ms: Option<u64>,

    /// How the next pending unit is chosen [default: random]
    #[arg(long, value_enum)]
    pub selection: Option<SelectionMode>,

    // === Worker Options ===
    /// Coordinator address to poll (worker mode)
    #[arg(long, value_name = "HOST:PORT")]
    pub connect: Option<String>,

    /// Capture program; receives the target as its last argument (worker mode)
    #[arg(long)]
    pub program: Option<PathBuf>,

    /// Extra argument for the capture program, repeatable (worker mode)
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    pub program_args: Vec<String>,

    /// Capture attempts per assignment [default: 5]
    #[arg(long)]
    pub attempts: Option<usize>,

    /// Capture output shorter than this is retried [default: 0]
    #[arg(long)]
    pub min_output_len: Option<usize>,
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Log level implied by `-v` flags
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}
