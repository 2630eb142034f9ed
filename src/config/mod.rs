//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.

pub mod cli;
pub mod toml;
pub mod validator;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Complete run configuration
///
/// Only the section matching the execution mode is consulted at runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Path to the `id,target` table
    pub targets_file: Option<PathBuf>,
    /// Seconds a worker may spend per capture (also the idle back-off)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Number of samples collected per target
    #[serde(default = "default_samples")]
    pub samples: usize,
    /// Directory receiving one file per accepted result
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Scheme applied to targets without one (empty keeps targets bare)
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Ask workers to capture all traffic instead of DNS only
    #[serde(default)]
    pub all_traffic: bool,
    /// Payloads shorter than this are treated as failed captures
    #[serde(default = "default_min_payload_len")]
    pub min_payload_len: usize,
    /// Suffix appended to every output file
    #[serde(default = "default_suffix")]
    pub suffix: String,
    /// Address the poll service binds to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Progress line refresh interval
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// How the next pending unit is chosen
    #[serde(default)]
    pub selection: SelectionMode,
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_samples() -> usize {
    1
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_min_payload_len() -> usize {
    25
}

fn default_suffix() -> String {
    ".pcap".to_string()
}

fn default_listen() -> String {
    "0.0.0.0:55555".to_string()
}

fn default_progress_interval_ms() -> u64 {
    1000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            targets_file: None,
            timeout_secs: default_timeout_secs(),
            samples: default_samples(),
            data_dir: default_data_dir(),
            scheme: default_scheme(),
            all_traffic: false,
            min_payload_len: default_min_payload_len(),
            suffix: default_suffix(),
            listen: default_listen(),
            progress_interval_ms: default_progress_interval_ms(),
            selection: SelectionMode::default(),
        }
    }
}

/// Pending-unit selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// Any pending unit, chosen at random
    Random,
    /// Oldest pending unit first
    Ordered,
}

impl Default for SelectionMode {
    fn default() -> Self {
        SelectionMode::Random
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionMode::Random => write!(f, "random"),
            SelectionMode::Ordered => write!(f, "ordered"),
        }
    }
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Coordinator address (host:port)
    pub coordinator: Option<String>,
    /// Capture program, invoked with the target as its last argument
    pub program: Option<PathBuf>,
    /// Extra arguments placed before the target
    #[serde(default)]
    pub args: Vec<String>,
    /// Launch attempts per assignment
    #[serde(default = "default_attempts")]
    pub attempts: usize,
    /// Output shorter than this counts as a failed attempt
    #[serde(default)]
    pub min_output_len: usize,
}

fn default_attempts() -> usize {
    5
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            coordinator: None,
            program: None,
            args: Vec::new(),
            attempts: default_attempts(),
            min_output_len: 0,
        }
    }
}
