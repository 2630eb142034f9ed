//! sitecollect - work-distribution coordinator for capture workers
//!
//! A single coordinator owns the list of pending captures (one per target and
//! sample), hands them out one per worker poll, stores accepted results under
//! the data directory and re-queues results that look incomplete with an
//! alternate hostname.
//!
//! # Architecture
//!
//! - **Target loading**: `id,target` table expanded into per-sample work units,
//!   skipping samples already on disk
//! - **Coordinator**: ledger, worker registry, result store and progress
//!   reporting behind one lock
//! - **Distributed mode**: TCP service speaking a length-prefixed MessagePack
//!   protocol, plus the worker-side poll loop

pub mod config;
pub mod coordinator;
pub mod distributed;
pub mod error;
pub mod target;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::Coordinator;
pub use error::CollectError;

/// Result type used throughout sitecollect
pub type Result<T> = anyhow::Result<T>;
