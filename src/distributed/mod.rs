//! Distributed mode implementation
//!
//! # Architecture
//!
//! - **Coordinator service**: TCP front end of the coordinator; answers polls
//! - **Worker service**: runs on capture machines, polls for work and reports
//!   results
//!
//! # Modules
//!
//! - `protocol`: Message definitions and framing
//! - `coordinator`: Coordinator-side connection handling
//! - `worker`: Worker poll loop and capture runners

pub mod protocol;
pub mod coordinator;
pub mod worker;

// Re-export key types
pub use protocol::{
    Browse,
    ErrorMessage,
    Message,
    PollMessage,
    PROTOCOL_VERSION,
};

pub use coordinator::CoordinatorService;
pub use worker::{Capture, CommandCapture, WorkerService};
