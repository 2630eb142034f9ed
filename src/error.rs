//! Error types for sitecollect
//!
//! Most of the crate propagates `anyhow::Error` with context. The conditions
//! below are the ones callers branch on (startup aborts, per-poll failures
//! reported back to workers, framing violations), so they get a typed enum.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectError {
    /// A row in the target table is missing the target column
    #[error("Malformed row {line} in target table: expected `id,target`, got {fields} field(s)")]
    MalformedRow { line: usize, fields: usize },

    /// A quoted field was never closed
    #[error("Unterminated quoted field on row {line} of target table")]
    UnterminatedQuote { line: usize },

    /// Two rows share an identifier
    #[error("Duplicate identifier '{id}' in target table")]
    DuplicateId { id: String },

    /// A target string could not be parsed as a locator
    #[error("Invalid target '{target}' for id '{id}': {reason}")]
    InvalidTarget {
        id: String,
        target: String,
        reason: String,
    },

    /// Persisting an accepted payload failed
    #[error("Failed to store result for '{id}' at {}: {source}", .path.display())]
    Store {
        id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Peer speaks a different protocol version
    #[error("Protocol version mismatch: coordinator={coordinator}, worker={worker}")]
    ProtocolMismatch { coordinator: u32, worker: u32 },

    /// Frame length exceeds the protocol maximum
    #[error("Message too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },
}
