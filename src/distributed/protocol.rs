//! Poll protocol
//!
//! Workers talk to the coordinator over a plain TCP connection carrying
//! MessagePack (rmp-serde) frames. A connection may carry any number of
//! request/response pairs.
//!
//! # Protocol Version
//!
//! Current version: 1
//!
//! # Message Flow
//!
//! ```text
//! Worker                          Coordinator
//!   |                                  |
//!   |-- POLL(worker_id, previous) ---->|   previous.id == "" on first contact
//!   |<--------- ASSIGNMENT ------------|   id == "" means: sleep timeout_secs
//!   |                                  |
//!   |   ... capture assignment ...     |
//!   |                                  |
//!   |-- POLL(worker_id, result) ------>|
//!   |<--------- ASSIGNMENT ------------|
//!   |                                  |
//!   |-- POLL(...) -------------------->|   store failed
//!   |<--------- ERROR -----------------|
//! ```
//!
//! # Message Framing
//!
//! Each message is prefixed with a 4-byte length field (little-endian u32):
//!
//! ```text
//! [4 bytes: message length][N bytes: MessagePack message]
//! ```

use crate::coordinator::{Assignment, Report};
use crate::error::CollectError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version
///
/// Increment this when making breaking changes to the protocol.
/// Coordinator and workers must have matching protocol versions.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame either side accepts (100MB)
pub const MAX_MESSAGE_LEN: usize = 100 * 1024 * 1024;

/// Protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Worker reports its previous result and asks for work
    Poll(PollMessage),

    /// Coordinator hands out the next unit (or the idle sentinel)
    Assignment(Browse),

    /// Poll failed; the worker should retry with the same previous result
    Error(ErrorMessage),
}

/// Poll request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollMessage {
    /// Protocol version (must match)
    pub protocol_version: u32,

    /// Self-reported worker identity
    pub worker_id: String,

    /// Result of the previous assignment (empty id on first contact)
    pub previous: Browse,
}

/// A unit of work on the wire, in either direction
///
/// If `id` is empty, no work has been done (request) or none is available
/// (response).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Browse {
    pub id: String,
    pub target: String,
    pub timeout_secs: i64,
    #[serde(with = "serde_payload")]
    pub payload: Vec<u8>,
    pub all_traffic: bool,
}

impl Browse {
    /// Report carried by this message
    pub fn into_report(self) -> Report {
        Report {
            id: self.id,
            target: self.target,
            payload: self.payload,
        }
    }

    /// Strip the message down to its assignment fields
    pub fn into_assignment(self) -> Assignment {
        Assignment {
            id: self.id,
            target: self.target,
            timeout_secs: self.timeout_secs,
            all_traffic: self.all_traffic,
        }
    }
}

impl From<Assignment> for Browse {
    fn from(assignment: Assignment) -> Self {
        Self {
            id: assignment.id,
            target: assignment.target,
            timeout_secs: assignment.timeout_secs,
            payload: Vec::new(),
            all_traffic: assignment.all_traffic,
        }
    }
}

/// Error message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error description
    pub error: String,
}

// Payloads go out as a MessagePack bin instead of an array of integers
mod serde_payload {
    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(payload)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_byte_buf(PayloadVisitor)
    }

    struct PayloadVisitor;

    impl<'de> Visitor<'de> for PayloadVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a byte payload")
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Vec<u8>, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Vec<u8>, E> {
            Ok(v)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<u8>, A::Error> {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(4096));
            while let Some(b) = seq.next_element()? {
                out.push(b);
            }
            Ok(out)
        }
    }
}

/// Serialize a message to bytes
///
/// Prepends a 4-byte length field for framing.
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>> {
    let msg_bytes = rmp_serde::to_vec(msg)
        .context("Failed to serialize message")?;

    if msg_bytes.len() > MAX_MESSAGE_LEN {
        return Err(CollectError::FrameTooLarge {
            len: msg_bytes.len(),
            max: MAX_MESSAGE_LEN,
        }
        .into());
    }

    let msg_len = msg_bytes.len() as u32;
    let mut framed = Vec::with_capacity(4 + msg_bytes.len());
    framed.extend_from_slice(&msg_len.to_le_bytes());
    framed.extend_from_slice(&msg_bytes);

    Ok(framed)
}

/// Read one complete message from a stream
///
/// Returns `Ok(None)` when the peer closed the connection cleanly between
/// messages.
pub async fn read_message<R>(stream: &mut R) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("Failed to read message length"),
    }

    let msg_len = u32::from_le_bytes(len_buf) as usize;
    if msg_len > MAX_MESSAGE_LEN {
        return Err(CollectError::FrameTooLarge {
            len: msg_len,
            max: MAX_MESSAGE_LEN,
        }
        .into());
    }

    let mut msg_buf = vec![0u8; msg_len];
    stream.read_exact(&mut msg_buf).await
        .context("Failed to read message body")?;

    let msg = rmp_serde::from_slice(&msg_buf)
        .context("Failed to deserialize message")?;

    Ok(Some(msg))
}

/// Write a message to a stream and flush it
pub async fn write_message<W>(stream: &mut W, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let framed = serialize_message(msg)?;

    stream.write_all(&framed).await
        .context("Failed to write message")?;

    stream.flush().await
        .context("Failed to flush stream")?;

    Ok(())
}
