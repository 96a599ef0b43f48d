//! Error taxonomy.
//!
//! - `RequestError`: what a `perform` attempt reports. Only ever travels
//!   through the attempt's result, never across the queue boundary.
//! - `DecodeError`: a stored entry cannot be turned back into a request.
//!   The entry is dropped and logged, never retried.
//! - `EncodeError`: a request cannot produce its representation (a bug in
//!   the request kind), reported to the caller of `enqueue`.
//! - `StorageError`: the persistence medium failed. Logged; the in-memory
//!   queue stays authoritative until the next successful save.
//! - `QueueError`: manager operation failures.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::RequestId;

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network / server hiccup. Retry recommended.
    Transient,
    /// The attempt exceeded its time limit.
    Timeout,
    /// Business-rule rejection or resource gone. Retrying is pointless.
    Permanent,
    /// The request could not classify the failure.
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by `Request::perform`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} failure: {message}")]
pub struct RequestError {
    kind: ErrorKind,
    message: String,
}

impl RequestError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Default resubmission answer: everything except `Permanent`.
    pub fn is_retryable(&self) -> bool {
        self.kind != ErrorKind::Permanent
    }
}

/// A stored representation could not be turned back into a request.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("representation is not a JSON object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("no decoder registered for kind '{0}'")]
    UnknownKind(String),

    #[error("kind mismatch: expected '{expected}', found '{found}'")]
    KindMismatch { expected: String, found: String },

    #[error("payload does not match kind '{kind}': {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A request could not produce its representation.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("payload must encode to a JSON object")]
    NotAnObject,

    #[error("payload uses reserved field '{0}'")]
    ReservedField(&'static str),

    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The persistence medium failed.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored queue is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("unsupported store format version {0}")]
    UnsupportedVersion(u32),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Manager operation failures.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("request could not be encoded: {0}")]
    Encode(#[from] EncodeError),

    #[error("request {0} is not queued")]
    NotFound(RequestId),

    /// The id is live in the queue, or a cancelled attempt of it is still running.
    #[error("request {0} is already queued")]
    AlreadyQueued(RequestId),

    #[error("request {0} has not permanently failed")]
    NotFailed(RequestId),

    #[error("manager has not been started")]
    NotStarted,

    #[error("manager is already started")]
    AlreadyStarted,

    #[error("manager is shut down")]
    ShutDown,
}
