//! Entry records: the in-memory entry, its persisted form, and its public view.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EntryStatus;
use crate::domain::{ErrorKind, RequestError, RequestId, RequestKind, Representation};
use crate::typed::Request;

/// The most recent failure of an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub at: DateTime<Utc>,
    pub kind: ErrorKind,
    pub message: String,
}

impl FailureRecord {
    pub fn new(at: DateTime<Utc>, error: &RequestError) -> Self {
        Self {
            at,
            kind: error.kind(),
            message: error.message().to_string(),
        }
    }
}

/// Persisted form of an entry.
///
/// The request stays a raw JSON value here so a single unreadable request
/// only costs that entry, not the whole stored queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub seq: u64,
    pub status: EntryStatus,

    #[serde(default)]
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<FailureRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,

    pub request: serde_json::Value,
}

/// A request in the queue plus its bookkeeping.
///
/// Design:
/// - This is the single source of truth for an entry's state in memory.
/// - All state transitions go through the methods below.
/// - `representation` is what gets persisted; it is captured at enqueue and
///   refreshed only when the request asks to be re-saved.
#[derive(Clone)]
pub struct QueueEntry {
    pub seq: u64,
    pub id: RequestId,
    pub request: Arc<dyn Request>,
    pub representation: Representation,
    pub status: EntryStatus,

    /// Attempts started so far (including the current one while InFlight).
    pub attempts: u32,

    pub last_failure: Option<FailureRecord>,

    /// Not claimable before this instant.
    pub retry_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn new(
        seq: u64,
        id: RequestId,
        request: Arc<dyn Request>,
        representation: Representation,
    ) -> Self {
        Self {
            seq,
            id,
            request,
            representation: representation.with_id(id),
            status: EntryStatus::Pending,
            attempts: 0,
            last_failure: None,
            retry_at: None,
        }
    }

    /// Rebuild from the persisted form. A stale InFlight status is reset
    /// to Pending: the attempt that owned it died with the old process.
    pub fn restore(
        stored: &StoredEntry,
        id: RequestId,
        request: Arc<dyn Request>,
        representation: Representation,
    ) -> Self {
        let mut entry = Self::new(stored.seq, id, request, representation);
        entry.status = match stored.status {
            EntryStatus::InFlight => EntryStatus::Pending,
            other => other,
        };
        entry.attempts = stored.attempts;
        entry.last_failure = stored.last_failure.clone();
        entry.retry_at = stored.retry_at;
        entry
    }

    pub fn kind(&self) -> &RequestKind {
        self.representation.kind()
    }

    /// Claimable now?
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.retry_at.is_none_or(|at| at <= now)
    }

    /// Mark as in flight (increment attempts).
    pub fn start_attempt(&mut self) {
        self.status = EntryStatus::InFlight;
        self.attempts += 1;
        self.retry_at = None;
    }

    pub fn mark_permanently_failed(&mut self, failure: FailureRecord) {
        self.status = EntryStatus::PermanentlyFailed;
        self.last_failure = Some(failure);
        self.retry_at = None;
    }

    /// Back to Pending, not claimable before `retry_at`.
    pub fn schedule_retry(&mut self, retry_at: DateTime<Utc>, failure: FailureRecord) {
        self.status = EntryStatus::Pending;
        self.retry_at = Some(retry_at);
        self.last_failure = Some(failure);
    }

    /// Owner-initiated second chance for a permanently failed entry.
    pub fn requeue(&mut self) {
        self.status = EntryStatus::Pending;
        self.attempts = 0;
        self.retry_at = None;
    }

    pub fn to_stored(&self) -> StoredEntry {
        StoredEntry {
            seq: self.seq,
            status: self.status,
            attempts: self.attempts,
            last_failure: self.last_failure.clone(),
            retry_at: self.retry_at,
            request: self.representation.to_value(),
        }
    }

    pub fn snapshot(&self, progress: f64) -> EntrySnapshot {
        EntrySnapshot {
            id: self.id,
            kind: self.kind().to_string(),
            seq: self.seq,
            status: self.status,
            attempts: self.attempts,
            last_failure: self.last_failure.clone(),
            retry_at: self.retry_at,
            progress,
        }
    }
}

impl std::fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEntry")
            .field("seq", &self.seq)
            .field("id", &self.id)
            .field("kind", self.kind())
            .field("status", &self.status)
            .field("attempts", &self.attempts)
            .field("retry_at", &self.retry_at)
            .finish_non_exhaustive()
    }
}

/// Read-only view of an entry for callers (inspection, UI).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub id: RequestId,
    pub kind: String,
    pub seq: u64,
    pub status: EntryStatus,
    pub attempts: u32,
    pub last_failure: Option<FailureRecord>,
    pub retry_at: Option<DateTime<Utc>>,

    /// Last progress reported by the running attempt (0.0 when not in flight).
    pub progress: f64,
}
