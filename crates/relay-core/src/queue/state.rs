//! Entry status machine.

use serde::{Deserialize, Serialize};

/// Status of a queue entry.
///
/// State transitions:
/// - Pending -> InFlight -> Succeeded (the entry is removed rather than
///   stored; a stored Succeeded entry is dropped on restore)
/// - Pending -> InFlight -> Pending (retry, claimable after its delay)
/// - Pending -> InFlight -> PermanentlyFailed
/// - InFlight -> Pending on restart (the attempt died with the process)
/// - PermanentlyFailed -> Pending on explicit requeue by the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Waiting to be claimed (possibly after a retry delay).
    Pending,

    /// Claimed by a worker; `perform` is running.
    InFlight,

    /// Completed successfully.
    Succeeded,

    /// Given up on; kept for inspection.
    PermanentlyFailed,
}

impl EntryStatus {
    /// Is this a terminal state (no further automatic transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, EntryStatus::Succeeded | EntryStatus::PermanentlyFailed)
    }

    /// Is this entry eligible for claiming (ignoring retry delay)?
    pub fn is_claimable(self) -> bool {
        matches!(self, EntryStatus::Pending)
    }
}
