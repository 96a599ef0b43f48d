//! Queue-wide counts and progress views pushed to observers.

use serde::{Deserialize, Serialize};

/// Entry counts, maintained by the engine on every queue mutation.
///
/// `pending` includes in-flight entries: anything not yet terminal.
/// `succeeded` and `permanently_failed` accumulate over the manager's
/// lifetime (until `clear`), so entries removed from the store on success
/// stay counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub succeeded: usize,
    pub permanently_failed: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.pending + self.succeeded + self.permanently_failed
    }
}

/// Snapshot handed to `QueueObserver::on_progress`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub total: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub succeeded: usize,
    pub permanently_failed: usize,

    /// `(succeeded + permanently_failed + Σ in-flight progress) / total`,
    /// 1.0 for an empty queue.
    pub fraction_complete: f64,
}

impl ProgressSummary {
    /// Combine counts with the progress reported by in-flight attempts.
    pub fn from_counts(counts: QueueCounts, in_flight_progress: f64) -> Self {
        let total = counts.total();
        let fraction_complete = if total == 0 {
            1.0
        } else {
            let done = (counts.succeeded + counts.permanently_failed) as f64 + in_flight_progress;
            (done / total as f64).clamp(0.0, 1.0)
        };
        Self {
            total,
            pending: counts.pending,
            in_flight: counts.in_flight,
            succeeded: counts.succeeded,
            permanently_failed: counts.permanently_failed,
            fraction_complete,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.pending == 0
    }
}
