//! QueueObserver port: how the owning application hears about the queue.
//!
//! The manager holds observers weakly; dropping the application's `Arc`
//! silently unsubscribes it. Callbacks run on worker tasks with no queue lock
//! held, so they may call back into the manager.

use crate::domain::{ProgressSummary, RequestError, RequestId};

pub trait QueueObserver: Send + Sync {
    /// Aggregate progress changed.
    fn on_progress(&self, _summary: &ProgressSummary) {}

    /// The manager started or stopped dispatching because connectivity changed.
    fn on_connection_status(&self, _connected: bool) {}

    fn on_request_finished(&self, _id: RequestId) {}

    /// Called once an entry is permanently failed (retained or not).
    fn on_request_failed(&self, _id: RequestId, _error: &RequestError) {}

    /// Last word on a retry the request itself asked for. Returning `false`
    /// turns the failure permanent (e.g. the user has to re-authenticate first).
    fn should_reattempt(&self, _id: RequestId, _error: &RequestError) -> bool {
        true
    }
}
