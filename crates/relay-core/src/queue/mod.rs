//! Queue module: entry state machine, records, retry schedule, ordered queue.

mod entries;
mod record;
mod retry;
mod state;

pub use entries::EntryQueue;
pub use record::{EntrySnapshot, FailureRecord, QueueEntry, StoredEntry};
pub use retry::RetryPolicy;
pub(crate) use retry::millis;
pub use state::EntryStatus;
