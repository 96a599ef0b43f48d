//! Domain model (ids, representations, errors, decisions, progress views).

pub mod decision;
pub mod errors;
pub mod ids;
pub mod progress;
pub mod representation;

pub use decision::{Decider, Decision, DefaultDecider};
pub use errors::{DecodeError, EncodeError, ErrorKind, QueueError, RequestError, StorageError};
pub use ids::RequestId;
pub use progress::{ProgressSummary, QueueCounts};
pub use representation::{Representation, RequestKind};
