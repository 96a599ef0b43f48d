//! relay-core
//!
//! Offline-resilient request queue: requests are persisted before they run,
//! drained by a bounded worker group while connectivity allows, and retried
//! under a per-request resubmission policy until they succeed or fail for good.
//!
//! # Modules
//! - **domain**: identifiers, encoded representation, errors, decisions, progress views
//! - **typed**: the `Request` contract, `RequestContext`, decoder registry
//! - **queue**: entry records, status machine, retry policy, ordered entry queue
//! - **ports**: store / clock / id generator / observer abstractions
//! - **impls**: JSON file store and in-memory store
//! - **app**: builder, config, engine, worker loop, notifier, manager façade

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod typed;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{BuildError, ConfigError, Manager, ManagerBuilder, ManagerConfig};
pub use domain::{
    DecodeError, EncodeError, ErrorKind, ProgressSummary, QueueError, Representation,
    RequestError, RequestId, RequestKind, StorageError,
};
pub use impls::{JsonFileStore, MemoryStore};
pub use ports::{QueueObserver, RequestStore};
pub use queue::{EntrySnapshot, EntryStatus, RetryPolicy};
pub use typed::{Decode, DecoderRegistry, RegistryError, Request, RequestContext};
