//! App layer: wires ports into a running request manager.
//!
//! # Components
//! - **ManagerBuilder**: registration, wiring, fail-fast validation
//! - **Manager**: the façade callers hold
//! - **Engine**: queue state, persistence, claim / complete
//! - **WorkerGroup**: bounded workers running attempts under a timeout
//! - **ProgressNotifier**: aggregate progress and observer callbacks

pub mod builder;
pub mod config;
pub(crate) mod engine;
pub mod manager;
pub(crate) mod notifier;
pub(crate) mod worker_loop;

pub use self::builder::{BuildError, ManagerBuilder};
pub use self::config::{ConfigError, ManagerConfig};
pub use self::manager::Manager;
