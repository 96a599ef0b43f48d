//! Ports: the seams between the queue and its environment.
//!
//! - `RequestStore`: durable storage of the queue
//! - `Clock` / `IdGenerator`: time and identity, swappable in tests
//! - `QueueObserver`: callbacks into the owning application

pub mod clock;
pub mod id_generator;
pub mod observer;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::observer::QueueObserver;
pub use self::store::RequestStore;
