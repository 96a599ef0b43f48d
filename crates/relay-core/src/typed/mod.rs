//! Typed request API.
//!
//! - `Request`: what callers enqueue (object-safe, stored as `Arc<dyn Request>`)
//! - `Decode`: how a kind rebuilds itself from its representation
//! - `DecoderRegistry`: kind tag -> decoder, consulted on restore
//! - `RequestContext`: the running attempt's handle back to the manager

pub mod context;
pub mod registry;
pub mod request;

pub(crate) use self::context::Heartbeat;
pub use self::context::RequestContext;
pub use self::registry::{DecoderRegistry, RegistryError};
pub use self::request::{Decode, Request};
