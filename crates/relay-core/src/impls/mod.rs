//! Store implementations.
//!
//! - **JsonFileStore**: one versioned JSON file, replaced atomically on save
//! - **MemoryStore**: shared in-process entries with failure injection

pub mod file_store;
pub mod memory_store;

pub use self::file_store::JsonFileStore;
pub use self::memory_store::MemoryStore;
