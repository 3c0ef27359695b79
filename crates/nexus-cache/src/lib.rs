//! Bounded chunk cache table: slab-allocated records, LRU eviction
//! restricted to idle `CLEAN` chunks, and the at-most-one-waiter-drives-
//! the-state-machine bookkeeping the rest of the engine builds on.
//!
//! This crate owns no lock of its own. The device lock in `nexus-engine`
//! is held for the duration of every call into [`table::ChunkTable`].

pub mod error;
pub mod record;
pub mod state;
pub mod table;

pub use error::{ChunkError, ChunkErrorKind, TableError};
pub use record::{ChunkId, ChunkRecord, Page, WaiterId, PAGE_SIZE};
pub use state::ChunkState;
pub use table::ChunkTable;
