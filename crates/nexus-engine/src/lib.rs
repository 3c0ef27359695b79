//! Request fan-out, the per-chunk state machine, and device lifecycle:
//! the part of Nexus that turns a caller's block request into sub-I/Os,
//! drives each chunk through its transform/agent pipeline, and serializes
//! all of it under one per-device lock (spec.md §3-§5).
//!
//! `nexus-cache` owns the chunk table's shape; `nexus-transform` owns the
//! compress/pad/encrypt pipeline; `nexus-protocol` owns the agent wire
//! format. This crate is the orchestrator that holds the lock across all
//! three and publishes the [`device::Device`] handle callers submit
//! requests through.

pub mod backing_store;
pub mod device;
pub mod error;
pub mod fanout;
pub mod params;
pub mod sg;
mod state_machine;
pub mod worker;

pub use backing_store::{BackingStore, FileBackingStore, MemBackingStore};
pub use device::{ChannelStream, Device, DeviceStats, RequestOutcome};
pub use error::{EngineError, IoError};
pub use fanout::{BlockRequest, Direction};
pub use params::{DeviceParams, ParamsError, MAX_CHUNKS_PER_IO, MAX_CHUNKSIZE, MAX_SEGS_PER_IO, MIN_CONCURRENT_REQS};
pub use sg::Segment;
