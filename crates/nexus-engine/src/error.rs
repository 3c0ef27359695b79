use thiserror::Error;

use nexus_cache::ChunkErrorKind;

/// The error a sub-I/O caller observes when its chunk settles in
/// `ERROR_USER`/`ERROR` instead of reaching the state it needed
/// (spec.md §7: "Sub-I/O callers see `Ok` when their chunk reaches the
/// satisfying state, else `IoError`"). Carries the classified kind and
/// direction so callers and tests can assert on the specific failure
/// instead of string-matching.
#[derive(Debug, Clone, Error)]
#[error("chunk {cid} failed ({kind:?}, write={is_write})")]
pub struct IoError {
    pub cid: u64,
    pub kind: ChunkErrorKind,
    pub is_write: bool,
}

/// Errors the engine itself can raise outside the per-chunk error
/// taxonomy: admission control, shutdown races, and malformed requests.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No chunk-table slot is currently evictable. Spec.md §4.2's
    /// `WouldBlock`: the caller must stop its submission queue and park
    /// on the device waitqueue.
    #[error("no cache slot available, retry once a chunk becomes evictable")]
    WouldBlock,

    /// The device has begun or completed shutdown and rejects new
    /// submissions (spec.md §4.5 "Shutdown": "the engine stops accepting
    /// new requests").
    #[error("device is shutting down")]
    ShuttingDown,

    /// A request descriptor violated a declared limit.
    #[error("request spans {0} chunks, exceeding MAX_CHUNKS_PER_IO")]
    TooManyChunks(usize),

    #[error("request uses {0} scatter/gather segments, exceeding MAX_SEGS_PER_IO")]
    TooManySegments(usize),

    #[error("chunk id {0} is out of range for a device with {1} chunks")]
    ChunkOutOfRange(u64, u64),

    #[error(transparent)]
    Params(#[from] crate::params::ParamsError),
}
