use std::collections::VecDeque;

use nexus_transform::CompressionAlgo;

use crate::error::ChunkError;
use crate::state::ChunkState;

/// Chunk identity. A `u64` rather than `usize` because it is carried
/// verbatim in the wire protocol's `cid` field; conversion to a table slot
/// index happens at the table boundary, not in the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub u64);

/// Fixed page size backing every chunk buffer, matching the block-device
/// page-boundary restriction on scatter/gather I/O.
pub const PAGE_SIZE: usize = 4096;

/// One page of a chunk's plaintext buffer. Boxed so the table can move
/// ownership between the transient-state worker and the record without
/// copying a multi-kilobyte array.
pub type Page = Box<[u8; PAGE_SIZE]>;

/// Opaque identifier for a queued sub-I/O, assigned by the fan-out layer.
/// The cache table only needs to keep these in FIFO order per chunk; it
/// never interprets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterId(pub u64);

/// A single chunk's cache entry: current state plus every field the state
/// machine needs to decide its next transition.
#[derive(Debug)]
pub struct ChunkRecord {
    pub cid: ChunkId,
    pub state: ChunkState,

    /// Integrity tag over the ciphertext, as last supplied by the agent or
    /// computed after a local encrypt.
    pub tag: Vec<u8>,
    /// Convergent key, derived from the plaintext hash once known.
    pub key: Vec<u8>,
    pub compression: CompressionAlgo,
    /// Plaintext length, `0 <= length <= chunksize`.
    pub length: usize,

    pub error: Option<ChunkError>,

    /// Plaintext pages. Empty while the chunk has never been loaded;
    /// `ceil(chunksize / PAGE_SIZE)` pages once populated.
    pub buffer: Vec<Page>,

    /// Sub-I/Os waiting on this chunk, in arrival order. The reserve
    /// contract guarantees only one waiter's operation is ever actively
    /// driving the state machine at a time; the rest are parked here.
    pub waiters: VecDeque<WaiterId>,

    /// `true` while a `GET_META`/`UPDATE_META`/`CHUNK_ERR` message for
    /// this chunk has been sent to the agent and no reply has arrived
    /// yet. Blocks eviction even if the chunk is otherwise `CLEAN`,
    /// since an in-flight agent message references this record by cid.
    pub pending_user_msg: bool,

    /// Intrusive LRU list links, indices into the table's slab. `None`
    /// at either end of the list.
    pub lru_prev: Option<usize>,
    pub lru_next: Option<usize>,
}

impl ChunkRecord {
    #[must_use]
    pub fn new(cid: ChunkId) -> Self {
        Self {
            cid,
            state: ChunkState::Invalid,
            tag: Vec::new(),
            key: Vec::new(),
            compression: CompressionAlgo::None,
            length: 0,
            error: None,
            buffer: Vec::new(),
            waiters: VecDeque::new(),
            pending_user_msg: false,
            lru_prev: None,
            lru_next: None,
        }
    }

    /// A chunk is evictable only when it is `CLEAN`, has no parked
    /// waiters, and has no agent message in flight -- invariant 3.
    #[must_use]
    pub fn is_evictable(&self) -> bool {
        self.state.is_evictable_state() && self.waiters.is_empty() && !self.pending_user_msg
    }

    /// Resets a record back to its just-allocated shape, for reuse after
    /// eviction. Keeps the slab slot, drops everything else.
    pub fn reset(&mut self, cid: ChunkId) {
        self.cid = cid;
        self.state = ChunkState::Invalid;
        self.tag.clear();
        self.key.clear();
        self.compression = CompressionAlgo::None;
        self.length = 0;
        self.error = None;
        self.buffer.clear();
        self.waiters.clear();
        self.pending_user_msg = false;
        self.lru_prev = None;
        self.lru_next = None;
    }
}
