//! Request fan-out: splits an inbound request into per-chunk sub-I/Os,
//! and sequences their completion back to the caller in chunk-index
//! order (spec.md §4.4).

use std::sync::{Arc, Condvar, Mutex};

use nexus_cache::ChunkId;

use crate::error::IoError;
use crate::sg::Segment;

/// Direction of a caller's request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// An inbound request descriptor, matching spec.md §4.4's fields.
pub struct BlockRequest {
    pub first_chunk: ChunkId,
    pub last_chunk: ChunkId,
    /// Byte offset into `first_chunk` where the request begins.
    pub offset: usize,
    /// Total byte length of the request, spanning from `offset` in
    /// `first_chunk` through some prefix of `last_chunk`.
    pub length: usize,
    pub direction: Direction,
    /// Caller memory, read from for writes / written into for reads.
    pub segments: Vec<Segment>,
}

/// Whether a sub-I/O can skip the read/decrypt path (spec.md §4.3: "On a
/// full-chunk overwrite the read/decrypt path is skipped").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubIoKind {
    Read,
    Write { full_chunk: bool },
}

/// The portion of a caller's request that targets one chunk id.
pub struct SubIo {
    pub parent_index: usize,
    pub cid: ChunkId,
    pub kind: SubIoKind,
    pub chunk_offset: usize,
    pub len: usize,
}

/// Splits `req` into one [`SubIo`] per chunk in `[first_chunk,
/// last_chunk]`, classifying each as a full-chunk write only when it
/// covers the chunk's entire `chunksize` (spec.md §4.4 step 2).
#[must_use]
pub fn split_request(req: &BlockRequest, chunksize: usize) -> Vec<SubIo> {
    let first = req.first_chunk.0;
    let last = req.last_chunk.0;
    let mut subios = Vec::with_capacity((last - first + 1) as usize);
    let mut remaining = req.length;
    let mut chunk_offset = req.offset;

    for (idx, cid) in (first..=last).enumerate() {
        let len = (chunksize - chunk_offset).min(remaining);
        let kind = match req.direction {
            Direction::Read => SubIoKind::Read,
            Direction::Write => SubIoKind::Write { full_chunk: chunk_offset == 0 && len == chunksize },
        };
        subios.push(SubIo { parent_index: idx, cid: ChunkId(cid), kind, chunk_offset, len });
        remaining -= len;
        chunk_offset = 0;
    }
    debug_assert_eq!(remaining, 0, "request length did not fit between first_chunk and last_chunk");
    subios
}

/// Delivers each sub-I/O's result to a caller-supplied callback in
/// strictly increasing `parent_index` order, even though sub-I/Os
/// complete out of order internally (spec.md §4.4 "Completion
/// ordering", invariant 7).
///
/// Modeled on `oxcrypt-fuse::scheduler::per_file::PerFileOrdering`,
/// generalized from "structural ops on one inode" to "sub-I/Os of one
/// parent request."
pub type SubIoResult = Result<Vec<u8>, IoError>;

pub struct CompletionTracker {
    inner: Mutex<TrackerState>,
    cv: Condvar,
}

struct TrackerState {
    results: Vec<Option<SubIoResult>>,
    next_to_emit: usize,
}

impl CompletionTracker {
    #[must_use]
    pub fn new(total: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(TrackerState { results: vec![None; total], next_to_emit: 0 }),
            cv: Condvar::new(),
        })
    }

    /// Records the internal completion of sub-I/O `index`. May be called
    /// from any worker or reader thread, in any order. `result` carries the
    /// plaintext read back for a read sub-I/O, or an empty `Vec` for a
    /// write.
    pub fn complete(&self, index: usize, result: SubIoResult) {
        let mut st = self.inner.lock().unwrap();
        st.results[index] = Some(result);
        self.cv.notify_all();
    }

    /// Blocks the caller, invoking `on_complete(index, result)` once per
    /// sub-I/O strictly in index order, until every sub-I/O has been
    /// delivered. Returns the full ordered result set.
    pub fn drain_in_order(&self, mut on_complete: impl FnMut(usize, &SubIoResult)) -> Vec<SubIoResult> {
        let total = {
            let st = self.inner.lock().unwrap();
            st.results.len()
        };
        let mut delivered = Vec::with_capacity(total);
        let mut st = self.inner.lock().unwrap();
        while st.next_to_emit < total {
            while st.results[st.next_to_emit].is_none() {
                st = self.cv.wait(st).unwrap();
            }
            let result = st.results[st.next_to_emit].clone().expect("just checked Some");
            on_complete(st.next_to_emit, &result);
            delivered.push(result);
            st.next_to_emit += 1;
        }
        delivered
    }
}
