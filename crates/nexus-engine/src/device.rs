//! A single open device: the chunk table, the agent channel, the worker
//! pool, and the single lock that serializes all three (spec.md §4.6,
//! §5). This is the type `nexus-daemon`'s registry hands callers once a
//! `REGISTER` control call succeeds.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use nexus_cache::{ChunkErrorKind, ChunkId, ChunkState, ChunkTable, WaiterId};
use nexus_protocol::{AgentChannel, AgentQueue, MessageType, ProtocolError};

use crate::error::{EngineError, IoError};
use crate::fanout::{split_request, BlockRequest, CompletionTracker, Direction, Segment, SubIo, SubIoKind};
use crate::params::{DeviceParams, MAX_CHUNKS_PER_IO, MAX_SEGS_PER_IO};
use crate::sg;
use crate::state_machine::{apply_agent_reply, collapse_on_channel_close, drive, fail_record};
use crate::worker::{WorkerPool, WorkerStats, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_THREADS};

/// The transport an agent channel runs over. A device needs two
/// independent handles onto the same underlying stream -- one the reader
/// thread blocks on, one the device lock guards for synchronous sends --
/// so `Clone` here must yield a second handle to the *same* connection,
/// not a new one (an `Arc`-wrapped socket, a duplicated fd, or the
/// `Arc`-backed [`nexus_protocol::testing::DuplexEnd`]).
pub trait ChannelStream: Read + Write + Clone + Send + 'static {}
impl<T: Read + Write + Clone + Send + 'static> ChannelStream for T {}

/// Bookkeeping for one queued sub-I/O, keyed by its [`WaiterId`] in
/// [`DeviceState::waiters`]. The chunk record only stores the id (FIFO
/// order); everything the state machine needs to act on that waiter lives
/// here.
pub(crate) struct WaiterMeta {
    pub cid: ChunkId,
    pub kind: SubIoKind,
    pub chunk_offset: usize,
    pub len: usize,
    /// Plaintext to copy into the chunk buffer on the `-> DIRTY`
    /// transition. `None` for reads.
    pub write_data: Option<Vec<u8>>,
    /// Set once this waiter's data has been copied into the buffer at a
    /// `DIRTY` transition, distinguishing "a write that has not yet
    /// started" from "the write this record is already mid-flight on"
    /// when both present as a `CLEAN`/`ERROR` front waiter.
    pub write_applied: bool,
    pub tracker: Arc<CompletionTracker>,
    pub parent_index: usize,
}

/// Everything the device lock guards: the chunk table, the agent
/// send-side channel and its outstanding-message ring, and the waiter
/// bookkeeping the state machine consults.
pub(crate) struct DeviceState<S: ChannelStream> {
    pub table: ChunkTable,
    pub agent_queue: AgentQueue,
    pub writer: AgentChannel<S>,
    pub waiters: HashMap<WaiterId, WaiterMeta>,
    pub next_waiter_id: u64,
    /// Set once the agent channel has observed a close (peer EOF or
    /// error). Further sends are refused rather than attempted.
    pub closed: bool,
}

impl<S: ChannelStream> DeviceState<S> {
    fn alloc_waiter_id(&mut self) -> WaiterId {
        let id = WaiterId(self.next_waiter_id);
        self.next_waiter_id += 1;
        id
    }
}

pub(crate) struct Inner<S: ChannelStream> {
    pub params: DeviceParams,
    pub backing: Arc<dyn crate::backing_store::BackingStore>,
    pub worker: WorkerPool,
    pub state: Mutex<DeviceState<S>>,
    /// Woken whenever a chunk becomes evictable, so a reserver parked on
    /// `WouldBlock` retries promptly instead of only on its sweep timeout.
    pub slot_cv: Condvar,
    /// Soft refcount of in-flight `submit_request` calls (spec.md §4.6's
    /// "active blockdev users"), gating the shutdown drain -- distinct
    /// from the hard `Arc` strong count, which can outlive a device that
    /// has already shut down (a caller still holding a cloned handle).
    active_users: AtomicUsize,
    shutting_down: AtomicBool,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    sweep_stop: Arc<AtomicBool>,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

/// RAII soft-refcount guard held for the duration of one `submit_request`
/// call.
struct ActiveGuard<'a, S: ChannelStream> {
    inner: &'a Inner<S>,
}

impl<'a, S: ChannelStream> Drop for ActiveGuard<'a, S> {
    fn drop(&mut self) {
        self.inner.active_users.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<S: ChannelStream> Inner<S> {
    fn acquire(&self) -> ActiveGuard<'_, S> {
        self.active_users.fetch_add(1, Ordering::AcqRel);
        ActiveGuard { inner: self }
    }

    pub(crate) fn notify_slot_available(&self) {
        self.slot_cv.notify_all();
    }
}

/// A snapshot of a device's internal counters, returned by
/// [`Device::stats`] and surfaced through `nexus-daemon`'s `stats`
/// control call -- the introspection supplement spec.md §1 leaves room
/// for ("a narrow read-only query surface," not full metrics).
#[derive(Debug, Clone)]
pub struct DeviceStats {
    pub cache_len: usize,
    pub cache_capacity: usize,
    pub agent_queue_len: usize,
    pub agent_ring_depth: usize,
    pub worker_submitted: u64,
    pub worker_completed: u64,
    pub active_users: usize,
}

/// Handle to one open device. Cheap to clone (an `Arc` underneath); every
/// clone refers to the same chunk table, agent channel, and worker pool.
pub struct Device<S: ChannelStream> {
    inner: Arc<Inner<S>>,
}

impl<S: ChannelStream> Clone for Device<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

/// Outcome of [`Device::submit_request`]: per-sub-I/O results in
/// caller-request order, plus the (possibly read-filled) segment list
/// handed back to the caller.
pub struct RequestOutcome {
    pub results: Vec<Result<(), IoError>>,
    pub segments: Vec<Segment>,
}

impl<S: ChannelStream> Device<S> {
    /// Opens a device: validates no further than `params` already has
    /// been (callers must have called [`DeviceParams::validate`]
    /// themselves, typically via the daemon's registry), and binds the
    /// agent channel's reader thread *before* returning a handle any
    /// caller can submit requests through -- there is no window in which
    /// a published device has no one listening for agent replies
    /// (spec.md §4.6).
    pub fn open(params: DeviceParams, backing: Arc<dyn crate::backing_store::BackingStore>, stream: S) -> Self {
        let reader_stream = stream.clone();
        let ident = params.ident.clone();
        let cachesize = params.cachesize;
        let ring_depth = params.agent_ring_depth;

        let state = DeviceState {
            table: ChunkTable::new(cachesize),
            agent_queue: AgentQueue::new(ring_depth),
            writer: AgentChannel::new(stream),
            waiters: HashMap::new(),
            next_waiter_id: 0,
            closed: false,
        };

        let inner = Arc::new(Inner {
            params,
            backing,
            worker: WorkerPool::new(DEFAULT_WORKER_THREADS, DEFAULT_QUEUE_CAPACITY),
            state: Mutex::new(state),
            slot_cv: Condvar::new(),
            active_users: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            reader_handle: Mutex::new(None),
            sweep_stop: Arc::new(AtomicBool::new(false)),
            sweep_handle: Mutex::new(None),
        });

        let reader_inner = Arc::clone(&inner);
        let reader_handle = std::thread::Builder::new()
            .name(format!("nexus-reader-{ident}"))
            .spawn(move || reader_loop(reader_inner, reader_stream))
            .expect("failed to spawn nexus reader thread");
        *inner.reader_handle.lock() = Some(reader_handle);

        let sweep_inner = Arc::clone(&inner);
        let sweep_stop = Arc::clone(&inner.sweep_stop);
        let sweep_handle = std::thread::Builder::new()
            .name(format!("nexus-sweep-{ident}"))
            .spawn(move || sweep_loop(sweep_inner, sweep_stop))
            .expect("failed to spawn nexus sweep thread");
        *inner.sweep_handle.lock() = Some(sweep_handle);

        Self { inner }
    }

    #[must_use]
    pub fn params(&self) -> &DeviceParams {
        &self.inner.params
    }

    #[must_use]
    pub fn stats(&self) -> DeviceStats {
        let state = self.inner.state.lock();
        let (submitted, completed) = self.inner.worker.stats().snapshot();
        DeviceStats {
            cache_len: state.table.len(),
            cache_capacity: state.table.capacity(),
            agent_queue_len: state.agent_queue.len(),
            agent_ring_depth: state.agent_queue.ring_depth(),
            worker_submitted: submitted,
            worker_completed: completed,
            active_users: self.inner.active_users.load(Ordering::Relaxed),
        }
    }

    /// Submits one request spanning `req.first_chunk ..= req.last_chunk`,
    /// blocking until every sub-I/O settles, and returns results in
    /// caller-request order (spec.md §4.4's ordering guarantee) even
    /// though the sub-I/Os complete internally out of order.
    pub fn submit_request(&self, req: BlockRequest) -> Result<RequestOutcome, EngineError> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(EngineError::ShuttingDown);
        }

        let chunk_count = (req.last_chunk.0 - req.first_chunk.0 + 1) as usize;
        if chunk_count > MAX_CHUNKS_PER_IO {
            return Err(EngineError::TooManyChunks(chunk_count));
        }
        if req.segments.len() > MAX_SEGS_PER_IO {
            return Err(EngineError::TooManySegments(req.segments.len()));
        }
        if req.last_chunk.0 >= self.inner.params.chunks {
            return Err(EngineError::ChunkOutOfRange(req.last_chunk.0, self.inner.params.chunks));
        }

        let _guard = self.inner.acquire();
        let chunksize = self.inner.params.chunksize;
        let subios = split_request(&req, chunksize);
        let tracker = CompletionTracker::new(subios.len());

        let flat_in = if req.direction == Direction::Write {
            sg::flatten_segments(&req.segments)
        } else {
            Vec::new()
        };

        let mut cursor = 0usize;
        for subio in &subios {
            let write_data = match subio.kind {
                SubIoKind::Write { .. } => Some(flat_in[cursor..cursor + subio.len].to_vec()),
                SubIoKind::Read => None,
            };
            cursor += subio.len;
            self.attach_waiter(subio, write_data, Arc::clone(&tracker));
        }

        let mut flat_out = if req.direction == Direction::Read { vec![0u8; req.length] } else { Vec::new() };
        let per_len: Vec<usize> = subios.iter().map(|s| s.len).collect();
        let mut out_cursor = 0usize;
        let raw_results = tracker.drain_in_order(|idx, result| {
            if req.direction == Direction::Read {
                if let Ok(bytes) = result {
                    let len = per_len[idx];
                    flat_out[out_cursor..out_cursor + len].copy_from_slice(&bytes[..len]);
                }
                out_cursor += per_len[idx];
            }
        });

        let mut segments = req.segments;
        if req.direction == Direction::Read {
            sg::unflatten_into_segments(&mut segments, &flat_out);
        }

        let results = raw_results.into_iter().map(|r| r.map(|_| ())).collect();
        Ok(RequestOutcome { results, segments })
    }

    fn attach_waiter(&self, subio: &SubIo, write_data: Option<Vec<u8>>, tracker: Arc<CompletionTracker>) {
        let mut state = self.inner.state.lock();
        let slot = loop {
            match state.table.reserve(subio.cid) {
                Ok(slot) => break slot,
                Err(_) => {
                    // No evictable slot right now; park briefly and retry.
                    // The sweep thread and every `note_clean` also notify
                    // this condvar, so the common case wakes immediately.
                    self.inner.slot_cv.wait_for(&mut state, Duration::from_millis(50));
                }
            }
        };

        let wid = state.alloc_waiter_id();
        state.table.slot_mut(slot).waiters.push_back(wid);
        state.waiters.insert(
            wid,
            WaiterMeta {
                cid: subio.cid,
                kind: subio.kind,
                chunk_offset: subio.chunk_offset,
                len: subio.len,
                write_data,
                write_applied: false,
                tracker,
                parent_index: subio.parent_index,
            },
        );
        drive(&self.inner, &mut state, slot);
    }

    /// Drains in-flight work and tears the device down: stop accepting
    /// submissions, wait for every `submit_request` already in progress to
    /// return (which, by construction, means every write it issued has
    /// already settled at `CLEAN` or failed -- see
    /// [`crate::state_machine`]'s module docs), then release the worker
    /// pool and backing collaborators.
    ///
    /// Closing the transport itself is the caller's responsibility: a
    /// generic `Read + Write + Clone` stream has no portable "shut this
    /// down" operation, so the reader thread is only guaranteed to unblock
    /// if the caller closes (or the peer closes) the underlying
    /// connection around this call.
    pub fn shutdown(self) {
        self.inner.shutting_down.store(true, Ordering::Release);

        while self.inner.active_users.load(Ordering::Acquire) > 0 {
            std::thread::sleep(Duration::from_millis(5));
        }

        // By the time every submit_request has returned, every write's
        // pipeline has already reached CLEAN or failed (submit_request
        // blocks on exactly that). This loop is a defensive backstop, not
        // the primary flush mechanism.
        for _ in 0..100 {
            let mut state = self.inner.state.lock();
            let still_dirty = (0..state.table.slot_count()).any(|slot| {
                let st = state.table.slot(slot).state;
                matches!(
                    st,
                    ChunkState::Dirty | ChunkState::Encrypting | ChunkState::DirtyEncrypted | ChunkState::StoreData | ChunkState::DirtyMeta | ChunkState::StoreMeta
                )
            });
            if !still_dirty {
                break;
            }
            for slot in 0..state.table.slot_count() {
                drive(&self.inner, &mut state, slot);
            }
            drop(state);
            std::thread::sleep(Duration::from_millis(5));
        }

        self.inner.sweep_stop.store(true, Ordering::Release);
        if let Some(h) = self.inner.sweep_handle.lock().take() {
            let _ = h.join();
        }

        {
            let mut state = self.inner.state.lock();
            state.closed = true;
        }

        info!(ident = %self.inner.params.ident, "device shutdown drained, releasing worker pool");
        // WorkerPool::drop joins its threads; Arc::drop (once every clone
        // is gone) releases the backing store and reader thread handle.
    }
}

fn reader_loop<S: ChannelStream>(inner: Arc<Inner<S>>, stream: S) {
    let mut chan = AgentChannel::new(stream);
    loop {
        let msg = match chan.recv() {
            Ok(msg) => msg,
            Err(ProtocolError::WouldBlock | ProtocolError::Interrupted) => continue,
            Err(ProtocolError::Closed) => {
                debug!(ident = %inner.params.ident, "agent channel closed, collapsing outstanding messages");
                let mut state = inner.state.lock();
                collapse_on_channel_close(&inner, &mut state);
                return;
            }
            Err(e) => {
                error!(ident = %inner.params.ident, error = %e, "agent channel recv error, treating as closed");
                let mut state = inner.state.lock();
                collapse_on_channel_close(&inner, &mut state);
                return;
            }
        };

        if msg.msg_type != MessageType::SetMeta && msg.msg_type != MessageType::MetaHarderr {
            warn!(msg_type = ?msg.msg_type, "unexpected kernel-direction message arrived from agent, ignoring");
            continue;
        }

        let mut state = inner.state.lock();
        apply_agent_reply(&inner, &mut state, msg);
    }
}

fn sweep_loop<S: ChannelStream>(inner: Arc<Inner<S>>, stop: Arc<AtomicBool>) {
    // Backstops two races that would otherwise be liveness bugs rather
    // than correctness bugs: a GET_META/UPDATE_META/CHUNK_ERR send that
    // found the agent ring full, and a reserve() that found nothing
    // evictable right as the chunk that would have freed a slot settled.
    while !stop.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(100));
        let mut state = inner.state.lock();
        for slot in 0..state.table.slot_count() {
            drive(&inner, &mut state, slot);
        }
        drop(state);
        inner.notify_slot_available();
    }
}
