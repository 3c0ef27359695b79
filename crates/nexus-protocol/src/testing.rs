//! A minimal, spec-conformant reference agent plus an in-memory duplex
//! transport, used by `nexus-engine`'s integration tests and
//! `nexus-daemon`'s demo binary. The real agent (hoard cache, signing,
//! vault config) is out of scope per spec.md §1; this is the stand-in the
//! rest of the workspace drives instead, the same role
//! `oxcrypt-fuse/tests/common/harness.rs` plays for the real on-disk
//! Cryptomator vault it would otherwise require.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use nexus_transform::{CompressionAlgo, MAX_HASH_LEN};

use crate::channel::AgentChannel;
use crate::message::{Message, MessageType, WIRE_MESSAGE_LEN};

/// One half of an in-memory duplex byte channel. Reads and writes are
/// always whole-message: every `write_all` call from [`AgentChannel`]
/// hands over exactly [`WIRE_MESSAGE_LEN`] bytes, so this transport
/// queues messages rather than raw bytes and `read` copies back at most
/// one at a time.
#[derive(Clone)]
pub struct DuplexEnd {
    inbound: Arc<Mutex<VecDeque<u8>>>,
    outbound: Arc<Mutex<VecDeque<u8>>>,
    closed: Arc<Mutex<bool>>,
    nonblocking: bool,
}

/// Builds a connected pair of [`DuplexEnd`]s: bytes written to one side
/// appear for reading on the other.
#[must_use]
pub fn duplex_pair() -> (DuplexEnd, DuplexEnd) {
    let a_to_b = Arc::new(Mutex::new(VecDeque::new()));
    let b_to_a = Arc::new(Mutex::new(VecDeque::new()));
    let closed = Arc::new(Mutex::new(false));
    (
        DuplexEnd {
            inbound: Arc::clone(&b_to_a),
            outbound: Arc::clone(&a_to_b),
            closed: Arc::clone(&closed),
            nonblocking: false,
        },
        DuplexEnd {
            inbound: a_to_b,
            outbound: b_to_a,
            closed,
            nonblocking: false,
        },
    )
}

impl DuplexEnd {
    /// Closing either end marks the whole pair closed: the next `read` on
    /// the other side with an empty queue returns `Ok(0)`, matching the
    /// spec's "closing the channel triggers device shutdown."
    pub fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }

    #[must_use]
    pub fn nonblocking(mut self, on: bool) -> Self {
        self.nonblocking = on;
        self
    }
}

impl Read for DuplexEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut q = self.inbound.lock().unwrap();
            if !q.is_empty() {
                let n = buf.len().min(q.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = q.pop_front().unwrap();
                }
                return Ok(n);
            }
            if *self.closed.lock().unwrap() {
                return Ok(0);
            }
            if self.nonblocking {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "no message queued"));
            }
            drop(q);
            std::thread::yield_now();
        }
    }
}

impl Write for DuplexEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound.lock().unwrap().extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Authoritative metadata the reference agent hands back in reply to
/// `GET_META`, seeded by the test.
#[derive(Debug, Clone)]
pub struct ChunkMeta {
    pub length: u32,
    pub compression: CompressionAlgo,
    pub key: [u8; MAX_HASH_LEN],
    pub tag: [u8; MAX_HASH_LEN],
}

/// A minimal in-process agent: answers `GET_META` from a seeded table,
/// accepts `UPDATE_META` into that same table, and can be told to fail a
/// given `cid` with `META_HARDERR` instead of a normal reply. Runs its
/// receive loop on a background thread so engine tests can drive a real
/// `AgentChannel` without hand-rolling a protocol responder each time.
pub struct InMemoryAgent {
    state: Arc<Mutex<AgentState>>,
    handle: Option<JoinHandle<()>>,
}

struct AgentState {
    table: HashMap<u64, ChunkMeta>,
    hard_err: std::collections::HashSet<u64>,
    received_chunk_errs: Vec<Message>,
    received_get_metas: Vec<u64>,
}

impl InMemoryAgent {
    /// Spawns the agent loop over `end`, seeded with `table`.
    pub fn spawn(end: DuplexEnd, table: HashMap<u64, ChunkMeta>) -> Self {
        let state = Arc::new(Mutex::new(AgentState {
            table,
            hard_err: std::collections::HashSet::new(),
            received_chunk_errs: Vec::new(),
            received_get_metas: Vec::new(),
        }));
        let thread_state = Arc::clone(&state);
        let handle = std::thread::spawn(move || Self::run(end, thread_state));
        Self { state, handle: Some(handle) }
    }

    /// From now on, `GET_META` for `cid` is answered with `META_HARDERR`
    /// instead of the seeded metadata.
    pub fn force_hard_error(&self, cid: u64) {
        self.state.lock().unwrap().hard_err.insert(cid);
    }

    /// Updates (or inserts) the authoritative metadata for `cid`, as if
    /// the real hoard cache had learned it out of band.
    pub fn seed(&self, cid: u64, meta: ChunkMeta) {
        self.state.lock().unwrap().table.insert(cid, meta);
    }

    #[must_use]
    pub fn chunk_errs_received(&self) -> Vec<Message> {
        self.state.lock().unwrap().received_chunk_errs.clone()
    }

    /// Every `cid` a `GET_META` has been received for, in arrival order
    /// (duplicates included). Lets a test assert "at most one fetch per
    /// chunk across two overlapping requests" without threading its own
    /// counter through the channel.
    #[must_use]
    pub fn get_metas_received(&self) -> Vec<u64> {
        self.state.lock().unwrap().received_get_metas.clone()
    }

    fn run(end: DuplexEnd, state: Arc<Mutex<AgentState>>) {
        let mut chan = AgentChannel::new(end);
        loop {
            let msg = match chan.recv() {
                Ok(m) => m,
                Err(_) => return,
            };
            match msg.msg_type {
                MessageType::GetMeta => {
                    let reply = {
                        let mut st = state.lock().unwrap();
                        st.received_get_metas.push(msg.cid);
                        if st.hard_err.remove(&msg.cid) {
                            None
                        } else {
                            st.table.get(&msg.cid).cloned()
                        }
                    };
                    let reply_msg = match reply {
                        Some(meta) => Message {
                            cid: msg.cid,
                            length: meta.length,
                            msg_type: MessageType::SetMeta,
                            compression_or_err: meta.compression.to_wire(),
                            key: meta.key,
                            tag: meta.tag,
                        },
                        None => Message {
                            cid: msg.cid,
                            length: 0,
                            msg_type: MessageType::MetaHarderr,
                            compression_or_err: 0,
                            key: [0; MAX_HASH_LEN],
                            tag: [0; MAX_HASH_LEN],
                        },
                    };
                    if chan.send(&reply_msg).is_err() {
                        return;
                    }
                }
                MessageType::UpdateMeta => {
                    let mut st = state.lock().unwrap();
                    st.table.insert(
                        msg.cid,
                        ChunkMeta {
                            length: msg.length,
                            compression: CompressionAlgo::from_wire(msg.compression_or_err).unwrap_or(CompressionAlgo::None),
                            key: msg.key,
                            tag: msg.tag,
                        },
                    );
                }
                MessageType::ChunkErr => {
                    state.lock().unwrap().received_chunk_errs.push(msg);
                }
                MessageType::SetMeta | MessageType::MetaHarderr => {
                    // Agent never receives its own reply types; ignore.
                }
            }
        }
    }
}

impl Drop for InMemoryAgent {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
