use std::collections::HashMap;

use thiserror::Error;
use tracing::{trace, warn};

/// Why a chunk currently has a message outstanding to the agent. Mirrors
/// the three kernel-to-agent message types; `GetMeta` is the only kind
/// that expects a matched reply, the other two are fire-and-forget from
/// the queue's point of view (the state machine still tracks its own
/// `ERROR_PENDING` wait on `CHUNK_ERR`, but that wait is "has this been
/// written to the channel", not "did the agent reply").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    GetMeta,
    UpdateMeta,
    ChunkErr,
}

/// Errors raised by [`AgentQueue`]'s admission and reply-matching rules.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The ring is at its configured depth (spec invariant 6: the set of
    /// chunks with `pending_user_msg == true` has size <= the agent-
    /// protocol ring depth). Caller should back off and retry once a
    /// reply drains a slot.
    #[error("agent message ring is full ({0} outstanding)")]
    Full(usize),

    /// A `SET_META` or `META_HARDERR` arrived for a `cid` with no
    /// outstanding `GET_META`. Spec.md §4.5: "Unsolicited `SET_META` is
    /// rejected."
    #[error("unsolicited reply for chunk {0}, no GET_META outstanding")]
    Unsolicited(u64),
}

/// Tracks messages outstanding to the agent, bounded to a fixed ring
/// depth, and matches `SET_META`/`META_HARDERR` replies back to the
/// `GET_META` that requested them by `cid` -- replies need not arrive in
/// request order (spec.md §4.5 "Ordering").
///
/// One `AgentQueue` per device, guarded by the same device lock that
/// guards the chunk table; this type performs no synchronization itself.
#[derive(Debug, Default)]
pub struct AgentQueue {
    ring_depth: usize,
    outstanding: HashMap<u64, PendingKind>,
}

impl AgentQueue {
    #[must_use]
    pub fn new(ring_depth: usize) -> Self {
        Self {
            ring_depth,
            outstanding: HashMap::new(),
        }
    }

    #[must_use]
    pub fn ring_depth(&self) -> usize {
        self.ring_depth
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }

    #[must_use]
    pub fn is_pending(&self, cid: u64) -> bool {
        self.outstanding.contains_key(&cid)
    }

    /// Reserves a ring slot for a new outstanding message. Returns
    /// [`QueueError::Full`] when the ring is already at `ring_depth` and
    /// the caller must defer sending (the chunk stays wherever it was,
    /// generally retried on the next state-machine run).
    pub fn begin(&mut self, cid: u64, kind: PendingKind) -> Result<(), QueueError> {
        if !self.outstanding.contains_key(&cid) && self.outstanding.len() >= self.ring_depth {
            return Err(QueueError::Full(self.outstanding.len()));
        }
        trace!(cid, ?kind, "agent message outstanding");
        self.outstanding.insert(cid, kind);
        Ok(())
    }

    /// Matches an inbound `SET_META` to its `GET_META`, freeing the ring
    /// slot. Rejects a reply for a `cid` with nothing outstanding, or
    /// with an outstanding message of the wrong kind.
    pub fn take_get_meta_reply(&mut self, cid: u64) -> Result<(), QueueError> {
        match self.outstanding.get(&cid) {
            Some(PendingKind::GetMeta) => {
                self.outstanding.remove(&cid);
                Ok(())
            }
            _ => {
                warn!(cid, "unsolicited agent reply rejected");
                Err(QueueError::Unsolicited(cid))
            }
        }
    }

    /// Marks a fire-and-forget message (`UPDATE_META` or `CHUNK_ERR`) as
    /// drained -- i.e. successfully handed to the channel -- freeing its
    /// ring slot. No reply is matched.
    pub fn complete(&mut self, cid: u64) {
        self.outstanding.remove(&cid);
    }

    /// Channel close: every outstanding message becomes permanently
    /// undeliverable. Returns the set of chunk ids that were waiting, so
    /// the caller (the engine's state machine driver) can collapse each
    /// one -- `ERROR_PENDING` chunks whose `CHUNK_ERR` never got an
    /// in-flight acknowledgement settle straight to `ERROR`, and chunks
    /// waiting on `GET_META` settle to `ERROR_USER(IO)`.
    pub fn drain_on_close(&mut self) -> Vec<(u64, PendingKind)> {
        let drained: Vec<_> = self.outstanding.drain().collect();
        if !drained.is_empty() {
            warn!(count = drained.len(), "agent channel closed with outstanding messages");
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_depth_is_enforced() {
        let mut q = AgentQueue::new(2);
        q.begin(1, PendingKind::GetMeta).unwrap();
        q.begin(2, PendingKind::GetMeta).unwrap();
        assert!(matches!(q.begin(3, PendingKind::GetMeta), Err(QueueError::Full(2))));
    }

    #[test]
    fn reply_matching_frees_a_slot() {
        let mut q = AgentQueue::new(1);
        q.begin(1, PendingKind::GetMeta).unwrap();
        assert!(matches!(q.begin(2, PendingKind::GetMeta), Err(QueueError::Full(_))));
        q.take_get_meta_reply(1).unwrap();
        q.begin(2, PendingKind::GetMeta).unwrap();
    }

    #[test]
    fn unsolicited_reply_is_rejected() {
        let mut q = AgentQueue::new(4);
        assert!(matches!(q.take_get_meta_reply(9), Err(QueueError::Unsolicited(9))));
    }

    #[test]
    fn reusing_a_ring_slot_for_same_cid_does_not_double_count() {
        let mut q = AgentQueue::new(1);
        q.begin(1, PendingKind::GetMeta).unwrap();
        q.begin(1, PendingKind::ChunkErr).unwrap();
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn close_drains_all_outstanding() {
        let mut q = AgentQueue::new(4);
        q.begin(1, PendingKind::GetMeta).unwrap();
        q.begin(2, PendingKind::ChunkErr).unwrap();
        let drained = q.drain_on_close();
        assert_eq!(drained.len(), 2);
        assert!(q.is_empty());
    }
}
