//! The per-chunk state machine (spec.md §3, §4.3): `drive` advances one
//! chunk record as far as it can without blocking, driven by the front of
//! its waiter queue.
//!
//! A subtlety this module's callers rely on: a write sub-I/O is *not*
//! signalled to its caller at `DIRTY` (the moment its plaintext is copied
//! into the buffer) -- it stays the front waiter through the whole
//! `DIRTY -> ... -> CLEAN` pipeline and is only popped once that pipeline
//! either reaches `CLEAN` (success) or fails (`ERROR_USER`/`ERROR`,
//! reported synchronously per spec.md §7). This means
//! [`crate::device::Device::submit_request`] never returns for a write
//! before that write has actually persisted or definitively failed --
//! there is no "accepted but not yet durable" state visible to a caller.

use std::sync::Arc;

use tracing::{trace, warn};

use nexus_cache::{ChunkErrorKind, ChunkState, WaiterId};
use nexus_protocol::{Message, PendingKind};
use nexus_transform::{CipherAlgo, TransformError};

use crate::device::{ChannelStream, DeviceState, Inner};
use crate::error::IoError;
use crate::fanout::SubIoKind;
use crate::sg;

/// Advances chunk `slot` as far as possible given its current state and
/// waiter queue, looping over any number of zero-cost (no I/O) decisions
/// before returning once it either runs out of waiters or has dispatched
/// one background operation (a worker job or an agent-channel send).
///
/// Called with the device lock already held, both from the submission
/// path (a fresh waiter just attached) and from every asynchronous
/// completion callback (a worker job finishing, an agent reply arriving,
/// channel closure).
pub(crate) fn drive<S: ChannelStream>(inner: &Arc<Inner<S>>, state: &mut DeviceState<S>, slot: usize) {
    loop {
        match state.table.slot(slot).state {
            ChunkState::Clean => {
                let Some(wid) = front_waiter(state, slot) else { return };
                match waiter_kind(state, wid) {
                    SubIoKind::Read => {
                        complete_read_from_clean(state, slot, wid);
                    }
                    SubIoKind::Write { .. } => {
                        if state.waiters[&wid].write_applied {
                            complete_write_success(state, slot, wid);
                        } else {
                            enter_dirty_from_clean(state, slot, wid);
                        }
                    }
                }
            }
            ChunkState::Error => {
                let Some(wid) = front_waiter(state, slot) else { return };
                let kind = waiter_kind(state, wid);
                let applied = state.waiters[&wid].write_applied;
                if let SubIoKind::Write { full_chunk: true } = kind {
                    if !applied {
                        enter_dirty_recovery(inner, state, slot, wid);
                        continue;
                    }
                }
                let err_kind = state.table.slot(slot).error.as_ref().map_or(ChunkErrorKind::Io, |e| e.kind);
                let is_write = matches!(kind, SubIoKind::Write { .. });
                pop_and_fail(state, slot, wid, err_kind, is_write);
            }
            ChunkState::Invalid => {
                let Some(wid) = front_waiter(state, slot) else { return };
                let kind = waiter_kind(state, wid);
                if inner.params.allow_blind_overwrite {
                    if let SubIoKind::Write { full_chunk: true } = kind {
                        enter_dirty_blind(inner, state, slot, wid);
                        continue;
                    }
                }
                dispatch_get_meta(state, slot);
                return;
            }
            ChunkState::Meta => {
                let Some(wid) = front_waiter(state, slot) else { return };
                match waiter_kind(state, wid) {
                    SubIoKind::Write { full_chunk: true } => {
                        enter_dirty_from_meta(inner, state, slot, wid);
                    }
                    _ => {
                        dispatch_load_data(inner, state, slot);
                        return;
                    }
                }
            }
            ChunkState::Encrypted => {
                dispatch_decrypting(inner, state, slot);
                return;
            }
            ChunkState::Dirty => {
                dispatch_encrypting(inner, state, slot);
                return;
            }
            ChunkState::DirtyEncrypted => {
                dispatch_store_data(inner, state, slot);
                return;
            }
            ChunkState::DirtyMeta => {
                if dispatch_update_meta(state, slot) {
                    continue;
                }
                return;
            }
            ChunkState::ErrorUser => {
                if dispatch_chunk_err(state, slot) {
                    continue;
                }
                return;
            }
            // LOAD_META, LOAD_DATA, DECRYPTING, ENCRYPTING, STORE_DATA,
            // STORE_META, ERROR_PENDING: a worker job or agent round-trip
            // already owns this record; nothing to do until it completes.
            _ => return,
        }
    }
}

/// Marks `slot` as terminally failed. Buffer contents are left untouched
/// (invariant 2: a settled state's buffer is stable either way).
pub(crate) fn fail_record<S: ChannelStream>(state: &mut DeviceState<S>, slot: usize, kind: ChunkErrorKind, is_write: bool) {
    state.table.slot_mut(slot).error = Some(nexus_cache::ChunkError::new(kind, is_write));
    state.table.slot_mut(slot).state = ChunkState::ErrorUser;
}

/// Applies a `SET_META`/`META_HARDERR` reply received on the reader
/// thread, then re-drives the affected chunk.
pub(crate) fn apply_agent_reply<S: ChannelStream>(inner: &Arc<Inner<S>>, state: &mut DeviceState<S>, msg: Message) {
    if state.agent_queue.take_get_meta_reply(msg.cid).is_err() {
        return;
    }
    let Some(slot) = state.table.slot_of(nexus_cache::ChunkId(msg.cid)) else {
        return;
    };
    state.table.slot_mut(slot).pending_user_msg = false;

    match msg.msg_type {
        nexus_protocol::MessageType::SetMeta => {
            let rec = state.table.slot_mut(slot);
            rec.length = msg.length as usize;
            rec.compression = nexus_transform::CompressionAlgo::from_wire(msg.compression_or_err).unwrap_or(nexus_transform::CompressionAlgo::None);
            rec.key = msg.key.to_vec();
            rec.tag = msg.tag.to_vec();
            rec.state = ChunkState::Meta;
        }
        nexus_protocol::MessageType::MetaHarderr => {
            fail_record(state, slot, ChunkErrorKind::Io, false);
        }
        other => {
            warn!(msg_type = ?other, "apply_agent_reply called with a non-reply message type");
            return;
        }
    }
    drive(inner, state, slot);
    inner.notify_slot_available();
}

/// Collapses every outstanding agent message once the channel has closed
/// (spec.md §4.5): a pending `GET_META` fails its chunk with `IO`; a
/// pending `CHUNK_ERR` that never got a chance to send settles straight to
/// `ERROR` since there is no one left to notify; a pending `UPDATE_META`
/// fails the write that produced it.
pub(crate) fn collapse_on_channel_close<S: ChannelStream>(inner: &Arc<Inner<S>>, state: &mut DeviceState<S>) {
    state.closed = true;
    let drained = state.agent_queue.drain_on_close();
    for (cid, kind) in drained {
        let Some(slot) = state.table.slot_of(nexus_cache::ChunkId(cid)) else {
            continue;
        };
        state.table.slot_mut(slot).pending_user_msg = false;
        match kind {
            PendingKind::GetMeta => fail_record(state, slot, ChunkErrorKind::Io, false),
            PendingKind::UpdateMeta => fail_record(state, slot, ChunkErrorKind::Io, true),
            PendingKind::ChunkErr => state.table.slot_mut(slot).state = ChunkState::Error,
        }
        drive(inner, state, slot);
    }
    inner.notify_slot_available();
}

fn front_waiter<S: ChannelStream>(state: &DeviceState<S>, slot: usize) -> Option<WaiterId> {
    state.table.slot(slot).waiters.front().copied()
}

fn waiter_kind<S: ChannelStream>(state: &DeviceState<S>, wid: WaiterId) -> SubIoKind {
    state.waiters.get(&wid).expect("waiter metadata must exist while queued").kind
}

fn pop_front<S: ChannelStream>(state: &mut DeviceState<S>, slot: usize, wid: WaiterId) {
    let popped = state.table.slot_mut(slot).waiters.pop_front();
    debug_assert_eq!(popped, Some(wid), "front waiter popped out of FIFO order");
}

fn complete_read_from_clean<S: ChannelStream>(state: &mut DeviceState<S>, slot: usize, wid: WaiterId) {
    pop_front(state, slot, wid);
    let meta = state.waiters.remove(&wid).expect("waiter metadata must exist");
    let data = sg::flatten(&state.table.slot(slot).buffer, meta.chunk_offset, meta.len);
    meta.tracker.complete(meta.parent_index, Ok(data));
}

fn complete_write_success<S: ChannelStream>(state: &mut DeviceState<S>, slot: usize, wid: WaiterId) {
    pop_front(state, slot, wid);
    let meta = state.waiters.remove(&wid).expect("waiter metadata must exist");
    meta.tracker.complete(meta.parent_index, Ok(Vec::new()));
}

fn pop_and_fail<S: ChannelStream>(state: &mut DeviceState<S>, slot: usize, wid: WaiterId, kind: ChunkErrorKind, is_write: bool) {
    pop_front(state, slot, wid);
    let meta = state.waiters.remove(&wid).expect("waiter metadata must exist");
    let cid = meta.cid.0;
    meta.tracker.complete(meta.parent_index, Err(IoError { cid, kind, is_write }));
}

/// Copies a write waiter's plaintext into an already-loaded buffer and
/// moves the record to `DIRTY`. The waiter stays queued: it is only
/// satisfied once the encrypt/store/update-meta pipeline this kicks off
/// reaches `CLEAN` (or fails).
fn enter_dirty_from_clean<S: ChannelStream>(state: &mut DeviceState<S>, slot: usize, wid: WaiterId) {
    let (chunk_offset, write_data) = {
        let meta = state.waiters.get(&wid).expect("waiter metadata must exist");
        (meta.chunk_offset, meta.write_data.clone().expect("write waiter must carry data"))
    };
    sg::unflatten(&mut state.table.slot_mut(slot).buffer, chunk_offset, &write_data);
    state.waiters.get_mut(&wid).expect("waiter metadata must exist").write_applied = true;
    state.table.slot_mut(slot).state = ChunkState::Dirty;
}

/// Shared by the three "skip the read/decrypt path" transitions
/// (`INVALID` blind overwrite, `META` full-chunk overwrite, `ERROR`
/// recovery overwrite): allocates a fresh buffer and copies in the
/// waiter's full-chunk plaintext directly.
fn enter_dirty_fresh<S: ChannelStream>(state: &mut DeviceState<S>, slot: usize, wid: WaiterId, chunksize: usize) {
    let write_data = state.waiters.get(&wid).expect("waiter metadata must exist").write_data.clone().expect("full-chunk write waiter must carry data");
    let mut pages = sg::new_pages(chunksize);
    sg::unflatten(&mut pages, 0, &write_data);
    state.table.slot_mut(slot).buffer = pages;
    state.waiters.get_mut(&wid).expect("waiter metadata must exist").write_applied = true;
    state.table.slot_mut(slot).state = ChunkState::Dirty;
}

fn enter_dirty_blind<S: ChannelStream>(inner: &Arc<Inner<S>>, state: &mut DeviceState<S>, slot: usize, wid: WaiterId) {
    enter_dirty_fresh(state, slot, wid, inner.params.chunksize);
}

fn enter_dirty_from_meta<S: ChannelStream>(inner: &Arc<Inner<S>>, state: &mut DeviceState<S>, slot: usize, wid: WaiterId) {
    enter_dirty_fresh(state, slot, wid, inner.params.chunksize);
}

fn enter_dirty_recovery<S: ChannelStream>(inner: &Arc<Inner<S>>, state: &mut DeviceState<S>, slot: usize, wid: WaiterId) {
    state.table.slot_mut(slot).error = None;
    enter_dirty_fresh(state, slot, wid, inner.params.chunksize);
}

fn dispatch_get_meta<S: ChannelStream>(state: &mut DeviceState<S>, slot: usize) {
    let cid = state.table.slot(slot).cid;
    if state.closed {
        fail_record(state, slot, ChunkErrorKind::Io, false);
        return;
    }
    if state.agent_queue.begin(cid.0, PendingKind::GetMeta).is_err() {
        trace!(?cid, "agent ring full, deferring GET_META");
        return;
    }
    match state.writer.send(&Message::get_meta(cid.0)) {
        Ok(()) => {
            state.table.slot_mut(slot).pending_user_msg = true;
            state.table.slot_mut(slot).state = ChunkState::LoadMeta;
        }
        Err(e) => {
            warn!(?cid, error = %e, "failed to send GET_META");
            state.agent_queue.complete(cid.0);
            fail_record(state, slot, ChunkErrorKind::Io, false);
        }
    }
}

fn dispatch_load_data<S: ChannelStream>(inner: &Arc<Inner<S>>, state: &mut DeviceState<S>, slot: usize) {
    let cid = state.table.slot(slot).cid;
    let chunksize = inner.params.chunksize;
    state.table.slot_mut(slot).state = ChunkState::LoadData;

    let inner2 = Arc::clone(inner);
    inner.worker.submit(move || {
        let mut buf = vec![0u8; chunksize];
        let result = inner2.backing.read_chunk(cid, &mut buf);

        let mut state = inner2.state.lock();
        if state.table.slot_of(cid) != Some(slot) {
            return;
        }
        match result {
            Ok(()) => {
                let mut pages = sg::new_pages(chunksize);
                sg::unflatten(&mut pages, 0, &buf);
                state.table.slot_mut(slot).buffer = pages;
                state.table.slot_mut(slot).state = ChunkState::Encrypted;
            }
            Err(e) => {
                warn!(?cid, error = %e, "backing store read failed");
                fail_record(&mut state, slot, ChunkErrorKind::Io, false);
            }
        }
        drive(&inner2, &mut state, slot);
        inner2.notify_slot_available();
    });
}

fn dispatch_decrypting<S: ChannelStream>(inner: &Arc<Inner<S>>, state: &mut DeviceState<S>, slot: usize) {
    let rec = state.table.slot(slot);
    let cid = rec.cid;
    let ciphertext = sg::flatten(&rec.buffer, 0, rec.length);
    let tag = rec.tag.clone();
    let key = rec.key.clone();
    let compression = rec.compression;
    let chunksize = inner.params.chunksize;
    let cipher = inner.params.cipher;
    let hash_algo = inner.params.hash;

    state.table.slot_mut(slot).state = ChunkState::Decrypting;
    let inner2 = Arc::clone(inner);
    inner.worker.submit(move || {
        let outcome = decrypt_and_verify(&ciphertext, &tag, &key, cipher, compression, chunksize, hash_algo);

        let mut state = inner2.state.lock();
        if state.table.slot_of(cid) != Some(slot) {
            return;
        }
        match outcome {
            Ok(plaintext) => {
                let mut pages = sg::new_pages(chunksize);
                sg::unflatten(&mut pages, 0, &plaintext);
                state.table.slot_mut(slot).buffer = pages;
                state.table.slot_mut(slot).state = ChunkState::Clean;
                state.table.note_clean(slot);
            }
            Err(kind) => fail_record(&mut state, slot, kind, false),
        }
        drive(&inner2, &mut state, slot);
        inner2.notify_slot_available();
    });
}

fn decrypt_and_verify(
    ciphertext: &[u8],
    tag: &[u8],
    key: &[u8],
    cipher: CipherAlgo,
    compression: nexus_transform::CompressionAlgo,
    chunksize: usize,
    hash_algo: nexus_transform::HashAlgo,
) -> Result<Vec<u8>, ChunkErrorKind> {
    let computed_tag = nexus_transform::hash::hash(hash_algo, ciphertext);
    if computed_tag != tag {
        return Err(ChunkErrorKind::Tag);
    }
    let iv = derive_iv(cipher);
    let plaintext = nexus_transform::decode_chunk(ciphertext, cipher, compression, chunksize, key, &iv).map_err(classify_transform_error)?;
    let computed_key = nexus_transform::hash::hash(hash_algo, &plaintext);
    if computed_key != key {
        return Err(ChunkErrorKind::Key);
    }
    Ok(plaintext)
}

fn dispatch_encrypting<S: ChannelStream>(inner: &Arc<Inner<S>>, state: &mut DeviceState<S>, slot: usize) {
    let rec = state.table.slot(slot);
    let cid = rec.cid;
    let chunksize = inner.params.chunksize;
    let plaintext = sg::flatten(&rec.buffer, 0, chunksize);
    let cipher = inner.params.cipher;
    let preferred_compression = inner.params.default_compression;
    let hash_algo = inner.params.hash;

    state.table.slot_mut(slot).state = ChunkState::Encrypting;
    let inner2 = Arc::clone(inner);
    inner.worker.submit(move || {
        let key = nexus_transform::hash::hash(hash_algo, &plaintext);
        let iv = derive_iv(cipher);
        let outcome = nexus_transform::encode_chunk(&plaintext, cipher, preferred_compression, chunksize, &key, &iv).map_err(classify_transform_error);

        let mut state = inner2.state.lock();
        if state.table.slot_of(cid) != Some(slot) {
            return;
        }
        match outcome {
            Ok(enc) => {
                let tag = nexus_transform::hash::hash(hash_algo, &enc.ciphertext);
                let mut pages = sg::new_pages(chunksize);
                sg::unflatten(&mut pages, 0, &enc.ciphertext);
                let length = enc.ciphertext.len();
                let rec = state.table.slot_mut(slot);
                rec.buffer = pages;
                rec.length = length;
                rec.compression = enc.compression;
                rec.key = key;
                rec.tag = tag;
                rec.state = ChunkState::DirtyEncrypted;
            }
            Err(kind) => fail_record(&mut state, slot, kind, true),
        }
        drive(&inner2, &mut state, slot);
    });
}

fn dispatch_store_data<S: ChannelStream>(inner: &Arc<Inner<S>>, state: &mut DeviceState<S>, slot: usize) {
    let rec = state.table.slot(slot);
    let cid = rec.cid;
    let ciphertext = sg::flatten(&rec.buffer, 0, rec.length);
    let chunksize = inner.params.chunksize;
    let mut physical = vec![0u8; chunksize];
    physical[..ciphertext.len()].copy_from_slice(&ciphertext);

    state.table.slot_mut(slot).state = ChunkState::StoreData;
    let inner2 = Arc::clone(inner);
    inner.worker.submit(move || {
        let result = inner2.backing.write_chunk(cid, &physical);

        let mut state = inner2.state.lock();
        if state.table.slot_of(cid) != Some(slot) {
            return;
        }
        match result {
            Ok(()) => state.table.slot_mut(slot).state = ChunkState::DirtyMeta,
            Err(e) => {
                warn!(?cid, error = %e, "backing store write failed");
                fail_record(&mut state, slot, ChunkErrorKind::Io, true);
            }
        }
        drive(&inner2, &mut state, slot);
    });
}

/// Sends `UPDATE_META` synchronously (a local channel write, not an
/// agent round-trip -- spec.md's `STORE_META --(agent queue accepts)-->
/// CLEAN` transition). Returns `true` once the record has moved past
/// `DIRTY_META` (to `CLEAN` on success, or `ERROR_USER` if the channel
/// itself is gone), `false` if the send must be deferred (agent ring
/// full) and retried by the periodic sweep.
fn dispatch_update_meta<S: ChannelStream>(state: &mut DeviceState<S>, slot: usize) -> bool {
    let cid = state.table.slot(slot).cid;
    if state.closed {
        fail_record(state, slot, ChunkErrorKind::Io, true);
        return true;
    }
    if state.agent_queue.begin(cid.0, PendingKind::UpdateMeta).is_err() {
        trace!(?cid, "agent ring full, deferring UPDATE_META");
        return false;
    }

    let rec = state.table.slot(slot);
    let mut key = [0u8; nexus_transform::MAX_HASH_LEN];
    let mut tag = [0u8; nexus_transform::MAX_HASH_LEN];
    key[..rec.key.len()].copy_from_slice(&rec.key);
    tag[..rec.tag.len()].copy_from_slice(&rec.tag);
    let msg = Message::update_meta(cid.0, rec.length as u32, rec.compression.to_wire(), key, tag);

    match state.writer.send(&msg) {
        Ok(()) => {
            state.agent_queue.complete(cid.0);
            state.table.slot_mut(slot).state = ChunkState::Clean;
            state.table.note_clean(slot);
        }
        Err(e) => {
            warn!(?cid, error = %e, "failed to send UPDATE_META");
            state.agent_queue.complete(cid.0);
            fail_record(state, slot, ChunkErrorKind::Io, true);
        }
    }
    true
}

/// Sends `CHUNK_ERR` synchronously. Returns `true` once the record has
/// settled into terminal `ERROR`, `false` if the send must be deferred
/// (agent ring full).
fn dispatch_chunk_err<S: ChannelStream>(state: &mut DeviceState<S>, slot: usize) -> bool {
    let cid = state.table.slot(slot).cid;
    if state.closed {
        state.table.slot_mut(slot).state = ChunkState::Error;
        return true;
    }
    if state.agent_queue.begin(cid.0, PendingKind::ChunkErr).is_err() {
        trace!(?cid, "agent ring full, deferring CHUNK_ERR");
        return false;
    }

    let wire_err = state.table.slot(slot).error.as_ref().map_or(ChunkErrorKind::Io.to_wire(false), |e| e.kind.to_wire(e.is_write));
    state.table.slot_mut(slot).state = ChunkState::ErrorPending;
    match state.writer.send(&Message::chunk_err(cid.0, wire_err)) {
        Ok(()) => {
            state.agent_queue.complete(cid.0);
            state.table.slot_mut(slot).state = ChunkState::Error;
            true
        }
        Err(e) => {
            warn!(?cid, error = %e, "failed to send CHUNK_ERR, will retry");
            state.agent_queue.complete(cid.0);
            false
        }
    }
}

/// Derives the cipher IV from device-wide parameters, never from per-chunk
/// key material. A fixed all-zero IV is safe here precisely because the key
/// is already unique per chunk (it is the hash of the plaintext), so no two
/// chunks ever reuse the same key/IV pair under different plaintexts.
fn derive_iv(cipher: CipherAlgo) -> Vec<u8> {
    vec![0u8; cipher.iv_len()]
}

fn classify_transform_error(e: TransformError) -> ChunkErrorKind {
    match e {
        TransformError::PaddingInvalid | TransformError::CipherLengthNotBlockAligned(_) | TransformError::InvalidKeyLength { .. } => ChunkErrorKind::Crypt,
        TransformError::DecompressMismatch { .. } | TransformError::DecompressFailed(_) | TransformError::TooBig { .. } => ChunkErrorKind::Compress,
        TransformError::UnsupportedAlgorithm(_) => ChunkErrorKind::Hash,
    }
}
