/// The sixteen states a chunk record can occupy.
///
/// Settled states (`INVALID`, `META`, `ENCRYPTED`, `CLEAN`, `DIRTY`,
/// `DIRTY_ENCRYPTED`, `ERROR`) have no operation in flight: the state
/// machine's `run` function only blocks waiting for a ready-signal while
/// in one of these. Transient states have exactly one outstanding
/// operation (an agent round-trip, a backing-store I/O, or a transform
/// call) and are where the at-most-one-active-operation-per-chunk
/// invariant is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkState {
    /// No metadata, no data. The record's initial state before anything
    /// has ever been requested for this chunk id.
    Invalid,
    /// Waiting on `GET_META` reply from the agent.
    LoadMeta,
    /// Metadata known (tag, key, compression, length); data not loaded.
    Meta,
    /// Waiting on a backing-store read.
    LoadData,
    /// Ciphertext loaded, not yet decrypted.
    Encrypted,
    /// Waiting on decrypt+decompress.
    Decrypting,
    /// Plaintext present, matches what is stored; readable and evictable.
    Clean,
    /// Plaintext present, modified, not yet compressed/encrypted.
    Dirty,
    /// Waiting on compress+encrypt of a dirty buffer.
    Encrypting,
    /// Ciphertext produced from a dirty buffer, not yet written back.
    DirtyEncrypted,
    /// Waiting on a backing-store write.
    StoreData,
    /// Data stored; new tag/key not yet reported to the agent.
    DirtyMeta,
    /// Waiting on `UPDATE_META` acknowledgement (or fire-and-forget send).
    StoreMeta,
    /// A read-path error has been detected; waiting to notify the agent.
    ErrorUser,
    /// `CHUNK_ERR` send is in flight (or queued) to the agent.
    ErrorPending,
    /// Terminal error state. Only a full-chunk overwrite or eviction can
    /// leave this state.
    Error,
}

impl ChunkState {
    /// True for states with stable buffer bytes (invariant 2: buffer is
    /// mutated only in a transient state). This is the full "named by a
    /// noun" set spec.md §3 enumerates -- it does not mean no background
    /// work is happening: `ENCRYPTED`, `DIRTY`, `DIRTY_ENCRYPTED`,
    /// `DIRTY_META`, `ERROR_USER`, and `ERROR_PENDING` are all settled
    /// (buffer-stable) states the run function still drives forward
    /// unconditionally on its very next call, without waiting on a
    /// waiter's demand or an external ready-signal.
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            Self::Invalid
                | Self::Meta
                | Self::Encrypted
                | Self::Clean
                | Self::Dirty
                | Self::DirtyEncrypted
                | Self::DirtyMeta
                | Self::ErrorUser
                | Self::ErrorPending
                | Self::Error
        )
    }

    /// True for states with exactly one outstanding operation.
    #[must_use]
    pub fn is_transient(self) -> bool {
        !self.is_settled()
    }

    /// Only `CLEAN` chunks with no waiters and no pending agent message
    /// are eligible for LRU eviction (invariant enforced by the table, not
    /// by this predicate alone -- this only covers the state component).
    #[must_use]
    pub fn is_evictable_state(self) -> bool {
        matches!(self, Self::Clean)
    }
}
