use thiserror::Error;

/// Errors the protocol layer can raise. Distinct from
/// [`nexus_cache::ChunkError`] -- these describe the channel and framing,
/// not a chunk's own terminal state.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// USER ERROR: the agent sent a type id outside the known set.
    #[error("unknown message type 0x{0:04x}")]
    UnknownMessageType(u16),

    /// The channel delivered a buffer that was not exactly one wire
    /// message long. A partial read at end-of-message boundary is always
    /// a framing violation, never a recoverable short read.
    #[error("expected exactly {} bytes, got {0}", crate::message::WIRE_MESSAGE_LEN)]
    BadLength(usize),

    /// The channel would block and the caller asked for non-blocking
    /// semantics.
    #[error("channel would block")]
    WouldBlock,

    /// A blocking read was interrupted by a signal; caller should retry.
    #[error("channel read interrupted")]
    Interrupted,

    /// The agent closed its end of the channel. This is not necessarily
    /// an error condition for the device (it is the trigger for drain and
    /// shutdown) but it is always a terminal condition for this channel
    /// handle.
    #[error("agent channel closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
