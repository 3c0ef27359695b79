//! Fixed-layout binary agent protocol: the character-channel message
//! exchange between the engine and the user-space agent that owns the
//! authoritative keyring and chunk tags.
//!
//! This crate owns the wire format ([`message`]), the whole-message framing
//! discipline over an arbitrary `Read + Write` transport ([`channel`]), and
//! the outstanding-message bookkeeping that enforces the ring-depth and
//! exactly-once-reply invariants ([`queue`]). It does not own a device lock:
//! callers serialize access the same way `nexus-cache` expects.

pub mod channel;
pub mod error;
pub mod message;
pub mod queue;
pub mod testing;

pub use channel::AgentChannel;
pub use error::ProtocolError;
pub use message::{Message, MessageType, WIRE_MESSAGE_LEN};
pub use queue::{AgentQueue, PendingKind, QueueError};
