use nexus_transform::MAX_HASH_LEN;

use crate::error::ProtocolError;

/// Message type tags. Kernel-to-agent types have the high nibble clear;
/// agent-to-kernel types have it set to `0x1`, matching the wire layout
/// in spec.md so a misdirected message is immediately recognizable by
/// direction without consulting a side table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    /// Kernel -> agent: "I need metadata for this chunk."
    GetMeta = 0x0000,
    /// Kernel -> agent: "This chunk's tag/key/compression changed."
    UpdateMeta = 0x0001,
    /// Kernel -> agent: "This chunk hit an unrecoverable read-path error."
    ChunkErr = 0x0002,
    /// Agent -> kernel: reply to `GetMeta`, or unsolicited key/tag push.
    SetMeta = 0x1000,
    /// Agent -> kernel: "I cannot service this chunk; fail it hard."
    MetaHarderr = 0x1001,
}

impl MessageType {
    pub fn from_wire(v: u16) -> Result<Self, ProtocolError> {
        match v {
            0x0000 => Ok(Self::GetMeta),
            0x0001 => Ok(Self::UpdateMeta),
            0x0002 => Ok(Self::ChunkErr),
            0x1000 => Ok(Self::SetMeta),
            0x1001 => Ok(Self::MetaHarderr),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }

    #[must_use]
    pub fn to_wire(self) -> u16 {
        self as u16
    }

    /// Messages with the high nibble of the type set originate from the
    /// agent; everything else originates from the kernel side.
    #[must_use]
    pub fn is_agent_originated(self) -> bool {
        self.to_wire() & 0xF000 != 0
    }
}

/// Fixed-layout size of every message on the wire, identical on 32-bit
/// and 64-bit hosts: `8 + 4 + 2 + 1 + MAX_HASH_LEN + MAX_HASH_LEN` bytes.
pub const WIRE_MESSAGE_LEN: usize = 8 + 4 + 2 + 1 + MAX_HASH_LEN + MAX_HASH_LEN;

/// One agent-protocol message, matching spec.md's wire struct field for
/// field. `compression_or_err` is interpreted by message type: a
/// compression algorithm id on `SetMeta`/`UpdateMeta`, a wire error code
/// (kind OR'd with `0x80` for write-side failures) on `ChunkErr`/
/// `MetaHarderr`, and unused (zero) on `GetMeta`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub cid: u64,
    pub length: u32,
    pub msg_type: MessageType,
    pub compression_or_err: u8,
    pub key: [u8; MAX_HASH_LEN],
    pub tag: [u8; MAX_HASH_LEN],
}

impl Message {
    #[must_use]
    pub fn get_meta(cid: u64) -> Self {
        Self {
            cid,
            length: 0,
            msg_type: MessageType::GetMeta,
            compression_or_err: 0,
            key: [0; MAX_HASH_LEN],
            tag: [0; MAX_HASH_LEN],
        }
    }

    #[must_use]
    pub fn chunk_err(cid: u64, wire_err: u8) -> Self {
        Self {
            cid,
            length: 0,
            msg_type: MessageType::ChunkErr,
            compression_or_err: wire_err,
            key: [0; MAX_HASH_LEN],
            tag: [0; MAX_HASH_LEN],
        }
    }

    #[must_use]
    pub fn update_meta(cid: u64, length: u32, compression: u8, key: [u8; MAX_HASH_LEN], tag: [u8; MAX_HASH_LEN]) -> Self {
        Self {
            cid,
            length,
            msg_type: MessageType::UpdateMeta,
            compression_or_err: compression,
            key,
            tag,
        }
    }

    /// Serializes this message into exactly [`WIRE_MESSAGE_LEN`] bytes,
    /// little-endian, with explicit field-by-field packing rather than a
    /// `#[repr(C)]` transmute -- the layout must be bit-for-bit identical
    /// regardless of host pointer width or struct alignment rules.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; WIRE_MESSAGE_LEN] {
        let mut out = [0u8; WIRE_MESSAGE_LEN];
        let mut off = 0;
        out[off..off + 8].copy_from_slice(&self.cid.to_le_bytes());
        off += 8;
        out[off..off + 4].copy_from_slice(&self.length.to_le_bytes());
        off += 4;
        out[off..off + 2].copy_from_slice(&self.msg_type.to_wire().to_le_bytes());
        off += 2;
        out[off] = self.compression_or_err;
        off += 1;
        out[off..off + MAX_HASH_LEN].copy_from_slice(&self.key);
        off += MAX_HASH_LEN;
        out[off..off + MAX_HASH_LEN].copy_from_slice(&self.tag);
        out
    }

    /// Parses a message from a buffer that must be exactly
    /// [`WIRE_MESSAGE_LEN`] bytes long. A shorter or longer slice is
    /// always a framing bug upstream (the channel layer only ever hands
    /// this function whole messages), never recoverable here.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() != WIRE_MESSAGE_LEN {
            return Err(ProtocolError::BadLength(buf.len()));
        }
        let mut off = 0;
        let cid = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let length = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let msg_type = MessageType::from_wire(u16::from_le_bytes(buf[off..off + 2].try_into().unwrap()))?;
        off += 2;
        let compression_or_err = buf[off];
        off += 1;
        let mut key = [0u8; MAX_HASH_LEN];
        key.copy_from_slice(&buf[off..off + MAX_HASH_LEN]);
        off += MAX_HASH_LEN;
        let mut tag = [0u8; MAX_HASH_LEN];
        tag.copy_from_slice(&buf[off..off + MAX_HASH_LEN]);

        Ok(Self {
            cid,
            length,
            msg_type,
            compression_or_err,
            key,
            tag,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_get_meta() {
        let msg = Message::get_meta(42);
        let bytes = msg.to_bytes();
        assert_eq!(bytes.len(), WIRE_MESSAGE_LEN);
        let parsed = Message::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn round_trips_set_meta_with_key_and_tag() {
        let mut key = [0u8; MAX_HASH_LEN];
        let mut tag = [0u8; MAX_HASH_LEN];
        key[0] = 0xAB;
        tag[31] = 0xCD;
        let msg = Message {
            cid: 7,
            length: 4096,
            msg_type: MessageType::SetMeta,
            compression_or_err: 1,
            key,
            tag,
        };
        let parsed = Message::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn rejects_wrong_length() {
        let short = vec![0u8; WIRE_MESSAGE_LEN - 1];
        assert!(matches!(Message::from_bytes(&short), Err(ProtocolError::BadLength(_))));
    }

    #[test]
    fn agent_originated_classification() {
        assert!(!MessageType::GetMeta.is_agent_originated());
        assert!(!MessageType::UpdateMeta.is_agent_originated());
        assert!(!MessageType::ChunkErr.is_agent_originated());
        assert!(MessageType::SetMeta.is_agent_originated());
        assert!(MessageType::MetaHarderr.is_agent_originated());
    }
}
