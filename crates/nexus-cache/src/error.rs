use thiserror::Error;

/// The six per-chunk error kinds a chunk can collapse into, matching the
/// wire error codes carried in `CHUNK_ERR`/`META_HARDERR` messages
/// (`NOERR` has no representation here -- an error-free chunk simply has
/// no `ChunkError`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChunkErrorKind {
    /// Backing store read or write failed.
    Io = 1,
    /// Computed tag did not match the tag the agent supplied.
    Tag = 2,
    /// Agent-supplied key was malformed or rejected by the cipher.
    Key = 3,
    /// Hash computation itself failed (unsupported algorithm id).
    Hash = 4,
    /// Encryption or decryption failed.
    Crypt = 5,
    /// Compression or decompression failed.
    Compress = 6,
}

impl ChunkErrorKind {
    #[must_use]
    pub fn to_wire(self, is_write: bool) -> u8 {
        let code = self as u8;
        if is_write {
            code | 0x80
        } else {
            code
        }
    }
}

/// A chunk's terminal error state: the kind, and whether it was discovered
/// while servicing a write (in which case it was already reported
/// synchronously to the caller) or a read (in which case the chunk must
/// notify the agent via `CHUNK_ERR` before settling into `ERROR`).
#[derive(Debug, Clone, Error)]
#[error("chunk error: {kind:?} (write={is_write})")]
pub struct ChunkError {
    pub kind: ChunkErrorKind,
    pub is_write: bool,
}

impl ChunkError {
    #[must_use]
    pub fn new(kind: ChunkErrorKind, is_write: bool) -> Self {
        Self { kind, is_write }
    }
}

/// Errors the chunk table itself can raise, distinct from a chunk's own
/// terminal `ChunkError` -- these describe the table's admission control,
/// not a chunk's content.
#[derive(Debug, Error)]
pub enum TableError {
    /// No slot is currently evictable; caller should park on the
    /// device waitqueue and retry once a chunk settles into `CLEAN`
    /// with no waiters.
    #[error("chunk table is full and no slot is evictable")]
    WouldBlock,

    /// The referenced chunk id has no table entry (caller error: callers
    /// must reserve a chunk before looking it up).
    #[error("chunk {0} is not present in the table")]
    NotPresent(u64),
}
