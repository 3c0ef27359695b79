use thiserror::Error;

/// Errors raised by the transform pipeline.
///
/// Variants are classified by doc comment the way the rest of the engine
/// classifies its error taxonomy: whether the failure is data-dependent
/// (something an agent or a corrupted chunk legitimately produced) or a
/// programming error (a caller violated a precondition).
#[derive(Debug, Error)]
pub enum TransformError {
    /// USER ERROR: the agent named a compression, hash, or cipher id this
    /// device was not configured to support.
    #[error("unsupported algorithm id {0}")]
    UnsupportedAlgorithm(u8),

    /// DATA ERROR: padding bytes did not match the scheme (wrong fill value
    /// or out-of-range length byte). Always indicates tampered or corrupt
    /// ciphertext, never a local bug.
    #[error("invalid padding")]
    PaddingInvalid,

    /// DATA ERROR: even with `CompressionAlgo::None`, the padded plaintext
    /// would occupy `chunksize` bytes or more and so cannot fit the
    /// backing store's fixed per-chunk slot. Padding always grows its
    /// input by at least one byte, so this can only happen when the
    /// plaintext itself is already within one block of `chunksize`.
    #[error("padded length {padded_len} does not fit in a {chunksize}-byte chunk slot")]
    TooBig { padded_len: usize, chunksize: usize },

    /// PROGRAMMING ERROR: cipher input was not a multiple of the block size.
    /// The pipeline always pads before encrypting, so this means a caller
    /// bypassed `pad`.
    #[error("cipher input length {0} is not block-aligned")]
    CipherLengthNotBlockAligned(usize),

    /// PROGRAMMING ERROR: key or IV material was the wrong length for the
    /// selected cipher.
    #[error("expected key/IV length {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// DATA ERROR: decompression did not reproduce the length recorded in
    /// the chunk's metadata. Either the compressed bytes are corrupt or the
    /// wrong algorithm id was applied.
    #[error("decompressed length {actual} did not match expected {expected}")]
    DecompressMismatch { expected: usize, actual: usize },

    /// Underlying decompressor rejected the stream outright (bad header,
    /// truncated stream, checksum failure).
    #[error("decompression failed: {0}")]
    DecompressFailed(String),
}
