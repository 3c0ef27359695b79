//! Per-chunk transform pipeline: compress, pad, encrypt a plaintext buffer
//! on the write side; decrypt, unpad, decompress on the read side.
//!
//! Every function here is pure and stateless with respect to the rest of
//! the engine -- no chunk identity, cache state, or I/O lives in this
//! crate. Callers own scratch buffers and retry policy.

pub mod algo;
pub mod cipher;
pub mod compress;
pub mod error;
pub mod hash;
pub mod pad;
pub mod pipeline;

pub use algo::{CipherAlgo, CompressionAlgo, CompressionMask, HashAlgo, CIPHER_BLOCK, MAX_HASH_LEN};
pub use error::TransformError;
pub use pipeline::{decode_chunk, encode_chunk, EncodedChunk};
