use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::algo::CompressionAlgo;
use crate::error::TransformError;

/// Compresses `data` under `algo`. Returns the compressed bytes with no
/// length prefix; the caller already knows the original length from the
/// chunk's metadata and passes it back into [`decompress`].
pub fn compress(algo: CompressionAlgo, data: &[u8]) -> Result<Vec<u8>, TransformError> {
    match algo {
        CompressionAlgo::None => Ok(data.to_vec()),
        CompressionAlgo::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len()), Compression::default());
            encoder
                .write_all(data)
                .map_err(|e| TransformError::DecompressFailed(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| TransformError::DecompressFailed(e.to_string()))
        }
        CompressionAlgo::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
    }
}

/// Decompresses `data`, which must have been produced by [`compress`] with
/// the same `algo`. `expected_len` is the plaintext length recorded when
/// the chunk was written; a mismatch is always a data integrity problem,
/// never recoverable locally.
pub fn decompress(algo: CompressionAlgo, data: &[u8], expected_len: usize) -> Result<Vec<u8>, TransformError> {
    let out = match algo {
        CompressionAlgo::None => data.to_vec(),
        CompressionAlgo::Zlib => {
            let mut decoder = ZlibDecoder::new(data);
            let mut out = Vec::with_capacity(expected_len);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| TransformError::DecompressFailed(e.to_string()))?;
            out
        }
        CompressionAlgo::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| TransformError::DecompressFailed(e.to_string()))?,
    };
    if out.len() != expected_len {
        return Err(TransformError::DecompressMismatch {
            expected: expected_len,
            actual: out.len(),
        });
    }
    Ok(out)
}
