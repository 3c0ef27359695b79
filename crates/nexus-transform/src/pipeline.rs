use zeroize::Zeroize;

use crate::algo::{CipherAlgo, CompressionAlgo, CIPHER_BLOCK};
use crate::cipher;
use crate::compress;
use crate::error::TransformError;
use crate::pad;

/// Result of running [`encode_chunk`]: the ciphertext ready to hand to the
/// backing store, plus the compression id actually used (which may differ
/// from the one requested if the preferred algorithm did not shrink the
/// chunk enough to be worth storing).
pub struct EncodedChunk {
    pub ciphertext: Vec<u8>,
    pub compression: CompressionAlgo,
    /// Length of the original plaintext, recorded in chunk metadata so
    /// `decode_chunk` knows how much to expect back from decompression.
    pub plaintext_len: usize,
}

/// Runs the write-side pipeline: compress, pad, encrypt.
///
/// If `preferred` compression plus padding would occupy `chunksize` bytes
/// or more, the chunk is re-encoded with [`CompressionAlgo::None`] instead
/// -- storing the compressed form would save nothing and this chunk is
/// simply incompressible. The `None` encoding never pads: it zero-fills the
/// plaintext out to exactly `chunksize` bytes and encrypts that directly, so
/// `length == chunksize` with no PKCS trailer to strip on the way back out.
/// Only a plaintext that already exceeds `chunksize` is refused outright,
/// with [`TransformError::TooBig`], since no encoding could make it fit the
/// chunk's fixed storage slot.
pub fn encode_chunk(
    data: &[u8],
    cipher_algo: CipherAlgo,
    preferred: CompressionAlgo,
    chunksize: usize,
    key: &[u8],
    iv: &[u8],
) -> Result<EncodedChunk, TransformError> {
    let block = cipher_algo.iv_len().min(CIPHER_BLOCK);

    let try_compressed = |algo: CompressionAlgo| -> Result<Vec<u8>, TransformError> {
        let compressed = compress::compress(algo, data)?;
        Ok(pad::pad(&compressed, block))
    };

    let none_fallback = |data: &[u8]| -> Result<Vec<u8>, TransformError> {
        if data.len() > chunksize {
            return Err(TransformError::TooBig {
                padded_len: data.len(),
                chunksize,
            });
        }
        let mut filled = vec![0u8; chunksize];
        filled[..data.len()].copy_from_slice(data);
        Ok(filled)
    };

    let (compression, mut body) = if preferred == CompressionAlgo::None {
        (CompressionAlgo::None, none_fallback(data)?)
    } else {
        let padded = try_compressed(preferred)?;
        if padded.len() >= chunksize {
            tracing::debug!(chunksize, padded_len = padded.len(), "compression did not shrink chunk, falling back to none");
            (CompressionAlgo::None, none_fallback(data)?)
        } else {
            (preferred, padded)
        }
    };

    let encrypted = cipher::encrypt(cipher_algo, key, iv, &body);
    body.zeroize();
    let ciphertext = encrypted?;
    Ok(EncodedChunk {
        ciphertext,
        compression,
        plaintext_len: data.len(),
    })
}

/// Runs the read-side pipeline: decrypt, unpad, decompress. The inverse of
/// [`encode_chunk`] given the same `compression` id it returned.
///
/// `CompressionAlgo::None` skips unpadding entirely -- the encode side never
/// wrote a PKCS trailer for it, just a zero-filled tail -- and instead
/// truncates the decrypted buffer to `plaintext_len`.
pub fn decode_chunk(
    ciphertext: &[u8],
    cipher_algo: CipherAlgo,
    compression: CompressionAlgo,
    plaintext_len: usize,
    key: &[u8],
    iv: &[u8],
) -> Result<Vec<u8>, TransformError> {
    let mut decrypted = cipher::decrypt(cipher_algo, key, iv, ciphertext)?;

    if compression == CompressionAlgo::None {
        let result = if decrypted.len() < plaintext_len {
            Err(TransformError::DecompressMismatch {
                expected: plaintext_len,
                actual: decrypted.len(),
            })
        } else {
            Ok(decrypted[..plaintext_len].to_vec())
        };
        decrypted.zeroize();
        return result;
    }

    let block = cipher_algo.iv_len().min(CIPHER_BLOCK);
    let result = pad::unpad(&decrypted, block).and_then(|compressed| compress::decompress(compression, compressed, plaintext_len));
    decrypted.zeroize();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::HashAlgo;
    use crate::hash;

    fn key_iv_for(data: &[u8]) -> ([u8; 32], [u8; 16]) {
        let digest = hash::hash(HashAlgo::Sha256, data);
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&digest[..16]);
        (key, iv)
    }

    #[test]
    fn round_trips_with_compressible_data() {
        let data = vec![0x11u8; 4096];
        let (key, iv) = key_iv_for(&data);
        let enc = encode_chunk(&data, CipherAlgo::Aes256Cbc, CompressionAlgo::Zlib, 4096, &key, &iv).unwrap();
        assert_eq!(enc.compression, CompressionAlgo::Zlib);
        let dec = decode_chunk(&enc.ciphertext, CipherAlgo::Aes256Cbc, enc.compression, enc.plaintext_len, &key, &iv).unwrap();
        assert_eq!(dec, data);
    }

    #[test]
    fn incompressible_data_falls_back_to_none() {
        // Pseudo-random-looking bytes that zlib cannot shrink meaningfully.
        let data: Vec<u8> = (0..2048u32).map(|i| (i.wrapping_mul(2654435761) >> 24) as u8).collect();
        let (key, iv) = key_iv_for(&data);
        let enc = encode_chunk(&data, CipherAlgo::Aes256Cbc, CompressionAlgo::Zlib, 4096, &key, &iv).unwrap();
        assert_eq!(enc.compression, CompressionAlgo::None);
        let dec = decode_chunk(&enc.ciphertext, CipherAlgo::Aes256Cbc, enc.compression, enc.plaintext_len, &key, &iv).unwrap();
        assert_eq!(dec, data);
    }

    #[test]
    fn incompressible_full_chunk_write_zero_fills_and_round_trips() {
        // A plaintext that already fills the whole chunk and cannot be
        // shrunk by compression still has to fit: the `None` fallback
        // zero-fills instead of padding, so there is no trailer to make it
        // overflow the slot.
        let data: Vec<u8> = (0..4096u32).map(|i| (i.wrapping_mul(2654435761) >> 24) as u8).collect();
        let (key, iv) = key_iv_for(&data);
        let enc = encode_chunk(&data, CipherAlgo::Aes256Cbc, CompressionAlgo::Zlib, 4096, &key, &iv).unwrap();
        assert_eq!(enc.compression, CompressionAlgo::None);
        assert_eq!(enc.ciphertext.len(), 4096);
        let dec = decode_chunk(&enc.ciphertext, CipherAlgo::Aes256Cbc, enc.compression, enc.plaintext_len, &key, &iv).unwrap();
        assert_eq!(dec, data);
    }

    #[test]
    fn plaintext_larger_than_chunksize_is_refused_as_too_big() {
        let data = vec![0x42u8; 4097];
        let (key, iv) = key_iv_for(&data);
        let err = encode_chunk(&data, CipherAlgo::Aes256Cbc, CompressionAlgo::Zlib, 4096, &key, &iv).unwrap_err();
        assert!(matches!(err, TransformError::TooBig { .. }));
    }
}
