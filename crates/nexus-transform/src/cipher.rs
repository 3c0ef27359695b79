use aes::Aes256;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::algo::CipherAlgo;
use crate::error::TransformError;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Encrypts `data` (which must already be block-aligned; the pipeline pads
/// before calling this) under `algo` with the given key and IV.
///
/// The pipeline never applies its own PKCS padding scheme through the
/// cipher crate's built-in padding -- `nexus_transform::pad` already
/// produced a block-aligned buffer, so encryption uses `NoPadding`.
pub fn encrypt(algo: CipherAlgo, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, TransformError> {
    check_lengths(algo, key, iv)?;
    if data.len() % algo.iv_len() != 0 {
        return Err(TransformError::CipherLengthNotBlockAligned(data.len()));
    }
    match algo {
        CipherAlgo::Aes256Cbc => {
            let mut buf = data.to_vec();
            let enc = Aes256CbcEnc::new_from_slices(key, iv)
                .map_err(|_| TransformError::InvalidKeyLength { expected: algo.key_len(), actual: key.len() })?;
            let n = buf.len();
            enc.encrypt_padded_mut::<NoPadding>(&mut buf, n)
                .map_err(|_| TransformError::CipherLengthNotBlockAligned(n))?;
            Ok(buf)
        }
    }
}

/// Decrypts `data`, the inverse of [`encrypt`]. Padding validity is checked
/// separately by `nexus_transform::pad::unpad`; a wrong key here produces
/// garbage plaintext that `unpad` will reject, not a cipher-level error.
pub fn decrypt(algo: CipherAlgo, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, TransformError> {
    check_lengths(algo, key, iv)?;
    if data.len() % algo.iv_len() != 0 {
        return Err(TransformError::CipherLengthNotBlockAligned(data.len()));
    }
    match algo {
        CipherAlgo::Aes256Cbc => {
            let mut buf = data.to_vec();
            let dec = Aes256CbcDec::new_from_slices(key, iv)
                .map_err(|_| TransformError::InvalidKeyLength { expected: algo.key_len(), actual: key.len() })?;
            let n = buf.len();
            dec.decrypt_padded_mut::<NoPadding>(&mut buf[..n])
                .map_err(|_| TransformError::CipherLengthNotBlockAligned(n))?;
            Ok(buf)
        }
    }
}

fn check_lengths(algo: CipherAlgo, key: &[u8], iv: &[u8]) -> Result<(), TransformError> {
    if key.len() != algo.key_len() {
        return Err(TransformError::InvalidKeyLength { expected: algo.key_len(), actual: key.len() });
    }
    if iv.len() != algo.iv_len() {
        return Err(TransformError::InvalidKeyLength { expected: algo.iv_len(), actual: iv.len() });
    }
    Ok(())
}
