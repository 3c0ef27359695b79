use crate::algo::CIPHER_BLOCK;
use crate::error::TransformError;

/// Pads `data` to a multiple of `block` using the scheme spec.md requires:
/// every added byte carries the pad count `p`, where `1 <= p <= block`.
/// Data already block-aligned still gets a full block of padding so
/// `unpad` can always find and validate a trailer.
#[must_use]
pub fn pad(data: &[u8], block: usize) -> Vec<u8> {
    debug_assert!(block > 0 && block <= CIPHER_BLOCK);
    let remainder = data.len() % block;
    let p = block - remainder;
    let mut out = Vec::with_capacity(data.len() + p);
    out.extend_from_slice(data);
    out.resize(data.len() + p, p as u8);
    out
}

/// Reverses [`pad`]. Rejects any trailer that does not consist of exactly
/// `p` bytes each equal to `p`, for `1 <= p <= block` -- this is the only
/// integrity check the pipeline performs on plaintext shape, since a
/// corrupted key decrypts to garbage padding with overwhelming probability.
pub fn unpad(data: &[u8], block: usize) -> Result<&[u8], TransformError> {
    if data.is_empty() || data.len() % block != 0 {
        return Err(TransformError::PaddingInvalid);
    }
    let p = *data.last().expect("checked non-empty above") as usize;
    if p == 0 || p > block || p > data.len() {
        return Err(TransformError::PaddingInvalid);
    }
    let trailer = &data[data.len() - p..];
    if trailer.iter().any(|&b| b as usize != p) {
        return Err(TransformError::PaddingInvalid);
    }
    Ok(&data[..data.len() - p])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_then_unpad_round_trips() {
        for len in [0usize, 1, 15, 16, 17, 31, 32, 4095, 4096] {
            let data = vec![0xABu8; len];
            let padded = pad(&data, 16);
            assert_eq!(padded.len() % 16, 0);
            assert!(padded.len() > data.len());
            let unpadded = unpad(&padded, 16).unwrap();
            assert_eq!(unpadded, data.as_slice());
        }
    }

    #[test]
    fn tampered_trailer_is_rejected() {
        let data = vec![1u8; 10];
        let mut padded = pad(&data, 16);
        let last = padded.len() - 1;
        padded[last] ^= 0xFF;
        assert!(unpad(&padded, 16).is_err());
    }

    #[test]
    fn zero_pad_count_is_rejected() {
        let mut buf = vec![0u8; 16];
        buf[15] = 0;
        assert!(unpad(&buf, 16).is_err());
    }
}
