use ring::digest;

use crate::algo::HashAlgo;

/// Hashes `data` under `algo`, returning the digest with no padding beyond
/// its natural length. Callers that need a fixed-width `[u8; MAX_HASH_LEN]`
/// field (for the wire protocol or a chunk record) zero-pad on their side.
#[must_use]
pub fn hash(algo: HashAlgo, data: &[u8]) -> Vec<u8> {
    match algo {
        HashAlgo::Sha256 => digest::digest(&digest::SHA256, data).as_ref().to_vec(),
    }
}
