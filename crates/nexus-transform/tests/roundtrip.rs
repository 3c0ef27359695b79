//! Round-trip laws for the whole transform pipeline (spec.md §8), run
//! under `proptest` across arbitrary chunk-sized plaintexts and every
//! compression algorithm this crate supports.

use proptest::prelude::*;

use nexus_transform::{decode_chunk, encode_chunk, CipherAlgo, CompressionAlgo};

const CHUNKSIZE: usize = 4096;

fn key_iv_for(data: &[u8]) -> ([u8; 32], [u8; 16]) {
    let digest = nexus_transform::hash::hash(nexus_transform::HashAlgo::Sha256, data);
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&digest[..16]);
    (key, iv)
}

fn compression_strategy() -> impl Strategy<Value = CompressionAlgo> {
    prop_oneof![Just(CompressionAlgo::None), Just(CompressionAlgo::Zlib), Just(CompressionAlgo::Lz4)]
}

proptest! {
    /// `decode_chunk(encode_chunk(x)) == x` for arbitrary plaintext well
    /// under `chunksize`, across every compression algorithm -- the
    /// padding trailer always has room to spare at this size so the
    /// pipeline never needs to fall back or refuse.
    #[test]
    fn encode_decode_round_trips(
        data in prop::collection::vec(any::<u8>(), 0..CHUNKSIZE / 2),
        compression in compression_strategy(),
    ) {
        let (key, iv) = key_iv_for(&data);
        let enc = encode_chunk(&data, CipherAlgo::Aes256Cbc, compression, CHUNKSIZE, &key, &iv).unwrap();
        let dec = decode_chunk(&enc.ciphertext, CipherAlgo::Aes256Cbc, enc.compression, enc.plaintext_len, &key, &iv).unwrap();
        prop_assert_eq!(dec, data);
    }

    /// The ciphertext `encode_chunk` returns always fits the declared
    /// chunk slot, and its length is always a multiple of the cipher's
    /// block size (spec.md §8: "length <= chunksize and length %
    /// cipher_block_size == 0").
    #[test]
    fn encoded_ciphertext_fits_slot_and_is_block_aligned(
        data in prop::collection::vec(any::<u8>(), 0..CHUNKSIZE / 2),
        compression in compression_strategy(),
    ) {
        let (key, iv) = key_iv_for(&data);
        let enc = encode_chunk(&data, CipherAlgo::Aes256Cbc, compression, CHUNKSIZE, &key, &iv).unwrap();
        prop_assert!(enc.ciphertext.len() <= CHUNKSIZE);
        prop_assert_eq!(enc.ciphertext.len() % CipherAlgo::Aes256Cbc.iv_len(), 0);
    }

    /// A tampered tag is always detected before decryption is even
    /// attempted at the device layer -- modeled here at the hash level,
    /// since `encode_chunk`/`decode_chunk` do not themselves carry a tag
    /// (nexus-engine's state machine computes and checks it around the
    /// pipeline).
    #[test]
    fn hash_of_distinct_ciphertexts_differs(
        a in prop::collection::vec(any::<u8>(), 1..256),
        b in prop::collection::vec(any::<u8>(), 1..256),
    ) {
        prop_assume!(a != b);
        let ha = nexus_transform::hash::hash(nexus_transform::HashAlgo::Sha256, &a);
        let hb = nexus_transform::hash::hash(nexus_transform::HashAlgo::Sha256, &b);
        prop_assert_ne!(ha, hb);
    }
}
