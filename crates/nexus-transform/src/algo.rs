use crate::error::TransformError;

/// Maximum digest/key/tag length any algorithm this crate supports will
/// ever produce. Fixed so the wire protocol can carry key/tag fields as
/// fixed-size arrays.
pub const MAX_HASH_LEN: usize = 32;

/// Block size of every cipher this crate supports. The padding scheme in
/// [`crate::pad`] is defined in terms of this constant.
pub const CIPHER_BLOCK: usize = 16;

/// Compression algorithm identity, transmitted on the wire as a single
/// byte (the `compression_or_err` field when it does not carry an error
/// code). A closed, tagged set rather than a trait object: algorithms are
/// selected by a device-level allow-list, not discovered at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CompressionAlgo {
    /// Passthrough. Always present in every device's supported set.
    None = 0,
    /// Dictionary compressor (DEFLATE via zlib framing).
    Zlib = 1,
    /// LZ77-family block compressor.
    Lz4 = 2,
}

impl CompressionAlgo {
    pub fn from_wire(id: u8) -> Result<Self, TransformError> {
        match id {
            0 => Ok(Self::None),
            1 => Ok(Self::Zlib),
            2 => Ok(Self::Lz4),
            other => Err(TransformError::UnsupportedAlgorithm(other)),
        }
    }

    #[must_use]
    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// Hash algorithm identity. Used both to derive the convergent key and to
/// compute the integrity tag stored alongside a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HashAlgo {
    Sha256 = 0,
}

impl HashAlgo {
    pub fn from_wire(id: u8) -> Result<Self, TransformError> {
        match id {
            0 => Ok(Self::Sha256),
            other => Err(TransformError::UnsupportedAlgorithm(other)),
        }
    }

    #[must_use]
    pub fn to_wire(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn digest_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
        }
    }
}

/// Cipher algorithm identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CipherAlgo {
    Aes256Cbc = 0,
}

impl CipherAlgo {
    pub fn from_wire(id: u8) -> Result<Self, TransformError> {
        match id {
            0 => Ok(Self::Aes256Cbc),
            other => Err(TransformError::UnsupportedAlgorithm(other)),
        }
    }

    #[must_use]
    pub fn to_wire(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn key_len(self) -> usize {
        match self {
            Self::Aes256Cbc => 32,
        }
    }

    #[must_use]
    pub fn iv_len(self) -> usize {
        match self {
            Self::Aes256Cbc => CIPHER_BLOCK,
        }
    }
}

/// Bitmask of compression algorithms a device advertises as acceptable,
/// matching the `supported_compression_mask` field of the `REGISTER`
/// control call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionMask(pub u32);

impl CompressionMask {
    #[must_use]
    pub fn all() -> Self {
        Self((1 << CompressionAlgo::None as u32) | (1 << CompressionAlgo::Zlib as u32) | (1 << CompressionAlgo::Lz4 as u32))
    }

    #[must_use]
    pub fn allows(self, algo: CompressionAlgo) -> bool {
        self.0 & (1 << algo as u32) != 0
    }
}
