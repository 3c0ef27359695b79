use thiserror::Error;

use nexus_transform::{CipherAlgo, CompressionAlgo, CompressionMask, HashAlgo};

/// Largest legal `chunksize`, in bytes. Spec.md §3 bounds `chunksize` to
/// `[512, MAX_CHUNKSIZE]` and a power of two; 1 MiB is generous enough for
/// any backing store this engine targets while keeping a single chunk's
/// worth of scratch buffers a bounded, page-aligned allocation.
pub const MAX_CHUNKSIZE: usize = 1 << 20;

/// Declared limit on how many chunks a single inbound request may span
/// (`last_chunk - first_chunk <= MAX_CHUNKS_PER_IO - 1`, spec.md §4.4).
/// Advertised to the block-layer glue that chunk-aligns OS requests.
pub const MAX_CHUNKS_PER_IO: usize = 32;

/// Declared limit on scatter/gather segments per request (spec.md §6).
pub const MAX_SEGS_PER_IO: usize = 64;

/// Lower bound used to validate `cachesize`: spec.md §4.2 requires
/// `cachesize >= MIN_CONCURRENT_REQS * MAX_CHUNKS_PER_IO` so that the
/// worst case of `MIN_CONCURRENT_REQS` simultaneous maximal requests can
/// all make forward progress without deadlocking on cache slots.
pub const MIN_CONCURRENT_REQS: usize = 4;

/// Fraction of system memory a single device's cache may occupy
/// (spec.md §4.6, per-device cap).
pub const PER_DEVICE_MEMORY_FRACTION: f64 = 0.10;

/// Fraction of system memory the sum of every device's cache may occupy
/// (spec.md §4.6, cross-device cap).
pub const TOTAL_MEMORY_FRACTION: f64 = 0.30;

/// Validated, immutable construction parameters for one device.
///
/// Mirrors `oxcrypt-core::vault::config`'s validated-construction idiom:
/// the only way to obtain a `DeviceParams` is [`DeviceParams::validate`],
/// so every `Device` is built from parameters already known to satisfy
/// spec.md §4.6's invariants.
#[derive(Debug, Clone)]
pub struct DeviceParams {
    pub ident: String,
    pub chunksize: usize,
    pub chunks: u64,
    pub cachesize: usize,
    pub offset: u64,
    pub cipher: CipherAlgo,
    /// Hash algorithm used both to derive the convergent key and to compute
    /// the integrity tag. A device-wide choice, not a per-chunk one.
    pub hash: HashAlgo,
    pub default_compression: CompressionAlgo,
    pub supported_compression: CompressionMask,
    /// Size of the agent-protocol ring: the maximum number of chunks that
    /// may simultaneously have a `pending_user_msg` outstanding
    /// (invariant 6). Independent of `cachesize`.
    pub agent_ring_depth: usize,
    /// Per-device policy resolving spec.md §9's open question #1: whether
    /// a provable full-chunk overwrite may skip straight from `INVALID`
    /// to `DIRTY` without first fetching metadata. Default `false`.
    pub allow_blind_overwrite: bool,
}

/// Errors raised by [`DeviceParams::validate`].
#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("chunksize {0} must be a power of two")]
    ChunksizeNotPowerOfTwo(usize),

    #[error("chunksize {0} out of range [512, {MAX_CHUNKSIZE}]")]
    ChunksizeOutOfRange(usize),

    #[error("cachesize {cachesize} below minimum {minimum} (MIN_CONCURRENT_REQS * MAX_CHUNKS_PER_IO)")]
    CachesizeTooSmall { cachesize: usize, minimum: usize },

    #[error("device cache of {requested_bytes} bytes exceeds the per-device cap of {cap_bytes} bytes ({frac}% of system memory)")]
    PerDeviceMemoryExceeded { requested_bytes: u64, cap_bytes: u64, frac: u32 },

    #[error(
        "devices' combined cache of {total_bytes} bytes would exceed the system-wide cap of {cap_bytes} bytes ({frac}% of system memory)"
    )]
    TotalMemoryExceeded { total_bytes: u64, cap_bytes: u64, frac: u32 },

    #[error("default compression algorithm is not in the device's supported set")]
    DefaultCompressionNotSupported,
}

impl DeviceParams {
    /// Validates `self` against spec.md §4.6's construction rules.
    /// `system_memory_bytes` and `other_devices_cache_bytes` let callers
    /// (the `nexus-daemon` registry) check the per-device and
    /// cross-device memory caps without this crate depending on a
    /// platform-specific "how much RAM does this host have" API.
    pub fn validate(self, system_memory_bytes: u64, other_devices_cache_bytes: u64) -> Result<Self, ParamsError> {
        if !self.chunksize.is_power_of_two() {
            return Err(ParamsError::ChunksizeNotPowerOfTwo(self.chunksize));
        }
        if !(512..=MAX_CHUNKSIZE).contains(&self.chunksize) {
            return Err(ParamsError::ChunksizeOutOfRange(self.chunksize));
        }
        let minimum = MIN_CONCURRENT_REQS * MAX_CHUNKS_PER_IO;
        if self.cachesize < minimum {
            return Err(ParamsError::CachesizeTooSmall { cachesize: self.cachesize, minimum });
        }
        if !self.supported_compression.allows(self.default_compression) {
            return Err(ParamsError::DefaultCompressionNotSupported);
        }

        let this_cache_bytes = (self.cachesize * self.chunksize) as u64;
        let per_device_cap = (system_memory_bytes as f64 * PER_DEVICE_MEMORY_FRACTION) as u64;
        if this_cache_bytes > per_device_cap {
            return Err(ParamsError::PerDeviceMemoryExceeded {
                requested_bytes: this_cache_bytes,
                cap_bytes: per_device_cap,
                frac: (PER_DEVICE_MEMORY_FRACTION * 100.0) as u32,
            });
        }

        let total_cap = (system_memory_bytes as f64 * TOTAL_MEMORY_FRACTION) as u64;
        let total_bytes = other_devices_cache_bytes + this_cache_bytes;
        if total_bytes > total_cap {
            return Err(ParamsError::TotalMemoryExceeded {
                total_bytes,
                cap_bytes: total_cap,
                frac: (TOTAL_MEMORY_FRACTION * 100.0) as u32,
            });
        }

        Ok(self)
    }

    #[must_use]
    pub fn pages_per_chunk(&self) -> usize {
        self.chunksize.div_ceil(nexus_cache::PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> DeviceParams {
        DeviceParams {
            ident: "test0".into(),
            chunksize: 4096,
            chunks: 1024,
            cachesize: MIN_CONCURRENT_REQS * MAX_CHUNKS_PER_IO,
            offset: 0,
            cipher: CipherAlgo::Aes256Cbc,
            hash: HashAlgo::Sha256,
            default_compression: CompressionAlgo::Zlib,
            supported_compression: CompressionMask::all(),
            agent_ring_depth: 64,
            allow_blind_overwrite: false,
        }
    }

    #[test]
    fn accepts_valid_params() {
        let gigabyte = 1u64 << 30;
        assert!(base().validate(gigabyte, 0).is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_chunksize() {
        let mut p = base();
        p.chunksize = 4097;
        assert!(matches!(p.validate(1 << 30, 0), Err(ParamsError::ChunksizeNotPowerOfTwo(_))));
    }

    #[test]
    fn rejects_undersized_cache() {
        let mut p = base();
        p.cachesize = 4;
        assert!(matches!(p.validate(1 << 30, 0), Err(ParamsError::CachesizeTooSmall { .. })));
    }

    #[test]
    fn rejects_per_device_memory_blowout() {
        let mut p = base();
        p.cachesize = 1_000_000;
        assert!(matches!(p.validate(1 << 20, 0), Err(ParamsError::PerDeviceMemoryExceeded { .. })));
    }

    #[test]
    fn rejects_unsupported_default_compression() {
        let mut p = base();
        p.supported_compression = CompressionMask(0);
        assert!(matches!(p.validate(1 << 30, 0), Err(ParamsError::DefaultCompressionNotSupported)));
    }
}
