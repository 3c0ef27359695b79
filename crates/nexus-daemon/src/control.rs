//! The three control operations spec.md §6 exposes on "a separate control
//! channel" (`REGISTER`, `UNREGISTER`, `CONFIG_THREAD`), plus the
//! introspection query this daemon layers on top, consumed by `nexusd`'s
//! CLI subcommands.
//!
//! Grounded in `oxcrypt-cli`'s `commands::*` shape (one request type, one
//! handler, one response), generalized from vault-browsing operations to
//! device-lifecycle operations.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use nexus_engine::{BackingStore, Device, DeviceParams, DeviceStats};
use nexus_protocol::testing::DuplexEnd;
use nexus_transform::{CipherAlgo, CompressionAlgo, CompressionMask, HashAlgo};

use crate::error::DeviceError;
use crate::registry::DEVICE_REGISTRY;

/// Monotonically-incrementing interface version advertised on the
/// control channel (spec.md §6).
pub const INTERFACE_VERSION: u32 = 1;

/// Fixed major number this reference harness advertises in lieu of a real
/// kernel block-device binding, which a host integrating Nexus into an
/// actual block layer would obtain from the kernel at module load instead
/// (out of scope here -- spec.md §1 scopes Nexus to the chunk-cache
/// engine, not the surrounding OS plumbing).
pub const NEXUS_BLOCK_MAJOR: u32 = 250;

/// Everything `REGISTER` needs to construct and validate a [`DeviceParams`],
/// plus the path of the backing store it opens before the chunk table is
/// allocated (spec.md §4.6's construction order).
pub struct RegisterRequest {
    pub ident: String,
    pub chunk_device_path: PathBuf,
    pub chunksize: usize,
    pub chunks: u64,
    pub cachesize: usize,
    pub offset: u64,
    pub cipher: CipherAlgo,
    pub hash: HashAlgo,
    pub default_compression: CompressionAlgo,
    pub supported_compression_mask: CompressionMask,
    pub agent_ring_depth: usize,
    pub allow_blind_overwrite: bool,
}

/// `REGISTER`'s reply, matching spec.md §6's field list exactly.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RegisterResponse {
    pub block_major: u32,
    pub num_minors: u32,
    pub index: u32,
    pub chunks: u64,
    pub hash_len: usize,
}

/// A narrow read-only query surface over one registered device's running
/// counters (spec.md §9's "introspection" design note), surfaced through
/// the `nexusd stats` CLI subcommand.
#[derive(Debug, Clone, Serialize)]
pub struct IntrospectSnapshot {
    pub devnum: u32,
    pub cache_len: usize,
    pub cache_capacity: usize,
    pub agent_queue_len: usize,
    pub agent_ring_depth: usize,
    pub worker_submitted: u64,
    pub worker_completed: u64,
    pub active_users: usize,
}

impl IntrospectSnapshot {
    fn from_stats(devnum: u32, stats: DeviceStats) -> Self {
        Self {
            devnum,
            cache_len: stats.cache_len,
            cache_capacity: stats.cache_capacity,
            agent_queue_len: stats.agent_queue_len,
            agent_ring_depth: stats.agent_ring_depth,
            worker_submitted: stats.worker_submitted,
            worker_completed: stats.worker_completed,
            active_users: stats.active_users,
        }
    }
}

/// Stateless entry point for the three control operations. All state
/// lives in [`crate::registry::DEVICE_REGISTRY`]; this type exists to
/// give the operations a shared namespace and doc home, the same role
/// `oxcrypt-cli::commands` modules play for vault operations.
pub struct ControlChannel;

impl ControlChannel {
    /// `REGISTER`: opens `req.chunk_device_path` as the backing store,
    /// validates construction parameters against the current registry's
    /// footprint, opens the device bound to `stream`, and publishes it
    /// under a freshly allocated devnum.
    ///
    /// `system_memory_bytes` is supplied by the caller (the CLI queries
    /// it via `sysinfo`) rather than detected here, keeping this crate's
    /// core logic platform-independent and unit-testable.
    pub fn register(
        req: RegisterRequest,
        backing: Arc<dyn BackingStore>,
        stream: DuplexEnd,
        system_memory_bytes: u64,
    ) -> Result<RegisterResponse, DeviceError> {
        let other_devices_cache_bytes = DEVICE_REGISTRY.total_cache_bytes();
        let params = DeviceParams {
            ident: req.ident,
            chunksize: req.chunksize,
            chunks: req.chunks,
            cachesize: req.cachesize,
            offset: req.offset,
            cipher: req.cipher,
            hash: req.hash,
            default_compression: req.default_compression,
            supported_compression: req.supported_compression_mask,
            agent_ring_depth: req.agent_ring_depth,
            allow_blind_overwrite: req.allow_blind_overwrite,
        }
        .validate(system_memory_bytes, other_devices_cache_bytes)?;

        let chunks = params.chunks;
        let hash_len = params.hash.digest_len();
        let device = Device::open(params, backing, stream);
        let index = DEVICE_REGISTRY.register(device);

        Ok(RegisterResponse { block_major: NEXUS_BLOCK_MAJOR, num_minors: 1, index, chunks, hash_len })
    }

    /// `UNREGISTER`: shuts down and drops the device bound to `devnum`.
    pub fn unregister(devnum: u32) -> Result<(), DeviceError> {
        DEVICE_REGISTRY.unregister(devnum)
    }

    /// `CONFIG_THREAD`: binds the calling OS thread as a device worker.
    ///
    /// `nexus_engine::Device::open` already spawns and owns its own fixed
    /// worker pool (spec.md §5) rather than accepting donated caller
    /// threads, so in this userspace port `CONFIG_THREAD` only validates
    /// that `devnum` exists; it is a compatibility no-op, recorded as an
    /// open-question resolution.
    pub fn config_thread(devnum: u32) -> Result<(), DeviceError> {
        if DEVICE_REGISTRY.get(devnum).is_some() {
            Ok(())
        } else {
            Err(DeviceError::NotRegistered(devnum))
        }
    }

    /// Reads back one device's running counters.
    pub fn introspect(devnum: u32) -> Result<IntrospectSnapshot, DeviceError> {
        let device = DEVICE_REGISTRY.get(devnum).ok_or(DeviceError::NotRegistered(devnum))?;
        Ok(IntrospectSnapshot::from_stats(devnum, device.stats()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use nexus_engine::params::{MAX_CHUNKS_PER_IO, MIN_CONCURRENT_REQS};
    use nexus_engine::MemBackingStore;
    use nexus_protocol::testing::{duplex_pair, InMemoryAgent};

    use super::*;

    fn req(ident: &str) -> RegisterRequest {
        RegisterRequest {
            ident: ident.into(),
            chunk_device_path: PathBuf::from("/dev/null"),
            chunksize: 4096,
            chunks: 16,
            cachesize: MIN_CONCURRENT_REQS * MAX_CHUNKS_PER_IO,
            offset: 0,
            cipher: CipherAlgo::Aes256Cbc,
            hash: HashAlgo::Sha256,
            default_compression: CompressionAlgo::None,
            supported_compression_mask: CompressionMask::all(),
            agent_ring_depth: 64,
            allow_blind_overwrite: true,
        }
    }

    #[test]
    fn register_then_introspect_then_unregister() {
        let (end, agent_end) = duplex_pair();
        let _agent = InMemoryAgent::spawn(agent_end, HashMap::new());
        let backing = Arc::new(MemBackingStore::new(4096));

        let resp = ControlChannel::register(req("ctl-a"), backing, end, 1 << 30).unwrap();
        assert_eq!(resp.block_major, NEXUS_BLOCK_MAJOR);
        assert_eq!(resp.chunks, 16);
        assert_eq!(resp.hash_len, 32);

        let snapshot = ControlChannel::introspect(resp.index).unwrap();
        assert_eq!(snapshot.devnum, resp.index);
        assert_eq!(snapshot.cache_capacity, MIN_CONCURRENT_REQS * MAX_CHUNKS_PER_IO);

        ControlChannel::config_thread(resp.index).unwrap();
        ControlChannel::unregister(resp.index).unwrap();
        assert!(matches!(ControlChannel::introspect(resp.index), Err(DeviceError::NotRegistered(_))));
    }

    #[test]
    fn register_rejects_invalid_params() {
        let (end, _agent_end) = duplex_pair();
        let backing = Arc::new(MemBackingStore::new(4096));
        let mut bad = req("ctl-b");
        bad.chunksize = 4097;
        assert!(matches!(ControlChannel::register(bad, backing, end, 1 << 30), Err(DeviceError::Params(_))));
    }

    #[test]
    fn unregister_unknown_devnum_errors() {
        assert!(matches!(ControlChannel::unregister(0xFFFF_FFF0), Err(DeviceError::NotRegistered(_))));
    }
}
