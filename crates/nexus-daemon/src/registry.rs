//! Process-wide devnum -> device map, the table `REGISTER`/`UNREGISTER`
//! mutate.
//!
//! Grounded in `oxcrypt-mount::bounded_pool` (a `LazyLock`-backed
//! process-wide singleton with an explicit teardown function rather than a
//! raw `static mut`) and `oxcrypt-mount::handle_table` (a `DashMap`-backed
//! table with an atomic auto-incrementing id allocator that skips `0`,
//! generalized here from an arbitrary handle value to a devnum).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use nexus_engine::Device;
use nexus_protocol::testing::DuplexEnd;

use crate::error::DeviceError;

/// The transport every device in this registry runs its agent channel
/// over. The real agent process is out of scope (spec.md §1); this
/// binds every registered device to the same in-memory reference
/// transport the rest of the workspace already uses to stand in for it
/// (see `nexus_protocol::testing`).
pub type RegisteredDevice = Device<DuplexEnd>;

/// devnum -> open device, plus the devnum allocator.
pub struct DeviceRegistry {
    devices: DashMap<u32, RegisteredDevice>,
    next_devnum: AtomicU64,
}

impl DeviceRegistry {
    fn new() -> Self {
        Self { devices: DashMap::new(), next_devnum: AtomicU64::new(1) }
    }

    /// Registers `device` under a freshly allocated devnum (`0` is
    /// reserved and never handed out, matching `HandleTable::insert_auto`).
    pub fn register(&self, device: RegisteredDevice) -> u32 {
        loop {
            let id = self
                .next_devnum
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| Some(current.checked_add(1).unwrap_or(1)))
                .expect("fetch_update always succeeds");
            if id == 0 || id > u64::from(u32::MAX) {
                continue;
            }
            #[allow(clippy::cast_possible_truncation)]
            let id = id as u32;
            if let Entry::Vacant(entry) = self.devices.entry(id) {
                entry.insert(device);
                return id;
            }
        }
    }

    #[must_use]
    pub fn get(&self, devnum: u32) -> Option<RegisteredDevice> {
        self.devices.get(&devnum).map(|entry| entry.value().clone())
    }

    /// Removes and shuts down the device bound to `devnum` (spec.md
    /// §4.6's shutdown barrier).
    pub fn unregister(&self, devnum: u32) -> Result<(), DeviceError> {
        match self.devices.remove(&devnum) {
            Some((_, device)) => {
                device.shutdown();
                Ok(())
            }
            None => Err(DeviceError::NotRegistered(devnum)),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Sum of every registered device's cache footprint in bytes, used to
    /// enforce `DeviceParams::validate`'s cross-device memory cap when
    /// registering a new device.
    #[must_use]
    pub fn total_cache_bytes(&self) -> u64 {
        self.devices.iter().map(|entry| (entry.value().params().cachesize * entry.value().params().chunksize) as u64).sum()
    }
}

pub static DEVICE_REGISTRY: LazyLock<DeviceRegistry> = LazyLock::new(DeviceRegistry::new);

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nexus_engine::params::{MAX_CHUNKS_PER_IO, MIN_CONCURRENT_REQS};
    use nexus_engine::{DeviceParams, MemBackingStore};
    use nexus_protocol::testing::duplex_pair;
    use nexus_transform::{CipherAlgo, CompressionAlgo, CompressionMask, HashAlgo};

    use super::*;

    fn params(ident: &str) -> DeviceParams {
        DeviceParams {
            ident: ident.into(),
            chunksize: 4096,
            chunks: 16,
            cachesize: MIN_CONCURRENT_REQS * MAX_CHUNKS_PER_IO,
            offset: 0,
            cipher: CipherAlgo::Aes256Cbc,
            hash: HashAlgo::Sha256,
            default_compression: CompressionAlgo::None,
            supported_compression: CompressionMask::all(),
            agent_ring_depth: 64,
            allow_blind_overwrite: true,
        }
    }

    #[test]
    fn register_allocates_distinct_nonzero_devnums() {
        let registry = DeviceRegistry::new();
        let (end_a, _agent_a) = duplex_pair();
        let (end_b, _agent_b) = duplex_pair();
        let backing = Arc::new(MemBackingStore::new(4096));

        let params_a = params("a").validate(1 << 30, 0).unwrap();
        let params_b = params("b").validate(1 << 30, 0).unwrap();
        let dev_a = Device::open(params_a, Arc::clone(&backing) as _, end_a);
        let dev_b = Device::open(params_b, backing as _, end_b);

        let id_a = registry.register(dev_a);
        let id_b = registry.register(dev_b);

        assert_ne!(id_a, 0);
        assert_ne!(id_b, 0);
        assert_ne!(id_a, id_b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unregister_unknown_devnum_errors() {
        let registry = DeviceRegistry::new();
        assert!(matches!(registry.unregister(999), Err(DeviceError::NotRegistered(999))));
    }

    #[test]
    fn unregister_drops_and_shuts_down_device() {
        let registry = DeviceRegistry::new();
        let (end, agent_end) = duplex_pair();
        let backing = Arc::new(MemBackingStore::new(4096));
        let _agent = nexus_protocol::testing::InMemoryAgent::spawn(agent_end, std::collections::HashMap::new());
        let dev = Device::open(params("c").validate(1 << 30, 0).unwrap(), backing, end);
        let id = registry.register(dev);

        registry.unregister(id).unwrap();
        assert!(registry.is_empty());
        assert!(matches!(registry.unregister(id), Err(DeviceError::NotRegistered(_))));
    }

    #[test]
    fn total_cache_bytes_sums_registered_devices() {
        let registry = DeviceRegistry::new();
        let (end, _agent) = duplex_pair();
        let backing = Arc::new(MemBackingStore::new(4096));
        let p = params("d").validate(1 << 30, 0).unwrap();
        let expected = (p.cachesize * p.chunksize) as u64;
        let dev = Device::open(p, backing, end);
        registry.register(dev);
        assert_eq!(registry.total_cache_bytes(), expected);
    }
}
