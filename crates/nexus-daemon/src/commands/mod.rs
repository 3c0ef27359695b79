//! One module per CLI subcommand, following `oxcrypt-cli::commands`'s
//! layout: a request-building helper shared here, one file per operation.

pub mod register;
pub mod stats;
pub mod unregister;

use std::sync::Arc;

use anyhow::{Context, Result};
use sysinfo::System;

use nexus_engine::{BackingStore, FileBackingStore, MemBackingStore};
use nexus_protocol::testing::{duplex_pair, DuplexEnd, InMemoryAgent};

use crate::args::DeviceArgs;
use crate::control::RegisterRequest;

/// Opens `args.chunk_device` as the backing store, or falls back to an
/// in-memory one when no path was given.
pub(crate) fn open_backing_store(args: &DeviceArgs) -> Result<Arc<dyn BackingStore>> {
    match &args.chunk_device {
        Some(path) => {
            let store = FileBackingStore::open(path, args.offset, args.chunksize)
                .with_context(|| format!("opening backing store {}", path.display()))?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemBackingStore::new(args.chunksize))),
    }
}

/// Builds the `REGISTER` request `ControlChannel::register` consumes from
/// common CLI flags.
pub(crate) fn build_register_request(args: &DeviceArgs) -> RegisterRequest {
    RegisterRequest {
        ident: args.ident.clone(),
        chunk_device_path: args.chunk_device.clone().unwrap_or_default(),
        chunksize: args.chunksize,
        chunks: args.chunks,
        cachesize: args.cachesize,
        offset: args.offset,
        cipher: nexus_transform::CipherAlgo::Aes256Cbc,
        hash: nexus_transform::HashAlgo::Sha256,
        default_compression: args.compression.into(),
        supported_compression_mask: nexus_transform::CompressionMask::all(),
        agent_ring_depth: args.agent_ring_depth,
        allow_blind_overwrite: args.allow_blind_overwrite,
    }
}

/// Spawns a connected in-memory agent channel: one [`DuplexEnd`] for the
/// device to use, and an [`InMemoryAgent`] answering on the other end.
/// The real agent process is out of scope (spec.md §1); this is the
/// stand-in every part of the workspace uses instead.
pub(crate) fn spawn_reference_agent() -> (DuplexEnd, InMemoryAgent) {
    let (device_end, agent_end) = duplex_pair();
    let agent = InMemoryAgent::spawn(agent_end, std::collections::HashMap::new());
    (device_end, agent)
}

/// Total system memory in bytes, queried once per invocation for
/// `DeviceParams::validate`'s memory-fraction caps.
pub(crate) fn system_memory_bytes() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.total_memory()
}

/// Output shape shared by every subcommand that prints a result,
/// matching `oxcrypt-cli::commands::stats::OutputFormat`.
#[derive(Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}
