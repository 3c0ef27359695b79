//! CLI flags shared by every subcommand that constructs a device,
//! mirroring `oxcrypt-cli`'s `VaultCommand<T>` flatten pattern (one
//! common argument group, reused across several subcommands).

use std::path::PathBuf;

use clap::{Args, ValueEnum};

use nexus_transform::CompressionAlgo;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliCompression {
    None,
    Zlib,
    Lz4,
}

impl From<CliCompression> for CompressionAlgo {
    fn from(c: CliCompression) -> Self {
        match c {
            CliCompression::None => Self::None,
            CliCompression::Zlib => Self::Zlib,
            CliCompression::Lz4 => Self::Lz4,
        }
    }
}

#[derive(Args, Clone)]
pub struct DeviceArgs {
    /// Device identifier, used for thread names and log lines.
    #[arg(long, default_value = "nexus0")]
    pub ident: String,

    /// Backing file to open as the chunk store. When omitted, an
    /// in-memory backing store stands in so the command can be tried
    /// without provisioning a real file.
    #[arg(long)]
    pub chunk_device: Option<PathBuf>,

    /// Chunk size in bytes; must be a power of two in [512, 1 MiB].
    #[arg(long, default_value_t = 4096)]
    pub chunksize: usize,

    /// Total number of chunks the device exposes.
    #[arg(long, default_value_t = 1024)]
    pub chunks: u64,

    /// Chunk-table capacity; must be at least `MIN_CONCURRENT_REQS *
    /// MAX_CHUNKS_PER_IO`.
    #[arg(long, default_value_t = 128)]
    pub cachesize: usize,

    /// Byte offset into the backing store where chunk 0 begins.
    #[arg(long, default_value_t = 0)]
    pub offset: u64,

    /// Default compression algorithm for newly written chunks.
    #[arg(long, value_enum, default_value = "none")]
    pub compression: CliCompression,

    /// Maximum outstanding agent messages.
    #[arg(long, default_value_t = 64)]
    pub agent_ring_depth: usize,

    /// Allow a full-chunk overwrite to skip `GET_META` and go straight to
    /// `DIRTY` (spec.md §9's open question #1). Defaults to `true` here,
    /// unlike `nexus_engine::DeviceParams`'s own conservative default,
    /// because this reference harness pairs every device with a freshly
    /// seeded in-memory agent that has no metadata for any chunk yet --
    /// without blind overwrite the first write to any chunk would hard-
    /// error waiting on metadata nothing will ever supply.
    #[arg(long, default_value_t = true)]
    pub allow_blind_overwrite: bool,
}
