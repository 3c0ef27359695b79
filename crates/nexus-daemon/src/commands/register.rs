//! `nexusd register`: issues `REGISTER`, runs a brief read/write pass so
//! `UNREGISTER` has a dirty chunk to flush, then tears the device back
//! down.
//!
//! A standalone CLI invocation has no persistent process to hand a live
//! devnum to afterward (the out-of-process control-socket transport that
//! would let a separate `nexusd unregister` reach it later is out of
//! scope), so `register` always drains and unregisters its own device
//! before exiting rather than leaking it.

use anyhow::{bail, Context, Result};
use clap::Args;
use comfy_table::{presets::UTF8_FULL_CONDENSED, Table};
use tracing::{info, instrument};

use nexus_cache::ChunkId;
use nexus_engine::{BlockRequest, Direction, Segment};

use crate::args::DeviceArgs;
use crate::commands::{build_register_request, open_backing_store, spawn_reference_agent, system_memory_bytes, OutputFormat};
use crate::control::{ControlChannel, RegisterResponse};
use crate::registry::{RegisteredDevice, DEVICE_REGISTRY};

#[derive(Args)]
pub struct RegisterArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    /// Skip the demo read/write pass and unregister immediately.
    #[arg(long)]
    pub no_demo_io: bool,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[instrument(level = "info", name = "cmd::register", skip_all)]
pub fn execute(args: &RegisterArgs) -> Result<()> {
    let backing = open_backing_store(&args.device)?;
    let (device_end, _agent) = spawn_reference_agent();
    let req = build_register_request(&args.device);
    let memory = system_memory_bytes();

    let resp = ControlChannel::register(req, backing, device_end, memory).context("REGISTER failed")?;
    info!(devnum = resp.index, ident = %args.device.ident, "device registered");
    print_response(&resp, args.format);

    if !args.no_demo_io {
        if let Some(device) = DEVICE_REGISTRY.get(resp.index) {
            run_demo_io(&device).context("demo read/write pass failed")?;
            info!(devnum = resp.index, "demo read/write pass completed");
        }
    }

    ControlChannel::unregister(resp.index).context("UNREGISTER failed")?;
    info!(devnum = resp.index, "device unregistered");
    Ok(())
}

fn run_demo_io(device: &RegisteredDevice) -> Result<()> {
    let chunksize = device.params().chunksize;
    let payload = vec![0xABu8; chunksize];

    let write = BlockRequest {
        first_chunk: ChunkId(0),
        last_chunk: ChunkId(0),
        offset: 0,
        length: chunksize,
        direction: Direction::Write,
        segments: vec![Segment::from_vec(payload.clone())],
    };
    let write_outcome = device.submit_request(write)?;
    if write_outcome.results[0].is_err() {
        bail!("demo write sub-I/O failed");
    }

    let read = BlockRequest {
        first_chunk: ChunkId(0),
        last_chunk: ChunkId(0),
        offset: 0,
        length: chunksize,
        direction: Direction::Read,
        segments: vec![Segment::new(chunksize)],
    };
    let read_outcome = device.submit_request(read)?;
    if read_outcome.results[0].is_err() {
        bail!("demo read sub-I/O failed");
    }
    if read_outcome.segments[0].data != payload {
        bail!("demo read returned different bytes than were written");
    }
    Ok(())
}

fn print_response(resp: &RegisterResponse, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(resp).expect("RegisterResponse always serializes")),
        OutputFormat::Table => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL_CONDENSED);
            table.set_header(vec!["Field", "Value"]);
            table.add_row(vec!["devnum".to_string(), resp.index.to_string()]);
            table.add_row(vec!["block_major".to_string(), resp.block_major.to_string()]);
            table.add_row(vec!["num_minors".to_string(), resp.num_minors.to_string()]);
            table.add_row(vec!["chunks".to_string(), resp.chunks.to_string()]);
            table.add_row(vec!["hash_len".to_string(), resp.hash_len.to_string()]);
            println!("{table}");
        }
    }
}
