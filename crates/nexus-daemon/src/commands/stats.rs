//! `nexusd stats`: the `introspect` read-only query surface, printed as a
//! table or JSON, following `oxcrypt-cli::commands::stats`'s dual-format
//! shape.

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{presets::UTF8_FULL_CONDENSED, Table};
use tracing::instrument;

use crate::commands::OutputFormat;
use crate::control::{ControlChannel, IntrospectSnapshot};

#[derive(Args)]
pub struct StatsArgs {
    /// Devnum returned by a prior `REGISTER` in this process.
    #[arg(long)]
    pub devnum: u32,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[instrument(level = "info", name = "cmd::stats", skip_all)]
pub fn execute(args: &StatsArgs) -> Result<()> {
    let snapshot = ControlChannel::introspect(args.devnum).with_context(|| format!("introspect failed for devnum {}", args.devnum))?;
    print_snapshot(&snapshot, args.format);
    Ok(())
}

fn print_snapshot(snapshot: &IntrospectSnapshot, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(snapshot).expect("IntrospectSnapshot always serializes")),
        OutputFormat::Table => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL_CONDENSED);
            table.set_header(vec!["Metric", "Value"]);
            table.add_row(vec!["devnum".to_string(), snapshot.devnum.to_string()]);
            table.add_row(vec!["cache occupancy".to_string(), format!("{}/{}", snapshot.cache_len, snapshot.cache_capacity)]);
            table.add_row(vec!["agent queue depth".to_string(), format!("{}/{}", snapshot.agent_queue_len, snapshot.agent_ring_depth)]);
            table.add_row(vec!["worker jobs".to_string(), format!("{} submitted / {} completed", snapshot.worker_submitted, snapshot.worker_completed)]);
            table.add_row(vec!["active users".to_string(), snapshot.active_users.to_string()]);
            println!("{table}");
        }
    }
}
