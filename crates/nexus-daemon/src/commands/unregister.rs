//! `nexusd unregister`: issues `UNREGISTER` for a devnum already held in
//! this process's registry.
//!
//! A devnum only lives as long as the process that registered it (there
//! is no persistent control-socket transport here -- see the
//! [`super::register`] module doc), so this subcommand is only useful
//! when `nexus-daemon` is embedded in a longer-lived host rather than
//! invoked standalone; run from a fresh `nexusd` process it correctly
//! reports the devnum as unknown.

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, instrument};

use crate::control::ControlChannel;

#[derive(Args)]
pub struct UnregisterArgs {
    /// Devnum returned by a prior `REGISTER` in this process.
    #[arg(long)]
    pub devnum: u32,
}

#[instrument(level = "info", name = "cmd::unregister", skip_all)]
pub fn execute(args: &UnregisterArgs) -> Result<()> {
    ControlChannel::unregister(args.devnum).with_context(|| format!("UNREGISTER failed for devnum {}", args.devnum))?;
    info!(devnum = args.devnum, "device unregistered");
    Ok(())
}
