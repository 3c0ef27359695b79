//! Command-line interface for the Nexus device registry: `register`,
//! `unregister`, and `stats`, one per control-surface operation exposed
//! by [`nexus_daemon::control`].

use std::io;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use nexus_daemon::commands::register::{self, RegisterArgs};
use nexus_daemon::commands::stats::{self, StatsArgs};
use nexus_daemon::commands::unregister::{self, UnregisterArgs};

/// Device registry and control surface for the Nexus storage engine
#[derive(Parser)]
#[command(name = "nexusd")]
#[command(author, version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a device, run a brief demo read/write pass, then
    /// unregister it.
    Register(RegisterArgs),

    /// Unregister a device still held by this process's registry.
    Unregister(UnregisterArgs),

    /// Print a registered device's running counters.
    Stats(StatsArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Register(args) => register::execute(&args),
        Commands::Unregister(args) => unregister::execute(&args),
        Commands::Stats(args) => stats::execute(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}
