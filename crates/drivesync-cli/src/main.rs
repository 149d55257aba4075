//! drivesync CLI - keep a local database file in sync from the terminal
//!
//! Every device runs `drivesync init` once, then `drivesync sync` (or
//! `drivesync touch` after writing to the database) whenever it wants to
//! exchange changes with the shared remote copy.

mod cli;
mod commands;
mod error;
mod remote;

use clap::Parser;
use tracing_subscriber::filter::Directive;

use crate::cli::{Cli, Commands, DeviceCommands};
use crate::commands::common::CliContext;
use crate::commands::conflicts::run_conflicts;
use crate::commands::device::run_device_name;
use crate::commands::reset::run_reset;
use crate::commands::status::run_status;
use crate::commands::sync::{run_init, run_sync, run_touch};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let directive: Directive = "drivesync=info"
        .parse()
        .map_err(|error| CliError::Config(format!("invalid log directive: {error}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let context = CliContext::resolve(cli.db_path, cli.state_path, cli.remote, cli.remote_root)?;

    match cli.command {
        Commands::Init { folder } => run_init(folder.as_deref(), &context).await?,
        Commands::Sync => run_sync(&context).await?,
        Commands::Touch => run_touch(&context).await?,
        Commands::Status { json } => run_status(json, &context)?,
        Commands::Conflicts { json } => run_conflicts(json, &context)?,
        Commands::Device {
            command: DeviceCommands::Name { new_name },
        } => run_device_name(new_name.as_deref(), &context)?,
        Commands::Reset { keep_device } => run_reset(keep_device, &context)?,
    }

    Ok(())
}
