use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "drivesync")]
#[command(about = "Keep a local database file in sync with a cloud copy")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Local database file to keep in sync
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// SQLite file holding this device's sync state
    #[arg(long, global = true, value_name = "PATH")]
    pub state_path: Option<PathBuf>,

    /// Remote storage backend
    #[arg(long, global = true, value_enum, default_value_t = RemoteKind::Folder)]
    pub remote: RemoteKind,

    /// Root directory for the folder backend, e.g. a mounted cloud drive
    #[arg(long, global = true, value_name = "DIR")]
    pub remote_root: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Set up sync on this device
    Init {
        /// Remote folder holding the shared copy
        #[arg(long, value_name = "NAME")]
        folder: Option<String>,
    },
    /// Sync against the current remote copy
    Sync,
    /// Record a local edit and sync it
    Touch,
    /// Show sync status for this device
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List preserved conflict copies awaiting review
    Conflicts {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect or change this device's identity
    Device {
        #[command(subcommand)]
        command: DeviceCommands,
    },
    /// Forget sync state on this device
    Reset {
        /// Keep device id and name
        #[arg(long)]
        keep_device: bool,
    },
}

#[derive(Subcommand)]
pub enum DeviceCommands {
    /// Print the device name, or rename the device
    Name {
        /// New device name
        new_name: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum RemoteKind {
    Folder,
    R2,
}
