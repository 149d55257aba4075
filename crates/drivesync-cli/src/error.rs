use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] drivesync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "The folder remote needs a root directory. Pass --remote-root or set DRIVESYNC_REMOTE_ROOT."
    )]
    RemoteRootMissing,
    #[error(
        "R2 is not configured. Set R2_ACCOUNT_ID, R2_BUCKET, R2_ACCESS_KEY_ID and R2_SECRET_ACCESS_KEY."
    )]
    R2NotConfigured,
    #[error("{0}")]
    SyncFailed(String),
}
