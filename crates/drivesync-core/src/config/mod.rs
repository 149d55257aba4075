//! Sync engine configuration.
//!
//! Hosts usually build a [`SyncConfig`] with [`SyncConfig::new`] and the
//! `with_*` builders; the CLI layers environment overrides on top through
//! [`SyncConfig::from_env`].

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::util::normalize_text_option;
use crate::{Error, Result};

const ENV_DB_PATH: &str = "DRIVESYNC_DB_PATH";
const ENV_REMOTE_FILE_NAME: &str = "DRIVESYNC_REMOTE_FILE_NAME";
const ENV_REMOTE_FOLDER: &str = "DRIVESYNC_REMOTE_FOLDER";
const ENV_REMOTE_TIMEOUT_SECS: &str = "DRIVESYNC_REMOTE_TIMEOUT_SECS";

/// Default folder that holds the shared copy on the remote side.
pub const DEFAULT_REMOTE_FOLDER: &str = "drivesync";

/// Default bound for a single remote call.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for one synchronized file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Local database file kept in sync
    pub local_path: PathBuf,
    /// File name of the shared copy on the remote side
    pub remote_file_name: String,
    /// Folder that holds the shared copy on the remote side
    pub remote_folder_name: String,
    /// Upper bound for any single remote call
    pub remote_timeout: Duration,
}

impl SyncConfig {
    /// Create a configuration for `local_path`.
    ///
    /// The remote file name defaults to the local file name.
    pub fn new(local_path: impl Into<PathBuf>) -> Result<Self> {
        let local_path = local_path.into();
        let remote_file_name = default_remote_file_name(&local_path)?;
        Ok(Self {
            local_path,
            remote_file_name,
            remote_folder_name: DEFAULT_REMOTE_FOLDER.to_string(),
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        })
    }

    /// Load configuration from environment variables.
    ///
    /// The local path is `path_override` when given, else `DRIVESYNC_DB_PATH`,
    /// else `fallback_path`.
    pub fn from_env(
        path_override: Option<PathBuf>,
        fallback_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        parse_config(|key| env::var(key).ok(), path_override, fallback_path.into())
    }

    /// Set the remote file name
    #[must_use]
    pub fn with_remote_file_name(mut self, name: impl Into<String>) -> Self {
        self.remote_file_name = name.into();
        self
    }

    /// Set the remote folder name
    #[must_use]
    pub fn with_remote_folder(mut self, name: impl Into<String>) -> Self {
        self.remote_folder_name = name.into();
        self
    }

    /// Set the timeout applied to every remote call
    #[must_use]
    pub const fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }
}

fn default_remote_file_name(local_path: &Path) -> Result<String> {
    local_path
        .file_name()
        .and_then(|name| name.to_str())
        .map(ToOwned::to_owned)
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "local database path has no file name: {}",
                local_path.display()
            ))
        })
}

fn parse_config(
    lookup: impl Fn(&str) -> Option<String>,
    path_override: Option<PathBuf>,
    fallback_path: PathBuf,
) -> Result<SyncConfig> {
    let local_path = path_override
        .or_else(|| normalize_text_option(lookup(ENV_DB_PATH)).map(PathBuf::from))
        .unwrap_or(fallback_path);
    let mut config = SyncConfig::new(local_path)?;

    if let Some(name) = normalize_text_option(lookup(ENV_REMOTE_FILE_NAME)) {
        config.remote_file_name = name;
    }
    if let Some(folder) = normalize_text_option(lookup(ENV_REMOTE_FOLDER)) {
        config.remote_folder_name = folder;
    }
    if let Some(raw) = normalize_text_option(lookup(ENV_REMOTE_TIMEOUT_SECS)) {
        let secs = raw.parse::<u64>().map_err(|_| {
            Error::InvalidInput(format!(
                "{ENV_REMOTE_TIMEOUT_SECS} must be a whole number of seconds, got '{raw}'"
            ))
        })?;
        if secs == 0 {
            return Err(Error::InvalidInput(format!(
                "{ENV_REMOTE_TIMEOUT_SECS} must be greater than zero"
            )));
        }
        config.remote_timeout = Duration::from_secs(secs);
    }

    Ok(config)
}
