//! Sync decision and result types

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Action taken (or to take) by a sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncAction {
    /// Nothing to transfer
    Idle,
    /// Replace the local file with the remote copy
    Pull,
    /// Replace the remote copy with the local file
    Push,
    /// Remote won; local copy preserved under a conflict name
    Conflict,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "IDLE",
            Self::Pull => "PULL",
            Self::Push => "PUSH",
            Self::Conflict => "CONFLICT",
        })
    }
}

/// Output of the decision engine. Never carries `Conflict`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncDecision {
    pub action: SyncAction,
    pub local_timestamp: DateTime<Utc>,
    pub remote_timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Outcome of one sync attempt.
///
/// Every orchestrator entry point returns one of these instead of an error,
/// so hosts can display the message and, after `Pull` or `Conflict`, reload
/// their in-memory state from the local file.
#[derive(Debug)]
pub struct SyncResult {
    pub success: bool,
    pub action: SyncAction,
    pub message: String,
    /// Where the preserved local copy lives after a conflict
    pub backup_path: Option<PathBuf>,
    pub error: Option<Error>,
}

impl SyncResult {
    pub fn completed(action: SyncAction, message: impl Into<String>) -> Self {
        Self {
            success: true,
            action,
            message: message.into(),
            backup_path: None,
            error: None,
        }
    }

    pub fn conflict(backup_path: &Path) -> Self {
        Self {
            success: true,
            action: SyncAction::Conflict,
            message: format!(
                "Remote changes from another device were kept. Your local changes were preserved at {} and need manual review.",
                backup_path.display()
            ),
            backup_path: Some(backup_path.to_path_buf()),
            error: None,
        }
    }

    pub fn failed(action: SyncAction, error: Error) -> Self {
        let message = if error.is_auth() {
            format!("Sync failed: {error}. Sign in again to continue syncing.")
        } else if error.needs_reinitialization() {
            format!("Sync failed: {error}. Initialize sync again to reconnect this device.")
        } else {
            format!("Sync failed: {error}. Check your connection and try again.")
        };
        Self {
            success: false,
            action,
            message,
            backup_path: None,
            error: Some(error),
        }
    }

    /// True when the host should reload its in-memory state from disk.
    pub const fn requires_reload(&self) -> bool {
        self.success && matches!(self.action, SyncAction::Pull | SyncAction::Conflict)
    }
}
