//! Persisted sync records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ConflictFile, SyncStatus};

/// Sync record for one (device, remote file) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Installation identity, never changes once created
    pub device_id: Uuid,
    /// Human label for this device
    pub device_name: String,
    /// Remote id of the shared file
    #[serde(default)]
    pub remote_file_id: Option<String>,
    /// Remote id of the folder holding the shared file
    #[serde(default)]
    pub remote_folder_id: Option<String>,
    /// Remote modification instant of the last version this device synced
    #[serde(default)]
    pub last_synced_remote_timestamp: Option<DateTime<Utc>>,
    /// Local modification instant at the last successful sync
    #[serde(default)]
    pub last_synced_local_timestamp: Option<DateTime<Utc>>,
    /// Entity tag of the last synced remote version, when the backend has one
    #[serde(default)]
    pub remote_etag: Option<String>,
    /// Current status
    #[serde(default)]
    pub sync_status: SyncStatus,
    /// Message of the last failed attempt
    #[serde(default)]
    pub last_error: Option<String>,
    /// Conflict backups awaiting review, oldest first
    #[serde(default)]
    pub conflict_files: Vec<ConflictFile>,
}

impl SyncMetadata {
    /// Fresh record with no remote binding yet
    pub fn new(device_id: Uuid, device_name: impl Into<String>) -> Self {
        Self {
            device_id,
            device_name: device_name.into(),
            remote_file_id: None,
            remote_folder_id: None,
            last_synced_remote_timestamp: None,
            last_synced_local_timestamp: None,
            remote_etag: None,
            sync_status: SyncStatus::Idle,
            last_error: None,
            conflict_files: Vec::new(),
        }
    }

    /// True when the record is bound to a remote file
    pub const fn is_bound(&self) -> bool {
        self.remote_file_id.is_some()
    }
}

/// Device-local view consumed by the decision engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSyncState {
    /// Installation identity
    pub device_id: Uuid,
    /// Human label for this device
    pub device_name: String,
    /// Current status, mirrored from [`SyncMetadata`]
    #[serde(default)]
    pub sync_status: SyncStatus,
    /// Last time the local database file changed
    #[serde(default)]
    pub last_local_db_timestamp: Option<DateTime<Utc>>,
    /// Last known remote modification instant
    #[serde(default)]
    pub last_drive_db_timestamp: Option<DateTime<Utc>>,
    /// Wall-clock time of the last completed attempt
    #[serde(default)]
    pub last_sync_timestamp: Option<DateTime<Utc>>,
}

impl LocalSyncState {
    pub fn new(device_id: Uuid, device_name: impl Into<String>) -> Self {
        Self {
            device_id,
            device_name: device_name.into(),
            sync_status: SyncStatus::Idle,
            last_local_db_timestamp: None,
            last_drive_db_timestamp: None,
            last_sync_timestamp: None,
        }
    }
}

/// Snapshot for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncInfo {
    pub device_id: Uuid,
    pub device_name: String,
    pub is_ready: bool,
    pub sync_status: SyncStatus,
    pub last_sync: Option<DateTime<Utc>>,
}
