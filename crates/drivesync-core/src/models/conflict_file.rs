//! Conflict file model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Local copy preserved under a conflict name when the remote won.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictFile {
    /// File name of the preserved copy, unique per device and instant
    pub file_name: String,
    /// When the backup was created
    pub created_at: DateTime<Utc>,
    /// Size of the preserved copy
    pub size_bytes: u64,
    /// Device whose edits the backup holds
    pub device_name: String,
}
