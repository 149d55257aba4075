//! Sync status model

use std::fmt;

use serde::{Deserialize, Serialize};

/// Persisted status of the device's sync record.
///
/// `Syncing` doubles as the in-flight marker for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncStatus {
    /// No attempt in flight
    #[default]
    Idle,
    /// An attempt is running
    Syncing,
    /// A conflict backup is being created
    Conflict,
    /// The last attempt failed
    Error,
}

impl SyncStatus {
    /// Label used in status displays and logs
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Syncing => "SYNCING",
            Self::Conflict => "CONFLICT",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&SyncStatus::Conflict).unwrap(),
            "\"CONFLICT\""
        );
        let parsed: SyncStatus = serde_json::from_str("\"SYNCING\"").unwrap();
        assert_eq!(parsed, SyncStatus::Syncing);
    }
}
