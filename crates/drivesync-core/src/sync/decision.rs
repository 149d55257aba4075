//! Timestamp-based sync direction

use chrono::{DateTime, Duration, Utc};

use crate::models::{SyncAction, SyncDecision};

/// Timestamps closer than this are treated as the same version.
pub const EPSILON: Duration = Duration::seconds(30);

/// Pick a direction from the local and remote modification instants.
///
/// Never returns [`SyncAction::Conflict`]: a conflict only shows up when the
/// remote is re-checked at commit time.
pub fn decide(local: DateTime<Utc>, remote: DateTime<Utc>) -> SyncDecision {
    let delta = (local - remote).abs();

    let (action, reason) = if delta < EPSILON {
        (
            SyncAction::Idle,
            "Local and remote copies are synchronized within tolerance".to_string(),
        )
    } else if remote > local {
        (
            SyncAction::Pull,
            format!("Remote copy is newer by {}", minutes(delta)),
        )
    } else {
        (
            SyncAction::Push,
            format!("Local copy is ahead of remote by {}", minutes(delta)),
        )
    };

    SyncDecision {
        action,
        local_timestamp: local,
        remote_timestamp: remote,
        reason,
    }
}

fn minutes(delta: Duration) -> String {
    let minutes = (delta.num_seconds() + 30) / 60;
    if minutes == 1 {
        "1 minute".to_string()
    } else {
        format!("{minutes} minutes")
    }
}
