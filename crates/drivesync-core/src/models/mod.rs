//! Data models for drivesync

mod conflict_file;
mod metadata;
mod result;
mod status;

pub use conflict_file::ConflictFile;
pub use metadata::{LocalSyncState, SyncInfo, SyncMetadata};
pub use result::{SyncAction, SyncDecision, SyncResult};
pub use status::SyncStatus;
