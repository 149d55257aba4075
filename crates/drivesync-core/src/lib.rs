//! drivesync-core - Core library for drivesync
//!
//! Keeps one local database file consistent with a remote copy held in a
//! cloud file-storage service, across every device of a single user.
//! Synchronization works at whole-file granularity: a pure decision picks a
//! direction, the orchestrator re-verifies the remote at commit time, and a
//! detected conflict preserves the local file under a conflict name before
//! the remote version takes its place.

pub mod config;
pub mod error;
pub mod models;
pub mod remote;
pub mod state;
pub mod sync;
pub mod util;

pub use config::SyncConfig;
pub use error::{Error, RemoteError, Result};
pub use models::{
    ConflictFile, LocalSyncState, SyncAction, SyncDecision, SyncInfo, SyncMetadata, SyncResult,
    SyncStatus,
};
pub use sync::{decide, SyncOrchestrator, SyncService, EPSILON};
