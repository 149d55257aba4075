//! Local sync state: device identity, synced timestamps, status, conflicts.
//!
//! [`SyncStateStore`] owns the record layout and invariants; the bytes live
//! in any [`KeyValueStore`] the host injects.

mod memory;
mod sqlite;
mod store;

pub use memory::MemoryKeyValueStore;
pub use sqlite::SqliteKeyValueStore;
pub use store::SyncStateStore;

use crate::Result;

/// Storage key for the installation's device id
pub const DEVICE_ID_KEY: &str = "drivesync.device_id";
/// Storage key for the editable device label
pub const DEVICE_NAME_KEY: &str = "drivesync.device_name";
/// Storage key for the serialized [`crate::SyncMetadata`]
pub const SYNC_METADATA_KEY: &str = "drivesync.sync_metadata";
/// Storage key for the serialized [`crate::LocalSyncState`]
pub const SYNC_STATE_KEY: &str = "drivesync.sync_state";

/// String key-value persistence backing the state store.
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` when the key is absent
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or replace a value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a key; deleting an absent key is not an error
    fn remove(&self, key: &str) -> Result<()>;
}
