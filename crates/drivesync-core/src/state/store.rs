//! Sync state store over an injected key-value backend

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{KeyValueStore, DEVICE_ID_KEY, DEVICE_NAME_KEY, SYNC_METADATA_KEY, SYNC_STATE_KEY};
use crate::models::{ConflictFile, LocalSyncState, SyncInfo, SyncMetadata, SyncStatus};
use crate::util::{latest, normalize_text_option};
use crate::{Error, Result};

/// Typed access to the device's sync records.
///
/// Device id and name live under their own keys so a metadata-only reset
/// keeps the installation's identity.
#[derive(Debug, Clone)]
pub struct SyncStateStore<K: KeyValueStore> {
    kv: K,
}

impl<K: KeyValueStore> SyncStateStore<K> {
    pub const fn new(kv: K) -> Self {
        Self { kv }
    }

    /// Underlying key-value backend
    pub const fn backend(&self) -> &K {
        &self.kv
    }

    /// Return the installation's device id, generating it on first use.
    pub fn get_or_create_device_id(&self) -> Result<Uuid> {
        if let Some(raw) = self.kv.get(DEVICE_ID_KEY)? {
            return Uuid::parse_str(raw.trim())
                .map_err(|error| Error::Store(format!("stored device id is invalid: {error}")));
        }

        let device_id = Uuid::now_v7();
        self.kv.set(DEVICE_ID_KEY, &device_id.to_string())?;
        tracing::info!(%device_id, "Generated new device identity");
        Ok(device_id)
    }

    /// Device label, falling back to the host name or a short id.
    pub fn device_name(&self) -> Result<String> {
        if let Some(name) = normalize_text_option(self.kv.get(DEVICE_NAME_KEY)?) {
            return Ok(name);
        }
        let device_id = self.get_or_create_device_id()?;
        Ok(default_device_name(&device_id))
    }

    /// Rename this device; the new label is mirrored into existing records.
    pub fn set_device_name(&self, name: &str) -> Result<()> {
        let name = normalize_text_option(Some(name.to_string()))
            .ok_or_else(|| Error::InvalidInput("device name cannot be empty".to_string()))?;
        self.kv.set(DEVICE_NAME_KEY, &name)?;

        if let Some(mut metadata) = self.sync_metadata()? {
            metadata.device_name.clone_from(&name);
            self.save_sync_metadata(&metadata)?;
        } else if let Some(mut state) = self.sync_state()? {
            state.device_name = name;
            self.save_sync_state(&state)?;
        }
        Ok(())
    }

    pub fn sync_metadata(&self) -> Result<Option<SyncMetadata>> {
        self.read_json(SYNC_METADATA_KEY)
    }

    /// Persist the metadata record and mirror its device and status fields
    /// into the local state record.
    pub fn save_sync_metadata(&self, metadata: &SyncMetadata) -> Result<()> {
        let device_id = self.get_or_create_device_id()?;
        if metadata.device_id != device_id {
            return Err(Error::DeviceMismatch {
                expected: device_id.to_string(),
                actual: metadata.device_id.to_string(),
            });
        }

        self.kv
            .set(SYNC_METADATA_KEY, &serde_json::to_string(metadata)?)?;

        let mut state = self.load_or_init_state()?;
        state.device_id = metadata.device_id;
        state.device_name.clone_from(&metadata.device_name);
        state.sync_status = metadata.sync_status;
        self.save_sync_state(&state)
    }

    pub fn sync_state(&self) -> Result<Option<LocalSyncState>> {
        self.read_json(SYNC_STATE_KEY)
    }

    pub fn save_sync_state(&self, state: &LocalSyncState) -> Result<()> {
        self.kv.set(SYNC_STATE_KEY, &serde_json::to_string(state)?)
    }

    /// Record when the local database file last changed.
    pub fn update_local_timestamp(&self, timestamp: DateTime<Utc>) -> Result<()> {
        let mut state = self.load_or_init_state()?;
        state.last_local_db_timestamp = Some(timestamp);
        self.save_sync_state(&state)
    }

    /// Record the latest known remote modification instant.
    ///
    /// Older values are ignored so the synced remote timestamp never moves
    /// backwards.
    pub fn update_remote_timestamp(&self, timestamp: DateTime<Utc>) -> Result<()> {
        let mut state = self.load_or_init_state()?;
        state.last_drive_db_timestamp = Some(latest(state.last_drive_db_timestamp, timestamp));
        self.save_sync_state(&state)?;

        if let Some(mut metadata) = self.sync_metadata()? {
            metadata.last_synced_remote_timestamp =
                Some(latest(metadata.last_synced_remote_timestamp, timestamp));
            self.save_sync_metadata(&metadata)?;
        }
        Ok(())
    }

    /// Set the status. Moving to `Idle` clears the conflict list.
    pub fn set_status(&self, status: SyncStatus) -> Result<()> {
        let Some(mut metadata) = self.sync_metadata()? else {
            let mut state = self.load_or_init_state()?;
            state.sync_status = status;
            return self.save_sync_state(&state);
        };

        metadata.sync_status = status;
        if status == SyncStatus::Idle {
            metadata.conflict_files.clear();
        }
        self.save_sync_metadata(&metadata)
    }

    /// Close an attempt: status back to `Idle`, error cleared, conflict list
    /// kept so a backup recorded during this attempt stays visible.
    pub fn finish_attempt(&self) -> Result<()> {
        let mut metadata = self.sync_metadata()?.ok_or(Error::NotInitialized)?;
        metadata.sync_status = SyncStatus::Idle;
        metadata.last_error = None;
        self.save_sync_metadata(&metadata)
    }

    /// Record a conflict backup and move to `Conflict`.
    ///
    /// An entry whose `file_name` is already listed is not added twice.
    pub fn add_conflict_file(&self, entry: ConflictFile) -> Result<()> {
        let mut metadata = self.sync_metadata()?.ok_or(Error::NotInitialized)?;
        if !metadata
            .conflict_files
            .iter()
            .any(|existing| existing.file_name == entry.file_name)
        {
            metadata.conflict_files.push(entry);
        }
        metadata.sync_status = SyncStatus::Conflict;
        self.save_sync_metadata(&metadata)
    }

    pub fn clear_conflict_files(&self) -> Result<()> {
        let Some(mut metadata) = self.sync_metadata()? else {
            return Ok(());
        };
        metadata.conflict_files.clear();
        self.save_sync_metadata(&metadata)
    }

    /// True iff metadata exists and is bound to a device and a remote file.
    pub fn is_ready_for_sync(&self) -> Result<bool> {
        Ok(self
            .sync_metadata()?
            .is_some_and(|metadata| !metadata.device_id.is_nil() && metadata.is_bound()))
    }

    /// Status snapshot for displays.
    pub fn sync_info(&self) -> Result<SyncInfo> {
        let device_id = self.get_or_create_device_id()?;
        let metadata = self.sync_metadata()?;
        let state = self.sync_state()?;

        Ok(SyncInfo {
            device_id,
            device_name: self.device_name()?,
            is_ready: self.is_ready_for_sync()?,
            sync_status: metadata
                .map(|metadata| metadata.sync_status)
                .or_else(|| state.as_ref().map(|state| state.sync_status))
                .unwrap_or_default(),
            last_sync: state.and_then(|state| state.last_sync_timestamp),
        })
    }

    /// Drop the sync records but keep device identity.
    pub fn clear_sync_metadata(&self) -> Result<()> {
        self.kv.remove(SYNC_METADATA_KEY)?;
        self.kv.remove(SYNC_STATE_KEY)
    }

    /// Full wipe, device identity included.
    pub fn clear_all(&self) -> Result<()> {
        self.clear_sync_metadata()?;
        self.kv.remove(DEVICE_ID_KEY)?;
        self.kv.remove(DEVICE_NAME_KEY)
    }

    fn load_or_init_state(&self) -> Result<LocalSyncState> {
        if let Some(state) = self.sync_state()? {
            return Ok(state);
        }
        Ok(LocalSyncState::new(
            self.get_or_create_device_id()?,
            self.device_name()?,
        ))
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.kv
            .get(key)?
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(Error::from)
    }
}

fn default_device_name(device_id: &Uuid) -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .into_iter()
        .find_map(|key| normalize_text_option(std::env::var(key).ok()))
        .unwrap_or_else(|| {
            let simple = device_id.simple().to_string();
            format!("device-{}", &simple[simple.len() - 8..])
        })
}
