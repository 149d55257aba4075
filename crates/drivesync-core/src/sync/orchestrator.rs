//! Sync attempts against one remote copy.
//!
//! Every public operation returns a [`SyncResult`]; errors never escape.
//! An attempt moves the persisted status to `SYNCING`, talks to the remote
//! sequentially, and ends in `IDLE` (success or resolved conflict) or
//! `ERROR` (failure, with the message kept in `last_error`).

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::decision::decide;
use super::files;
use crate::config::SyncConfig;
use crate::models::{
    ConflictFile, LocalSyncState, SyncAction, SyncInfo, SyncMetadata, SyncResult, SyncStatus,
};
use crate::remote::{RemoteFileMetadata, RemoteResult, RemoteStorage, UploadRequest};
use crate::state::{KeyValueStore, SyncStateStore};
use crate::util::{compact_text, format_timestamp, latest};
use crate::{Error, RemoteError, Result};

/// Drives pull, push and conflict handling for one local database file.
///
/// Operations take `&mut self` so one orchestrator runs at most one attempt
/// at a time; see [`super::SyncService`] for sharing it between tasks.
#[derive(Debug)]
pub struct SyncOrchestrator<R, K: KeyValueStore> {
    config: SyncConfig,
    remote: R,
    store: SyncStateStore<K>,
}

impl<R: RemoteStorage, K: KeyValueStore> SyncOrchestrator<R, K> {
    pub const fn new(config: SyncConfig, remote: R, store: SyncStateStore<K>) -> Self {
        Self {
            config,
            remote,
            store,
        }
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub const fn remote(&self) -> &R {
        &self.remote
    }

    pub const fn store(&self) -> &SyncStateStore<K> {
        &self.store
    }

    /// First-run setup.
    ///
    /// Creates the device identity and the remote folder (`folder_name`, or
    /// the configured one), then binds to an existing remote file of the
    /// configured name or uploads the local file as the canonical copy.
    /// Running it again reuses what the first run created.
    pub async fn initialize_sync(&mut self, folder_name: Option<&str>) -> SyncResult {
        match self.try_initialize(folder_name).await {
            Ok(message) => SyncResult::completed(SyncAction::Idle, message),
            Err(error) => self.fail(SyncAction::Idle, error),
        }
    }

    /// Decide a direction from the given timestamps and run it.
    pub async fn auto_sync(
        &mut self,
        local_timestamp: DateTime<Utc>,
        remote_timestamp: DateTime<Utc>,
        device_id: Uuid,
    ) -> SyncResult {
        let decision = decide(local_timestamp, remote_timestamp);
        tracing::debug!(
            "Sync decision {} (local {}, remote {}): {}",
            decision.action,
            format_timestamp(&decision.local_timestamp),
            format_timestamp(&decision.remote_timestamp),
            decision.reason
        );

        match decision.action {
            SyncAction::Idle => match self.confirm_idle(device_id) {
                Ok(()) => SyncResult::completed(SyncAction::Idle, decision.reason),
                Err(error) => self.fail(SyncAction::Idle, error),
            },
            SyncAction::Pull => self.pull(device_id).await,
            SyncAction::Push => self.push(device_id).await,
            SyncAction::Conflict => self.handle_conflict(device_id).await,
        }
    }

    /// Replace the local file with the remote copy.
    pub async fn pull(&mut self, device_id: Uuid) -> SyncResult {
        tracing::info!("Pulling remote copy into {}", self.config.local_path.display());
        match self.try_pull(device_id).await {
            Ok(()) => SyncResult::completed(SyncAction::Pull, "Pulled the latest remote copy"),
            Err(error) => self.fail(SyncAction::Pull, error),
        }
    }

    /// Upload the local file, unless the remote moved on since the last
    /// sync, in which case the conflict path runs instead.
    pub async fn push(&mut self, device_id: Uuid) -> SyncResult {
        tracing::info!("Pushing {}", self.config.local_path.display());
        match self.try_push(device_id).await {
            Ok(result) => result,
            Err(error) => self.fail(SyncAction::Push, error),
        }
    }

    /// Keep the remote version and preserve the local file under a
    /// conflict name.
    pub async fn handle_conflict(&mut self, device_id: Uuid) -> SyncResult {
        let outcome = match self.begin_attempt(device_id) {
            Ok(metadata) => self.resolve_conflict(metadata).await,
            Err(error) => Err(error),
        };
        match outcome {
            Ok(backup) => SyncResult::conflict(&backup),
            Err(error) => self.fail(SyncAction::Conflict, error),
        }
    }

    /// Record a local edit made just now and sync against the last known
    /// remote timestamp.
    pub async fn sync_after_local_change(&mut self) -> SyncResult {
        match self.record_local_change() {
            Ok((device_id, Some(local), Some(remote))) => {
                self.sync_recorded(local, remote, device_id).await
            }
            Ok(_) => self.sync_now().await,
            Err(error) => self.fail(SyncAction::Idle, error),
        }
    }

    /// Sync against the live remote timestamp.
    pub async fn sync_now(&mut self) -> SyncResult {
        match self.live_timestamps().await {
            Ok((device_id, local, remote)) => self.sync_recorded(local, remote, device_id).await,
            Err(error) => self.fail(SyncAction::Idle, error),
        }
    }

    /// `auto_sync` from recorded timestamps. A local edit recorded after the
    /// last sync is pushed even when it lands within tolerance of the remote
    /// timestamp; the push recheck still catches remote changes.
    async fn sync_recorded(
        &mut self,
        local_timestamp: DateTime<Utc>,
        remote_timestamp: DateTime<Utc>,
        device_id: Uuid,
    ) -> SyncResult {
        if decide(local_timestamp, remote_timestamp).action == SyncAction::Idle {
            match self.has_unsynced_edit(local_timestamp) {
                Ok(true) => {
                    tracing::info!("Local edit since last sync is within tolerance; pushing it");
                    return self.push(device_id).await;
                }
                Ok(false) => {}
                Err(error) => return self.fail(SyncAction::Idle, error),
            }
        }
        self.auto_sync(local_timestamp, remote_timestamp, device_id).await
    }

    /// Status snapshot for displays.
    pub fn sync_info(&self) -> Result<SyncInfo> {
        self.store.sync_info()
    }

    async fn try_initialize(&self, folder_name: Option<&str>) -> Result<String> {
        let device_id = self.store.get_or_create_device_id()?;
        let device_name = self.store.device_name()?;
        let folder_name = folder_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.config.remote_folder_name)
            .to_string();

        tracing::info!("Initializing sync in remote folder '{}'", folder_name);
        let folder_id = bounded(
            self.config.remote_timeout,
            "create_folder",
            self.remote.create_folder(&folder_name, None),
        )
        .await?;

        let mut metadata = self
            .store
            .sync_metadata()?
            .unwrap_or_else(|| SyncMetadata::new(device_id, device_name.clone()));
        metadata.device_name = device_name;

        let existing = bounded(
            self.config.remote_timeout,
            "find_file",
            self.remote
                .find_file(&self.config.remote_file_name, &folder_id),
        )
        .await?;

        let message = if let Some(remote) = existing {
            let rebound = metadata.remote_file_id.as_deref() != Some(remote.id.as_str());
            let local = if rebound {
                metadata.last_synced_remote_timestamp = None;
                metadata.last_synced_local_timestamp = None;
                metadata.remote_etag = None;
                None
            } else {
                self.store
                    .sync_state()?
                    .and_then(|state| state.last_local_db_timestamp)
            };
            metadata.remote_file_id = Some(remote.id.clone());
            metadata.remote_folder_id = Some(folder_id);
            self.record_binding(&metadata, local, remote.modified_time)?;
            tracing::info!("Bound to existing remote copy {}", remote.id);
            "Sync initialized with the existing remote copy".to_string()
        } else {
            if files::modified_time(&self.config.local_path).await?.is_none() {
                return Err(Error::InvalidInput(format!(
                    "local database {} does not exist and there is no remote copy to pull",
                    self.config.local_path.display()
                )));
            }
            let uploaded = bounded(
                self.config.remote_timeout,
                "upload",
                self.remote.upload(UploadRequest {
                    local_path: &self.config.local_path,
                    file_name: &self.config.remote_file_name,
                    parent_folder_id: Some(&folder_id),
                    if_match: None,
                }),
            )
            .await?
            .into_file();

            metadata.remote_file_id = Some(uploaded.file_id.clone());
            metadata.remote_folder_id = Some(folder_id);
            metadata.last_synced_remote_timestamp = Some(uploaded.modified_time);
            metadata.last_synced_local_timestamp = Some(uploaded.modified_time);
            metadata.remote_etag = uploaded.etag;
            self.record_binding(
                &metadata,
                Some(uploaded.modified_time),
                uploaded.modified_time,
            )?;
            tracing::info!("Uploaded local database as remote copy {}", uploaded.file_id);
            "Sync initialized; the local database is now the shared copy".to_string()
        };

        Ok(message)
    }

    async fn try_pull(&self, device_id: Uuid) -> Result<()> {
        let mut metadata = self.begin_attempt(device_id)?;
        let remote = self.fetch_remote(&metadata).await?;
        let staged = self.stage_remote(&remote).await?;
        if let Err(error) = files::replace(&staged, &self.config.local_path).await {
            files::discard(&staged).await;
            return Err(error);
        }
        self.adopt_remote_version(&mut metadata, remote.modified_time, remote.etag)
    }

    async fn try_push(&self, device_id: Uuid) -> Result<SyncResult> {
        let mut metadata = self.begin_attempt(device_id)?;
        let remote = self.fetch_remote(&metadata).await?;

        let remote_advanced = metadata
            .last_synced_remote_timestamp
            .is_none_or(|synced| remote.modified_time > synced);
        if remote_advanced {
            tracing::warn!(
                "Remote copy changed at {} since last sync ({:?}); not overwriting it",
                remote.modified_time,
                metadata.last_synced_remote_timestamp
            );
            let backup = self.resolve_conflict(metadata).await?;
            return Ok(SyncResult::conflict(&backup));
        }

        // The etag of the last synced version catches commits whose
        // timestamp did not advance.
        let expected_etag = metadata.remote_etag.as_deref().or(remote.etag.as_deref());
        let uploaded = bounded(
            self.config.remote_timeout,
            "upload",
            self.remote.upload(UploadRequest {
                local_path: &self.config.local_path,
                file_name: &self.config.remote_file_name,
                parent_folder_id: metadata.remote_folder_id.as_deref(),
                if_match: expected_etag,
            }),
        )
        .await;

        let file = match uploaded {
            Ok(outcome) => outcome.into_file(),
            Err(Error::Remote(RemoteError::PreconditionFailed(detail))) => {
                tracing::warn!("Remote copy changed during upload: {}", detail);
                let backup = self.resolve_conflict(metadata).await?;
                return Ok(SyncResult::conflict(&backup));
            }
            Err(error) => return Err(error),
        };

        if metadata.remote_file_id.as_deref() != Some(file.file_id.as_str()) {
            tracing::warn!("Remote copy was recreated as {}", file.file_id);
            metadata.remote_file_id = Some(file.file_id.clone());
        }
        self.adopt_remote_version(&mut metadata, file.modified_time, file.etag)?;
        Ok(SyncResult::completed(
            SyncAction::Push,
            "Pushed local changes to the remote copy",
        ))
    }

    /// Stage remote, move local aside, install remote, then record the
    /// backup.
    ///
    /// Until the backup is recorded, any failure puts the local file back
    /// where it was.
    async fn resolve_conflict(&self, metadata: SyncMetadata) -> Result<PathBuf> {
        let remote = self.fetch_remote(&metadata).await?;
        let staged = self.stage_remote(&remote).await?;

        let created_at = Utc::now();
        let backup = files::conflict_path(&self.config.local_path, &metadata.device_name, created_at);
        if let Err(error) = tokio::fs::rename(&self.config.local_path, &backup).await {
            files::discard(&staged).await;
            return Err(error.into());
        }

        if let Err(error) = self
            .install_conflict(&metadata, &staged, &backup, created_at)
            .await
        {
            tracing::warn!("Conflict handling failed: {}", error);
            files::discard(&staged).await;
            self.restore_local(&backup).await?;
            return Err(error);
        }
        tracing::warn!(
            "Sync conflict: kept remote version, local copy preserved at {}",
            backup.display()
        );

        let mut metadata = self.store.sync_metadata()?.ok_or(Error::NotInitialized)?;
        self.adopt_remote_version(&mut metadata, remote.modified_time, remote.etag)?;
        Ok(backup)
    }

    async fn install_conflict(
        &self,
        metadata: &SyncMetadata,
        staged: &Path,
        backup: &Path,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let size_bytes = tokio::fs::metadata(backup).await?.len();
        files::replace(staged, &self.config.local_path).await?;

        self.store.add_conflict_file(ConflictFile {
            file_name: backup
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            created_at,
            size_bytes,
            device_name: metadata.device_name.clone(),
        })
    }

    /// Move a conflict backup back over the local path.
    async fn restore_local(&self, backup: &Path) -> Result<()> {
        if let Err(error) = tokio::fs::rename(backup, &self.config.local_path).await {
            tracing::error!(
                "Failed to restore local copy; it remains at {}",
                backup.display()
            );
            return Err(std::io::Error::new(
                error.kind(),
                format!(
                    "local copy could not be restored and remains at {}: {error}",
                    backup.display()
                ),
            )
            .into());
        }
        tracing::info!("Restored local copy after failed conflict handling");
        Ok(())
    }

    /// Download the remote version into a verified staging file.
    async fn stage_remote(&self, remote: &RemoteFileMetadata) -> Result<PathBuf> {
        let staged = files::staging_path(&self.config.local_path);
        let downloaded = bounded(
            self.config.remote_timeout,
            "download",
            self.remote.download(&remote.id, &staged),
        )
        .await;

        let verified = match downloaded {
            Ok(()) => files::verify_size(&staged, remote.size).await,
            Err(error) => Err(error),
        };
        if let Err(error) = verified {
            files::discard(&staged).await;
            return Err(error);
        }
        Ok(staged)
    }

    async fn fetch_remote(&self, metadata: &SyncMetadata) -> Result<RemoteFileMetadata> {
        let file_id = metadata
            .remote_file_id
            .as_deref()
            .ok_or(Error::NotInitialized)?;
        bounded(
            self.config.remote_timeout,
            "get_metadata",
            self.remote.get_metadata(file_id),
        )
        .await
    }

    fn record_local_change(
        &self,
    ) -> Result<(Uuid, Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        let device_id = self.store.get_or_create_device_id()?;
        self.store.update_local_timestamp(Utc::now())?;
        let state = self.store.sync_state()?;
        let metadata = self.store.sync_metadata()?;

        let local = state.as_ref().and_then(|state| state.last_local_db_timestamp);
        let remote = state
            .and_then(|state| state.last_drive_db_timestamp)
            .or_else(|| metadata.and_then(|metadata| metadata.last_synced_remote_timestamp));
        Ok((device_id, local, remote))
    }

    fn has_unsynced_edit(&self, local_timestamp: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .store
            .sync_metadata()?
            .and_then(|metadata| metadata.last_synced_local_timestamp)
            .is_some_and(|synced| local_timestamp > synced))
    }

    async fn live_timestamps(&self) -> Result<(Uuid, DateTime<Utc>, DateTime<Utc>)> {
        let device_id = self.store.get_or_create_device_id()?;
        let metadata = self.bound_metadata(device_id)?;
        let remote = self.fetch_remote(&metadata).await?;

        let stored_local = self
            .store
            .sync_state()?
            .and_then(|state| state.last_local_db_timestamp);
        let local = match stored_local {
            Some(local) => local,
            None => files::modified_time(&self.config.local_path)
                .await?
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        };
        Ok((device_id, local, remote.modified_time))
    }

    /// Load bound metadata for `device_id` and mark the attempt as running.
    fn begin_attempt(&self, device_id: Uuid) -> Result<SyncMetadata> {
        let mut metadata = self.bound_metadata(device_id)?;
        if metadata.sync_status == SyncStatus::Syncing {
            tracing::warn!("Previous sync attempt was interrupted; re-verifying against remote");
        }
        metadata.sync_status = SyncStatus::Syncing;
        self.store.save_sync_metadata(&metadata)?;
        Ok(metadata)
    }

    fn bound_metadata(&self, device_id: Uuid) -> Result<SyncMetadata> {
        let metadata = self.store.sync_metadata()?.ok_or(Error::NotInitialized)?;
        if metadata.device_id != device_id {
            return Err(Error::DeviceMismatch {
                expected: metadata.device_id.to_string(),
                actual: device_id.to_string(),
            });
        }
        if !metadata.is_bound() {
            return Err(Error::NotInitialized);
        }
        Ok(metadata)
    }

    fn confirm_idle(&self, device_id: Uuid) -> Result<()> {
        self.bound_metadata(device_id)?;
        self.store.finish_attempt()
    }

    /// Persist a binding made by initialization.
    fn record_binding(
        &self,
        metadata: &SyncMetadata,
        local: Option<DateTime<Utc>>,
        remote: DateTime<Utc>,
    ) -> Result<()> {
        let mut metadata = metadata.clone();
        metadata.sync_status = SyncStatus::Idle;
        metadata.last_error = None;
        self.store.save_sync_metadata(&metadata)?;

        let mut state = self.current_state(&metadata)?;
        state.last_local_db_timestamp = local;
        state.last_drive_db_timestamp = Some(remote);
        state.last_sync_timestamp = Some(Utc::now());
        self.store.save_sync_state(&state)
    }

    /// Both sides now hold the version stamped `modified_time`.
    ///
    /// Remote timestamps only move forward; a remote restored to an older
    /// version is adopted by content and etag.
    fn adopt_remote_version(
        &self,
        metadata: &mut SyncMetadata,
        modified_time: DateTime<Utc>,
        etag: Option<String>,
    ) -> Result<()> {
        if metadata
            .last_synced_remote_timestamp
            .is_some_and(|synced| modified_time < synced)
        {
            tracing::warn!(
                "Remote copy is stamped {} but was already synced at {:?}; keeping the later instant",
                format_timestamp(&modified_time),
                metadata.last_synced_remote_timestamp
            );
        }
        metadata.last_synced_remote_timestamp =
            Some(latest(metadata.last_synced_remote_timestamp, modified_time));
        metadata.last_synced_local_timestamp = Some(modified_time);
        metadata.remote_etag = etag;
        metadata.sync_status = SyncStatus::Idle;
        metadata.last_error = None;
        self.store.save_sync_metadata(metadata)?;

        let mut state = self.current_state(metadata)?;
        state.last_local_db_timestamp = Some(modified_time);
        state.last_drive_db_timestamp = Some(latest(state.last_drive_db_timestamp, modified_time));
        state.last_sync_timestamp = Some(Utc::now());
        self.store.save_sync_state(&state)
    }

    fn current_state(&self, metadata: &SyncMetadata) -> Result<LocalSyncState> {
        Ok(self.store.sync_state()?.unwrap_or_else(|| {
            LocalSyncState::new(metadata.device_id, metadata.device_name.clone())
        }))
    }

    /// Log the failure, persist `ERROR` when there is a record to hold it,
    /// and turn it into a failed result.
    fn fail(&self, action: SyncAction, error: Error) -> SyncResult {
        tracing::error!("Sync {} failed: {}", action, error);

        if !matches!(error, Error::NotInitialized | Error::DeviceMismatch { .. }) {
            let recorded = self.store.sync_metadata().and_then(|metadata| {
                let Some(mut metadata) = metadata else {
                    return Ok(());
                };
                metadata.sync_status = SyncStatus::Error;
                metadata.last_error = Some(compact_text(&error.to_string()));
                self.store.save_sync_metadata(&metadata)
            });
            if let Err(store_error) = recorded {
                tracing::warn!("Failed to record sync error: {}", store_error);
            }
        }

        SyncResult::failed(action, error)
    }
}

/// Run a remote call under `timeout`; expiry is reported as a network error.
async fn bounded<T>(
    timeout: Duration,
    operation: &str,
    call: impl Future<Output = RemoteResult<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(RemoteError::Network(format!(
            "{operation} timed out after {}ms",
            timeout.as_millis()
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use chrono::{Duration as ChronoDuration, TimeZone};
    use pretty_assertions::assert_eq;
    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::remote::{MemoryRemoteStorage, RemoteOperation};
    use crate::state::{MemoryKeyValueStore, SYNC_METADATA_KEY};

    type MemoryOrchestrator = SyncOrchestrator<MemoryRemoteStorage, MemoryKeyValueStore>;

    struct Harness {
        dir: TempDir,
        local: PathBuf,
        remote: MemoryRemoteStorage,
        orchestrator: MemoryOrchestrator,
    }

    impl Harness {
        fn device_id(&self) -> Uuid {
            self.orchestrator.store().get_or_create_device_id().unwrap()
        }

        fn metadata(&self) -> SyncMetadata {
            self.orchestrator.store().sync_metadata().unwrap().unwrap()
        }

        fn remote_file_id(&self) -> String {
            self.metadata().remote_file_id.unwrap()
        }

        fn entries(&self) -> Vec<String> {
            let mut names: Vec<String> = std::fs::read_dir(self.dir.path())
                .unwrap()
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
    }

    fn orchestrator_for(local: &Path, remote: &MemoryRemoteStorage) -> MemoryOrchestrator {
        let config = SyncConfig::new(local)
            .unwrap()
            .with_remote_timeout(Duration::from_secs(5));
        let store = SyncStateStore::new(MemoryKeyValueStore::new());
        store.set_device_name("desk").unwrap();
        SyncOrchestrator::new(config, remote.clone(), store)
    }

    fn harness(contents: Option<&[u8]>) -> Harness {
        let dir = tempdir().unwrap();
        let local = dir.path().join("app.db");
        if let Some(contents) = contents {
            std::fs::write(&local, contents).unwrap();
        }
        let remote = MemoryRemoteStorage::new();
        remote.set_clock(t0());
        let orchestrator = orchestrator_for(&local, &remote);
        Harness {
            dir,
            local,
            remote,
            orchestrator,
        }
    }

    async fn initialized(contents: &[u8]) -> Harness {
        let mut h = harness(Some(contents));
        let result = h.orchestrator.initialize_sync(None).await;
        assert!(result.success, "{}", result.message);
        h
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn initialize_uploads_local_file_once() {
        let mut h = initialized(b"v1").await;

        let again = h.orchestrator.initialize_sync(None).await;
        assert!(again.success);
        assert_eq!(again.action, SyncAction::Idle);
        assert_eq!(h.remote.file_count(), 1);
        assert_eq!(h.remote.calls(RemoteOperation::Upload), 1);

        let metadata = h.metadata();
        assert_eq!(metadata.last_synced_remote_timestamp, Some(t0()));
        assert_eq!(metadata.sync_status, SyncStatus::Idle);
        assert!(h.orchestrator.store().is_ready_for_sync().unwrap());
        assert_eq!(h.remote.file_bytes(&h.remote_file_id()).unwrap(), b"v1".to_vec());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn initialize_without_local_or_remote_file_fails() {
        let mut h = harness(None);
        let result = h.orchestrator.initialize_sync(None).await;
        assert!(!result.success);
        assert!(matches!(result.error, Some(Error::InvalidInput(_))));
        assert_eq!(h.remote.file_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_device_binds_and_pulls_existing_copy() {
        let h = initialized(b"shared").await;

        let other_dir = tempdir().unwrap();
        let other_local = other_dir.path().join("app.db");
        let mut other = orchestrator_for(&other_local, &h.remote);

        let init = other.initialize_sync(None).await;
        assert!(init.success, "{}", init.message);
        assert_eq!(h.remote.file_count(), 1);

        let result = other.sync_now().await;
        assert!(result.success, "{}", result.message);
        assert_eq!(result.action, SyncAction::Pull);
        assert!(result.requires_reload());
        assert_eq!(std::fs::read(&other_local).unwrap(), b"shared".to_vec());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn auto_sync_within_tolerance_makes_no_remote_calls() {
        let mut h = initialized(b"v1").await;
        let device_id = h.device_id();
        let before = h.remote.calls(RemoteOperation::GetMetadata);

        let result = h
            .orchestrator
            .auto_sync(t0() + ChronoDuration::seconds(10), t0(), device_id)
            .await;

        assert!(result.success);
        assert_eq!(result.action, SyncAction::Idle);
        assert_eq!(h.remote.calls(RemoteOperation::GetMetadata), before);
        assert_eq!(h.remote.calls(RemoteOperation::Download), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_replaces_local_and_adopts_remote_instant() {
        let mut h = initialized(b"v1").await;
        let t1 = t0() + ChronoDuration::minutes(10);
        h.remote
            .simulate_remote_commit(&h.remote_file_id(), b"remote v2", t1)
            .unwrap();

        let device_id = h.device_id();
        let result = h.orchestrator.auto_sync(t0(), t1, device_id).await;

        assert!(result.success, "{}", result.message);
        assert_eq!(result.action, SyncAction::Pull);
        assert_eq!(std::fs::read(&h.local).unwrap(), b"remote v2".to_vec());
        assert_eq!(h.entries(), vec!["app.db".to_string()]);

        let state = h.orchestrator.store().sync_state().unwrap().unwrap();
        assert_eq!(state.last_local_db_timestamp, Some(t1));
        assert_eq!(state.last_drive_db_timestamp, Some(t1));
        assert!(state.last_sync_timestamp.is_some());

        let follow_up = h.orchestrator.sync_now().await;
        assert_eq!(follow_up.action, SyncAction::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_uploads_local_changes() {
        let mut h = initialized(b"v1").await;
        std::fs::write(&h.local, b"v2 local").unwrap();
        let t1 = t0() + ChronoDuration::minutes(5);
        h.remote.set_clock(t1);

        let result = h.orchestrator.sync_after_local_change().await;

        assert!(result.success, "{}", result.message);
        assert_eq!(result.action, SyncAction::Push);
        assert!(!result.requires_reload());
        assert_eq!(
            h.remote.file_bytes(&h.remote_file_id()).unwrap(),
            b"v2 local".to_vec()
        );
        let metadata = h.metadata();
        assert_eq!(metadata.last_synced_remote_timestamp, Some(t1));
        assert_eq!(metadata.sync_status, SyncStatus::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_against_advanced_remote_preserves_local_copy() {
        let mut h = initialized(b"v1").await;
        let file_id = h.remote_file_id();
        let t1 = t0() + ChronoDuration::minutes(10);
        h.remote
            .simulate_remote_commit(&file_id, b"other device v2", t1)
            .unwrap();
        std::fs::write(&h.local, b"my unsynced edits").unwrap();

        let device_id = h.device_id();
        let result = h
            .orchestrator
            .auto_sync(t0() + ChronoDuration::minutes(20), t0(), device_id)
            .await;

        assert!(result.success, "{}", result.message);
        assert_eq!(result.action, SyncAction::Conflict);
        assert!(result.message.contains("manual review"));
        assert_eq!(h.remote.calls(RemoteOperation::Upload), 1);
        assert_eq!(h.remote.file_bytes(&file_id).unwrap(), b"other device v2".to_vec());

        let backup = result.backup_path.unwrap();
        assert_eq!(std::fs::read(&backup).unwrap(), b"my unsynced edits".to_vec());
        assert_eq!(std::fs::read(&h.local).unwrap(), b"other device v2".to_vec());

        let backup_name = backup.file_name().unwrap().to_string_lossy().into_owned();
        let (prefix, stamp) = backup_name
            .strip_suffix(".db")
            .unwrap()
            .rsplit_once('-')
            .unwrap();
        assert_eq!(prefix, "app.conflict-desk");
        assert_eq!(stamp.len(), "YYYYMMDDTHHMMSSZ".len());
        assert!(stamp.ends_with('Z') && stamp.chars().nth(8) == Some('T'));

        let metadata = h.metadata();
        assert_eq!(metadata.sync_status, SyncStatus::Idle);
        assert_eq!(metadata.last_synced_remote_timestamp, Some(t1));
        assert_eq!(metadata.conflict_files.len(), 1);
        assert_eq!(metadata.conflict_files[0].file_name, backup_name);
        assert_eq!(metadata.conflict_files[0].size_bytes, 17);
        assert_eq!(metadata.conflict_files[0].device_name, "desk");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_upload_precondition_becomes_conflict() {
        let mut h = initialized(b"v1").await;
        std::fs::write(&h.local, b"local v2").unwrap();
        h.remote.fail_next(
            RemoteOperation::Upload,
            RemoteError::PreconditionFailed("etag moved".into()),
        );

        let device_id = h.device_id();
        let result = h.orchestrator.push(device_id).await;

        assert!(result.success, "{}", result.message);
        assert_eq!(result.action, SyncAction::Conflict);
        let backup = result.backup_path.unwrap();
        assert_eq!(std::fs::read(backup).unwrap(), b"local v2".to_vec());
        assert_eq!(std::fs::read(&h.local).unwrap(), b"v1".to_vec());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_rejects_commit_that_did_not_advance_timestamp() {
        let mut h = initialized(b"v1").await;
        let file_id = h.remote_file_id();
        h.remote
            .simulate_remote_commit(&file_id, b"slow clock device", t0() - ChronoDuration::minutes(1))
            .unwrap();
        std::fs::write(&h.local, b"local v2").unwrap();

        let device_id = h.device_id();
        let result = h.orchestrator.push(device_id).await;

        assert!(result.success, "{}", result.message);
        assert_eq!(result.action, SyncAction::Conflict);
        assert_eq!(h.remote.calls(RemoteOperation::Upload), 2);
        assert_eq!(h.remote.file_bytes(&file_id).unwrap(), b"slow clock device".to_vec());
        assert_eq!(std::fs::read(&h.local).unwrap(), b"slow clock device".to_vec());
        assert_eq!(
            std::fs::read(result.backup_path.unwrap()).unwrap(),
            b"local v2".to_vec()
        );
        assert_eq!(h.metadata().last_synced_remote_timestamp, Some(t0()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_of_rolled_back_remote_keeps_synced_timestamp() {
        let mut h = initialized(b"v1").await;
        let file_id = h.remote_file_id();
        let restored_at = t0() - ChronoDuration::minutes(10);
        h.remote
            .simulate_remote_commit(&file_id, b"restored older", restored_at)
            .unwrap();
        let restored_etag = h.remote.get_metadata(&file_id).await.unwrap().etag;

        let device_id = h.device_id();
        let result = h.orchestrator.pull(device_id).await;

        assert!(result.success, "{}", result.message);
        assert_eq!(std::fs::read(&h.local).unwrap(), b"restored older".to_vec());

        let metadata = h.metadata();
        assert_eq!(metadata.last_synced_remote_timestamp, Some(t0()));
        assert_eq!(metadata.remote_etag, restored_etag);
        let state = h.orchestrator.store().sync_state().unwrap().unwrap();
        assert_eq!(state.last_drive_db_timestamp, Some(t0()));
        assert_eq!(state.last_local_db_timestamp, Some(restored_at));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn edit_within_tolerance_of_last_sync_is_pushed() {
        let mut h = harness(Some(b"v1"));
        let synced_at = Utc::now() - ChronoDuration::seconds(5);
        h.remote.set_clock(synced_at);
        assert!(h.orchestrator.initialize_sync(None).await.success);
        std::fs::write(&h.local, b"quick edit").unwrap();

        let result = h.orchestrator.sync_after_local_change().await;

        assert!(result.success, "{}", result.message);
        assert_eq!(result.action, SyncAction::Push);
        assert_eq!(
            h.remote.file_bytes(&h.remote_file_id()).unwrap(),
            b"quick edit".to_vec()
        );

        let follow_up = h.orchestrator.sync_now().await;
        assert_eq!(follow_up.action, SyncAction::Idle);
        assert_eq!(h.remote.calls(RemoteOperation::Upload), 2);
    }

    #[derive(Debug, Default)]
    struct RejectingConflictStore {
        inner: MemoryKeyValueStore,
    }

    impl KeyValueStore for RejectingConflictStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            if key == SYNC_METADATA_KEY && value.contains(".conflict-") {
                return Err(Error::Store("disk full".to_string()));
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key)
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_conflict_bookkeeping_restores_local_file() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("app.db");
        std::fs::write(&local, b"v1").unwrap();
        let remote = MemoryRemoteStorage::new();
        remote.set_clock(t0());
        let config = SyncConfig::new(&local)
            .unwrap()
            .with_remote_timeout(Duration::from_secs(5));
        let store = SyncStateStore::new(RejectingConflictStore::default());
        store.set_device_name("desk").unwrap();
        let mut orchestrator = SyncOrchestrator::new(config, remote.clone(), store);
        assert!(orchestrator.initialize_sync(None).await.success);

        let file_id = orchestrator
            .store()
            .sync_metadata()
            .unwrap()
            .unwrap()
            .remote_file_id
            .unwrap();
        remote
            .simulate_remote_commit(&file_id, b"other device v2", t0() + ChronoDuration::minutes(10))
            .unwrap();
        std::fs::write(&local, b"my unsynced edits").unwrap();

        let device_id = orchestrator.store().get_or_create_device_id().unwrap();
        let result = orchestrator.push(device_id).await;

        assert!(!result.success);
        assert!(matches!(result.error, Some(Error::Store(_))));
        assert_eq!(std::fs::read(&local).unwrap(), b"my unsynced edits".to_vec());
        let entries: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["app.db".to_string()]);

        let metadata = orchestrator.store().sync_metadata().unwrap().unwrap();
        assert_eq!(metadata.sync_status, SyncStatus::Error);
        assert!(metadata.conflict_files.is_empty());
        assert_eq!(metadata.last_synced_remote_timestamp, Some(t0()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_download_leaves_local_file_untouched() {
        let mut h = initialized(b"local v1").await;
        let t1 = t0() + ChronoDuration::minutes(10);
        h.remote
            .simulate_remote_commit(&h.remote_file_id(), b"a much longer remote version", t1)
            .unwrap();
        h.remote.fail_next(
            RemoteOperation::Download,
            RemoteError::Network("connection reset".into()),
        );

        let device_id = h.device_id();
        let result = h.orchestrator.pull(device_id).await;

        assert!(!result.success);
        assert_eq!(result.action, SyncAction::Pull);
        assert!(result.message.contains("try again"));
        assert_eq!(std::fs::read(&h.local).unwrap(), b"local v1".to_vec());
        assert_eq!(h.entries(), vec!["app.db".to_string()]);

        let metadata = h.metadata();
        assert_eq!(metadata.sync_status, SyncStatus::Error);
        assert!(metadata.last_error.unwrap().contains("connection reset"));
        assert_eq!(metadata.last_synced_remote_timestamp, Some(t0()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failure_is_not_retried_automatically() {
        let mut h = initialized(b"v1").await;
        let before = h.remote.calls(RemoteOperation::GetMetadata);
        h.remote.fail_next(
            RemoteOperation::GetMetadata,
            RemoteError::Network("offline".into()),
        );

        let result = h.orchestrator.sync_now().await;

        assert!(!result.success);
        assert!(result.error.as_ref().is_some_and(Error::is_retryable));
        assert_eq!(h.remote.calls(RemoteOperation::GetMetadata), before + 1);
        assert_eq!(h.remote.calls(RemoteOperation::Download), 0);
        assert_eq!(h.remote.calls(RemoteOperation::Upload), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn slow_remote_times_out_as_network_error() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("app.db");
        std::fs::write(&local, b"v1").unwrap();
        let remote = MemoryRemoteStorage::new();
        let config = SyncConfig::new(&local)
            .unwrap()
            .with_remote_timeout(Duration::from_millis(50));
        let mut orchestrator = SyncOrchestrator::new(
            config,
            remote.clone(),
            SyncStateStore::new(MemoryKeyValueStore::new()),
        );
        assert!(orchestrator.initialize_sync(None).await.success);

        remote.set_latency(Duration::from_millis(500));
        let result = orchestrator.sync_now().await;

        assert!(!result.success);
        match result.error {
            Some(Error::Remote(RemoteError::Network(message))) => {
                assert!(message.contains("timed out"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            orchestrator.store().sync_metadata().unwrap().unwrap().sync_status,
            SyncStatus::Error
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn interrupted_attempt_is_reverified() {
        let mut h = initialized(b"v1").await;
        h.orchestrator
            .store()
            .set_status(SyncStatus::Syncing)
            .unwrap();
        let t1 = t0() + ChronoDuration::minutes(3);
        h.remote
            .simulate_remote_commit(&h.remote_file_id(), b"v2", t1)
            .unwrap();

        let result = h.orchestrator.sync_now().await;

        assert!(result.success, "{}", result.message);
        assert_eq!(result.action, SyncAction::Pull);
        assert_eq!(h.metadata().sync_status, SyncStatus::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn error_status_recovers_on_next_attempt() {
        let mut h = initialized(b"v1").await;
        h.remote.fail_next(
            RemoteOperation::GetMetadata,
            RemoteError::Network("offline".into()),
        );
        assert!(!h.orchestrator.sync_now().await.success);
        assert_eq!(h.metadata().sync_status, SyncStatus::Error);

        let result = h.orchestrator.sync_now().await;
        assert!(result.success, "{}", result.message);
        let metadata = h.metadata();
        assert_eq!(metadata.sync_status, SyncStatus::Idle);
        assert!(metadata.last_error.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn foreign_device_id_is_rejected() {
        let mut h = initialized(b"v1").await;
        let result = h.orchestrator.push(Uuid::now_v7()).await;

        assert!(!result.success);
        assert!(matches!(result.error, Some(Error::DeviceMismatch { .. })));
        assert_eq!(h.metadata().sync_status, SyncStatus::Idle);
        assert_eq!(h.remote.calls(RemoteOperation::Upload), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_before_initialization_asks_to_initialize() {
        let mut h = harness(Some(b"v1"));
        let result = h.orchestrator.sync_now().await;

        assert!(!result.success);
        assert!(matches!(result.error, Some(Error::NotInitialized)));
        assert!(result.message.contains("Initialize sync again"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_remote_file_routes_to_reinitialization() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("app.db");
        std::fs::write(&local, b"v1").unwrap();
        let mut orchestrator = orchestrator_for(&local, &MemoryRemoteStorage::new());
        assert!(orchestrator.initialize_sync(None).await.success);

        let store = orchestrator.store();
        let mut metadata = store.sync_metadata().unwrap().unwrap();
        metadata.remote_file_id = Some("file-gone".to_string());
        store.save_sync_metadata(&metadata).unwrap();

        let result = orchestrator.sync_now().await;
        assert!(!result.success);
        assert!(result.error.as_ref().is_some_and(Error::needs_reinitialization));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_info_reports_readiness() {
        let mut h = harness(Some(b"v1"));
        let before = h.orchestrator.sync_info().unwrap();
        assert!(!before.is_ready);
        assert_eq!(before.device_name, "desk");

        assert!(h.orchestrator.initialize_sync(Some("shared")).await.success);
        let after = h.orchestrator.sync_info().unwrap();
        assert!(after.is_ready);
        assert_eq!(after.sync_status, SyncStatus::Idle);
        assert!(after.last_sync.is_some());
        assert_eq!(after.device_id, before.device_id);
    }
}
