//! Shared sync service used across hosts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::SyncOrchestrator;
use crate::models::{SyncInfo, SyncResult};
use crate::remote::RemoteStorage;
use crate::state::KeyValueStore;
use crate::Result;

/// Thread-safe handle to one orchestrator.
///
/// Clones share the orchestrator; attempts from different tasks queue on
/// the mutex instead of interleaving.
pub struct SyncService<R, K: KeyValueStore> {
    orchestrator: Arc<Mutex<SyncOrchestrator<R, K>>>,
}

impl<R, K: KeyValueStore> Clone for SyncService<R, K> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
        }
    }
}

impl<R: RemoteStorage, K: KeyValueStore> SyncService<R, K> {
    pub fn new(orchestrator: SyncOrchestrator<R, K>) -> Self {
        Self {
            orchestrator: Arc::new(Mutex::new(orchestrator)),
        }
    }

    /// Set up sync on this device.
    pub async fn initialize_sync(&self, folder_name: Option<&str>) -> SyncResult {
        let mut orchestrator = self.orchestrator.lock().await;
        orchestrator.initialize_sync(folder_name).await
    }

    /// Sync with caller-supplied timestamps.
    pub async fn auto_sync(
        &self,
        local_timestamp: DateTime<Utc>,
        remote_timestamp: DateTime<Utc>,
        device_id: Uuid,
    ) -> SyncResult {
        let mut orchestrator = self.orchestrator.lock().await;
        orchestrator
            .auto_sync(local_timestamp, remote_timestamp, device_id)
            .await
    }

    /// Sync after the host wrote to the local database.
    pub async fn sync_after_local_change(&self) -> SyncResult {
        let mut orchestrator = self.orchestrator.lock().await;
        orchestrator.sync_after_local_change().await
    }

    /// Sync against the live remote state.
    pub async fn sync_now(&self) -> SyncResult {
        let mut orchestrator = self.orchestrator.lock().await;
        orchestrator.sync_now().await
    }

    pub async fn sync_info(&self) -> Result<SyncInfo> {
        let orchestrator = self.orchestrator.lock().await;
        orchestrator.sync_info()
    }
}
