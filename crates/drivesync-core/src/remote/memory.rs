//! In-memory remote storage with failure injection

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{
    io_error, validate_name, RemoteFile, RemoteFileMetadata, RemoteResult, RemoteStorage,
    UploadOutcome, UploadRequest,
};
use crate::RemoteError;

/// Remote calls, for counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOperation {
    GetMetadata,
    FindFile,
    Upload,
    Download,
    CreateFolder,
}

#[derive(Debug, Clone)]
struct StoredFile {
    name: String,
    parent_id: Option<String>,
    bytes: Vec<u8>,
    modified_time: DateTime<Utc>,
    version: u64,
}

impl StoredFile {
    fn etag(&self) -> String {
        format!("\"v{}\"", self.version)
    }

    fn metadata(&self, id: &str) -> RemoteFileMetadata {
        RemoteFileMetadata {
            id: id.to_string(),
            name: self.name.clone(),
            modified_time: self.modified_time,
            size: self.bytes.len() as u64,
            etag: Some(self.etag()),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    folders: BTreeMap<String, (String, Option<String>)>,
    files: BTreeMap<String, StoredFile>,
    next_id: u64,
    clock: Option<DateTime<Utc>>,
    latency: Option<Duration>,
    failures: HashMap<RemoteOperation, RemoteError>,
    calls: HashMap<RemoteOperation, usize>,
}

impl Inner {
    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }

    fn find_file_id(&self, name: &str, parent_id: Option<&str>) -> Option<String> {
        self.files
            .iter()
            .find(|(_, file)| file.name == name && file.parent_id.as_deref() == parent_id)
            .map(|(id, _)| id.clone())
    }
}

/// Remote storage kept in process memory.
///
/// Clones share state, so a test can hold one handle while the orchestrator
/// owns another, and can play "another device" by writing through
/// [`MemoryRemoteStorage::simulate_remote_commit`].
#[derive(Debug, Clone, Default)]
pub struct MemoryRemoteStorage {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRemoteStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the clock used for modification times.
    pub fn set_clock(&self, now: DateTime<Utc>) {
        self.inner().clock = Some(now);
    }

    /// Delay every call, e.g. to exercise caller timeouts.
    pub fn set_latency(&self, latency: Duration) {
        self.inner().latency = Some(latency);
    }

    /// Fail the next call of `operation` with `error`.
    ///
    /// A failed download writes half the payload to the destination first,
    /// like a connection dropping mid-transfer.
    pub fn fail_next(&self, operation: RemoteOperation, error: RemoteError) {
        self.inner().failures.insert(operation, error);
    }

    /// Number of calls made to `operation`, failed ones included.
    pub fn calls(&self, operation: RemoteOperation) -> usize {
        self.inner().calls.get(&operation).copied().unwrap_or(0)
    }

    pub fn file_count(&self) -> usize {
        self.inner().files.len()
    }

    pub fn file_bytes(&self, file_id: &str) -> Option<Vec<u8>> {
        self.inner().files.get(file_id).map(|file| file.bytes.clone())
    }

    /// Replace a file's content as another device would.
    pub fn simulate_remote_commit(
        &self,
        file_id: &str,
        bytes: &[u8],
        modified_time: DateTime<Utc>,
    ) -> RemoteResult<()> {
        let mut inner = self.inner();
        let file = inner
            .files
            .get_mut(file_id)
            .ok_or_else(|| RemoteError::NotFound(file_id.to_string()))?;
        file.bytes = bytes.to_vec();
        file.modified_time = modified_time;
        file.version += 1;
        Ok(())
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, operation: RemoteOperation) -> RemoteResult<()> {
        let latency = {
            let mut inner = self.inner();
            *inner.calls.entry(operation).or_default() += 1;
            inner.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if operation == RemoteOperation::Download {
            return Ok(());
        }
        match self.inner().failures.remove(&operation) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl RemoteStorage for MemoryRemoteStorage {
    async fn get_metadata(&self, file_id: &str) -> RemoteResult<RemoteFileMetadata> {
        self.enter(RemoteOperation::GetMetadata).await?;
        self.inner()
            .files
            .get(file_id)
            .map(|file| file.metadata(file_id))
            .ok_or_else(|| RemoteError::NotFound(format!("file {file_id}")))
    }

    async fn find_file(
        &self,
        name: &str,
        parent_folder_id: &str,
    ) -> RemoteResult<Option<RemoteFileMetadata>> {
        self.enter(RemoteOperation::FindFile).await?;
        let inner = self.inner();
        Ok(inner
            .find_file_id(name, Some(parent_folder_id))
            .and_then(|id| inner.files.get(&id).map(|file| file.metadata(&id))))
    }

    async fn upload(&self, request: UploadRequest<'_>) -> RemoteResult<UploadOutcome> {
        self.enter(RemoteOperation::Upload).await?;
        let name = validate_name("file", request.file_name)?;
        let bytes = tokio::fs::read(request.local_path)
            .await
            .map_err(|error| io_error("read upload source", &error))?;

        let mut inner = self.inner();
        let now = inner.now();
        let parent_id = request.parent_folder_id.map(ToOwned::to_owned);

        if let Some(id) = inner.find_file_id(&name, parent_id.as_deref()) {
            let file = inner
                .files
                .get_mut(&id)
                .ok_or_else(|| RemoteError::NotFound(id.clone()))?;
            if let Some(expected) = request.if_match {
                if file.etag() != expected {
                    return Err(RemoteError::PreconditionFailed(format!(
                        "file {id} is at {} not {expected}",
                        file.etag()
                    )));
                }
            }
            file.bytes = bytes;
            file.modified_time = now;
            file.version += 1;
            return Ok(UploadOutcome::Updated(RemoteFile {
                file_id: id,
                modified_time: now,
                etag: Some(file.etag()),
            }));
        }

        if request.if_match.is_some() {
            return Err(RemoteError::PreconditionFailed(format!(
                "file {name} no longer exists"
            )));
        }

        let id = inner.allocate_id("file");
        let file = StoredFile {
            name,
            parent_id,
            bytes,
            modified_time: now,
            version: 1,
        };
        let etag = file.etag();
        inner.files.insert(id.clone(), file);
        Ok(UploadOutcome::Created(RemoteFile {
            file_id: id,
            modified_time: now,
            etag: Some(etag),
        }))
    }

    async fn download(&self, file_id: &str, destination: &Path) -> RemoteResult<()> {
        self.enter(RemoteOperation::Download).await?;
        let (bytes, failure) = {
            let mut inner = self.inner();
            let failure = inner.failures.remove(&RemoteOperation::Download);
            let bytes = inner
                .files
                .get(file_id)
                .map(|file| file.bytes.clone())
                .ok_or_else(|| RemoteError::NotFound(format!("file {file_id}")))?;
            (bytes, failure)
        };

        if let Some(error) = failure {
            let partial = &bytes[..bytes.len() / 2];
            tokio::fs::write(destination, partial)
                .await
                .map_err(|write_error| io_error("write partial download", &write_error))?;
            return Err(error);
        }

        tokio::fs::write(destination, &bytes)
            .await
            .map_err(|error| io_error("write download", &error))
    }

    async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> RemoteResult<String> {
        self.enter(RemoteOperation::CreateFolder).await?;
        let name = validate_name("folder", name)?;
        let parent_id = parent_id.map(ToOwned::to_owned);

        let mut inner = self.inner();
        if let Some(id) = inner
            .folders
            .iter()
            .find(|(_, (existing, parent))| *existing == name && *parent == parent_id)
            .map(|(id, _)| id.clone())
        {
            return Ok(id);
        }

        let id = inner.allocate_id("folder");
        inner.folders.insert(id.clone(), (name, parent_id));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::tempdir;

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn create_folder_is_idempotent() {
        let remote = MemoryRemoteStorage::new();
        let first = remote.create_folder("drivesync", None).await.unwrap();
        let second = remote.create_folder("drivesync", None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(remote.calls(RemoteOperation::CreateFolder), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upload_creates_then_updates() {
        let tmp = tempdir().unwrap();
        let local = tmp.path().join("app.db");
        std::fs::write(&local, b"v1").unwrap();

        let remote = MemoryRemoteStorage::new();
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        remote.set_clock(t);
        let folder = remote.create_folder("drivesync", None).await.unwrap();
        let request = UploadRequest {
            local_path: &local,
            file_name: "app.db",
            parent_folder_id: Some(&folder),
            if_match: None,
        };

        let created = remote.upload(request).await.unwrap();
        assert!(matches!(created, UploadOutcome::Created(_)));
        assert_eq!(created.file().modified_time, t);

        let updated = remote.upload(request).await.unwrap();
        assert!(matches!(updated, UploadOutcome::Updated(_)));
        assert_eq!(created.file().file_id, updated.file().file_id);
        assert_eq!(remote.file_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upload_with_stale_etag_is_rejected() {
        let tmp = tempdir().unwrap();
        let local = tmp.path().join("app.db");
        std::fs::write(&local, b"v1").unwrap();

        let remote = MemoryRemoteStorage::new();
        let folder = remote.create_folder("drivesync", None).await.unwrap();
        let created = remote
            .upload(UploadRequest {
                local_path: &local,
                file_name: "app.db",
                parent_folder_id: Some(&folder),
                if_match: None,
            })
            .await
            .unwrap()
            .into_file();

        remote
            .simulate_remote_commit(&created.file_id, b"other device", Utc::now())
            .unwrap();

        let err = remote
            .upload(UploadRequest {
                local_path: &local,
                file_name: "app.db",
                parent_folder_id: Some(&folder),
                if_match: created.etag.as_deref(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::PreconditionFailed(_)));
        assert_eq!(
            remote.file_bytes(&created.file_id).unwrap(),
            b"other device".to_vec()
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn injected_failure_fires_once() {
        let remote = MemoryRemoteStorage::new();
        remote.fail_next(
            RemoteOperation::CreateFolder,
            RemoteError::Network("offline".into()),
        );
        assert!(remote.create_folder("a", None).await.is_err());
        assert!(remote.create_folder("a", None).await.is_ok());
    }
}
