//! Remote storage contract and backends.
//!
//! The orchestrator only talks to [`RemoteStorage`]. Backends normalize
//! remote timestamps to `DateTime<Utc>` before handing them over.

mod folder;
mod memory;
mod r2;

use std::path::Path;

use chrono::{DateTime, Utc};

pub use folder::FolderRemoteStorage;
pub use memory::{MemoryRemoteStorage, RemoteOperation};
pub use r2::{R2Config, R2RemoteStorage};

use crate::RemoteError;

/// Result type for remote calls
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Metadata of a remote file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileMetadata {
    pub id: String,
    pub name: String,
    pub modified_time: DateTime<Utc>,
    pub size: u64,
    /// Entity tag when the backend exposes one
    pub etag: Option<String>,
}

/// Identity and version of a file right after an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub file_id: String,
    pub modified_time: DateTime<Utc>,
    pub etag: Option<String>,
}

/// What an upload did on the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// No same-named file existed under the parent
    Created(RemoteFile),
    /// An existing same-named file was replaced
    Updated(RemoteFile),
}

impl UploadOutcome {
    pub const fn file(&self) -> &RemoteFile {
        match self {
            Self::Created(file) | Self::Updated(file) => file,
        }
    }

    pub fn into_file(self) -> RemoteFile {
        match self {
            Self::Created(file) | Self::Updated(file) => file,
        }
    }
}

/// Arguments for [`RemoteStorage::upload`].
#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    pub local_path: &'a Path,
    pub file_name: &'a str,
    pub parent_folder_id: Option<&'a str>,
    /// Only replace the remote file if its entity tag still matches
    pub if_match: Option<&'a str>,
}

/// Thin contract over a cloud file-storage API.
///
/// Implementations must not retry internally; retry is the caller's call.
#[allow(async_fn_in_trait)]
pub trait RemoteStorage {
    /// Fetch metadata for a file by id.
    async fn get_metadata(&self, file_id: &str) -> RemoteResult<RemoteFileMetadata>;

    /// Look up a file by name directly under a folder.
    async fn find_file(
        &self,
        name: &str,
        parent_folder_id: &str,
    ) -> RemoteResult<Option<RemoteFileMetadata>>;

    /// Upload a local file, updating a same-named file under the parent in
    /// place or creating it.
    ///
    /// With `if_match` set, the write is rejected with
    /// [`RemoteError::PreconditionFailed`] when the remote version changed.
    async fn upload(&self, request: UploadRequest<'_>) -> RemoteResult<UploadOutcome>;

    /// Download a file to `destination`. Fails rather than leaving a
    /// partially written destination behind.
    async fn download(&self, file_id: &str, destination: &Path) -> RemoteResult<()>;

    /// Create a folder, returning the existing one when already present.
    async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> RemoteResult<String>;
}

/// Map a local filesystem failure inside a backend to the remote taxonomy.
pub(crate) fn io_error(context: &str, error: &std::io::Error) -> RemoteError {
    let detail = format!("{context}: {error}");
    match error.kind() {
        std::io::ErrorKind::NotFound => RemoteError::NotFound(detail),
        std::io::ErrorKind::TimedOut
        | std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected => RemoteError::Network(detail),
        std::io::ErrorKind::PermissionDenied => RemoteError::Auth(detail),
        _ => RemoteError::Service(detail),
    }
}

/// Reject names that would escape their parent folder.
pub(crate) fn validate_name(kind: &str, name: &str) -> RemoteResult<String> {
    let name = name.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(RemoteError::Service(format!("invalid {kind} name '{name}'")));
    }
    Ok(name.to_string())
}
