//! Remote storage backed by a directory, e.g. a mounted cloud drive.
//!
//! Folder and file ids are paths relative to the root. Entity tags are
//! derived from size and modification time and checked right before the
//! rename; two processes writing in that instant can still race, because a
//! plain filesystem has no compare-and-swap rename.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    io_error, validate_name, RemoteFile, RemoteFileMetadata, RemoteResult, RemoteStorage,
    UploadOutcome, UploadRequest,
};
use crate::RemoteError;

/// Directory-backed [`RemoteStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRemoteStorage {
    root: PathBuf,
}

impl FolderRemoteStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, id: &str) -> RemoteResult<PathBuf> {
        let mut path = self.root.clone();
        for segment in id.split('/').filter(|segment| !segment.is_empty()) {
            path.push(validate_name("path segment", segment)?);
        }
        Ok(path)
    }

    async fn metadata_for(&self, id: &str) -> RemoteResult<RemoteFileMetadata> {
        let path = self.resolve(id)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|error| io_error(&format!("stat {id}"), &error))?;
        if !metadata.is_file() {
            return Err(RemoteError::NotFound(format!("{id} is not a file")));
        }
        let modified_time: DateTime<Utc> = metadata
            .modified()
            .map_err(|error| io_error(&format!("read mtime of {id}"), &error))?
            .into();
        let size = metadata.len();
        let name = id.rsplit('/').next().unwrap_or(id).to_string();

        Ok(RemoteFileMetadata {
            id: id.to_string(),
            name,
            modified_time,
            size,
            etag: Some(derive_etag(size, &modified_time)),
        })
    }
}

impl RemoteStorage for FolderRemoteStorage {
    async fn get_metadata(&self, file_id: &str) -> RemoteResult<RemoteFileMetadata> {
        self.metadata_for(file_id).await
    }

    async fn find_file(
        &self,
        name: &str,
        parent_folder_id: &str,
    ) -> RemoteResult<Option<RemoteFileMetadata>> {
        let id = join_id(Some(parent_folder_id), &validate_name("file", name)?);
        match self.metadata_for(&id).await {
            Ok(metadata) => Ok(Some(metadata)),
            Err(RemoteError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn upload(&self, request: UploadRequest<'_>) -> RemoteResult<UploadOutcome> {
        let name = validate_name("file", request.file_name)?;
        let id = join_id(request.parent_folder_id, &name);
        let target = self.resolve(&id)?;
        let parent = target
            .parent()
            .ok_or_else(|| RemoteError::Service(format!("{id} has no parent folder")))?;
        let staging = parent.join(format!(".{name}.upload-{}", Uuid::now_v7().simple()));

        tokio::fs::copy(request.local_path, &staging)
            .await
            .map_err(|error| io_error("stage upload", &error))?;

        let existing = match self.metadata_for(&id).await {
            Ok(metadata) => Some(metadata),
            Err(RemoteError::NotFound(_)) => None,
            Err(error) => {
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(error);
            }
        };

        if let Some(expected) = request.if_match {
            let current = existing.as_ref().and_then(|metadata| metadata.etag.as_deref());
            if current != Some(expected) {
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(RemoteError::PreconditionFailed(format!(
                    "{id} changed since {expected}"
                )));
            }
        }

        if let Err(error) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(io_error("commit upload", &error));
        }

        let committed = self.metadata_for(&id).await?;
        let file = RemoteFile {
            file_id: id,
            modified_time: committed.modified_time,
            etag: committed.etag,
        };
        Ok(if existing.is_some() {
            UploadOutcome::Updated(file)
        } else {
            UploadOutcome::Created(file)
        })
    }

    async fn download(&self, file_id: &str, destination: &Path) -> RemoteResult<()> {
        let source = self.resolve(file_id)?;
        if let Err(error) = tokio::fs::copy(&source, destination).await {
            let _ = tokio::fs::remove_file(destination).await;
            return Err(io_error(&format!("download {file_id}"), &error));
        }
        Ok(())
    }

    async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> RemoteResult<String> {
        let id = join_id(parent_id, &validate_name("folder", name)?);
        let path = self.resolve(&id)?;
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|error| io_error(&format!("create folder {id}"), &error))?;
        Ok(id)
    }
}

fn join_id(parent_id: Option<&str>, name: &str) -> String {
    match parent_id.map(|parent| parent.trim_matches('/')) {
        Some(parent) if !parent.is_empty() => format!("{parent}/{name}"),
        _ => name.to_string(),
    }
}

fn derive_etag(size: u64, modified_time: &DateTime<Utc>) -> String {
    format!(
        "\"{size}-{}\"",
        modified_time.timestamp_nanos_opt().unwrap_or_else(|| modified_time.timestamp())
    )
}
