//! Remote backend chosen on the command line.

use std::path::Path;

use drivesync_core::remote::{
    FolderRemoteStorage, R2RemoteStorage, RemoteFileMetadata, RemoteResult, RemoteStorage,
    UploadOutcome, UploadRequest,
};

#[derive(Debug, Clone)]
pub enum CliRemote {
    Folder(FolderRemoteStorage),
    R2(R2RemoteStorage),
}

impl RemoteStorage for CliRemote {
    async fn get_metadata(&self, file_id: &str) -> RemoteResult<RemoteFileMetadata> {
        match self {
            Self::Folder(remote) => remote.get_metadata(file_id).await,
            Self::R2(remote) => remote.get_metadata(file_id).await,
        }
    }

    async fn find_file(
        &self,
        name: &str,
        parent_folder_id: &str,
    ) -> RemoteResult<Option<RemoteFileMetadata>> {
        match self {
            Self::Folder(remote) => remote.find_file(name, parent_folder_id).await,
            Self::R2(remote) => remote.find_file(name, parent_folder_id).await,
        }
    }

    async fn upload(&self, request: UploadRequest<'_>) -> RemoteResult<UploadOutcome> {
        match self {
            Self::Folder(remote) => remote.upload(request).await,
            Self::R2(remote) => remote.upload(request).await,
        }
    }

    async fn download(&self, file_id: &str, destination: &Path) -> RemoteResult<()> {
        match self {
            Self::Folder(remote) => remote.download(file_id, destination).await,
            Self::R2(remote) => remote.download(file_id, destination).await,
        }
    }

    async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> RemoteResult<String> {
        match self {
            Self::Folder(remote) => remote.create_folder(name, parent_id).await,
            Self::R2(remote) => remote.create_folder(name, parent_id).await,
        }
    }
}
