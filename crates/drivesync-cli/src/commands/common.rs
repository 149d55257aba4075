use std::env;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use drivesync_core::remote::{FolderRemoteStorage, R2Config, R2RemoteStorage};
use drivesync_core::state::{SqliteKeyValueStore, SyncStateStore};
use drivesync_core::{
    ConflictFile, SyncAction, SyncConfig, SyncMetadata, SyncOrchestrator, SyncResult, SyncService,
};
use serde::Serialize;

use crate::cli::RemoteKind;
use crate::error::CliError;
use crate::remote::CliRemote;

const DATA_DIR_NAME: &str = "drivesync";
const ENV_STATE_PATH: &str = "DRIVESYNC_STATE_PATH";
const ENV_REMOTE_ROOT: &str = "DRIVESYNC_REMOTE_ROOT";

pub type CliSyncService = SyncService<CliRemote, SqliteKeyValueStore>;
pub type CliStateStore = SyncStateStore<SqliteKeyValueStore>;

/// Paths and backend choice shared by every command.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub config: SyncConfig,
    pub state_path: PathBuf,
    pub remote: RemoteKind,
    pub remote_root: Option<PathBuf>,
}

impl CliContext {
    pub fn resolve(
        db_path: Option<PathBuf>,
        state_path: Option<PathBuf>,
        remote: RemoteKind,
        remote_root: Option<PathBuf>,
    ) -> Result<Self, CliError> {
        let config = SyncConfig::from_env(db_path, default_data_path("drivesync.db")?)?;
        let state_path = match state_path.or_else(|| env::var_os(ENV_STATE_PATH).map(PathBuf::from))
        {
            Some(path) => path,
            None => default_data_path("sync-state.db")?,
        };
        let remote_root = remote_root.or_else(|| env::var_os(ENV_REMOTE_ROOT).map(PathBuf::from));

        Ok(Self {
            config,
            state_path,
            remote,
            remote_root,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub device_id: String,
    pub device_name: String,
    pub is_ready: bool,
    pub sync_status: String,
    pub last_sync: Option<String>,
    pub local_path: String,
    pub remote_file_id: Option<String>,
    pub last_error: Option<String>,
    pub conflict_count: usize,
}

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub file_name: String,
    pub path: String,
    pub created_at: String,
    pub size_bytes: u64,
    pub device_name: String,
}

pub fn default_data_path(file_name: &str) -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join(DATA_DIR_NAME).join(file_name))
        .ok_or_else(|| CliError::Config("Failed to resolve the user data directory".to_string()))
}

pub fn open_state_store(context: &CliContext) -> Result<CliStateStore, CliError> {
    Ok(SyncStateStore::new(SqliteKeyValueStore::open(
        &context.state_path,
    )?))
}

pub fn build_remote(context: &CliContext) -> Result<CliRemote, CliError> {
    match context.remote {
        RemoteKind::Folder => {
            let root = context
                .remote_root
                .clone()
                .ok_or(CliError::RemoteRootMissing)?;
            Ok(CliRemote::Folder(FolderRemoteStorage::new(root)))
        }
        RemoteKind::R2 => {
            let config = R2Config::from_env()?.ok_or(CliError::R2NotConfigured)?;
            tracing::info!("Using R2 bucket {}", config.bucket);
            Ok(CliRemote::R2(R2RemoteStorage::new(config)))
        }
    }
}

pub fn open_sync_service(context: &CliContext) -> Result<CliSyncService, CliError> {
    let remote = build_remote(context)?;
    let store = open_state_store(context)?;
    Ok(SyncService::new(SyncOrchestrator::new(
        context.config.clone(),
        remote,
        store,
    )))
}

/// Print a sync result; failures become a [`CliError`] so the exit code is
/// non-zero.
pub fn report_sync_result(result: SyncResult) -> Result<(), CliError> {
    if !result.success {
        return Err(CliError::SyncFailed(result.message));
    }

    match result.action {
        SyncAction::Idle => println!("Up to date. {}", result.message),
        SyncAction::Pull => println!("Pulled remote changes. {}", result.message),
        SyncAction::Push => println!("Pushed local changes. {}", result.message),
        SyncAction::Conflict => println!("Conflict resolved. {}", result.message),
    }
    if result.requires_reload() {
        println!("The local database was replaced; reopen it in any running app.");
    }
    Ok(())
}

pub fn status_item(
    store: &CliStateStore,
    local_path: &Path,
) -> Result<StatusItem, CliError> {
    let info = store.sync_info()?;
    let metadata = store.sync_metadata()?;

    Ok(StatusItem {
        device_id: info.device_id.to_string(),
        device_name: info.device_name,
        is_ready: info.is_ready,
        sync_status: info.sync_status.to_string(),
        last_sync: info.last_sync.as_ref().map(format_sync_timestamp),
        local_path: local_path.display().to_string(),
        remote_file_id: metadata
            .as_ref()
            .and_then(|metadata| metadata.remote_file_id.clone()),
        last_error: metadata
            .as_ref()
            .and_then(|metadata| metadata.last_error.clone()),
        conflict_count: metadata.map_or(0, |metadata| metadata.conflict_files.len()),
    })
}

pub fn format_status_lines(item: &StatusItem) -> Vec<String> {
    let mut lines = vec![
        format!("Device:     {} ({})", item.device_name, item.device_id),
        format!("Database:   {}", item.local_path),
        format!(
            "Ready:      {}",
            if item.is_ready {
                "yes"
            } else {
                "no (run `drivesync init`)"
            }
        ),
        format!("Status:     {}", item.sync_status),
        format!(
            "Last sync:  {}",
            item.last_sync.as_deref().unwrap_or("never")
        ),
    ];
    if let Some(remote_file_id) = &item.remote_file_id {
        lines.push(format!("Remote id:  {remote_file_id}"));
    }
    if let Some(error) = &item.last_error {
        lines.push(format!("Last error: {error}"));
    }
    if item.conflict_count > 0 {
        lines.push(format!(
            "Conflicts:  {} (run `drivesync conflicts`)",
            item.conflict_count
        ));
    }
    lines
}

pub fn conflict_files(metadata: Option<SyncMetadata>) -> Vec<ConflictFile> {
    metadata.map_or_else(Vec::new, |metadata| metadata.conflict_files)
}

pub fn conflict_to_item(conflict: &ConflictFile, local_path: &Path) -> ConflictItem {
    ConflictItem {
        file_name: conflict.file_name.clone(),
        path: local_path
            .with_file_name(&conflict.file_name)
            .display()
            .to_string(),
        created_at: conflict.created_at.to_rfc3339(),
        size_bytes: conflict.size_bytes,
        device_name: conflict.device_name.clone(),
    }
}

pub fn format_conflict_lines(conflicts: &[ConflictFile]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {}  {} bytes  from {}",
                format_sync_timestamp(&conflict.created_at),
                conflict.file_name,
                conflict.size_bytes,
                conflict.device_name
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
