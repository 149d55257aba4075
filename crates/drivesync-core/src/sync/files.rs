//! Local file moves used by pull and conflict handling.
//!
//! Incoming data is staged next to the database file so the final rename
//! stays on one filesystem and replaces the file in a single step.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::util::sanitize_token;
use crate::{Error, Result};

/// Staging path for an incoming remote version of `local_path`.
pub fn staging_path(local_path: &Path) -> PathBuf {
    let name = file_name(local_path);
    local_path.with_file_name(format!(".{name}.incoming-{}", Uuid::now_v7().simple()))
}

/// Name for a preserved local copy:
/// `<stem>.conflict-<device>-<YYYYMMDDTHHMMSSZ>.<ext>`.
///
/// A numeric suffix is appended when a backup with that name already exists.
pub fn conflict_path(local_path: &Path, device_name: &str, at: DateTime<Utc>) -> PathBuf {
    let stem = local_path
        .file_stem()
        .map_or_else(|| "database".to_string(), |stem| stem.to_string_lossy().into_owned());
    let extension = local_path
        .extension()
        .map(|extension| format!(".{}", extension.to_string_lossy()));
    let device = match sanitize_token(device_name) {
        token if token.is_empty() => "device".to_string(),
        token => token,
    };
    let base = format!("{stem}.conflict-{device}-{}", at.format("%Y%m%dT%H%M%SZ"));
    let extension = extension.unwrap_or_default();

    let mut candidate = local_path.with_file_name(format!("{base}{extension}"));
    let mut counter = 2;
    while candidate.exists() {
        candidate = local_path.with_file_name(format!("{base}-{counter}{extension}"));
        counter += 1;
    }
    candidate
}

/// Fail unless the staged file has exactly `expected` bytes.
pub async fn verify_size(staged: &Path, expected: u64) -> Result<()> {
    let actual = tokio::fs::metadata(staged).await?.len();
    if actual != expected {
        return Err(crate::RemoteError::Network(format!(
            "incomplete download: received {actual} of {expected} bytes"
        ))
        .into());
    }
    Ok(())
}

/// Move `staged` over `target` in one rename.
pub async fn replace(staged: &Path, target: &Path) -> Result<()> {
    tokio::fs::rename(staged, target).await.map_err(Error::from)
}

/// Best-effort cleanup of a staging file.
pub async fn discard(staged: &Path) {
    match tokio::fs::remove_file(staged).await {
        Ok(()) => {}
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => {
            tracing::warn!("Failed to remove staging file {}: {}", staged.display(), error);
        }
    }
}

/// Modification time of a local file, `None` when it does not exist.
pub async fn modified_time(path: &Path) -> Result<Option<DateTime<Utc>>> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(Some(metadata.modified()?.into())),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| "database".to_string(), |name| name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn conflict_name_embeds_device_and_basic_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 5).unwrap();
        let path = conflict_path(Path::new("/nonexistent/app.db"), "Work Laptop", at);
        assert_eq!(
            path,
            PathBuf::from("/nonexistent/app.conflict-work-laptop-20240115T103005Z.db")
        );
    }

    #[test]
    fn conflict_name_without_extension() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 5).unwrap();
        let path = conflict_path(Path::new("/nonexistent/notes"), "!!", at);
        assert_eq!(
            path,
            PathBuf::from("/nonexistent/notes.conflict-device-20240115T103005Z")
        );
    }

    #[test]
    fn conflict_name_avoids_existing_backup() {
        let tmp = tempdir().unwrap();
        let local = tmp.path().join("app.db");
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 5).unwrap();

        let first = conflict_path(&local, "desk", at);
        std::fs::write(&first, b"old backup").unwrap();
        let second = conflict_path(&local, "desk", at);

        assert_ne!(first, second);
        assert_eq!(
            second.file_name().unwrap().to_string_lossy(),
            "app.conflict-desk-20240115T103005Z-2.db"
        );
    }

    #[test]
    fn staging_path_is_hidden_sibling() {
        let staged = staging_path(Path::new("/data/app.db"));
        assert_eq!(staged.parent(), Some(Path::new("/data")));
        assert!(staged
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(".app.db.incoming-"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn verify_size_rejects_truncated_file() {
        let tmp = tempdir().unwrap();
        let staged = tmp.path().join("staged");
        std::fs::write(&staged, b"half").unwrap();

        assert!(verify_size(&staged, 4).await.is_ok());
        let err = verify_size(&staged, 8).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn modified_time_of_missing_file_is_none() {
        let tmp = tempdir().unwrap();
        assert!(modified_time(&tmp.path().join("missing.db"))
            .await
            .unwrap()
            .is_none());
    }
}
