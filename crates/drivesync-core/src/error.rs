//! Error types for drivesync-core

use thiserror::Error;

/// Result type alias using drivesync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by a remote storage backend.
///
/// A detected conflict is not listed here: it is a normal sync outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Backend unreachable or the call timed out
    #[error("Network error: {0}")]
    Network(String),

    /// Credentials missing, expired, or rejected
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Remote file or folder does not exist
    #[error("Remote object not found: {0}")]
    NotFound(String),

    /// Write rejected because the remote changed since it was last read
    #[error("Remote precondition failed: {0}")]
    PreconditionFailed(String),

    /// Any other backend failure
    #[error("Remote service error: {0}")]
    Service(String),
}

/// Errors that can occur in drivesync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Remote storage error
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// `SQLite` error from the local state backend
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local sync state store error
    #[error("State store error: {0}")]
    Store(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Sync has not been initialized on this device
    #[error("Sync is not initialized on this device")]
    NotInitialized,

    /// Caller passed a device id that does not own this installation
    #[error("Device mismatch: expected {expected}, got {actual}")]
    DeviceMismatch {
        /// Device id persisted for this installation
        expected: String,
        /// Device id supplied by the caller
        actual: String,
    },
}

impl Error {
    /// Returns true if the caller may retry the same attempt unchanged.
    ///
    /// Nothing inside this crate retries automatically.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote(RemoteError::Network(_)))
    }

    /// Returns true if the remote rejected the credentials in use.
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Remote(RemoteError::Auth(_)))
    }

    /// Returns true if recovering requires running initialization again.
    pub const fn needs_reinitialization(&self) -> bool {
        matches!(
            self,
            Self::Remote(RemoteError::NotFound(_)) | Self::NotInitialized
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_errors_are_retryable() {
        assert!(Error::from(RemoteError::Network("timed out".into())).is_retryable());
        assert!(!Error::from(RemoteError::Auth("expired".into())).is_retryable());
        assert!(!Error::from(RemoteError::NotFound("file".into())).is_retryable());
        assert!(!Error::NotInitialized.is_retryable());
    }

    #[test]
    fn not_found_routes_to_reinitialization() {
        assert!(Error::from(RemoteError::NotFound("db.sqlite".into())).needs_reinitialization());
        assert!(Error::NotInitialized.needs_reinitialization());
        assert!(!Error::from(RemoteError::Service("500".into())).needs_reinitialization());
    }

    #[test]
    fn auth_errors_are_distinct() {
        let error = Error::from(RemoteError::Auth("token expired".into()));
        assert!(error.is_auth());
        assert_eq!(error.to_string(), "Authentication error: token expired");
    }
}
