//! Error types for mchex core

use mchex_types::HashAlgorithm;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while downloading or verifying a file
///
/// Sources are reference counted so a recorded failure can be handed out
/// any number of times.
#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid {algorithm} digest '{digest}': expected {expected_len} hex characters")]
    InvalidDigest {
        algorithm: HashAlgorithm,
        digest: String,
        expected_len: usize,
    },

    #[error("File {} exists and overwriting is not permitted", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Wrong download size: expected {expected} bytes but got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Failed to verify file integrity: expected {algorithm} '{expected}' but got '{actual}'")]
    DigestMismatch {
        algorithm: HashAlgorithm,
        expected: String,
        actual: String,
    },

    #[error("Network error: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    #[error("Server error: {status} for {url}")]
    ServerError { status: u16, url: String },

    #[error("IO error on {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("File {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("Download was cancelled")]
    Cancelled,

    #[error("Download task ended before reporting an outcome")]
    Aborted,
}

/// Field-less classification of [`DownloadError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    AlreadyExists,
    SizeMismatch,
    DigestMismatch,
    Transport,
    Storage,
    NotFound,
    Cancelled,
    Aborted,
}

impl DownloadError {
    pub(crate) fn storage(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        DownloadError::Storage {
            path: path.as_ref().to_path_buf(),
            source: Arc::new(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::InvalidUrl(_) | DownloadError::InvalidDigest { .. } => {
                ErrorKind::InvalidInput
            }
            DownloadError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            DownloadError::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            DownloadError::DigestMismatch { .. } => ErrorKind::DigestMismatch,
            DownloadError::Network(_) | DownloadError::ServerError { .. } => ErrorKind::Transport,
            DownloadError::Storage { .. } => ErrorKind::Storage,
            DownloadError::NotFound(_) => ErrorKind::NotFound,
            DownloadError::Cancelled => ErrorKind::Cancelled,
            DownloadError::Aborted => ErrorKind::Aborted,
        }
    }

    /// Check if this error means the downloaded bytes were not the expected ones
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SizeMismatch | ErrorKind::DigestMismatch
        )
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(error: reqwest::Error) -> Self {
        DownloadError::Network(Arc::new(error))
    }
}
