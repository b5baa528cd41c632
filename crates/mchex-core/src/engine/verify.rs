//! Size and digest checks shared by the transfer, by post-download
//! verification and by checks on arbitrary local files

use crate::downloader::Downloader;
use crate::error::DownloadError;
use crate::hash::{hash_file, normalize_digest};
use mchex_types::HashAlgorithm;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Pass the expected size through, warning when there is none
fn expected_size(expected: Option<u64>, path: &Path, quiet: bool) -> Option<u64> {
    if expected.is_none() && !quiet {
        warn!(
            "Downloader has no expected file size, cannot verify size of {:?}",
            path
        );
    }
    expected
}

fn expected_digest<'a>(expected: Option<&'a str>, path: &Path, quiet: bool) -> Option<&'a str> {
    if expected.is_none() && !quiet {
        warn!(
            "Downloader does not specify a file hash, cannot verify integrity of {:?}",
            path
        );
    }
    expected
}

/// Check a file size against the downloader's expectation
///
/// Without an expectation the check passes, warning unless `quiet`.
pub(crate) fn check_size(
    downloader: &Downloader,
    path: &Path,
    actual: u64,
    quiet: bool,
) -> Result<(), DownloadError> {
    match expected_size(downloader.expected_size(), path, quiet) {
        Some(expected) if expected != actual => Err(DownloadError::SizeMismatch { expected, actual }),
        _ => Ok(()),
    }
}

/// Hash `file` and compare it to the downloader's expected digest
///
/// Warnings and errors name `shown`, which differs from `file` while a
/// transfer still sits in its temporary file. Without an expectation the file
/// is not read and the check passes, warning unless `quiet`.
pub(crate) async fn check_digest(
    downloader: &Downloader,
    file: &Path,
    shown: &Path,
    quiet: bool,
) -> Result<(), DownloadError> {
    let Some(expected) = expected_digest(downloader.expected_digest(), shown, quiet) else {
        return Ok(());
    };

    let algorithm = downloader.algorithm();
    let actual = hash_file(algorithm, file)
        .await
        .map_err(|e| DownloadError::storage(file, e))?;

    if actual != expected {
        return Err(DownloadError::DigestMismatch {
            algorithm,
            expected: expected.to_string(),
            actual,
        });
    }

    Ok(())
}

/// Outcome of checking a file on disk with [`verify_file`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileVerification {
    pub path: PathBuf,
    pub algorithm: HashAlgorithm,
    pub size: u64,
    pub digest: String,
    /// `None` when no size was expected
    pub size_ok: Option<bool>,
    /// `None` when no digest was expected
    pub digest_ok: Option<bool>,
}

impl FileVerification {
    /// No expectation was contradicted
    pub fn passed(&self) -> bool {
        self.size_ok != Some(false) && self.digest_ok != Some(false)
    }
}

/// Check a local file against an expected size and digest
///
/// The file is always hashed so the report carries its digest. Each missing
/// expectation produces the same warning a download would, unless `quiet`.
///
/// # Errors
/// Returns [`DownloadError::InvalidDigest`] for a malformed expected digest
/// and [`DownloadError::NotFound`] if `path` is not a file.
pub async fn verify_file(
    path: &Path,
    size: Option<u64>,
    digest: Option<&str>,
    algorithm: HashAlgorithm,
    quiet: bool,
) -> Result<FileVerification, DownloadError> {
    let digest = digest
        .map(|digest| normalize_digest(algorithm, digest))
        .transpose()?;

    let file_error = |e: io::Error| {
        if e.kind() == io::ErrorKind::NotFound {
            DownloadError::NotFound(path.to_path_buf())
        } else {
            DownloadError::storage(path, e)
        }
    };

    let metadata = tokio::fs::metadata(path).await.map_err(file_error)?;
    if !metadata.is_file() {
        return Err(DownloadError::NotFound(path.to_path_buf()));
    }
    let actual_size = metadata.len();
    let actual_digest = hash_file(algorithm, path).await.map_err(file_error)?;

    let size_ok = expected_size(size, path, quiet).map(|expected| expected == actual_size);
    let digest_ok =
        expected_digest(digest.as_deref(), path, quiet).map(|expected| expected == actual_digest);

    Ok(FileVerification {
        path: path.to_path_buf(),
        algorithm,
        size: actual_size,
        digest: actual_digest,
        size_ok,
        digest_ok,
    })
}
