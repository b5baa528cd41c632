//! Transfer - streams the response body into a temporary file and publishes it
//!
//! The body is written to a hidden `.part` file next to the destination. The
//! file is synced and verified before it is moved into place, so the
//! destination either keeps its previous content or holds the verified
//! download. Every early exit, including cancellation, drops the temporary
//! path and with it the partial file.

use crate::engine::context::Shared;
use crate::engine::verify::{check_digest, check_size};
use crate::error::DownloadError;
use futures::StreamExt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// One attempt at fetching a file to its destination
pub(crate) struct Transfer {
    shared: Arc<Shared>,
}

impl Transfer {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Run the transfer to completion
    pub(crate) async fn run(self) -> Result<(), DownloadError> {
        let target = self.shared.target.as_path();
        let options = self.shared.options;

        if !options.overwrite && path_exists(target).await? {
            return Err(DownloadError::AlreadyExists(target.to_path_buf()));
        }

        let parent = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::storage(parent, e))?;

        let (mut file, temp_path) = create_temp_file(target, parent)?;
        debug!("Writing {} to {:?}", self.shared.downloader.source(), temp_path);

        let reported = self.stream_body(&mut file, &temp_path).await?;

        file.flush()
            .await
            .map_err(|e| DownloadError::storage(&temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| DownloadError::storage(&temp_path, e))?;
        drop(file);

        self.verify(&temp_path, reported).await?;
        self.publish(temp_path)?;

        info!(
            "Downloaded {} to {:?} ({} bytes)",
            self.shared.downloader.source(),
            target,
            self.shared.bytes_transferred()
        );
        Ok(())
    }

    /// Request the file and write the body, returning the server-reported length
    async fn stream_body(
        &self,
        file: &mut File,
        temp_path: &Path,
    ) -> Result<Option<u64>, DownloadError> {
        let downloader = &self.shared.downloader;
        let response = downloader.client().get(downloader.url().clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::ServerError {
                status: status.as_u16(),
                url: downloader.source().to_string(),
            });
        }

        let reported = response.content_length();
        if let Some(length) = reported {
            debug!("Server reported {} bytes", length);
            self.shared.set_bytes_expected(length);
        }

        // Stop as soon as the body outgrows what we were told to expect
        let limit = match (reported, downloader.expected_size()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let mut transferred: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk = match chunk_result {
                Ok(chunk) => chunk,
                Err(e) => {
                    return Err(match reported {
                        // A connection closed before the announced length is a short body
                        Some(expected) if transferred < expected => DownloadError::SizeMismatch {
                            expected,
                            actual: transferred,
                        },
                        _ => e.into(),
                    });
                }
            };

            let total = transferred + chunk.len() as u64;
            if let Some(limit) = limit {
                if total > limit {
                    return Err(DownloadError::SizeMismatch {
                        expected: limit,
                        actual: total,
                    });
                }
            }

            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::storage(temp_path, e))?;

            transferred = total;
            self.shared.record_transferred(transferred);
        }

        Ok(reported)
    }

    /// Check the synced temporary file before it becomes visible
    async fn verify(&self, temp_path: &Path, reported: Option<u64>) -> Result<(), DownloadError> {
        let actual = tokio::fs::metadata(temp_path)
            .await
            .map_err(|e| DownloadError::storage(temp_path, e))?
            .len();

        if let Some(expected) = reported {
            if expected != actual {
                return Err(DownloadError::SizeMismatch { expected, actual });
            }
        }

        let quiet = self.shared.options.no_warnings;
        check_size(&self.shared.downloader, &self.shared.target, actual, quiet)?;
        check_digest(&self.shared.downloader, temp_path, &self.shared.target, quiet).await
    }

    /// Move the verified file to the destination
    fn publish(&self, temp_path: TempPath) -> Result<(), DownloadError> {
        let target = self.shared.target.as_path();
        let overwrite = self.shared.options.overwrite;

        let result = if overwrite {
            temp_path.persist(target)
        } else {
            temp_path.persist_noclobber(target)
        };

        result.map_err(|e| {
            if !overwrite && e.error.kind() == io::ErrorKind::AlreadyExists {
                DownloadError::AlreadyExists(target.to_path_buf())
            } else {
                DownloadError::storage(target, e.error)
            }
        })
    }
}

/// Create the hidden temporary file in the destination's directory
fn create_temp_file(target: &Path, dir: &Path) -> Result<(File, TempPath), DownloadError> {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());

    let temp = tempfile::Builder::new()
        .prefix(&format!(".{}.", name))
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(|e| DownloadError::storage(dir, e))?;

    let (file, path) = temp.into_parts();
    Ok((File::from_std(file), path))
}

async fn path_exists(path: &Path) -> Result<bool, DownloadError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| DownloadError::storage(path, e))
}
