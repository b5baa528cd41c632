//! Download context - drives a single transfer attempt
//!
//! A context is created in the `Idle` state by [`Downloader::download`],
//! moves to `Running` when started and ends in exactly one of `Succeeded`,
//! `Failed` or `Cancelled`. The transfer itself runs as a tokio task; the
//! context only holds the shared counters, the outcome and the handle.

use crate::downloader::{DownloadOptions, Downloader};
use crate::engine::transfer::Transfer;
use crate::engine::verify::{check_digest, check_size};
use crate::error::DownloadError;
use crate::hash::hash_file;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use mchex_types::{DownloadSnapshot, DownloadState};
use parking_lot::Mutex;
use std::future::IntoFuture;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

/// Marker stored in `bytes_expected` while the size is unknown
const UNKNOWN_SIZE: u64 = u64::MAX;

/// State shared between a context and its background task
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) id: Uuid,
    pub(crate) downloader: Downloader,
    pub(crate) target: PathBuf,
    pub(crate) options: DownloadOptions,
    state: watch::Sender<DownloadState>,
    bytes_expected: AtomicU64,
    bytes_transferred: AtomicU64,
    outcome: Mutex<Outcome>,
}

#[derive(Debug, Default)]
struct Outcome {
    failure: Option<DownloadError>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Shared {
    fn state(&self) -> DownloadState {
        *self.state.borrow()
    }

    fn bytes_expected(&self) -> Option<u64> {
        match self.bytes_expected.load(Ordering::Acquire) {
            UNKNOWN_SIZE => None,
            size => Some(size),
        }
    }

    /// Replace the expected size with the one reported by the server
    pub(crate) fn set_bytes_expected(&self, size: u64) {
        self.bytes_expected.store(size, Ordering::Release);
    }

    pub(crate) fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Acquire)
    }

    /// Record the cumulative byte count; never moves backwards
    pub(crate) fn record_transferred(&self, total: u64) {
        self.bytes_transferred.fetch_max(total, Ordering::AcqRel);
    }

    fn begin(&self) {
        self.outcome.lock().started_at = Some(Utc::now());
        self.state.send_replace(DownloadState::Running);
    }

    /// Move to the terminal state matching `result`; a no-op once terminal
    pub(crate) fn finish(&self, result: Result<(), DownloadError>) {
        let mut outcome = self.outcome.lock();
        if self.state().is_terminal() {
            return;
        }

        let next = match result {
            Ok(()) => {
                if self.bytes_expected().is_none() {
                    // Size was discovered by the transfer itself
                    self.set_bytes_expected(self.bytes_transferred());
                }
                info!("Download completed: {:?}", self.target);
                DownloadState::Succeeded
            }
            Err(DownloadError::Cancelled) => {
                debug!("Download cancelled: {:?}", self.target);
                DownloadState::Cancelled
            }
            Err(e) => {
                debug!("Download failed: {:?} - {}", self.target, e);
                outcome.failure = Some(e);
                DownloadState::Failed
            }
        };

        outcome.finished_at = Some(Utc::now());
        self.state.send_replace(next);
    }
}

/// Marks the context as aborted if the task is torn down without an outcome
struct AbortOnDrop(Arc<Shared>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.finish(Err(DownloadError::Aborted));
    }
}

/// Stateful, single-use driver of one download attempt
///
/// Dropping the context cancels a transfer that is still running. To use it
/// as a scoped resource see [`DownloadContext::enter`]; awaiting the context
/// itself starts the transfer and waits for its outcome.
#[derive(Debug)]
pub struct DownloadContext {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
    token: CancellationToken,
}

impl DownloadContext {
    pub(crate) fn new(downloader: Downloader, target: PathBuf, options: DownloadOptions) -> Self {
        let bytes_expected = downloader.expected_size().unwrap_or(UNKNOWN_SIZE);
        let (state, _) = watch::channel(DownloadState::Idle);

        Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                downloader,
                target,
                options,
                state,
                bytes_expected: AtomicU64::new(bytes_expected),
                bytes_transferred: AtomicU64::new(0),
                outcome: Mutex::new(Outcome::default()),
            }),
            task: Mutex::new(None),
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn downloader(&self) -> &Downloader {
        &self.shared.downloader
    }

    pub fn target(&self) -> &Path {
        &self.shared.target
    }

    pub fn options(&self) -> DownloadOptions {
        self.shared.options
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the background transfer
    ///
    /// Returns `true` if this call started it. Later calls, and calls on a
    /// context that was already cancelled, do nothing.
    ///
    /// # Panics
    /// Panics if called outside of a tokio runtime.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.is_some() || self.shared.state() != DownloadState::Idle {
            return false;
        }

        debug!(
            "Starting download {} from {} to {:?}",
            self.shared.id,
            self.shared.downloader.source(),
            self.shared.target
        );
        self.shared.begin();

        let span = tracing::debug_span!("download", id = %self.shared.id);
        let shared = Arc::clone(&self.shared);
        let token = self.token.clone();
        *task = Some(tokio::spawn(
            async move {
                let guard = AbortOnDrop(Arc::clone(&shared));
                let transfer = Transfer::new(Arc::clone(&shared));

                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(DownloadError::Cancelled),
                    result = transfer.run() => result,
                };

                shared.finish(result);
                drop(guard);
            }
            .instrument(span),
        ));

        true
    }

    /// Wait for the transfer to finish, starting it first if needed
    ///
    /// Returns `Ok(true)` on success and `Ok(false)` if the download was
    /// cancelled. Once finished, every call returns the same outcome without
    /// touching the network again.
    ///
    /// # Errors
    /// Returns the recorded failure if the download failed.
    pub async fn wait(&self) -> Result<bool, DownloadError> {
        self.start();

        match self.settled().await {
            DownloadState::Succeeded => Ok(true),
            DownloadState::Cancelled => Ok(false),
            _ => Err(self.failure().unwrap_or(DownloadError::Aborted)),
        }
    }

    /// Abort the transfer and wait for the task to unwind
    ///
    /// The temporary file is gone by the time this returns. A context that
    /// was never started becomes `Cancelled` immediately; a finished one keeps
    /// its outcome.
    pub async fn cancel(&self) {
        {
            let task = self.task.lock();
            if task.is_none() {
                self.shared.finish(Err(DownloadError::Cancelled));
                return;
            }
        }

        self.token.cancel();
        self.settled().await;
    }

    /// Signal cancellation without waiting for the task
    pub(crate) fn request_cancel(&self) {
        self.token.cancel();
    }

    async fn settled(&self) -> DownloadState {
        let mut state = self.shared.state.subscribe();
        let settled = match state.wait_for(|s| s.is_terminal()).await {
            Ok(s) => *s,
            Err(_) => self.shared.state(),
        };
        settled
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub fn state(&self) -> DownloadState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == DownloadState::Running
    }

    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        self.state() == DownloadState::Succeeded
    }

    pub fn failed(&self) -> bool {
        self.state() == DownloadState::Failed
    }

    /// The error that failed the download, if it failed
    pub fn failure(&self) -> Option<DownloadError> {
        self.shared.outcome.lock().failure.clone()
    }

    pub fn bytes_expected(&self) -> Option<u64> {
        self.shared.bytes_expected()
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.shared.bytes_transferred()
    }

    /// Fraction of the file transferred, in `[0, 1]`
    ///
    /// `None` means unknown: the transfer has not started or no size is known
    /// yet. It never stands for 0%.
    pub fn progress(&self) -> Option<f64> {
        if self.state() == DownloadState::Idle {
            return None;
        }

        match self.bytes_expected() {
            Some(0) => Some(1.0),
            Some(total) => Some((self.bytes_transferred() as f64 / total as f64).min(1.0)),
            None => None,
        }
    }

    pub fn snapshot(&self) -> DownloadSnapshot {
        let outcome = self.shared.outcome.lock();
        DownloadSnapshot {
            id: self.shared.id,
            source: self.shared.downloader.source().to_string(),
            target: self.shared.target.clone(),
            state: self.state(),
            bytes_expected: self.bytes_expected(),
            bytes_transferred: self.bytes_transferred(),
            started_at: outcome.started_at,
            finished_at: outcome.finished_at,
            error: outcome.failure.as_ref().map(|e| e.to_string()),
        }
    }

    // ========================================================================
    // Destination file
    // ========================================================================

    /// Check if the destination file exists
    pub fn exists(&self) -> bool {
        self.shared.target.is_file()
    }

    /// Size in bytes of the destination file
    ///
    /// # Errors
    /// Returns [`DownloadError::NotFound`] if the file does not exist.
    pub async fn size(&self) -> Result<u64, DownloadError> {
        let metadata = tokio::fs::metadata(&self.shared.target)
            .await
            .map_err(|e| self.file_error(e))?;
        if !metadata.is_file() {
            return Err(DownloadError::NotFound(self.shared.target.clone()));
        }
        Ok(metadata.len())
    }

    /// Hex digest of the destination file using the downloader's algorithm
    ///
    /// # Errors
    /// Returns [`DownloadError::NotFound`] if the file does not exist.
    pub async fn digest(&self) -> Result<String, DownloadError> {
        if !self.exists() {
            return Err(DownloadError::NotFound(self.shared.target.clone()));
        }
        hash_file(self.shared.downloader.algorithm(), &self.shared.target)
            .await
            .map_err(|e| self.file_error(e))
    }

    /// Check the destination size against the expected size
    ///
    /// A missing file fails the check. Without an expected size the check
    /// passes with a warning unless warnings are muted.
    pub async fn verify_size(&self) -> Result<bool, DownloadError> {
        let actual = match self.size().await {
            Ok(size) => size,
            Err(DownloadError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        match check_size(
            &self.shared.downloader,
            &self.shared.target,
            actual,
            self.shared.options.no_warnings,
        ) {
            Ok(()) => Ok(true),
            Err(DownloadError::SizeMismatch { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Check the destination digest against the expected digest
    ///
    /// A missing file fails the check. Without an expected digest the check
    /// passes with a warning unless warnings are muted.
    pub async fn verify_digest(&self) -> Result<bool, DownloadError> {
        if !self.exists() {
            return Ok(false);
        }

        match check_digest(
            &self.shared.downloader,
            &self.shared.target,
            &self.shared.target,
            self.shared.options.no_warnings,
        )
        .await
        {
            Ok(()) => Ok(true),
            Err(DownloadError::DigestMismatch { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Existence, size and digest checks together
    pub async fn verify(&self) -> Result<bool, DownloadError> {
        Ok(self.exists() && self.verify_size().await? && self.verify_digest().await?)
    }

    fn file_error(&self, error: io::Error) -> DownloadError {
        if error.kind() == io::ErrorKind::NotFound {
            DownloadError::NotFound(self.shared.target.clone())
        } else {
            DownloadError::storage(&self.shared.target, error)
        }
    }
}

impl Drop for DownloadContext {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl IntoFuture for DownloadContext {
    type Output = Result<bool, DownloadError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::Downloader;

    fn context(expected_size: Option<u64>) -> DownloadContext {
        let mut builder = Downloader::builder("http://127.0.0.1:9/file.bin");
        if let Some(size) = expected_size {
            builder = builder.expected_size(size);
        }
        builder
            .build()
            .unwrap()
            .download("/nonexistent/mchex/file.bin", DownloadOptions::default())
    }

    #[test]
    fn test_idle_context_reports_unknown_progress() {
        let context = context(Some(100));
        assert_eq!(context.state(), DownloadState::Idle);
        assert_eq!(context.progress(), None);
        assert_eq!(context.bytes_expected(), Some(100));
        assert_eq!(context.bytes_transferred(), 0);
        assert!(context.failure().is_none());
    }

    #[test]
    fn test_progress_is_clamped_and_monotonic() {
        let context = context(Some(100));
        context.shared.begin();
        assert_eq!(context.progress(), Some(0.0));

        context.shared.record_transferred(40);
        assert_eq!(context.progress(), Some(0.4));

        // A stale, smaller count must not move progress backwards
        context.shared.record_transferred(10);
        assert_eq!(context.bytes_transferred(), 40);

        context.shared.set_bytes_expected(40);
        assert_eq!(context.progress(), Some(1.0));
    }

    #[test]
    fn test_unknown_size_becomes_known_on_success() {
        let context = context(None);
        context.shared.begin();
        context.shared.record_transferred(29);
        assert_eq!(context.progress(), None);

        context.shared.finish(Ok(()));
        assert_eq!(context.bytes_expected(), Some(29));
        assert_eq!(context.progress(), Some(1.0));
    }

    #[test]
    fn test_terminal_state_is_absorbing() {
        let context = context(None);
        context.shared.begin();
        context.shared.finish(Err(DownloadError::SizeMismatch {
            expected: 2,
            actual: 1,
        }));
        context.shared.finish(Ok(()));
        context.shared.finish(Err(DownloadError::Cancelled));

        assert_eq!(context.state(), DownloadState::Failed);
        assert!(matches!(
            context.failure(),
            Some(DownloadError::SizeMismatch { .. })
        ));
        let snapshot = context.snapshot();
        assert!(snapshot.finished_at.is_some());
        assert!(snapshot.error.unwrap().contains("Wrong download size"));
    }

    #[tokio::test]
    async fn test_settled_follows_outcome_from_another_task() {
        let context = context(None);
        context.shared.begin();

        let shared = Arc::clone(&context.shared);
        let finisher = tokio::spawn(async move {
            tokio::task::yield_now().await;
            shared.finish(Ok(()));
        });

        assert_eq!(context.settled().await, DownloadState::Succeeded);
        assert_eq!(context.settled().await, DownloadState::Succeeded);
        finisher.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let context = context(None);
        context.cancel().await;

        assert_eq!(context.state(), DownloadState::Cancelled);
        assert!(!context.start());
        assert!(!context.wait().await.unwrap());
        assert!(context.failure().is_none());
    }

    #[tokio::test]
    async fn test_file_queries_on_missing_destination() {
        let context = context(Some(1));
        assert!(!context.exists());
        assert!(matches!(context.size().await, Err(DownloadError::NotFound(_))));
        assert!(matches!(context.digest().await, Err(DownloadError::NotFound(_))));
        assert!(!context.verify_size().await.unwrap());
        assert!(!context.verify_digest().await.unwrap());
        assert!(!context.verify().await.unwrap());
    }
}
