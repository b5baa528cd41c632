//! Scoped use of a download context

use crate::engine::context::DownloadContext;
use crate::error::DownloadError;
use std::ops::Deref;

/// Borrow of a running [`DownloadContext`] that cancels it when left early
///
/// Leaving the scope without [`finish`](DownloadGuard::finish) signals
/// cancellation; the background task then discards its partial file. Use
/// [`close`](DownloadGuard::close) to also wait until that has happened.
#[derive(Debug)]
pub struct DownloadGuard<'a> {
    context: &'a DownloadContext,
}

impl DownloadContext {
    /// Start the transfer and return a guard that cancels it on drop
    ///
    /// # Panics
    /// Panics if called outside of a tokio runtime.
    pub fn enter(&self) -> DownloadGuard<'_> {
        self.start();
        DownloadGuard { context: self }
    }
}

impl<'a> DownloadGuard<'a> {
    /// Wait for the transfer to complete and release the guard
    pub async fn finish(self) -> Result<bool, DownloadError> {
        self.context.wait().await
    }

    /// Cancel the transfer if it is still running and wait for cleanup
    pub async fn close(self) {
        if !self.context.is_done() {
            self.context.cancel().await;
        }
    }
}

impl Deref for DownloadGuard<'_> {
    type Target = DownloadContext;

    fn deref(&self) -> &DownloadContext {
        self.context
    }
}

impl Drop for DownloadGuard<'_> {
    fn drop(&mut self) {
        if !self.context.is_done() {
            self.context.request_cancel();
        }
    }
}
