//! Download engine
//!
//! Each [`DownloadContext`] owns one transfer attempt running on a tokio
//! task. Bytes go to a temporary file beside the destination, are synced and
//! verified, and only then replace (or refuse to replace) the destination.

mod context;
mod guard;
mod transfer;
mod verify;

pub use context::DownloadContext;
pub use guard::DownloadGuard;
pub use verify::{verify_file, FileVerification};
