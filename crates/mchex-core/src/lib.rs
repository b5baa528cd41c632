//! mchex Core - verified HTTP downloads
//!
//! A [`Downloader`] describes a remote file: its URL and, optionally, the size
//! and digest it must have. Calling [`Downloader::download`] yields a
//! [`DownloadContext`] which runs the transfer in the background, exposes its
//! progress, and publishes the file only once it has been verified.
//!
//! ```no_run
//! use mchex_core::{Downloader, DownloadOptions, HashAlgorithm};
//!
//! # async fn run() -> Result<(), mchex_core::DownloadError> {
//! let downloader = Downloader::builder("https://example.com/server.jar")
//!     .expected_size(36175593)
//!     .digest(HashAlgorithm::Sha1, "35139deedbd5182953cf1caa23835da59ca3d7cd")
//!     .build()?;
//!
//! let completed = downloader
//!     .download("server.jar", DownloadOptions::default())
//!     .await?;
//! assert!(completed);
//! # Ok(())
//! # }
//! ```

mod client;
mod downloader;
mod engine;
mod error;
pub mod hash;

pub use client::{build_client, fetch_metadata};
pub use downloader::*;
pub use engine::{verify_file, DownloadContext, DownloadGuard, FileVerification};
pub use error::*;

pub use mchex_types::{
    ArtifactDownload, ClientDownloads, ClientMetadata, DownloadSnapshot, DownloadState,
    EngineSettings, HashAlgorithm, UnknownHashAlgorithm,
};
