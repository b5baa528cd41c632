//! Download descriptions
//!
//! A [`Downloader`] describes a remote file and what it is expected to look
//! like once fetched. It performs no I/O itself; every call to
//! [`Downloader::download`] produces a fresh [`DownloadContext`] that owns a
//! single transfer attempt.

use crate::client::default_client;
use crate::engine::DownloadContext;
use crate::error::DownloadError;
use crate::hash::normalize_digest;
use mchex_types::{ArtifactDownload, HashAlgorithm};
use reqwest::Client;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Per-download flags chosen by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Replace the destination if it already exists
    pub overwrite: bool,
    /// Mute warnings about missing size or digest expectations
    pub no_warnings: bool,
}

impl DownloadOptions {
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn no_warnings(mut self, no_warnings: bool) -> Self {
        self.no_warnings = no_warnings;
        self
    }
}

#[derive(Debug)]
struct Source {
    url: Url,
    expected_size: Option<u64>,
    expected_digest: Option<String>,
    algorithm: HashAlgorithm,
    client: Client,
}

/// Immutable description of a remote file and its expected integrity data
///
/// Cloning is cheap and every clone refers to the same description.
#[derive(Debug, Clone)]
pub struct Downloader {
    inner: Arc<Source>,
}

impl Downloader {
    /// Create a downloader with no size or digest expectations
    pub fn new(url: &str) -> Result<Self, DownloadError> {
        Self::builder(url).build()
    }

    pub fn builder(url: impl Into<String>) -> DownloaderBuilder {
        DownloaderBuilder {
            url: url.into(),
            expected_size: None,
            expected_digest: None,
            algorithm: HashAlgorithm::default(),
            client: None,
        }
    }

    pub fn source(&self) -> &str {
        self.inner.url.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn expected_size(&self) -> Option<u64> {
        self.inner.expected_size
    }

    /// Expected digest as lowercase hex
    pub fn expected_digest(&self) -> Option<&str> {
        self.inner.expected_digest.as_deref()
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.inner.algorithm
    }

    pub(crate) fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Prepare a download of this file to `path`
    ///
    /// Nothing happens until the returned context is started or awaited.
    pub fn download(&self, path: impl Into<PathBuf>, options: DownloadOptions) -> DownloadContext {
        DownloadContext::new(self.clone(), path.into(), options)
    }
}

/// Builder for [`Downloader`]
#[derive(Debug)]
pub struct DownloaderBuilder {
    url: String,
    expected_size: Option<u64>,
    expected_digest: Option<String>,
    algorithm: HashAlgorithm,
    client: Option<Client>,
}

impl DownloaderBuilder {
    pub fn expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    /// Expect the downloaded file to hash to `digest` (hex) under `algorithm`
    pub fn digest(mut self, algorithm: HashAlgorithm, digest: impl Into<String>) -> Self {
        self.algorithm = algorithm;
        self.expected_digest = Some(digest.into());
        self
    }

    /// Expect a raw (binary) digest instead of hex text
    pub fn digest_bytes(self, algorithm: HashAlgorithm, digest: &[u8]) -> Self {
        self.digest(algorithm, hex::encode(digest))
    }

    /// Algorithm used by [`DownloadContext::digest`] when no digest is expected
    pub fn algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Validate the URL and digest and freeze the description
    ///
    /// # Errors
    /// Returns [`DownloadError::InvalidUrl`] for unparsable or non-HTTP URLs and
    /// [`DownloadError::InvalidDigest`] when the digest does not fit the algorithm
    pub fn build(self) -> Result<Downloader, DownloadError> {
        let url = Url::parse(&self.url).map_err(|_| DownloadError::InvalidUrl(self.url.clone()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DownloadError::InvalidUrl(self.url));
        }

        let expected_digest = self
            .expected_digest
            .map(|digest| normalize_digest(self.algorithm, &digest))
            .transpose()?;

        Ok(Downloader {
            inner: Arc::new(Source {
                url,
                expected_size: self.expected_size,
                expected_digest,
                algorithm: self.algorithm,
                client: self.client.unwrap_or_else(default_client),
            }),
        })
    }
}

/// A downloader that knows its own filename and location below a base directory
///
/// Downloading `client.jar` with a relative path of `versions/1.16.4` into
/// `/srv/game` writes `/srv/game/versions/1.16.4/client.jar`.
#[derive(Debug, Clone)]
pub struct NamedDownloader {
    downloader: Downloader,
    filename: String,
    relative_path: PathBuf,
}

impl NamedDownloader {
    pub fn new(downloader: Downloader, filename: impl Into<String>) -> Self {
        Self {
            downloader,
            filename: filename.into(),
            relative_path: PathBuf::from("."),
        }
    }

    pub fn with_relative_path(mut self, relative_path: impl Into<PathBuf>) -> Self {
        self.relative_path = relative_path.into();
        self
    }

    /// Build a SHA-1 verified downloader from a manifest entry
    pub fn from_artifact(
        artifact: &ArtifactDownload,
        filename: impl Into<String>,
        client: Option<Client>,
    ) -> Result<Self, DownloadError> {
        let mut builder = Downloader::builder(artifact.url.as_str())
            .expected_size(artifact.size)
            .digest(HashAlgorithm::Sha1, artifact.sha1.as_str());
        if let Some(client) = client {
            builder = builder.client(client);
        }

        Ok(Self::new(builder.build()?, filename))
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn relative_path(&self) -> &Path {
        &self.relative_path
    }

    /// Absolute destination of this file below `base_dir`
    pub fn target_path(&self, base_dir: impl AsRef<Path>) -> PathBuf {
        resolve_path(
            &base_dir
                .as_ref()
                .join(&self.relative_path)
                .join(&self.filename),
        )
    }

    pub fn download(&self, base_dir: impl AsRef<Path>, options: DownloadOptions) -> DownloadContext {
        self.downloader.download(self.target_path(base_dir), options)
    }
}

/// Resolve a path that may not exist yet to an absolute, normalized form
///
/// `.` and `..` are folded lexically and symlinks are resolved on the
/// deepest ancestor that exists.
pub fn resolve_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    let mut existing = normalized.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(canonical) = std::fs::canonicalize(existing) {
            let mut resolved = canonical;
            for name in missing.iter().rev() {
                resolved.push(name);
            }
            return resolved;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return normalized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_validates_url() {
        assert!(matches!(
            Downloader::new("some badly formed url"),
            Err(DownloadError::InvalidUrl(_))
        ));
        assert!(matches!(
            Downloader::new("ftp://example.com/file"),
            Err(DownloadError::InvalidUrl(_))
        ));
        assert!(Downloader::new("https://example.com/file").is_ok());
    }

    #[test]
    fn test_builder_normalizes_digest() {
        let downloader = Downloader::builder("https://example.com/server.jar")
            .expected_size(29)
            .digest(HashAlgorithm::Sha1, "35139DEEDBD5182953CF1CAA23835DA59CA3D7CD")
            .build()
            .unwrap();

        assert_eq!(downloader.expected_size(), Some(29));
        assert_eq!(downloader.algorithm(), HashAlgorithm::Sha1);
        assert_eq!(
            downloader.expected_digest(),
            Some("35139deedbd5182953cf1caa23835da59ca3d7cd")
        );
    }

    #[test]
    fn test_builder_accepts_raw_digest() {
        let raw = [0x90, 0x01, 0x50, 0x98, 0x3c, 0xd2, 0x4f, 0xb0, 0xd6, 0x96, 0x3f, 0x7d, 0x28, 0xe1, 0x7f, 0x72];
        let downloader = Downloader::builder("https://example.com/abc")
            .digest_bytes(HashAlgorithm::Md5, &raw)
            .build()
            .unwrap();
        assert_eq!(
            downloader.expected_digest(),
            Some("900150983cd24fb0d6963f7d28e17f72")
        );

        // A SHA-1 digest is 20 bytes, not 16
        assert!(Downloader::builder("https://example.com/abc")
            .digest_bytes(HashAlgorithm::Sha1, &raw)
            .build()
            .is_err());
    }

    #[test]
    fn test_builder_rejects_mismatched_digest() {
        // 32 hex chars is an MD5 digest, not SHA-256
        let result = Downloader::builder("https://example.com/a")
            .digest(HashAlgorithm::Sha256, "900150983cd24fb0d6963f7d28e17f72")
            .build();
        assert!(matches!(result, Err(DownloadError::InvalidDigest { .. })));
    }

    #[test]
    fn test_download_is_pure() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("file.bin");
        let downloader = Downloader::new("https://example.com/file.bin").unwrap();

        let context = downloader.download(&target, DownloadOptions::default());

        assert_eq!(context.target(), target.as_path());
        assert!(!context.is_running());
        assert!(!dir.path().join("nested").exists());
    }

    #[test]
    fn test_named_downloader_resolves_target() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let named = NamedDownloader::new(
            Downloader::new("https://example.com/fileA").unwrap(),
            "fileA",
        )
        .with_relative_path("test/./files/../files");

        assert_eq!(
            named.target_path(&base),
            base.join("test").join("files").join("fileA")
        );

        let context = named.download(&base, DownloadOptions::default().overwrite(true));
        assert_eq!(context.target(), base.join("test/files/fileA").as_path());
        assert!(context.options().overwrite);
    }

    #[test]
    fn test_named_downloader_from_artifact() {
        let artifact = ArtifactDownload {
            url: "https://launcher.mojang.com/server.jar".to_string(),
            size: 36175593,
            sha1: "35139deedbd5182953cf1caa23835da59ca3d7cd".to_string(),
        };

        let named = NamedDownloader::from_artifact(&artifact, "server.jar", None).unwrap();
        assert_eq!(named.filename(), "server.jar");
        assert_eq!(named.relative_path(), Path::new("."));
        assert_eq!(named.downloader().expected_size(), Some(36175593));
        assert_eq!(named.downloader().algorithm(), HashAlgorithm::Sha1);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_path_follows_symlinked_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let resolved = resolve_path(&link.join("missing").join("file"));
        assert_eq!(
            resolved,
            real.canonicalize().unwrap().join("missing").join("file")
        );
    }
}
