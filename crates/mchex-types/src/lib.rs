//! Shared types for mchex
//!
//! This crate contains the plain data structures shared between the
//! download engine and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Download State
// ============================================================================

/// Lifecycle state of a single download attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    Idle,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl DownloadState {
    /// Terminal states are absorbing: no transition leaves them
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadState::Succeeded | DownloadState::Failed | DownloadState::Cancelled
        )
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DownloadState::Idle => "idle",
            DownloadState::Running => "running",
            DownloadState::Succeeded => "succeeded",
            DownloadState::Failed => "failed",
            DownloadState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a download context, suitable for serialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSnapshot {
    pub id: Uuid,
    pub source: String,
    pub target: PathBuf,
    pub state: DownloadState,
    pub bytes_expected: Option<u64>,
    pub bytes_transferred: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl DownloadSnapshot {
    /// Fraction of the transfer completed, `None` while unknown
    pub fn progress(&self) -> Option<f64> {
        if self.state == DownloadState::Idle {
            return None;
        }
        match self.bytes_expected {
            Some(0) => Some(1.0),
            Some(total) => Some((self.bytes_transferred as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

// ============================================================================
// Digests
// ============================================================================

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 3] = [HashAlgorithm::Md5, HashAlgorithm::Sha1, HashAlgorithm::Sha256];

    /// Digest length in bytes
    pub fn output_len(self) -> usize {
        match self {
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
        }
    }

    /// Length of the lowercase hex encoding of a digest
    pub fn hex_len(self) -> usize {
        self.output_len() * 2
    }

    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown algorithm name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownHashAlgorithm(pub String);

impl fmt::Display for UnknownHashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown hash algorithm '{}' (expected md5, sha1 or sha256)", self.0)
    }
}

impl std::error::Error for UnknownHashAlgorithm {}

impl FromStr for HashAlgorithm {
    type Err = UnknownHashAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            _ => Err(UnknownHashAlgorithm(s.to_string())),
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// HTTP client settings for the download engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    /// Upper bound on a single read from the response body, `None` disables it
    pub read_timeout_secs: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            user_agent: format!("mchex/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout_secs: 30,
            read_timeout_secs: Some(120),
        }
    }
}

// ============================================================================
// Manifest Types
// ============================================================================

/// One downloadable file listed in a client metadata document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDownload {
    pub url: String,
    pub size: u64,
    pub sha1: String,
}

/// The `downloads` object of a client metadata document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDownloads {
    pub client: ArtifactDownload,
    #[serde(default)]
    pub server: Option<ArtifactDownload>,
}

/// Subset of a client metadata document needed to fetch its jars
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub id: String,
    pub downloads: ClientDownloads,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!DownloadState::Idle.is_terminal());
        assert!(!DownloadState::Running.is_terminal());
        assert!(DownloadState::Succeeded.is_terminal());
        assert!(DownloadState::Failed.is_terminal());
        assert!(DownloadState::Cancelled.is_terminal());
    }

    #[test]
    fn test_hash_algorithm_parsing() {
        assert_eq!("MD5".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Md5);
        assert_eq!("sha-1".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha1);
        assert_eq!("sha256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert!("crc32".parse::<HashAlgorithm>().is_err());
        assert_eq!(HashAlgorithm::default(), HashAlgorithm::Md5);
        assert_eq!(HashAlgorithm::Sha1.hex_len(), 40);
    }

    #[test]
    fn test_snapshot_progress() {
        let mut snapshot = DownloadSnapshot {
            id: Uuid::nil(),
            source: "http://example.invalid/a".to_string(),
            target: PathBuf::from("/tmp/a"),
            state: DownloadState::Idle,
            bytes_expected: Some(200),
            bytes_transferred: 0,
            started_at: None,
            finished_at: None,
            error: None,
        };
        assert_eq!(snapshot.progress(), None);

        snapshot.state = DownloadState::Running;
        snapshot.bytes_transferred = 50;
        assert_eq!(snapshot.progress(), Some(0.25));

        snapshot.bytes_expected = None;
        assert_eq!(snapshot.progress(), None);
    }

    #[test]
    fn test_client_metadata_deserialization() {
        let json = r#"{
            "id": "1.16.4",
            "mainClass": "net.minecraft.client.main.Main",
            "downloads": {
                "client": {"sha1": "1952d94a0784e7abda230aae6a1e8fc0522dba99", "size": 17547153, "url": "https://launcher.mojang.com/client.jar"},
                "server": {"sha1": "35139deedbd5182953cf1caa23835da59ca3d7cd", "size": 36175593, "url": "https://launcher.mojang.com/server.jar"}
            }
        }"#;
        let metadata: ClientMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.id, "1.16.4");
        assert_eq!(metadata.downloads.client.size, 17547153);
        assert_eq!(
            metadata.downloads.server.as_ref().map(|s| s.sha1.as_str()),
            Some("35139deedbd5182953cf1caa23835da59ca3d7cd")
        );
    }

    #[test]
    fn test_engine_settings_defaults_fill_missing_fields() {
        let settings: EngineSettings = serde_json::from_str(r#"{"user_agent": "test"}"#).unwrap();
        assert_eq!(settings.user_agent, "test");
        assert_eq!(settings.connect_timeout_secs, 30);
        assert_eq!(settings.read_timeout_secs, Some(120));
    }
}
