//! Streaming digests over the supported hash algorithms

use crate::error::DownloadError;
use mchex_types::HashAlgorithm;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Read buffer size used when hashing files (64KB)
const BUFFER_SIZE: usize = 64 * 1024;

/// Incremental hasher for one of the [`HashAlgorithm`] variants
#[derive(Clone)]
pub enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Hasher::Md5(Md5::new()),
            HashAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Hasher::Md5(_) => HashAlgorithm::Md5,
            Hasher::Sha1(_) => HashAlgorithm::Sha1,
            Hasher::Sha256(_) => HashAlgorithm::Sha256,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    /// Consume the hasher and return the lowercase hex digest
    pub fn finalize_hex(self) -> String {
        match self {
            Hasher::Md5(h) => hex::encode(h.finalize()),
            Hasher::Sha1(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Hash a byte slice in one go
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize_hex()
}

/// Hash a file without loading it into memory
///
/// # Errors
/// Returns the underlying I/O error if the file cannot be opened or read
pub async fn hash_file(algorithm: HashAlgorithm, path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize_hex())
}

/// Normalize an expected digest to lowercase hex and check it fits the algorithm
pub fn normalize_digest(algorithm: HashAlgorithm, digest: &str) -> Result<String, DownloadError> {
    let normalized = digest.trim().to_ascii_lowercase();
    let valid = normalized.len() == algorithm.hex_len()
        && normalized.bytes().all(|b| b.is_ascii_hexdigit());

    if !valid {
        return Err(DownloadError::InvalidDigest {
            algorithm,
            digest: digest.to_string(),
            expected_len: algorithm.hex_len(),
        });
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_known_digests() {
        assert_eq!(
            hash_bytes(HashAlgorithm::Md5, b"abc"),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            hash_bytes(HashAlgorithm::Sha1, b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            hash_bytes(HashAlgorithm::Sha256, b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        for algorithm in HashAlgorithm::ALL {
            let mut hasher = Hasher::new(algorithm);
            hasher.update(b"123123123 what a ");
            hasher.update(b"test 123123");
            assert_eq!(hasher.algorithm(), algorithm);
            assert_eq!(
                hasher.finalize_hex(),
                hash_bytes(algorithm, b"123123123 what a test 123123")
            );
        }
    }

    #[tokio::test]
    async fn test_hash_file_spans_buffers() {
        let data = vec![7u8; BUFFER_SIZE * 2 + 13];
        let mut temp = tempfile::NamedTempFile::new().unwrap();
        temp.write_all(&data).unwrap();

        let digest = hash_file(HashAlgorithm::Sha256, temp.path()).await.unwrap();
        assert_eq!(digest, hash_bytes(HashAlgorithm::Sha256, &data));
    }

    #[test]
    fn test_normalize_digest() {
        let upper = "900150983CD24FB0D6963F7D28E17F72";
        assert_eq!(
            normalize_digest(HashAlgorithm::Md5, upper).unwrap(),
            "900150983cd24fb0d6963f7d28e17f72"
        );

        // An MD5 digest cannot describe a SHA-1 expectation
        assert!(matches!(
            normalize_digest(HashAlgorithm::Sha1, upper),
            Err(DownloadError::InvalidDigest { expected_len: 40, .. })
        ));
        assert!(normalize_digest(HashAlgorithm::Md5, "zz0150983cd24fb0d6963f7d28e17f72").is_err());
    }
}
