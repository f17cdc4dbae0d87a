//! Content-based hashing for generated artifacts

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// A SHA-256 based content hash of an artifact.
///
/// Promoted artifacts are named after their hash, so regenerating identical
/// content lands on the same path and deduplicates in a node's history.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Compute a hash from bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();
        Self(result.into())
    }

    /// Compute a hash from a string
    pub fn from_str(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }

    /// Get the hash as a hex string
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Compute a hash from a file's contents
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        Ok(Self::from_bytes(&data))
    }

    /// Short prefix of the hex digest used in artifact file names
    pub fn short_hex(&self) -> String {
        self.to_hex()[..16].to_string()
    }

    /// Get the hash as a prefixed hex string (e.g., "sha256:abcdef...")
    pub fn to_prefixed_hex(&self) -> String {
        format!("sha256:{}", self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_artifacts_hash_equal() {
        let h1 = ContentHash::from_bytes(b"\x89PNG fake image");
        let h2 = ContentHash::from_bytes(b"\x89PNG fake image");
        assert_eq!(h1, h2);
        assert_eq!(h1.short_hex(), h2.short_hex());
    }

    #[test]
    fn test_from_file_matches_bytes() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("loom_hash_test_{}.bin", std::process::id()));
        std::fs::write(&path, b"mesh bytes").unwrap();
        let from_file = ContentHash::from_file(&path).unwrap();
        assert_eq!(from_file, ContentHash::from_bytes(b"mesh bytes"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_different_content_different_hash() {
        let h1 = ContentHash::from_str("hello");
        let h2 = ContentHash::from_str("world");
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_short_hex_length() {
        let h = ContentHash::from_str("hello");
        assert_eq!(h.to_hex().len(), 64);
        assert_eq!(h.short_hex().len(), 16);
    }

    #[test]
    fn test_prefixed_hex() {
        let h = ContentHash::from_str("test data");
        let prefixed = h.to_prefixed_hex();
        assert!(prefixed.starts_with("sha256:"));
        assert_eq!(prefixed.len(), 7 + 64);
    }
}
