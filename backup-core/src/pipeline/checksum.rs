//! Whole-directory SHA-256 digest.

use crate::models::METADATA_FILE;
use crate::utils::errors::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

/// Hash every regular file in `dir` (not recursive), sorted by file name.
/// The metadata sidecar is skipped since it stores the result.
pub fn checksum_dir(dir: &Path) -> Result<String> {
    let mut names: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.file_name())
        .filter(|name| name != METADATA_FILE)
        .collect();
    names.sort();

    let mut hasher = Sha256::new();
    for name in names {
        let mut reader = BufReader::with_capacity(super::BUFFER_SIZE, File::open(dir.join(&name))?);
        io::copy(&mut reader, &mut hasher)?;
    }
    Ok(hex::encode(hasher.finalize()))
}

/// First 16 hex chars of SHA-256(key); identifies the key without revealing it
pub fn key_fingerprint(key: &[u8]) -> String {
    let digest = Sha256::digest(key);
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("database.sql.gz.enc"), b"db-bytes").unwrap();
        std::fs::write(dir.path().join("files.tar.gz.enc"), b"file-bytes").unwrap();
        std::fs::write(dir.path().join("config.json.gz.enc"), b"config-bytes").unwrap();
        dir
    }

    #[test]
    fn test_deterministic() {
        let dir = fixture();
        let a = checksum_dir(dir.path()).unwrap();
        let b = checksum_dir(dir.path()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_ignores_sidecar() {
        let dir = fixture();
        let before = checksum_dir(dir.path()).unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), b"{\"checksum\":\"x\"}").unwrap();
        assert_eq!(before, checksum_dir(dir.path()).unwrap());
    }

    #[test]
    fn test_single_byte_change_detected() {
        let dir = fixture();
        let before = checksum_dir(dir.path()).unwrap();
        std::fs::write(dir.path().join("files.tar.gz.enc"), b"file-bytez").unwrap();
        assert_ne!(before, checksum_dir(dir.path()).unwrap());
    }

    #[test]
    fn test_independent_of_creation_order() {
        let a = TempDir::new().unwrap();
        std::fs::write(a.path().join("x"), b"1").unwrap();
        std::fs::write(a.path().join("y"), b"2").unwrap();
        let b = TempDir::new().unwrap();
        std::fs::write(b.path().join("y"), b"2").unwrap();
        std::fs::write(b.path().join("x"), b"1").unwrap();
        assert_eq!(checksum_dir(a.path()).unwrap(), checksum_dir(b.path()).unwrap());
    }

    #[test]
    fn test_key_fingerprint() {
        let fp = key_fingerprint(&[0u8; 32]);
        assert_eq!(fp.len(), 16);
        assert_ne!(fp, key_fingerprint(&[1u8; 32]));
    }
}
