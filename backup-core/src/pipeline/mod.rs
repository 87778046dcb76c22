//! Compression and encryption transforms over artifact files.
//!
//! The engines and the test harness depend on [`Pipeline`] directly rather
//! than on private helpers, so every transform is independently testable.

pub mod checksum;
pub mod compression;
pub mod encryption;

use crate::config::BackupConfig;
use crate::utils::errors::{BackupError, Result};
use encryption::KEY_SIZE;
use std::path::{Path, PathBuf};

/// Read/write buffer size for every streamed transform
pub const BUFFER_SIZE: usize = 64 * 1024;

#[derive(Clone)]
pub struct Pipeline {
    key: [u8; KEY_SIZE],
    key_id: String,
    level: u32,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("key_id", &self.key_id)
            .field("level", &self.level)
            .finish()
    }
}

impl Pipeline {
    /// `hex_key` must decode to exactly 32 bytes
    pub fn new(hex_key: &str, level: u32) -> Result<Self> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| BackupError::Configuration(format!("encryption key is not hex: {}", e)))?;
        let key: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            BackupError::Configuration(format!(
                "encryption key must be {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self {
            key_id: checksum::key_fingerprint(&key),
            key,
            level: level.min(9),
        })
    }

    pub fn from_config(config: &BackupConfig) -> Result<Self> {
        let key = config.encryption.key.as_deref().ok_or_else(|| {
            BackupError::Configuration("encryption key missing".into())
        })?;
        Self::new(key, config.compression.level)
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub async fn compress(&self, input: &Path, output: &Path) -> Result<u64> {
        compression::compress_file(input, output, self.level).await
    }

    pub async fn decompress(&self, input: &Path, output: &Path) -> Result<u64> {
        compression::decompress_file(input, output).await
    }

    pub async fn encrypt(&self, input: &Path, output: &Path) -> Result<u64> {
        encryption::encrypt_file(&self.key, input, output).await
    }

    pub async fn decrypt(&self, input: &Path, output: &Path) -> Result<u64> {
        encryption::decrypt_file(&self.key, input, output).await
    }

    pub async fn checksum(&self, dir: &Path) -> Result<String> {
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || checksum::checksum_dir(&dir)).await?
    }

    /// raw -> gzip -> encrypted `dest`. The raw file and the gzip
    /// intermediate are removed whether or not the transform succeeds.
    pub async fn seal(&self, raw: &Path, dest: &Path) -> Result<u64> {
        let gz = with_suffix(raw, ".gz");
        let result = match self.compress(raw, &gz).await {
            Ok(_) => self.encrypt(&gz, dest).await,
            Err(e) => Err(e),
        };

        remove_quietly(raw).await;
        remove_quietly(&gz).await;
        if result.is_err() {
            remove_quietly(dest).await;
        }
        result
    }

    /// encrypted `artifact` -> gunzipped file inside `staging`
    pub async fn open(&self, artifact: &Path, staging: &Path) -> Result<PathBuf> {
        let name = artifact
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.trim_end_matches(".enc").trim_end_matches(".gz").to_string())
            .ok_or_else(|| BackupError::Archive(format!("bad artifact path {}", artifact.display())))?;
        let gz = staging.join(format!("{}.gz", name));
        let plain = staging.join(name);

        self.decrypt(artifact, &gz).await?;
        let result = self.decompress(&gz, &plain).await;
        remove_quietly(&gz).await;
        result?;
        Ok(plain)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), "Failed to remove intermediate: {}", e);
        }
    }
}
