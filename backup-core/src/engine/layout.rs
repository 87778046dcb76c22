//! On-disk layout: `{base}/{tier}/{id}/` holding the artifacts and
//! `metadata.json`, plus the `.sequence` counter at the base.

use crate::models::{BackupCategory, BackupMetadata, BackupTier, METADATA_FILE};
use crate::utils::errors::{BackupError, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const SEQUENCE_FILE: &str = ".sequence";
pub const CATALOG_LOCK_FILE: &str = ".catalog.lock";

/// Sibling scratch name for a write-then-rename of `path`
fn scratch_path(path: &Path) -> PathBuf {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}

/// `{category}_{unix_millis}_{8 hex}`
pub fn new_backup_id(category: BackupCategory) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        category.as_str().to_ascii_lowercase(),
        Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}

pub fn tier_dir(base: &Path, tier: BackupTier) -> PathBuf {
    base.join(tier.dir_name())
}

pub fn backup_dir(base: &Path, tier: BackupTier, id: &str) -> PathBuf {
    tier_dir(base, tier).join(id)
}

/// Tier directory the backup physically sits in
pub fn resident_tier(meta: &BackupMetadata) -> BackupTier {
    meta.path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .and_then(|n| n.parse().ok())
        .unwrap_or_else(|| meta.effective_tier())
}

pub async fn read_metadata(dir: &Path) -> Result<BackupMetadata> {
    let raw = tokio::fs::read(dir.join(METADATA_FILE)).await?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Replace the sidecar via write-then-rename so readers never see half a file
pub async fn write_metadata(meta: &BackupMetadata) -> Result<()> {
    let json = serde_json::to_vec_pretty(meta)?;
    let target = meta.path.join(METADATA_FILE);
    let tmp = scratch_path(&target);
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, &target).await?;
    Ok(())
}

/// Every parseable sidecar under every tier, newest first.
/// Unreadable sidecars are logged and skipped.
pub async fn scan(base: &Path) -> Result<Vec<BackupMetadata>> {
    let mut backups = Vec::new();
    for tier in BackupTier::ALL {
        let dir = tier_dir(base, tier);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path();
            if !path.join(METADATA_FILE).exists() {
                continue;
            }
            match read_metadata(&path).await {
                Ok(mut meta) => {
                    // The directory is authoritative if the backup was moved
                    meta.path = path;
                    backups.push(meta);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Skipping unreadable sidecar: {}", e)
                }
            }
        }
    }
    backups.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.sequence.cmp(&a.sequence))
    });
    Ok(backups)
}

/// Next sequence number. Caller must hold the catalog lease and file lock.
pub async fn next_sequence(base: &Path, known_max: u64) -> Result<u64> {
    let path = base.join(SEQUENCE_FILE);
    let stored = match tokio::fs::read_to_string(&path).await {
        Ok(s) => s.trim().parse::<u64>().map_err(|e| {
            BackupError::Configuration(format!("corrupt {}: {}", path.display(), e))
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e.into()),
    };
    let next = stored.max(known_max) + 1;
    tokio::fs::create_dir_all(base).await?;
    let tmp = scratch_path(&path);
    tokio::fs::write(&tmp, next.to_string()).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(next)
}

/// Per-invocation scratch directory under the temp path, removed on drop
pub struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    pub async fn create(temp_root: &Path, label: &str) -> Result<Self> {
        let path = temp_root.join(format!("{}-{}", label, Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), "Failed to remove staging dir: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_backup_id_shape() {
        let id = new_backup_id(BackupCategory::Full);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "full");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 8);
        assert_ne!(id, new_backup_id(BackupCategory::Full));
    }

    #[tokio::test]
    async fn test_sequence_is_monotonic() {
        let base = TempDir::new().unwrap();
        assert_eq!(next_sequence(base.path(), 0).await.unwrap(), 1);
        assert_eq!(next_sequence(base.path(), 0).await.unwrap(), 2);
        // A sidecar with a higher sequence wins over the counter
        assert_eq!(next_sequence(base.path(), 10).await.unwrap(), 11);
        assert_eq!(next_sequence(base.path(), 0).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_scan_orders_newest_first_and_skips_junk() {
        let base = TempDir::new().unwrap();
        for (tier, id, age_days) in [
            (BackupTier::Daily, "a", 3),
            (BackupTier::Weekly, "b", 1),
            (BackupTier::Manual, "c", 2),
        ] {
            let dir = backup_dir(base.path(), tier, id);
            std::fs::create_dir_all(&dir).unwrap();
            let mut meta =
                BackupMetadata::new(id.into(), BackupCategory::Full, tier, dir, 0, "k".into());
            meta.created_at = Utc::now() - chrono::Duration::days(age_days);
            write_metadata(&meta).await.unwrap();
        }
        let junk = base.path().join("daily/broken");
        std::fs::create_dir_all(&junk).unwrap();
        std::fs::write(junk.join(METADATA_FILE), b"{not json").unwrap();
        std::fs::create_dir_all(base.path().join("monthly/no-sidecar")).unwrap();

        let ids: Vec<String> = scan(base.path()).await.unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_staging_removed_on_drop() {
        let temp = TempDir::new().unwrap();
        let staging = StagingDir::create(temp.path(), "restore").await.unwrap();
        let path = staging.path().to_path_buf();
        std::fs::write(path.join("x"), b"1").unwrap();
        drop(staging);
        assert!(!path.exists());
    }
}
