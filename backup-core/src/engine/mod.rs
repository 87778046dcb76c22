//! Backup engine: produces one verifiable backup unit per invocation.

pub mod layout;

use crate::locks::{backup_key, FileLock, CATALOG};
use crate::models::{
    ArtifactInfo, BackupCategory, BackupMetadata, BackupStatus, BackupTier, CONFIG_ARTIFACT,
    DATABASE_ARTIFACT, FILES_ARTIFACT,
};
use crate::service::ServiceContext;
use crate::tools::archive;
use crate::utils::errors::{BackupError, Result};
use crate::utils::format_size;
use chrono::Utc;
use layout::StagingDir;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of a cleanup or retention sweep
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    pub deleted: Vec<String>,
    pub kept: usize,
    /// `id: reason` for every backup that could not be removed
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct BackupEngine {
    ctx: Arc<ServiceContext>,
}

impl BackupEngine {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    fn base(&self) -> &Path {
        &self.ctx.config.storage.base_path
    }

    /// Database, files and config in one daily backup
    pub async fn create_full_backup(&self) -> Result<BackupMetadata> {
        self.create_backup(BackupCategory::Full, BackupTier::Daily).await
    }

    /// Create a backup of `category` under `tier`. A failure leaves the
    /// directory on disk with a FAILED sidecar.
    pub async fn create_backup(
        &self,
        category: BackupCategory,
        tier: BackupTier,
    ) -> Result<BackupMetadata> {
        if category.artifacts().is_empty() {
            return Err(BackupError::Configuration(format!(
                "{} backups are not supported",
                category
            )));
        }
        let started = Instant::now();
        let (mut meta, _lease) = self.allocate(category, tier).await?;
        tracing::info!(backup_id = %meta.id, %category, %tier, sequence = meta.sequence, "Starting backup");

        match self.write_artifacts(&mut meta).await {
            Ok(()) => {
                tracing::info!(
                    backup_id = %meta.id,
                    size = %format_size(meta.size),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Backup completed"
                );
                Ok(meta)
            }
            Err(e) => {
                tracing::error!(backup_id = %meta.id, "Backup failed: {}", e);
                meta.status = BackupStatus::Failed;
                meta.error = Some(e.to_string());
                meta.completed_at = Some(Utc::now());
                if let Err(write_err) = layout::write_metadata(&meta).await {
                    tracing::warn!(backup_id = %meta.id, "Could not record failure: {}", write_err);
                }
                Err(e)
            }
        }
    }

    /// Reserve id, sequence and directory under the catalog lease and the
    /// catalog file lock, and hand back the backup's own lease before
    /// either is released.
    async fn allocate(
        &self,
        category: BackupCategory,
        tier: BackupTier,
    ) -> Result<(BackupMetadata, crate::locks::Lease)> {
        let _catalog = self.ctx.locks.acquire(CATALOG).await;
        let _catalog_file = FileLock::acquire(&self.base().join(layout::CATALOG_LOCK_FILE)).await?;
        let known_max = layout::scan(self.base())
            .await?
            .iter()
            .map(|m| m.sequence)
            .max()
            .unwrap_or(0);
        let sequence = layout::next_sequence(self.base(), known_max).await?;

        let id = layout::new_backup_id(category);
        let dir = layout::backup_dir(self.base(), tier, &id);
        tokio::fs::create_dir_all(&dir).await?;

        let meta = BackupMetadata::new(
            id,
            category,
            tier,
            dir,
            sequence,
            self.ctx.pipeline.key_id().to_string(),
        );
        layout::write_metadata(&meta).await?;
        let lease = self.ctx.locks.acquire(&backup_key(&meta.id)).await;
        Ok((meta, lease))
    }

    async fn write_artifacts(&self, meta: &mut BackupMetadata) -> Result<()> {
        for name in meta.category.artifacts() {
            let info = match *name {
                DATABASE_ARTIFACT => self.backup_database(&meta.path).await?,
                FILES_ARTIFACT => self.backup_files(&meta.path).await?,
                CONFIG_ARTIFACT => self.backup_config(&meta.path).await?,
                other => return Err(BackupError::Archive(format!("unknown artifact {}", other))),
            };
            tracing::debug!(backup_id = %meta.id, artifact = %info.name, size = info.size, "Artifact sealed");
            meta.artifacts.push(info);
        }

        meta.size = meta.artifacts.iter().map(|a| a.size).sum();
        meta.checksum = self.ctx.pipeline.checksum(&meta.path).await?;
        meta.status = BackupStatus::Completed;
        meta.completed_at = Some(Utc::now());
        layout::write_metadata(meta).await
    }

    async fn staging(&self, label: &str) -> Result<StagingDir> {
        StagingDir::create(&self.ctx.config.storage.temp_path, label).await
    }

    async fn seal_into(&self, raw: &Path, dir: &Path, name: &str) -> Result<ArtifactInfo> {
        let size = self.ctx.pipeline.seal(raw, &dir.join(name)).await?;
        Ok(ArtifactInfo {
            name: name.to_string(),
            size,
        })
    }

    /// Dump the live database and seal it into `dir`
    pub async fn backup_database(&self, dir: &Path) -> Result<ArtifactInfo> {
        let staging = self.staging("dump").await?;
        let raw = staging.path().join("database.sql");
        tracing::info!(tool = self.ctx.database.name(), "Dumping database");
        self.ctx.database.dump(&raw, &self.ctx.control()).await?;
        self.seal_into(&raw, dir, DATABASE_ARTIFACT).await
    }

    /// Archive the media directories and seal the archive into `dir`
    pub async fn backup_files(&self, dir: &Path) -> Result<ArtifactInfo> {
        let staging = self.staging("files").await?;
        let raw = staging.path().join("files.tar");
        let files = &self.ctx.config.files;
        let stats = archive::create(&files.root, &files.include, &raw, &self.ctx.control()).await?;
        tracing::info!(files = stats.files, bytes = stats.bytes, "Media archived");
        self.seal_into(&raw, dir, FILES_ARTIFACT).await
    }

    /// Export users, categories and products and seal the JSON into `dir`
    pub async fn backup_config(&self, dir: &Path) -> Result<ArtifactInfo> {
        let snapshot = self.ctx.store.export_config().await?;
        tracing::info!(
            users = snapshot.users.len(),
            categories = snapshot.categories.len(),
            products = snapshot.products.len(),
            "Configuration exported"
        );
        let staging = self.staging("config").await?;
        let raw = staging.path().join("config.json");
        tokio::fs::write(&raw, serde_json::to_vec_pretty(&snapshot)?).await?;
        self.seal_into(&raw, dir, CONFIG_ARTIFACT).await
    }

    /// All backups newest first, optionally of one category only
    pub async fn list_backups(&self, category: Option<BackupCategory>) -> Result<Vec<BackupMetadata>> {
        let mut backups = layout::scan(self.base()).await?;
        if let Some(category) = category {
            backups.retain(|b| b.category == category);
        }
        Ok(backups)
    }

    pub async fn get_backup(&self, id: &str) -> Result<BackupMetadata> {
        layout::scan(self.base())
            .await?
            .into_iter()
            .find(|b| b.id == id)
            .ok_or_else(|| BackupError::NotFound(id.to_string()))
    }

    /// Delete backups older than their tier directory's threshold.
    /// Manual backups are never removed here.
    pub async fn cleanup_old_backups(&self) -> Result<PruneReport> {
        let now = Utc::now();
        let retention = &self.ctx.config.retention;
        let mut report = PruneReport::default();

        for backup in layout::scan(self.base()).await? {
            let tier = layout::resident_tier(&backup);
            let expired = retention
                .max_age_days(tier)
                .map(|max| backup.older_than(now, max))
                .unwrap_or(false);
            if !expired || backup.status == BackupStatus::InProgress {
                report.kept += 1;
                continue;
            }
            match self.remove(&backup).await {
                Ok(()) => {
                    tracing::info!(backup_id = %backup.id, %tier, age_days = backup.age_days(now), "Old backup removed");
                    report.deleted.push(backup.id);
                }
                Err(e) => {
                    tracing::warn!(backup_id = %backup.id, "Cleanup failed: {}", e);
                    report.errors.push(format!("{}: {}", backup.id, e));
                }
            }
        }
        self.ctx.locks.prune();
        Ok(report)
    }

    /// Operator deletion. Fails with `Busy` while the backup is in use.
    pub async fn delete_backup(&self, id: &str) -> Result<()> {
        let backup = self.get_backup(id).await?;
        self.remove(&backup).await?;
        tracing::info!(backup_id = %id, "Backup deleted");
        Ok(())
    }

    /// Remove the backup directory without waiting on its lease
    pub(crate) async fn remove(&self, backup: &BackupMetadata) -> Result<()> {
        let _lease = self.ctx.locks.try_acquire(&backup_key(&backup.id))?;
        tokio::fs::remove_dir_all(&backup.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::METADATA_FILE;
    use crate::service::test_support::fixture;

    #[tokio::test]
    async fn test_full_backup_layout() {
        let fx = fixture();
        let meta = fx.service.engine.create_full_backup().await.unwrap();

        assert_eq!(meta.status, BackupStatus::Completed);
        assert_eq!(meta.tier, Some(BackupTier::Daily));
        assert!(meta.path.ends_with(format!("daily/{}", meta.id)));
        for name in [DATABASE_ARTIFACT, FILES_ARTIFACT, CONFIG_ARTIFACT, METADATA_FILE] {
            assert!(meta.path.join(name).exists(), "{} missing", name);
        }
        assert_eq!(meta.size, meta.artifacts.iter().map(|a| a.size).sum::<u64>());
        assert_eq!(meta.checksum, fx.service.pipeline().checksum(&meta.path).await.unwrap());

        // No raw or intermediate files survive
        let names: Vec<_> = std::fs::read_dir(&meta.path)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 4);
        let temp = &fx.service.config().storage.temp_path;
        assert_eq!(std::fs::read_dir(temp).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_single_category_backup() {
        let fx = fixture();
        let meta = fx
            .service
            .engine
            .create_backup(BackupCategory::Config, BackupTier::Manual)
            .await
            .unwrap();
        assert!(meta.path.join(CONFIG_ARTIFACT).exists());
        assert!(!meta.path.join(DATABASE_ARTIFACT).exists());
        assert_eq!(meta.backup_type, crate::models::BackupType::Manual);
    }

    #[tokio::test]
    async fn test_logs_category_rejected() {
        let fx = fixture();
        let err = fx
            .service
            .engine
            .create_backup(BackupCategory::Logs, BackupTier::Daily)
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_sequences_increase_and_list_filters() {
        let fx = fixture();
        let engine = &fx.service.engine;
        let a = engine.create_backup(BackupCategory::Config, BackupTier::Daily).await.unwrap();
        let b = engine.create_backup(BackupCategory::Files, BackupTier::Weekly).await.unwrap();
        assert!(b.sequence > a.sequence);

        let all = engine.list_backups(None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, b.id);

        let files = engine.list_backups(Some(BackupCategory::Files)).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, b.id);
    }

    #[tokio::test]
    async fn test_get_and_delete() {
        let fx = fixture();
        let engine = &fx.service.engine;
        let meta = engine.create_backup(BackupCategory::Config, BackupTier::Daily).await.unwrap();
        assert_eq!(engine.get_backup(&meta.id).await.unwrap().id, meta.id);

        engine.delete_backup(&meta.id).await.unwrap();
        assert!(!meta.path.exists());
        assert!(matches!(
            engine.get_backup(&meta.id).await,
            Err(BackupError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_busy_backup() {
        let fx = fixture();
        let engine = &fx.service.engine;
        let meta = engine.create_backup(BackupCategory::Config, BackupTier::Daily).await.unwrap();
        let _held = fx.service.context().locks.acquire(&backup_key(&meta.id)).await;
        assert!(matches!(engine.delete_backup(&meta.id).await, Err(BackupError::Busy(_))));
        assert!(meta.path.exists());
    }

    #[tokio::test]
    async fn test_failed_backup_leaves_failed_sidecar() {
        let fx = fixture();
        let ctx = fx.service.context();
        let unreachable = crate::tools::SqliteTool::new(fx.dir.path().join("missing/dir/shop.db"));
        let svc = crate::BackupService::new(ServiceContext {
            config: ctx.config.clone(),
            pipeline: ctx.pipeline.clone(),
            store: ctx.store.clone(),
            database: Arc::new(unreachable),
            alerts: ctx.alerts.clone(),
            locks: crate::locks::LockRegistry::new(),
            cancel: ctx.cancel.clone(),
        });

        assert!(svc.engine.create_full_backup().await.is_err());
        let listed = svc.engine.list_backups(None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, BackupStatus::Failed);
        assert!(listed[0].error.is_some());
        assert!(listed[0].path.exists());
    }

    #[tokio::test]
    async fn test_cleanup_by_tier_directory() {
        let fx = fixture();
        let engine = &fx.service.engine;
        let base = fx.service.config().storage.base_path.clone();

        for (tier, id, hours) in [
            (BackupTier::Daily, "d-old", 31 * 24),
            (BackupTier::Daily, "d-part", 30 * 24 + 12),
            (BackupTier::Daily, "d-new", 5 * 24),
            (BackupTier::Weekly, "w-mid", 60 * 24),
            (BackupTier::Monthly, "m-old", 400 * 24),
            (BackupTier::Manual, "x-old", 900 * 24),
        ] {
            let dir = layout::backup_dir(&base, tier, id);
            std::fs::create_dir_all(&dir).unwrap();
            let mut meta = BackupMetadata::new(id.into(), BackupCategory::Full, tier, dir, 0, "k".into());
            meta.status = BackupStatus::Completed;
            meta.created_at = Utc::now() - chrono::Duration::hours(hours);
            layout::write_metadata(&meta).await.unwrap();
        }

        let report = engine.cleanup_old_backups().await.unwrap();
        let mut deleted = report.deleted.clone();
        deleted.sort();
        // Half a day past the daily cap counts as past it
        assert_eq!(deleted, vec!["d-old", "d-part", "m-old"]);
        assert_eq!(report.kept, 3);
        assert!(report.errors.is_empty());
    }
}
