//! Restore engine: reverses the pipeline and applies artifacts to live state.
//!
//! Every mode decrypts and decompresses into a private staging directory
//! under the temp path, then applies. Categories are applied one after
//! another with no rollback, so a full restore that fails midway reports a
//! `PartialFailure` naming what was already applied.

use crate::engine::layout::{self, StagingDir};
use crate::locks::{backup_key, LIVE_STATE};
use crate::models::{
    BackupCategory, BackupMetadata, BackupStatus, EntityRef, RestoreDetails, RestoreMode,
    RestoreResult, CONFIG_ARTIFACT, DATABASE_ARTIFACT, FILES_ARTIFACT,
};
use crate::service::ServiceContext;
use crate::store::{ConfigSnapshot, Record};
use crate::tools::archive;
use crate::utils::errors::{BackupError, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

pub const FULL_ORDER: [BackupCategory; 3] = [
    BackupCategory::Database,
    BackupCategory::Files,
    BackupCategory::Config,
];

#[derive(Clone)]
pub struct RestoreEngine {
    ctx: Arc<ServiceContext>,
}

impl RestoreEngine {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    /// Dispatch on `mode`. `items` is only read for granular restores.
    pub async fn restore(&self, id: &str, mode: RestoreMode, items: &[EntityRef]) -> RestoreResult {
        match mode {
            RestoreMode::Full => self.restore_full(id).await,
            RestoreMode::DatabaseOnly => self.restore_database_only(id).await,
            RestoreMode::FilesOnly => self.restore_files_only(id).await,
            RestoreMode::ConfigOnly => self.restore_config(id).await,
            RestoreMode::Granular => self.restore_granular(id, items).await,
        }
    }

    /// Database, then files, then config
    pub async fn restore_full(&self, id: &str) -> RestoreResult {
        self.restore_selected(id, &FULL_ORDER).await
    }

    /// Apply a subset of a full backup's categories, in the order given
    pub async fn restore_selected(&self, id: &str, categories: &[BackupCategory]) -> RestoreResult {
        let started = Instant::now();
        let mut details = RestoreDetails::default();
        let outcome = self.apply_full(id, categories, &mut details).await;
        finish(id, RestoreMode::Full, started, details, outcome)
    }

    pub async fn restore_database_only(&self, id: &str) -> RestoreResult {
        self.restore_single(id, RestoreMode::DatabaseOnly, BackupCategory::Database)
            .await
    }

    pub async fn restore_files_only(&self, id: &str) -> RestoreResult {
        self.restore_single(id, RestoreMode::FilesOnly, BackupCategory::Files)
            .await
    }

    pub async fn restore_config(&self, id: &str) -> RestoreResult {
        self.restore_single(id, RestoreMode::ConfigOnly, BackupCategory::Config)
            .await
    }

    /// Upsert only the listed entities from the config snapshot. Nothing
    /// else in the store is read or written.
    pub async fn restore_granular(&self, id: &str, items: &[EntityRef]) -> RestoreResult {
        let started = Instant::now();
        let mut details = RestoreDetails::default();
        let outcome = self.apply_granular(id, items, &mut details).await;
        finish(id, RestoreMode::Granular, started, details, outcome)
    }

    /// Non-mutating dry run: the backup completed, its artifacts are on
    /// disk, and the directory checksum still matches.
    pub async fn test_restore(&self, id: &str) -> bool {
        match self.verify(id).await {
            Ok(()) => {
                tracing::info!(backup_id = %id, "Test restore passed");
                true
            }
            Err(e) => {
                tracing::warn!(backup_id = %id, "Test restore failed: {}", e);
                false
            }
        }
    }

    /// Same checks as [`test_restore`](Self::test_restore) with the reason
    /// for failure kept
    pub async fn verify(&self, id: &str) -> Result<()> {
        let backup = self.find(id).await?;
        if backup.status != BackupStatus::Completed {
            return Err(BackupError::Integrity {
                backup_id: id.to_string(),
                expected: "COMPLETED".into(),
                actual: backup.status.as_str().into(),
            });
        }
        for name in backup.category.artifacts() {
            if !tokio::fs::try_exists(backup.path.join(name)).await? {
                return Err(BackupError::Integrity {
                    backup_id: id.to_string(),
                    expected: name.to_string(),
                    actual: "missing".into(),
                });
            }
        }
        let actual = self.ctx.pipeline.checksum(&backup.path).await?;
        if actual != backup.checksum {
            return Err(BackupError::Integrity {
                backup_id: id.to_string(),
                expected: backup.checksum,
                actual,
            });
        }
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<BackupMetadata> {
        layout::scan(&self.ctx.config.storage.base_path)
            .await?
            .into_iter()
            .find(|b| b.id == id)
            .ok_or_else(|| BackupError::NotFound(id.to_string()))
    }

    /// Look up a restorable backup that carries `category`
    async fn source(&self, id: &str, category: BackupCategory) -> Result<BackupMetadata> {
        let backup = self.find(id).await?;
        if backup.status != BackupStatus::Completed {
            return Err(BackupError::Configuration(format!(
                "backup {} is not completed",
                id
            )));
        }
        if !backup.category.covers(category) {
            return Err(BackupError::Configuration(format!(
                "backup {} ({}) holds no {} artifact",
                id, backup.category, category
            )));
        }
        match backup.key_id.as_deref() {
            Some(key_id) if key_id != self.ctx.pipeline.key_id() => {
                Err(BackupError::Configuration(format!(
                    "backup {} was encrypted with key {}, configured key is {}",
                    id,
                    key_id,
                    self.ctx.pipeline.key_id()
                )))
            }
            _ => Ok(backup),
        }
    }

    async fn staging(&self) -> Result<StagingDir> {
        StagingDir::create(&self.ctx.config.storage.temp_path, "restore").await
    }

    async fn open(&self, backup: &BackupMetadata, artifact: &str, staging: &Path) -> Result<PathBuf> {
        self.ctx
            .pipeline
            .open(&backup.path.join(artifact), staging)
            .await
    }

    async fn restore_single(
        &self,
        id: &str,
        mode: RestoreMode,
        category: BackupCategory,
    ) -> RestoreResult {
        let started = Instant::now();
        let mut details = RestoreDetails::default();
        let outcome = self.apply_single(id, category, &mut details).await;
        finish(id, mode, started, details, outcome)
    }

    async fn apply_single(
        &self,
        id: &str,
        category: BackupCategory,
        details: &mut RestoreDetails,
    ) -> Result<()> {
        let backup = self.source(id, category).await?;
        let _live = self.ctx.locks.acquire(LIVE_STATE).await;
        let _lease = self.ctx.locks.acquire(&backup_key(id)).await;
        let staging = self.staging().await?;
        let applied = self.apply(&backup, category, staging.path()).await;
        mark(details, category, applied.is_ok());
        applied
    }

    async fn apply_full(
        &self,
        id: &str,
        categories: &[BackupCategory],
        details: &mut RestoreDetails,
    ) -> Result<()> {
        let backup = self.source(id, BackupCategory::Full).await?;
        let _live = self.ctx.locks.acquire(LIVE_STATE).await;
        let _lease = self.ctx.locks.acquire(&backup_key(id)).await;
        let staging = self.staging().await?;

        let mut completed = Vec::new();
        for &category in categories {
            match self.apply(&backup, category, staging.path()).await {
                Ok(()) => {
                    mark(details, category, true);
                    completed.push(category);
                }
                Err(e) => {
                    mark(details, category, false);
                    if completed.is_empty() {
                        return Err(e);
                    }
                    return Err(BackupError::PartialFailure {
                        completed,
                        failed: category,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Decrypt, decompress and apply one category's artifact
    async fn apply(
        &self,
        backup: &BackupMetadata,
        category: BackupCategory,
        staging: &Path,
    ) -> Result<()> {
        let control = self.ctx.control();
        match category {
            BackupCategory::Database => {
                let dump = self.open(backup, DATABASE_ARTIFACT, staging).await?;
                self.ctx.database.restore(&dump, &control).await?;
                tracing::info!(backup_id = %backup.id, tool = self.ctx.database.name(), "Database restored");
            }
            BackupCategory::Files => {
                let tar = self.open(backup, FILES_ARTIFACT, staging).await?;
                let count = archive::extract(&tar, &self.ctx.config.files.root, &control).await?;
                tracing::info!(backup_id = %backup.id, files = count, "Files restored");
            }
            BackupCategory::Config => {
                let snapshot = self.load_snapshot(backup, staging).await?;
                let written = self.ctx.store.upsert(snapshot.records()).await?;
                tracing::info!(backup_id = %backup.id, records = written, "Configuration restored");
            }
            other => {
                return Err(BackupError::Configuration(format!(
                    "{} cannot be applied",
                    other
                )))
            }
        }
        Ok(())
    }

    async fn load_snapshot(&self, backup: &BackupMetadata, staging: &Path) -> Result<ConfigSnapshot> {
        let json = self.open(backup, CONFIG_ARTIFACT, staging).await?;
        let raw = tokio::fs::read(&json).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn apply_granular(
        &self,
        id: &str,
        items: &[EntityRef],
        details: &mut RestoreDetails,
    ) -> Result<()> {
        if items.is_empty() {
            return Err(BackupError::Configuration(
                "granular restore needs at least one item".into(),
            ));
        }
        let backup = self.source(id, BackupCategory::Config).await?;
        let _live = self.ctx.locks.acquire(LIVE_STATE).await;
        let _lease = self.ctx.locks.acquire(&backup_key(id)).await;
        let staging = self.staging().await?;
        let snapshot = self.load_snapshot(&backup, staging.path()).await?;

        let mut records: Vec<Record> = Vec::with_capacity(items.len());
        for item in items {
            let record = snapshot.find(*item).ok_or_else(|| {
                BackupError::NotFound(format!("{} in backup {}", item, id))
            })?;
            records.push(record);
        }
        let restored: Vec<String> = records.iter().map(|r| r.entity().to_string()).collect();
        self.ctx.store.upsert(records).await?;
        tracing::info!(backup_id = %id, items = ?restored, "Granular restore applied");
        details.granular = Some(restored);
        Ok(())
    }
}

fn mark(details: &mut RestoreDetails, category: BackupCategory, ok: bool) {
    match category {
        BackupCategory::Database => details.database = Some(ok),
        BackupCategory::Files => details.files = Some(ok),
        BackupCategory::Config => details.config = Some(ok),
        _ => {}
    }
}

fn finish(
    id: &str,
    mode: RestoreMode,
    started: Instant,
    details: RestoreDetails,
    outcome: Result<()>,
) -> RestoreResult {
    let duration_ms = started.elapsed().as_millis() as u64;
    let error = match &outcome {
        Ok(()) => {
            tracing::info!(backup_id = %id, %mode, duration_ms, "Restore completed");
            None
        }
        Err(e) if e.is_critical() => {
            crate::critical!(backup_id = %id, %mode, "Restore failed: {}", e);
            Some(e.to_string())
        }
        Err(e) => {
            tracing::error!(backup_id = %id, %mode, "Restore failed: {}", e);
            Some(e.to_string())
        }
    };
    RestoreResult {
        success: outcome.is_ok(),
        mode,
        backup_id: id.to_string(),
        restored_at: Utc::now(),
        duration_ms,
        details,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackupTier;
    use crate::service::test_support::fixture;
    use crate::store::{ProductRecord, UserRecord};

    fn product(id: i64, name: &str, price: f64) -> Record {
        Record::Product(ProductRecord {
            id,
            name: name.into(),
            slug: format!("p-{}", id),
            price,
            active: true,
            category_id: None,
        })
    }

    #[tokio::test]
    async fn test_restore_config_upserts_without_deleting() {
        let fx = fixture();
        let store = fx.service.store();
        store.upsert(vec![product(1, "Flyer", 10.0)]).await.unwrap();
        let backup = fx
            .service
            .engine
            .create_backup(BackupCategory::Config, BackupTier::Daily)
            .await
            .unwrap();

        store.upsert(vec![product(1, "Changed", 1.0), product(2, "Later", 2.0)]).await.unwrap();
        let result = fx.service.restore.restore_config(&backup.id).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.details.config, Some(true));

        assert_eq!(store.find(EntityRef::product(1)).await.unwrap(), Some(product(1, "Flyer", 10.0)));
        // Rows created after the backup survive
        assert!(store.find(EntityRef::product(2)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_restore_files_only() {
        let fx = fixture();
        let banner = fx.app_root().join("public/uploads/banner.png");
        let backup = fx
            .service
            .engine
            .create_backup(BackupCategory::Files, BackupTier::Daily)
            .await
            .unwrap();

        std::fs::remove_file(&banner).unwrap();
        let result = fx.service.restore.restore_files_only(&backup.id).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(std::fs::read(&banner).unwrap(), b"banner");
    }

    #[tokio::test]
    async fn test_restore_wrong_category_fails() {
        let fx = fixture();
        let backup = fx
            .service
            .engine
            .create_backup(BackupCategory::Files, BackupTier::Daily)
            .await
            .unwrap();
        let result = fx.service.restore.restore_config(&backup.id).await;
        assert!(!result.success);
        assert_eq!(result.details.config, None);
    }

    #[tokio::test]
    async fn test_restore_unknown_backup() {
        let fx = fixture();
        let result = fx
            .service
            .restore
            .restore("nope", RestoreMode::Full, &[])
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_granular_missing_item_touches_nothing() {
        let fx = fixture();
        let store = fx.service.store();
        store.upsert(vec![product(5, "Poster", 5.0)]).await.unwrap();
        let backup = fx
            .service
            .engine
            .create_backup(BackupCategory::Config, BackupTier::Daily)
            .await
            .unwrap();
        store.upsert(vec![product(5, "Edited", 6.0)]).await.unwrap();

        let result = fx
            .service
            .restore
            .restore_granular(&backup.id, &[EntityRef::product(5), EntityRef::product(999)])
            .await;
        assert!(!result.success);
        assert_eq!(
            store.find(EntityRef::product(5)).await.unwrap(),
            Some(product(5, "Edited", 6.0))
        );
    }

    #[tokio::test]
    async fn test_granular_restores_user() {
        let fx = fixture();
        let store = fx.service.store();
        let user = Record::User(UserRecord {
            id: 3,
            email: "ops@example.com".into(),
            name: "Ops".into(),
            role: "ADMIN".into(),
            active: true,
        });
        store.upsert(vec![user.clone()]).await.unwrap();
        let backup = fx
            .service
            .engine
            .create_backup(BackupCategory::Config, BackupTier::Daily)
            .await
            .unwrap();
        store.delete(EntityRef::user(3)).await.unwrap();

        let result = fx.service.restore.restore_granular(&backup.id, &[EntityRef::user(3)]).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.details.granular, Some(vec!["user:3".to_string()]));
        assert_eq!(store.find(EntityRef::user(3)).await.unwrap(), Some(user));
    }

    #[tokio::test]
    async fn test_test_restore_detects_tampering() {
        let fx = fixture();
        let backup = fx.service.engine.create_full_backup().await.unwrap();
        assert!(fx.service.restore.test_restore(&backup.id).await);

        let artifact = backup.path.join(FILES_ARTIFACT);
        let mut bytes = std::fs::read(&artifact).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&artifact, bytes).unwrap();

        assert!(!fx.service.restore.test_restore(&backup.id).await);
        assert!(matches!(
            fx.service.restore.verify(&backup.id).await,
            Err(BackupError::Integrity { .. })
        ));
    }

    #[tokio::test]
    async fn test_test_restore_missing_artifact() {
        let fx = fixture();
        let backup = fx.service.engine.create_full_backup().await.unwrap();
        std::fs::remove_file(backup.path.join(DATABASE_ARTIFACT)).unwrap();
        assert!(!fx.service.restore.test_restore(&backup.id).await);
    }

    #[tokio::test]
    async fn test_restore_refuses_foreign_key() {
        let fx = fixture();
        let backup = fx
            .service
            .engine
            .create_backup(BackupCategory::Config, BackupTier::Daily)
            .await
            .unwrap();
        let mut meta = backup.clone();
        meta.key_id = Some("ffffffffffffffff".into());
        layout::write_metadata(&meta).await.unwrap();

        let result = fx.service.restore.restore_config(&backup.id).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("key"));
    }

    #[tokio::test]
    async fn test_full_restore_reports_partial_failure() {
        let fx = fixture();
        let store = fx.service.store();
        store.upsert(vec![product(5, "Poster", 8.0)]).await.unwrap();
        let backup = fx.service.engine.create_full_backup().await.unwrap();

        store.delete(EntityRef::product(5)).await.unwrap();
        std::fs::write(backup.path.join(FILES_ARTIFACT), b"not an archive").unwrap();

        let result = fx.service.restore.restore_full(&backup.id).await;
        assert!(!result.success);
        assert_eq!(result.details.database, Some(true));
        assert_eq!(result.details.files, Some(false));
        assert_eq!(result.details.config, None);
        let error = result.error.unwrap();
        assert!(error.starts_with("Partial restore: [Database] applied"), "{}", error);

        // The database step stays applied
        assert_eq!(store.find(EntityRef::product(5)).await.unwrap(), Some(product(5, "Poster", 8.0)));
    }
}
