//! Version history, tagging, comparison, rollback and retention.

pub mod diff;
pub mod retention;

use crate::engine::layout::{self, StagingDir};
use crate::engine::{BackupEngine, PruneReport};
use crate::locks::backup_key;
use crate::models::{
    BackupCategory, BackupMetadata, BackupVersion, RestoreResult, VersionComparison,
    VersionDifferences, VersionFilter, VersionTag, CONFIG_ARTIFACT, DATABASE_ARTIFACT,
    FILES_ARTIFACT,
};
use crate::restore::{RestoreEngine, FULL_ORDER};
use crate::service::ServiceContext;
use crate::store::ConfigSnapshot;
use crate::tools::archive;
use crate::utils::errors::{BackupError, Result};
use chrono::{DateTime, Utc};
use retention::Verdict;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOptions {
    #[serde(default)]
    pub skip_files: bool,
    #[serde(default)]
    pub skip_config: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    /// Backup of the state that was current before the rollback
    pub safety_backup: BackupMetadata,
    pub restore: RestoreResult,
}

#[derive(Clone)]
pub struct VersionManager {
    ctx: Arc<ServiceContext>,
    engine: BackupEngine,
    restore: RestoreEngine,
}

/// Attach version numbers. Legacy sidecars without a sequence get their
/// rank by age among the backups passed in.
fn project(backups: Vec<BackupMetadata>) -> Vec<BackupVersion> {
    let total = backups.len() as u64;
    backups
        .into_iter()
        .enumerate()
        .map(|(i, backup)| {
            let version = if backup.sequence > 0 {
                backup.sequence
            } else {
                total - i as u64
            };
            let tag = VersionTag::infer(&backup.tags);
            BackupVersion { backup, version, tag }
        })
        .collect()
}

impl VersionManager {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self {
            engine: BackupEngine::new(ctx.clone()),
            restore: RestoreEngine::new(ctx.clone()),
            ctx,
        }
    }

    /// Every version newest first, narrowed by category and tag
    pub async fn list_versions(&self, filter: &VersionFilter) -> Result<Vec<BackupVersion>> {
        let backups = self.engine.list_backups(filter.category).await?;
        let mut versions = project(backups);
        if let Some(tag) = filter.tag {
            versions.retain(|v| v.backup.has_tag(tag));
        }
        Ok(versions)
    }

    pub async fn get_version(&self, id: &str) -> Result<BackupVersion> {
        self.list_versions(&VersionFilter::default())
            .await?
            .into_iter()
            .find(|v| v.id() == id)
            .ok_or_else(|| BackupError::NotFound(id.to_string()))
    }

    pub async fn version_history(&self, limit: usize) -> Result<Vec<BackupVersion>> {
        let mut versions = self.list_versions(&VersionFilter::default()).await?;
        versions.truncate(limit);
        Ok(versions)
    }

    /// Add `tag` to the backup's sidecar. Tagging twice is a no-op.
    pub async fn tag_version(&self, id: &str, tag: VersionTag) -> Result<BackupVersion> {
        let backup = self.engine.get_backup(id).await?;
        {
            let _lease = self.ctx.locks.acquire(&backup_key(id)).await;
            let mut meta = layout::read_metadata(&backup.path).await?;
            meta.path = backup.path.clone();
            if !meta.has_tag(tag) {
                meta.tags.push(tag);
                layout::write_metadata(&meta).await?;
                tracing::info!(backup_id = %id, %tag, "Version tagged");
            }
        }
        self.get_version(id).await
    }

    /// Diff two backups category by category. Only categories both
    /// backups carry are compared.
    pub async fn compare_versions(&self, id1: &str, id2: &str) -> Result<VersionComparison> {
        let version1 = self.get_version(id1).await?;
        let version2 = self.get_version(id2).await?;
        tracing::info!(v1 = %id1, v2 = %id2, "Comparing versions");

        let staging = StagingDir::create(&self.ctx.config.storage.temp_path, "compare").await?;
        let (left, right) = (staging.path().join("v1"), staging.path().join("v2"));
        tokio::fs::create_dir_all(&left).await?;
        tokio::fs::create_dir_all(&right).await?;

        let (a, b) = (&version1.backup, &version2.backup);
        let both = |c| a.category.covers(c) && b.category.covers(c);
        let control = self.ctx.control();
        let pipeline = &self.ctx.pipeline;
        let mut differences = VersionDifferences::default();

        if both(BackupCategory::Database) {
            let old = pipeline.open(&a.path.join(DATABASE_ARTIFACT), &left).await?;
            let new = pipeline.open(&b.path.join(DATABASE_ARTIFACT), &right).await?;
            differences.database = diff::diff_database(
                &self.ctx.database.describe(&old, &control).await?,
                &self.ctx.database.describe(&new, &control).await?,
            );
        }
        if both(BackupCategory::Files) {
            let old = pipeline.open(&a.path.join(FILES_ARTIFACT), &left).await?;
            let new = pipeline.open(&b.path.join(FILES_ARTIFACT), &right).await?;
            differences.files = diff::diff_files(
                &archive::list(&old, &control).await?,
                &archive::list(&new, &control).await?,
            );
        }
        if both(BackupCategory::Config) {
            let old = self.snapshot(a, &left).await?;
            let new = self.snapshot(b, &right).await?;
            differences.config = diff::diff_config(&old, &new);
        }

        let similarity = differences.similarity();
        tracing::info!(v1 = %id1, v2 = %id2, changes = differences.total_changes(), similarity, "Versions compared");
        Ok(VersionComparison {
            version1,
            version2,
            differences,
            similarity,
        })
    }

    async fn snapshot(&self, backup: &BackupMetadata, staging: &Path) -> Result<ConfigSnapshot> {
        let json = self
            .ctx
            .pipeline
            .open(&backup.path.join(CONFIG_ARTIFACT), staging)
            .await?;
        Ok(serde_json::from_slice(&tokio::fs::read(json).await?)?)
    }

    /// Back up the current state (tagged ROLLBACK), then restore `id`.
    /// No restore is attempted if the safety backup fails.
    pub async fn rollback_to_version(&self, id: &str, options: RollbackOptions) -> Result<RollbackOutcome> {
        let target = self.engine.get_backup(id).await?;
        if !target.category.covers(BackupCategory::Full) {
            return Err(BackupError::Configuration(format!(
                "rollback needs a FULL backup, {} is {}",
                id, target.category
            )));
        }
        tracing::info!(backup_id = %id, ?options, "Rolling back to version");

        let safety = self.engine.create_full_backup().await?;
        let safety = self.tag_version(&safety.id, VersionTag::Rollback).await?.backup;

        let categories: Vec<BackupCategory> = FULL_ORDER
            .into_iter()
            .filter(|c| match c {
                BackupCategory::Files => !options.skip_files,
                BackupCategory::Config => !options.skip_config,
                _ => true,
            })
            .collect();
        let restore = self.restore.restore_selected(id, &categories).await;
        if restore.success {
            tracing::info!(backup_id = %id, safety_backup = %safety.id, "Rollback successful");
        } else {
            tracing::error!(backup_id = %id, safety_backup = %safety.id, "Rollback failed; current state saved in safety backup");
        }
        Ok(RollbackOutcome {
            safety_backup: safety,
            restore,
        })
    }

    pub async fn enforce_retention_policy(&self) -> Result<PruneReport> {
        self.enforce_retention_policy_at(Utc::now()).await
    }

    /// Best effort: a backup that cannot be deleted (busy, I/O) is listed
    /// in `errors` and the sweep carries on.
    pub async fn enforce_retention_policy_at(&self, now: DateTime<Utc>) -> Result<PruneReport> {
        let backups = self.engine.list_backups(None).await?;
        let report = self.sweep(backups, now).await;
        tracing::info!(
            deleted = report.deleted.len(),
            kept = report.kept,
            errors = report.errors.len(),
            "Retention policy enforced"
        );
        Ok(report)
    }

    /// Apply the retention rules to `backups` and nothing else
    pub(crate) async fn sweep(&self, backups: Vec<BackupMetadata>, now: DateTime<Utc>) -> PruneReport {
        let rules = &self.ctx.config.retention;
        let mut report = PruneReport::default();

        for backup in backups {
            match retention::decide(&backup, now, rules) {
                Verdict::Keep(reason) => {
                    tracing::debug!(backup_id = %backup.id, ?reason, "Retained");
                    report.kept += 1;
                }
                Verdict::Delete => match self.engine.remove(&backup).await {
                    Ok(()) => {
                        tracing::info!(backup_id = %backup.id, age_days = backup.age_days(now), "Version deleted");
                        report.deleted.push(backup.id);
                    }
                    Err(e) => {
                        tracing::error!(backup_id = %backup.id, "Failed to delete version: {}", e);
                        report.errors.push(format!("Failed to delete {}: {}", backup.id, e));
                    }
                },
            }
        }
        self.ctx.locks.prune();
        report
    }
}
