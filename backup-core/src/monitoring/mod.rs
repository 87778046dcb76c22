//! Health, integrity and storage reporting over the backup catalog.

pub mod alerts;

use crate::config::MonitoringConfig;
use crate::engine::BackupEngine;
use crate::models::{BackupMetadata, BackupStatus};
use crate::restore::RestoreEngine;
use crate::service::ServiceContext;
use crate::tools::run_tool;
use crate::utils::errors::{BackupError, Result};
use crate::utils::format_size;
use alerts::{AlertSeverity, AlertType, BackupAlert};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::fmt::Write;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupHealth {
    pub healthy: bool,
    pub last_backup: Option<DateTime<Utc>>,
    pub total_backups: usize,
    pub storage_used: u64,
    pub storage_available: u64,
    pub failed_backups: usize,
    pub alerts: Vec<BackupAlert>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub storage_used: u64,
    pub storage_available: u64,
}

impl StorageInfo {
    pub fn usage_ratio(&self) -> f64 {
        let total = self.storage_used + self.storage_available;
        if total == 0 {
            0.0
        } else {
            self.storage_used as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntegritySummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
}

/// Used/available bytes from the last line of `df -B1 <path>`
pub fn parse_df(stdout: &str) -> Option<StorageInfo> {
    let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    Some(StorageInfo {
        storage_used: fields.get(2)?.parse().ok()?,
        storage_available: fields.get(3)?.parse().ok()?,
    })
}

/// Health verdict for `backups` (newest first) at `now`
pub fn assess(
    backups: &[BackupMetadata],
    storage: StorageInfo,
    now: DateTime<Utc>,
    config: &MonitoringConfig,
) -> BackupHealth {
    let mut alerts = Vec::new();
    let failed_backups = backups.iter().filter(|b| b.status == BackupStatus::Failed).count();
    let last_backup = backups
        .iter()
        .find(|b| b.status == BackupStatus::Completed)
        .map(|b| b.created_at);

    match last_backup {
        Some(at) if now - at > Duration::hours(config.max_backup_age_hours) => {
            alerts.push(BackupAlert::critical(
                AlertType::NoRecentBackup,
                format!("No backup in the last {} hours", config.max_backup_age_hours),
                json!({ "lastBackup": at, "ageHours": (now - at).num_hours() }),
            ));
        }
        Some(_) => {}
        None => alerts.push(BackupAlert::critical(
            AlertType::NoRecentBackup,
            "No backups found",
            json!({}),
        )),
    }

    if failed_backups > 0 {
        alerts.push(BackupAlert::new(
            AlertType::BackupFailed,
            AlertSeverity::Warning,
            format!("{} backup(s) failed", failed_backups),
            json!({ "failedBackups": failed_backups }),
        ));
    }

    let usage = storage.usage_ratio();
    let severity = if usage > config.storage_critical {
        Some((AlertSeverity::Critical, "Backup storage critically low"))
    } else if usage > config.storage_warning {
        Some((AlertSeverity::Warning, "Backup storage usage high"))
    } else {
        None
    };
    if let Some((severity, label)) = severity {
        alerts.push(BackupAlert::new(
            AlertType::StorageLow,
            severity,
            format!("{}: {:.1}% full", label, usage * 100.0),
            json!({
                "storageUsed": storage.storage_used,
                "storageAvailable": storage.storage_available,
                "storageUsagePercent": usage,
            }),
        ));
    }

    BackupHealth {
        healthy: !alerts.iter().any(|a| a.severity == AlertSeverity::Critical),
        last_backup,
        total_backups: backups.len(),
        storage_used: storage.storage_used,
        storage_available: storage.storage_available,
        failed_backups,
        alerts,
    }
}

#[derive(Clone)]
pub struct Monitor {
    ctx: Arc<ServiceContext>,
    engine: BackupEngine,
    restore: RestoreEngine,
}

impl Monitor {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self {
            engine: BackupEngine::new(ctx.clone()),
            restore: RestoreEngine::new(ctx.clone()),
            ctx,
        }
    }

    /// Evaluate the catalog and storage, dispatching any alerts raised
    pub async fn check_health(&self) -> Result<BackupHealth> {
        let backups = self.engine.list_backups(None).await?;
        let storage = self.storage_info().await;
        let health = assess(&backups, storage, Utc::now(), &self.ctx.config.monitoring);

        if !health.alerts.is_empty() {
            self.ctx.alerts.send(&health.alerts).await?;
        }
        tracing::info!(healthy = health.healthy, alerts = health.alerts.len(), "Health check completed");
        Ok(health)
    }

    /// Dry-run restore check; a failure raises a CRITICAL corruption alert.
    /// An unknown id is `NotFound`, not corruption.
    pub async fn verify_integrity(&self, id: &str) -> Result<bool> {
        match self.restore.verify(id).await {
            Ok(()) => {
                tracing::info!(backup_id = %id, "Integrity verified");
                Ok(true)
            }
            Err(e @ BackupError::NotFound(_)) => Err(e),
            Err(e) => {
                crate::critical!(backup_id = %id, "Integrity check failed: {}", e);
                self.ctx
                    .alerts
                    .send(&[BackupAlert::critical(
                        AlertType::BackupCorruption,
                        format!("Backup integrity check failed: {}", id),
                        json!({ "backupId": id, "reason": e.to_string() }),
                    )])
                    .await?;
                Ok(false)
            }
        }
    }

    pub async fn verify_all(&self) -> Result<IntegritySummary> {
        let backups = self.engine.list_backups(None).await?;
        let mut summary = IntegritySummary {
            total: backups.len(),
            ..Default::default()
        };
        for backup in &backups {
            match self.verify_integrity(&backup.id).await {
                Ok(true) => summary.valid += 1,
                Ok(false) => summary.invalid += 1,
                // Deleted since the listing
                Err(BackupError::NotFound(_)) => summary.total -= 1,
                Err(e) => return Err(e),
            }
        }
        tracing::info!(total = summary.total, valid = summary.valid, invalid = summary.invalid, "All backups verified");
        Ok(summary)
    }

    /// Disk usage of the filesystem holding the backups. Zeros when `df`
    /// is unavailable.
    pub async fn storage_info(&self) -> StorageInfo {
        let base = &self.ctx.config.storage.base_path;
        if let Err(e) = tokio::fs::create_dir_all(base).await {
            tracing::warn!(path = %base.display(), "Cannot create backup base path: {}", e);
        }
        match run_tool("df", [std::ffi::OsStr::new("-B1"), base.as_os_str()], &[], &self.ctx.control()).await {
            Ok(out) => parse_df(&String::from_utf8_lossy(&out.stdout)).unwrap_or_else(|| {
                tracing::warn!("Unparseable df output");
                StorageInfo::default()
            }),
            Err(e) => {
                tracing::error!("Failed to get storage info: {}", e);
                StorageInfo::default()
            }
        }
    }

    /// Markdown summary of the last seven days
    pub async fn weekly_report(&self) -> Result<String> {
        let backups = self.engine.list_backups(None).await?;
        let health = self.check_health().await?;
        Ok(render_weekly_report(&backups, &health, Utc::now()))
    }
}

pub fn render_weekly_report(
    backups: &[BackupMetadata],
    health: &BackupHealth,
    now: DateTime<Utc>,
) -> String {
    let week_ago = now - Duration::days(7);
    let recent: Vec<&BackupMetadata> = backups.iter().filter(|b| b.created_at > week_ago).collect();
    let total_size: u64 = recent.iter().map(|b| b.size).sum();
    let avg_size = if recent.is_empty() { 0 } else { total_size / recent.len() as u64 };
    let usage = StorageInfo {
        storage_used: health.storage_used,
        storage_available: health.storage_available,
    }
    .usage_ratio();

    let mut out = String::new();
    let _ = writeln!(out, "# Backup Weekly Report");
    let _ = writeln!(out, "**Generated:** {}\n", now.to_rfc3339());
    let _ = writeln!(out, "## Summary");
    let _ = writeln!(out, "- **Total Backups:** {}", backups.len());
    let _ = writeln!(out, "- **Backups Last 7 Days:** {}", recent.len());
    let _ = writeln!(
        out,
        "- **System Health:** {}",
        if health.healthy { "Healthy" } else { "Unhealthy" }
    );
    let _ = writeln!(out, "- **Failed Backups:** {}\n", health.failed_backups);

    let _ = writeln!(out, "## Storage");
    let _ = writeln!(out, "- **Used:** {}", format_size(health.storage_used));
    let _ = writeln!(out, "- **Available:** {}", format_size(health.storage_available));
    let _ = writeln!(out, "- **Usage:** {:.1}%\n", usage * 100.0);

    let _ = writeln!(out, "## Recent Backups (Last 7 Days)");
    let _ = writeln!(out, "- **Count:** {}", recent.len());
    let _ = writeln!(out, "- **Total Size:** {}", format_size(total_size));
    let _ = writeln!(out, "- **Average Size:** {}\n", format_size(avg_size));

    let _ = writeln!(out, "## Alerts");
    if health.alerts.is_empty() {
        let _ = writeln!(out, "No alerts");
    }
    for alert in &health.alerts {
        let _ = writeln!(out, "- [{:?}] {}", alert.severity, alert.message);
    }

    let mut recommendations = Vec::new();
    if health.alerts.iter().any(|a| a.severity == AlertSeverity::Critical) {
        recommendations.push("Address critical alerts immediately");
    }
    if usage > 0.8 {
        recommendations.push("Consider expanding backup storage");
    }
    if health.failed_backups > 0 {
        recommendations.push("Investigate failed backups");
    }
    if health.last_backup.map(|at| now - at > Duration::hours(24)).unwrap_or(true) {
        recommendations.push("Schedule backup immediately");
    }
    let _ = writeln!(out, "\n## Recommendations");
    if recommendations.is_empty() {
        let _ = writeln!(out, "None");
    }
    for r in recommendations {
        let _ = writeln!(out, "- {}", r);
    }
    out
}
