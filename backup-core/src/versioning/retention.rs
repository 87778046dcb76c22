//! Age and tag based retention decisions.

use crate::config::RetentionConfig;
use crate::engine::layout::resident_tier;
use crate::models::{BackupMetadata, BackupStatus, VersionTag};
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep(KeepReason),
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepReason {
    InProgress,
    Tagged(VersionTag),
    WithinTier,
}

/// Decide one backup's fate at `now`.
///
/// Any tag other than BETA keeps a backup forever. Past the monthly cap an
/// untagged (or BETA) backup always goes; below it, the threshold of the
/// tier directory it lives in applies. Manual backups fall under the cap only.
pub fn decide(backup: &BackupMetadata, now: DateTime<Utc>, rules: &RetentionConfig) -> Verdict {
    if backup.status == BackupStatus::InProgress {
        return Verdict::Keep(KeepReason::InProgress);
    }
    if let Some(tag) = VersionTag::infer(&backup.tags).filter(|t| *t != VersionTag::Beta) {
        return Verdict::Keep(KeepReason::Tagged(tag));
    }

    if backup.older_than(now, rules.monthly_days) {
        return Verdict::Delete;
    }
    let threshold = rules
        .max_age_days(resident_tier(backup))
        .unwrap_or(rules.monthly_days);
    if now - backup.created_at < Duration::days(threshold) {
        Verdict::Keep(KeepReason::WithinTier)
    } else {
        Verdict::Delete
    }
}
