use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::version::VersionTag;

/// Sidecar file name inside every backup directory
pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupType {
    Full,
    Incremental,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupCategory {
    Database,
    Files,
    Config,
    Logs,
    Full,
}

impl BackupCategory {
    /// Artifact file names this category must contain
    pub fn artifacts(self) -> &'static [&'static str] {
        match self {
            BackupCategory::Database => &[DATABASE_ARTIFACT],
            BackupCategory::Files => &[FILES_ARTIFACT],
            BackupCategory::Config => &[CONFIG_ARTIFACT],
            BackupCategory::Full => &[DATABASE_ARTIFACT, FILES_ARTIFACT, CONFIG_ARTIFACT],
            BackupCategory::Logs => &[],
        }
    }

    /// Whether a backup of this category carries `other`'s artifact
    pub fn covers(self, other: BackupCategory) -> bool {
        self == other || (self == BackupCategory::Full && other != BackupCategory::Logs)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackupCategory::Database => "DATABASE",
            BackupCategory::Files => "FILES",
            BackupCategory::Config => "CONFIG",
            BackupCategory::Logs => "LOGS",
            BackupCategory::Full => "FULL",
        }
    }
}

impl fmt::Display for BackupCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DATABASE" => Ok(BackupCategory::Database),
            "FILES" => Ok(BackupCategory::Files),
            "CONFIG" => Ok(BackupCategory::Config),
            "LOGS" => Ok(BackupCategory::Logs),
            "FULL" => Ok(BackupCategory::Full),
            other => Err(format!("unknown backup category '{}'", other)),
        }
    }
}

pub const DATABASE_ARTIFACT: &str = "database.sql.gz.enc";
pub const FILES_ARTIFACT: &str = "files.tar.gz.enc";
pub const CONFIG_ARTIFACT: &str = "config.json.gz.enc";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupStatus {
    InProgress,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupStatus::InProgress => "IN_PROGRESS",
            BackupStatus::Completed => "COMPLETED",
            BackupStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retention bucket; also the directory name under the base path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupTier {
    Daily,
    Weekly,
    Monthly,
    Manual,
}

impl BackupTier {
    pub const ALL: [BackupTier; 4] = [
        BackupTier::Daily,
        BackupTier::Weekly,
        BackupTier::Monthly,
        BackupTier::Manual,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            BackupTier::Daily => "daily",
            BackupTier::Weekly => "weekly",
            BackupTier::Monthly => "monthly",
            BackupTier::Manual => "manual",
        }
    }
}

impl fmt::Display for BackupTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for BackupTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(BackupTier::Daily),
            "weekly" => Ok(BackupTier::Weekly),
            "monthly" => Ok(BackupTier::Monthly),
            "manual" => Ok(BackupTier::Manual),
            other => Err(format!("unknown backup tier '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    pub name: String,
    pub size: u64,
}

/// One backup unit, serialized verbatim as `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub id: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub category: BackupCategory,
    pub status: BackupStatus,
    pub size: u64,
    pub path: PathBuf,
    pub encrypted: bool,
    pub compressed: bool,
    #[serde(default)]
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<VersionTag>,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub key_id: Option<String>,
    #[serde(default)]
    pub tier: Option<BackupTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactInfo>,
}

impl BackupMetadata {
    /// Fresh IN_PROGRESS record
    pub fn new(
        id: String,
        category: BackupCategory,
        tier: BackupTier,
        path: PathBuf,
        sequence: u64,
        key_id: String,
    ) -> Self {
        let backup_type = if tier == BackupTier::Manual {
            BackupType::Manual
        } else {
            BackupType::Full
        };
        Self {
            id,
            backup_type,
            category,
            status: BackupStatus::InProgress,
            size: 0,
            path,
            encrypted: true,
            compressed: true,
            checksum: String::new(),
            created_at: Utc::now(),
            completed_at: None,
            tags: Vec::new(),
            sequence,
            key_id: Some(key_id),
            tier: Some(tier),
            error: None,
            artifacts: Vec::new(),
        }
    }

    pub fn has_tag(&self, tag: VersionTag) -> bool {
        self.tags.contains(&tag)
    }

    /// Tier from the sidecar, else from the parent directory name
    pub fn effective_tier(&self) -> BackupTier {
        if let Some(tier) = self.tier {
            return tier;
        }
        self.path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse().ok())
            .unwrap_or(BackupTier::Daily)
    }

    /// Whole days since creation, for display
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }

    /// Strictly more than `days` since creation, to the millisecond
    pub fn older_than(&self, now: DateTime<Utc>, days: i64) -> bool {
        now - self.created_at > Duration::days(days)
    }
}
