use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::metadata::{BackupCategory, BackupMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionTag {
    Stable,
    Beta,
    Rollback,
    Milestone,
    PreDeployment,
    PostDeployment,
}

impl VersionTag {
    /// Order used when a backup carries several tags
    const PRIORITY: [VersionTag; 6] = [
        VersionTag::Stable,
        VersionTag::Milestone,
        VersionTag::Rollback,
        VersionTag::PreDeployment,
        VersionTag::PostDeployment,
        VersionTag::Beta,
    ];

    /// The single tag a version is presented under
    pub fn infer(tags: &[VersionTag]) -> Option<VersionTag> {
        Self::PRIORITY.into_iter().find(|t| tags.contains(t))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VersionTag::Stable => "STABLE",
            VersionTag::Beta => "BETA",
            VersionTag::Rollback => "ROLLBACK",
            VersionTag::Milestone => "MILESTONE",
            VersionTag::PreDeployment => "PRE_DEPLOYMENT",
            VersionTag::PostDeployment => "POST_DEPLOYMENT",
        }
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VersionTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase().replace('-', "_");
        Self::PRIORITY
            .into_iter()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| format!("unknown version tag '{}'", s))
    }
}

/// Read-time projection of a backup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupVersion {
    pub backup: BackupMetadata,
    pub version: u64,
    pub tag: Option<VersionTag>,
}

impl BackupVersion {
    pub fn id(&self) -> &str {
        &self.backup.id
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionFilter {
    pub category: Option<BackupCategory>,
    pub tag: Option<VersionTag>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseDiff {
    pub tables_added: Vec<String>,
    pub tables_removed: Vec<String>,
    /// Row-count delta per table present in both versions
    pub rows_changed: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDiff {
    pub files_added: Vec<String>,
    pub files_removed: Vec<String>,
    pub files_modified: Vec<String>,
}

/// Entries are `collection:id`, e.g. `products:42`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDiff {
    pub settings_added: Vec<String>,
    pub settings_removed: Vec<String>,
    pub settings_modified: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionDifferences {
    pub database: DatabaseDiff,
    pub files: FileDiff,
    pub config: ConfigDiff,
}

impl VersionDifferences {
    pub fn total_changes(&self) -> usize {
        let db = &self.database;
        let files = &self.files;
        let config = &self.config;
        db.tables_added.len()
            + db.tables_removed.len()
            + db.rows_changed.values().filter(|d| **d != 0).count()
            + files.files_added.len()
            + files.files_removed.len()
            + files.files_modified.len()
            + config.settings_added.len()
            + config.settings_removed.len()
            + config.settings_modified.len()
    }

    /// 100 for identical versions, minus 5 per change, floored at 0
    pub fn similarity(&self) -> u32 {
        100u32.saturating_sub(5 * self.total_changes().min(20) as u32)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionComparison {
    pub version1: BackupVersion,
    pub version2: BackupVersion,
    pub differences: VersionDifferences,
    pub similarity: u32,
}
