//! Data model shared by the engines.

pub mod metadata;
pub mod restore;
pub mod version;

pub use metadata::{
    ArtifactInfo, BackupCategory, BackupMetadata, BackupStatus, BackupTier, BackupType,
    CONFIG_ARTIFACT, DATABASE_ARTIFACT, FILES_ARTIFACT, METADATA_FILE,
};
pub use restore::{EntityKind, EntityRef, RestoreDetails, RestoreMode, RestoreResult};
pub use version::{
    BackupVersion, ConfigDiff, DatabaseDiff, FileDiff, VersionComparison, VersionDifferences,
    VersionFilter, VersionTag,
};
