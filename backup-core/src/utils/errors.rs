//! Error types for the backup subsystem.

use crate::models::BackupCategory;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{tool} exited with status {status:?}: {stderr}")]
    ExternalTool {
        tool: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("{tool} did not finish within {after:?}")]
    ToolTimeout { tool: String, after: Duration },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Backup checksum mismatch for {backup_id} (expected {expected}, got {actual}) - backup may be corrupted")]
    Integrity {
        backup_id: String,
        expected: String,
        actual: String,
    },

    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Partial restore: {completed:?} applied, {failed} failed: {reason}")]
    PartialFailure {
        completed: Vec<BackupCategory>,
        failed: BackupCategory,
        reason: String,
    },

    #[error("Resource busy: {0}")]
    Busy(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl BackupError {
    /// Whether the monitoring collaborator should escalate this to a critical alert.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            BackupError::Integrity { .. } | BackupError::PartialFailure { .. }
        )
    }
}

impl From<tokio::task::JoinError> for BackupError {
    fn from(e: tokio::task::JoinError) -> Self {
        BackupError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
