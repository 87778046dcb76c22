//! Collaborators reached outside the process: the relational database
//! (dump/restore) and the media file tree (tar archives).

pub mod archive;
pub mod postgres;
pub mod process;
pub mod sqlite;

use crate::config::{BackupConfig, DatabaseDriver};
use crate::utils::errors::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub use postgres::PostgresTool;
pub use process::{run_tool, StopSignal, ToolControl};
pub use sqlite::SqliteTool;

/// Tables found in a dump; row counts are `None` when the format hides them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseSummary {
    pub tables: BTreeMap<String, Option<u64>>,
}

#[async_trait]
pub trait DatabaseTool: Send + Sync {
    fn name(&self) -> &'static str;

    /// Write a full dump of the live database to `output`
    async fn dump(&self, output: &Path, control: &ToolControl) -> Result<()>;

    /// Replace the live database objects with those in `dump`
    async fn restore(&self, dump: &Path, control: &ToolControl) -> Result<()>;

    /// Inspect a dump file without touching the live database
    async fn describe(&self, dump: &Path, control: &ToolControl) -> Result<DatabaseSummary>;
}

pub fn database_tool(config: &BackupConfig) -> Arc<dyn DatabaseTool> {
    match config.database.driver {
        DatabaseDriver::Sqlite => Arc::new(SqliteTool::new(config.database.path.clone())),
        DatabaseDriver::Postgres => Arc::new(PostgresTool::from_config(config)),
    }
}
