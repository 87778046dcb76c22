use super::{DatabaseSummary, DatabaseTool, StopSignal, ToolControl};
use crate::utils::errors::Result;
use async_trait::async_trait;
use rusqlite::backup::{Backup, StepResult};
use rusqlite::{Connection, OpenFlags};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const TOOL: &str = "sqlite-backup";
const PAGES_PER_STEP: i32 = 64;
const BUSY_PAUSE: Duration = Duration::from_millis(50);

/// Dumps and restores a SQLite database with the online backup API
pub struct SqliteTool {
    path: PathBuf,
}

impl SqliteTool {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

/// Online-backup copy of `from` into `to`, a few pages at a time.
/// Abandoning the copy on `stop` rolls back the destination's write.
fn copy_pages(from: &Connection, to: &mut Connection, stop: &StopSignal) -> Result<()> {
    let backup = Backup::new(from, to)?;
    loop {
        stop.check()?;
        match backup.step(PAGES_PER_STEP)? {
            StepResult::Done => return Ok(()),
            StepResult::More => {}
            _ => std::thread::sleep(BUSY_PAUSE),
        }
    }
}

fn summarize(dump: &Path, stop: &StopSignal) -> Result<DatabaseSummary> {
    let conn = Connection::open_with_flags(dump, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut tables = BTreeMap::new();
    for name in names {
        stop.check()?;
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", name.replace('"', "\"\""));
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        tables.insert(name, Some(count as u64));
    }
    Ok(DatabaseSummary { tables })
}

#[async_trait]
impl DatabaseTool for SqliteTool {
    fn name(&self) -> &'static str {
        TOOL
    }

    async fn dump(&self, output: &Path, control: &ToolControl) -> Result<()> {
        let src = self.path.clone();
        let dst = output.to_path_buf();
        control
            .blocking(TOOL, move |stop| {
                let live = Connection::open(&src)?;
                let mut out = Connection::open(&dst)?;
                copy_pages(&live, &mut out, stop)
            })
            .await
    }

    async fn restore(&self, dump: &Path, control: &ToolControl) -> Result<()> {
        let dst = self.path.clone();
        let src = dump.to_path_buf();
        control
            .blocking(TOOL, move |stop| {
                let saved = Connection::open_with_flags(&src, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
                let mut live = Connection::open(&dst)?;
                copy_pages(&saved, &mut live, stop)
            })
            .await
    }

    async fn describe(&self, dump: &Path, control: &ToolControl) -> Result<DatabaseSummary> {
        let dump = dump.to_path_buf();
        control.blocking(TOOL, move |stop| summarize(&dump, stop)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn control() -> ToolControl {
        ToolControl::new(Duration::from_secs(30), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_dump_restore_describe() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("live.db");
        let dump = dir.path().join("dump.db");
        {
            let conn = Connection::open(&live).unwrap();
            conn.execute_batch(
                "CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT);
                 INSERT INTO products VALUES (1, 'Widget'), (2, 'Gadget');",
            )
            .unwrap();
        }

        let tool = SqliteTool::new(live.clone());
        tool.dump(&dump, &control()).await.unwrap();

        Connection::open(&live)
            .unwrap()
            .execute("DELETE FROM products", [])
            .unwrap();

        let summary = tool.describe(&dump, &control()).await.unwrap();
        assert_eq!(summary.tables.get("products"), Some(&Some(2)));

        tool.restore(&dump, &control()).await.unwrap();
        let count: i64 = Connection::open(&live)
            .unwrap()
            .query_row("SELECT COUNT(*) FROM products", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_cancelled_restore_leaves_live_database() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("live.db");
        let dump = dir.path().join("dump.db");
        Connection::open(&dump)
            .unwrap()
            .execute_batch("CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT);")
            .unwrap();
        Connection::open(&live)
            .unwrap()
            .execute_batch(
                "CREATE TABLE users (id INTEGER PRIMARY KEY);
                 INSERT INTO users VALUES (1);",
            )
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let control = ToolControl::new(Duration::from_secs(30), cancel);
        let err = SqliteTool::new(live.clone())
            .restore(&dump, &control)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::utils::errors::BackupError::Cancelled));

        let users: i64 = Connection::open(&live)
            .unwrap()
            .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .unwrap();
        assert_eq!(users, 1);
    }
}
