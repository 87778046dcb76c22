use super::{run_tool, DatabaseSummary, DatabaseTool, ToolControl};
use crate::config::BackupConfig;
use crate::utils::errors::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;

/// `pg_dump -F c` / `pg_restore -c` against one database
pub struct PostgresTool {
    pg_dump: String,
    pg_restore: String,
    host: String,
    port: u16,
    name: String,
    user: String,
    password: String,
}

impl PostgresTool {
    pub fn from_config(config: &BackupConfig) -> Self {
        let db = &config.database;
        Self {
            pg_dump: config.tools.pg_dump.clone(),
            pg_restore: config.tools.pg_restore.clone(),
            host: db.host.clone(),
            port: db.port,
            name: db.name.clone(),
            user: db.user.clone(),
            password: db.password.clone(),
        }
    }

    fn connection_args(&self) -> Vec<OsString> {
        vec![
            "-h".into(),
            self.host.clone().into(),
            "-p".into(),
            self.port.to_string().into(),
            "-U".into(),
            self.user.clone().into(),
        ]
    }

    fn env(&self) -> Vec<(&str, &str)> {
        if self.password.is_empty() {
            Vec::new()
        } else {
            vec![("PGPASSWORD", self.password.as_str())]
        }
    }

    pub(crate) fn dump_args(&self, output: &Path) -> Vec<OsString> {
        let mut args = self.connection_args();
        args.extend([
            "-F".into(),
            "c".into(),
            "-f".into(),
            output.as_os_str().to_os_string(),
            "-d".into(),
            self.name.clone().into(),
        ]);
        args
    }

    pub(crate) fn restore_args(&self, dump: &Path) -> Vec<OsString> {
        let mut args = self.connection_args();
        args.extend([
            "-c".into(),
            "--if-exists".into(),
            "-d".into(),
            self.name.clone().into(),
            dump.as_os_str().to_os_string(),
        ]);
        args
    }
}

/// Table names and data entries from a `pg_restore -l` listing.
/// TOC lines look like `215; 1259 16386 TABLE public products shop`.
fn parse_toc(listing: &str) -> DatabaseSummary {
    let mut tables = BTreeMap::new();
    for line in listing.lines() {
        let line = line.trim();
        if line.starts_with(';') || line.is_empty() {
            continue;
        }
        let Some((_, rest)) = line.split_once(';') else {
            continue;
        };
        let fields: Vec<&str> = rest.split_whitespace().collect();
        // fields: [catalog oid, object oid, kind..., schema, name, owner]
        if fields.len() >= 6 && fields[2] == "TABLE" && fields[3] != "DATA" {
            tables.insert(format!("{}.{}", fields[3], fields[4]), None);
        }
    }
    DatabaseSummary { tables }
}

#[async_trait]
impl DatabaseTool for PostgresTool {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn dump(&self, output: &Path, control: &ToolControl) -> Result<()> {
        tracing::info!(database = %self.name, host = %self.host, "Running pg_dump");
        run_tool(&self.pg_dump, self.dump_args(output), &self.env(), control).await?;
        Ok(())
    }

    async fn restore(&self, dump: &Path, control: &ToolControl) -> Result<()> {
        tracing::info!(database = %self.name, host = %self.host, "Running pg_restore");
        run_tool(&self.pg_restore, self.restore_args(dump), &self.env(), control).await?;
        Ok(())
    }

    async fn describe(&self, dump: &Path, control: &ToolControl) -> Result<DatabaseSummary> {
        let args: Vec<OsString> = vec!["-l".into(), dump.as_os_str().to_os_string()];
        let out = run_tool(&self.pg_restore, args, &[], control).await?;
        Ok(parse_toc(&String::from_utf8_lossy(&out.stdout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> PostgresTool {
        let mut config = BackupConfig::default();
        config.database.name = "shop; rm -rf /".into();
        config.database.password = "pw".into();
        PostgresTool::from_config(&config)
    }

    #[test]
    fn test_args_are_not_shell_joined() {
        let args = tool().dump_args(Path::new("/tmp/a b/database.sql"));
        assert!(args.contains(&OsString::from("shop; rm -rf /")));
        assert!(args.contains(&OsString::from("/tmp/a b/database.sql")));
        assert_eq!(args[args.len() - 4], OsString::from("-f"));
    }

    #[test]
    fn test_restore_args_clean_first() {
        let args = tool().restore_args(Path::new("/staging/database.sql"));
        assert!(args.contains(&OsString::from("-c")));
        assert_eq!(args.last(), Some(&OsString::from("/staging/database.sql")));
    }

    #[test]
    fn test_password_only_in_env() {
        let t = tool();
        assert_eq!(t.env(), vec![("PGPASSWORD", "pw")]);
        assert!(!t.dump_args(Path::new("x")).contains(&OsString::from("pw")));
    }

    #[test]
    fn test_parse_toc() {
        let listing = ";\n; Archive created at 2024-01-01\n;\n\
            210; 1259 16386 TABLE public products shop\n\
            211; 1259 16390 TABLE public users shop\n\
            3350; 0 16386 TABLE DATA public products shop\n\
            3100; 2606 16400 CONSTRAINT public products products_pkey shop\n";
        let summary = parse_toc(listing);
        let names: Vec<&str> = summary.tables.keys().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["public.products", "public.users"]);
        assert_eq!(summary.tables["public.products"], None);
    }
}
