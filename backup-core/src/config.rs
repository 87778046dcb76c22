//! Configuration management for the backup subsystem.
//!
//! Loads configuration from a TOML file with environment variable overrides.

use crate::models::BackupTier;
use crate::utils::errors::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root holding the daily/weekly/monthly/manual tier directories
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    /// Scratch space for intermediate and restore staging files
    #[serde(default = "default_temp_path")]
    pub temp_path: PathBuf,

    /// Where harness and weekly reports are written
    #[serde(default = "default_reports_path")]
    pub reports_path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// 256-bit key, hex encoded (64 chars)
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Deflate level 0-9
    #[serde(default = "default_compression_level")]
    pub level: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_driver")]
    pub driver: DatabaseDriver,

    /// SQLite database file (sqlite driver)
    #[serde(default = "default_sqlite_path")]
    pub path: PathBuf,

    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_name")]
    pub name: String,
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite file holding users, categories and products
    #[serde(default = "default_sqlite_path")]
    pub path: PathBuf,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Application root the media directories are relative to
    #[serde(default = "default_files_root")]
    pub root: PathBuf,

    /// Directories (relative to root) captured in the files archive
    #[serde(default = "default_include")]
    pub include: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_daily_days")]
    pub daily_days: i64,
    #[serde(default = "default_weekly_days")]
    pub weekly_days: i64,
    #[serde(default = "default_monthly_days")]
    pub monthly_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_pg_dump")]
    pub pg_dump: String,
    #[serde(default = "default_pg_restore")]
    pub pg_restore: String,

    /// Deadline for any external tool or blocking dump/restore call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_max_backup_age_hours")]
    pub max_backup_age_hours: i64,
    #[serde(default = "default_storage_warning")]
    pub storage_warning: f64,
    #[serde(default = "default_storage_critical")]
    pub storage_critical: f64,

    /// Slack-compatible incoming webhook
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Identical alert types are suppressed for this long
    #[serde(default = "default_dedup_secs")]
    pub alert_dedup_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_base_path() -> PathBuf {
    PathBuf::from("/backups")
}

fn default_temp_path() -> PathBuf {
    PathBuf::from("/tmp/backups")
}

fn default_reports_path() -> PathBuf {
    PathBuf::from("reports")
}

fn default_compression_level() -> u32 {
    9
}

fn default_driver() -> DatabaseDriver {
    DatabaseDriver::Sqlite
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("data/shop.db")
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "sanduta".to_string()
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_pool_size() -> u32 {
    4
}

fn default_files_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_include() -> Vec<PathBuf> {
    [
        "public/uploads",
        "public/media",
        "public/products",
        "public/banners",
        "storage/editor",
        "storage/projects",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

fn default_daily_days() -> i64 {
    30
}

fn default_weekly_days() -> i64 {
    84 // 12 weeks
}

fn default_monthly_days() -> i64 {
    365
}

fn default_pg_dump() -> String {
    "pg_dump".to_string()
}

fn default_pg_restore() -> String {
    "pg_restore".to_string()
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_max_backup_age_hours() -> i64 {
    24
}

fn default_storage_warning() -> f64 {
    0.8
}

fn default_storage_critical() -> f64 {
    0.9
}

fn default_dedup_secs() -> u64 {
    15 * 60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            temp_path: default_temp_path(),
            reports_path: default_reports_path(),
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: default_compression_level(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            path: default_sqlite_path(),
            host: default_db_host(),
            port: default_db_port(),
            name: default_db_name(),
            user: default_db_user(),
            password: String::new(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_sqlite_path(),
            pool_size: default_pool_size(),
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            root: default_files_root(),
            include: default_include(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            daily_days: default_daily_days(),
            weekly_days: default_weekly_days(),
            monthly_days: default_monthly_days(),
        }
    }
}

impl RetentionConfig {
    /// Age after which an untagged backup in `tier` is removed. Manual
    /// backups have no tier threshold.
    pub fn max_age_days(&self, tier: BackupTier) -> Option<i64> {
        match tier {
            BackupTier::Daily => Some(self.daily_days),
            BackupTier::Weekly => Some(self.weekly_days),
            BackupTier::Monthly => Some(self.monthly_days),
            BackupTier::Manual => None,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            pg_dump: default_pg_dump(),
            pg_restore: default_pg_restore(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            max_backup_age_hours: default_max_backup_age_hours(),
            storage_warning: default_storage_warning(),
            storage_critical: default_storage_critical(),
            webhook_url: None,
            alert_dedup_secs: default_dedup_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            encryption: EncryptionConfig::default(),
            compression: CompressionConfig::default(),
            database: DatabaseConfig::default(),
            store: StoreConfig::default(),
            files: FilesConfig::default(),
            retention: RetentionConfig::default(),
            tools: ToolsConfig::default(),
            monitoring: MonitoringConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl BackupConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: BackupConfig = toml::from_str(&content)
            .map_err(|e| BackupError::Configuration(format!("{}: {}", path.display(), e)))?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides (`.env` is honoured)
    pub fn from_env() -> Self {
        let mut config = BackupConfig::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        let _ = dotenvy::dotenv();

        if let Some(v) = env_var("BACKUP_BASE_PATH") {
            self.storage.base_path = PathBuf::from(v);
        }
        if let Some(v) = env_var("BACKUP_TEMP_PATH") {
            self.storage.temp_path = PathBuf::from(v);
        }
        if let Some(v) = env_var("BACKUP_REPORTS_PATH") {
            self.storage.reports_path = PathBuf::from(v);
        }
        if let Some(v) = env_var("BACKUP_ENCRYPTION_KEY") {
            self.encryption.key = Some(v);
        }
        if let Some(v) = env_var("DATABASE_DRIVER") {
            match v.to_ascii_lowercase().as_str() {
                "postgres" | "postgresql" => self.database.driver = DatabaseDriver::Postgres,
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                other => tracing::warn!(driver = other, "Ignoring unknown DATABASE_DRIVER"),
            }
        }
        if let Some(v) = env_var("DATABASE_HOST") {
            self.database.host = v;
        }
        if let Some(port) = env_var("DATABASE_PORT").and_then(|v| v.parse().ok()) {
            self.database.port = port;
        }
        if let Some(v) = env_var("DATABASE_NAME") {
            self.database.name = v;
        }
        if let Some(v) = env_var("DATABASE_USER") {
            self.database.user = v;
        }
        if let Some(v) = env_var("DATABASE_PASSWORD") {
            self.database.password = v;
        }
        if let Some(v) = env_var("DATABASE_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = env_var("STORE_PATH") {
            self.store.path = PathBuf::from(v);
        }
        if let Some(v) = env_var("FILES_ROOT") {
            self.files.root = PathBuf::from(v);
        }
        if let Some(v) = env_var("SLACK_WEBHOOK_URL") {
            self.monitoring.webhook_url = Some(v);
        }
        if let Some(v) = env_var("LOG_LEVEL") {
            self.log.level = v;
        }
    }

    /// Reject settings the engines cannot run with
    pub fn validate(&self) -> Result<()> {
        let key = self.encryption.key.as_deref().ok_or_else(|| {
            BackupError::Configuration(
                "encryption key missing (set encryption.key or BACKUP_ENCRYPTION_KEY)".into(),
            )
        })?;
        if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BackupError::Configuration(
                "encryption key must be 64 hex characters (256 bits)".into(),
            ));
        }
        if self.storage.base_path.as_os_str().is_empty() {
            return Err(BackupError::Configuration("storage.base_path is empty".into()));
        }
        if self.storage.temp_path.as_os_str().is_empty() {
            return Err(BackupError::Configuration("storage.temp_path is empty".into()));
        }
        if self.compression.level > 9 {
            return Err(BackupError::Configuration(format!(
                "compression.level {} out of range 0-9",
                self.compression.level
            )));
        }
        if self.database.driver == DatabaseDriver::Postgres
            && (self.database.host.is_empty()
                || self.database.name.is_empty()
                || self.database.user.is_empty())
        {
            return Err(BackupError::Configuration(
                "postgres driver requires database.host, database.name and database.user".into(),
            ));
        }
        let r = &self.retention;
        if !(0 < r.daily_days && r.daily_days < r.weekly_days && r.weekly_days < r.monthly_days) {
            return Err(BackupError::Configuration(format!(
                "retention thresholds must increase: daily {} < weekly {} < monthly {}",
                r.daily_days, r.weekly_days, r.monthly_days
            )));
        }
        Ok(())
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tools.timeout_secs)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_defaults_match_retention_policy() {
        let config = BackupConfig::default();
        assert_eq!(config.retention.daily_days, 30);
        assert_eq!(config.retention.weekly_days, 84);
        assert_eq!(config.retention.monthly_days, 365);
        assert_eq!(config.compression.level, 9);
        assert_eq!(config.files.include.len(), 6);
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let config = BackupConfig::default();
        assert!(matches!(config.validate(), Err(BackupError::Configuration(_))));
    }

    #[test]
    fn test_short_key_rejected() {
        let mut config = BackupConfig::default();
        config.encryption.key = Some("abcd".into());
        assert!(matches!(config.validate(), Err(BackupError::Configuration(_))));
    }

    #[test]
    fn test_valid_config() {
        let mut config = BackupConfig::default();
        config.encryption.key = Some(KEY.into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retention_must_increase() {
        let mut config = BackupConfig::default();
        config.encryption.key = Some(KEY.into());
        config.retention.weekly_days = 10;
        assert!(matches!(config.validate(), Err(BackupError::Configuration(_))));
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_src = r#"
            [storage]
            base_path = "/srv/backups"

            [database]
            driver = "postgres"
            name = "shop"

            [retention]
            daily_days = 14
        "#;
        let config: BackupConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(config.storage.base_path, PathBuf::from("/srv/backups"));
        assert_eq!(config.storage.temp_path, PathBuf::from("/tmp/backups"));
        assert_eq!(config.database.driver, DatabaseDriver::Postgres);
        assert_eq!(config.database.name, "shop");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.retention.daily_days, 14);
        assert_eq!(config.retention.weekly_days, 84);
    }
}
