//! Round-trip test harness.
//!
//! Runs ten scenarios against the configured deployment. Each seeds a
//! uniquely marked record or file, backs it up, damages it, restores and
//! checks the marker came back exactly. Seeds and the backups made here are
//! removed afterwards whatever the outcome.

pub mod report;

use crate::config::DatabaseDriver;
use crate::models::{
    BackupCategory, BackupMetadata, BackupStatus, BackupTier, EntityRef, VersionTag,
    DATABASE_ARTIFACT,
};
use crate::monitoring::alerts::{AlertSeverity, AlertType, BackupAlert};
use crate::monitoring::{assess, StorageInfo};
use crate::service::BackupService;
use crate::engine::layout::{self, StagingDir};
use crate::store::{ProductRecord, Record, UserRecord};
use crate::utils::errors::{BackupError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;

const ENCRYPTION_PLAINTEXT: &str = "Sensitive data for encryption test";
const MAX_COMPRESSION_RATIO: f64 = 0.1;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_items: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_integrity: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance_metrics: Option<PerformanceMetrics>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub test_name: String,
    pub passed: bool,
    pub duration_ms: u64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub details: TestDetails,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuite {
    pub run_date: DateTime<Utc>,
    pub total_tests: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub tests: Vec<TestResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteRun {
    pub suite: TestSuite,
    pub report: PathBuf,
}

/// What a scenario observed before it was turned into a `TestResult`
#[derive(Debug, Default)]
struct Probe {
    errors: Vec<String>,
    warnings: Vec<String>,
    details: TestDetails,
}

impl Probe {
    fn check(&mut self, ok: bool, error: impl Into<String>) {
        if !ok {
            self.errors.push(error.into());
        }
    }
}

async fn timed<F>(name: &str, scenario: F) -> TestResult
where
    F: Future<Output = Result<Probe>>,
{
    let started = Instant::now();
    let outcome = scenario.await;
    let duration_ms = started.elapsed().as_millis() as u64;
    let probe = outcome.unwrap_or_else(|e| Probe {
        errors: vec![format!("Exception: {}", e)],
        ..Default::default()
    });
    let passed = probe.errors.is_empty();
    if passed {
        tracing::info!(test = name, duration_ms, "Scenario passed");
    } else {
        tracing::error!(test = name, duration_ms, errors = ?probe.errors, "Scenario failed");
    }
    TestResult {
        test_name: name.to_string(),
        passed,
        duration_ms,
        errors: probe.errors,
        warnings: probe.warnings,
        details: probe.details,
    }
}

/// Unique marker id far above anything the shop allocates
fn marker_id() -> i64 {
    900_000_000 + (rand::random::<u32>() % 99_999_999) as i64
}

pub struct TestHarness {
    service: BackupService,
}

impl TestHarness {
    pub fn new(service: BackupService) -> Self {
        Self { service }
    }

    /// Run every scenario, write the report, alert on failure
    pub async fn run_full_suite(&self) -> Result<SuiteRun> {
        let started = Instant::now();
        let run_date = Utc::now();
        tracing::info!("Starting backup/restore test suite");

        let tests = vec![
            timed("Database Backup & Restore", self.database_round_trip()).await,
            timed("File Backup & Restore", self.files_round_trip()).await,
            timed("Config Backup & Restore", self.config_round_trip()).await,
            timed("Full Backup & Restore", self.full_dry_run()).await,
            timed("Granular Restore", self.granular_round_trip()).await,
            timed("Encryption/Decryption", self.encryption_round_trip()).await,
            timed("Compression", self.compression_round_trip()).await,
            timed("Integrity Verification", self.integrity_check()).await,
            timed("Retention Policy", self.retention_sweep()).await,
            timed("Monitoring Alerts", self.monitoring_check()).await,
        ];

        let passed = tests.iter().filter(|t| t.passed).count();
        let suite = TestSuite {
            run_date,
            total_tests: tests.len(),
            passed,
            failed: tests.len() - passed,
            duration_ms: started.elapsed().as_millis() as u64,
            tests,
        };
        let report =
            report::write_report(&suite, &self.service.config().storage.reports_path).await?;

        if suite.failed > 0 {
            let failing: Vec<&str> = suite
                .tests
                .iter()
                .filter(|t| !t.passed)
                .map(|t| t.test_name.as_str())
                .collect();
            self.service
                .alerts()
                .send(&[BackupAlert::critical(
                    AlertType::TestSuiteFailed,
                    format!(
                        "Backup test suite failed: {}/{} tests failed",
                        suite.failed, suite.total_tests
                    ),
                    json!({ "failing": failing, "report": report.display().to_string() }),
                )])
                .await?;
        }
        tracing::info!(passed = suite.passed, failed = suite.failed, duration_ms = suite.duration_ms, "Test suite completed");
        Ok(SuiteRun { suite, report })
    }

    async fn backup(&self, category: BackupCategory, probe: &mut Probe) -> Result<BackupMetadata> {
        let meta = self
            .service
            .engine
            .create_backup(category, BackupTier::Manual)
            .await?;
        probe.details.backup_id = Some(meta.id.clone());
        Ok(meta)
    }

    /// Remove a backup this harness made
    async fn discard(&self, backup: Option<BackupMetadata>) {
        if let Some(backup) = backup {
            if let Err(e) = self.service.engine.delete_backup(&backup.id).await {
                tracing::warn!(backup_id = %backup.id, "Could not remove harness backup: {}", e);
            }
        }
    }

    async fn forget(&self, entity: EntityRef) {
        if let Err(e) = self.service.store().delete(entity).await {
            tracing::warn!(%entity, "Could not remove harness seed: {}", e);
        }
    }

    /// The database tool writes the same SQLite file the store reads
    fn store_is_database(&self) -> bool {
        let config = self.service.config();
        config.database.driver == DatabaseDriver::Sqlite && config.database.path == config.store.path
    }

    fn seed_product(name: String, price: f64) -> ProductRecord {
        let id = marker_id();
        ProductRecord {
            id,
            name,
            slug: format!("harness-{}", id),
            price,
            active: true,
            category_id: None,
        }
    }

    async fn database_round_trip(&self) -> Result<Probe> {
        let mut probe = Probe::default();
        if !self.store_is_database() {
            return self.database_dump_check(probe).await;
        }

        let seed = Self::seed_product(format!("__TEST_PRODUCT_{}", Utc::now().timestamp_millis()), 99.99);
        let entity = EntityRef::product(seed.id);
        self.service.store().upsert(vec![Record::Product(seed.clone())]).await?;

        let mut backup = None;
        let outcome = async {
            let meta = self.backup(BackupCategory::Database, &mut probe).await?;
            backup = Some(meta.clone());
            self.service.store().delete(entity).await?;

            let result = self.service.restore.restore_database_only(&meta.id).await;
            probe.check(result.success, format!("Restore failed: {}", result.error.unwrap_or_default()));
            match self.service.store().find(entity).await? {
                Some(Record::Product(p)) => {
                    probe.check(p == seed, "Restored data does not match original")
                }
                _ => probe.check(false, "Test product not found after restore"),
            }
            Ok::<(), BackupError>(())
        }
        .await;

        self.forget(entity).await;
        self.discard(backup).await;
        outcome?;
        probe.details.restored_items = Some(1);
        probe.details.data_integrity = Some(probe.errors.is_empty());
        Ok(probe)
    }

    /// Without a shared store the dump is only checked to open and list tables
    async fn database_dump_check(&self, mut probe: Probe) -> Result<Probe> {
        probe.warnings.push(format!(
            "{} does not manage the application store; verified dump contents only",
            self.service.context().database.name()
        ));
        let meta = self.backup(BackupCategory::Database, &mut probe).await?;
        let outcome = async {
            let staging = StagingDir::create(&self.service.config().storage.temp_path, "harness").await?;
            let dump = self
                .service
                .pipeline()
                .open(&meta.path.join(DATABASE_ARTIFACT), staging.path())
                .await?;
            let ctx = self.service.context();
            let summary = ctx.database.describe(&dump, &ctx.control()).await?;
            Ok::<_, BackupError>(summary)
        }
        .await;
        self.discard(Some(meta)).await;

        let summary = outcome?;
        probe.check(!summary.tables.is_empty(), "Dump lists no tables");
        probe.details.data_integrity = Some(probe.errors.is_empty());
        Ok(probe)
    }

    async fn files_round_trip(&self) -> Result<Probe> {
        let mut probe = Probe::default();
        let files = &self.service.config().files;
        let uploads = Path::new("public/uploads");
        if !files.include.iter().any(|d| d == uploads) {
            probe.errors.push("public/uploads is not in files.include".into());
            return Ok(probe);
        }

        let test_dir = files.root.join(uploads).join("__test__");
        let test_file = test_dir.join("test-file.txt");
        let content = format!("Test backup content - {}", Utc::now().to_rfc3339());
        tokio::fs::create_dir_all(&test_dir).await?;
        tokio::fs::write(&test_file, &content).await?;

        let mut backup = None;
        let outcome = async {
            let meta = self.backup(BackupCategory::Files, &mut probe).await?;
            backup = Some(meta.clone());
            tokio::fs::remove_dir_all(&test_dir).await?;

            let result = self.service.restore.restore_files_only(&meta.id).await;
            probe.check(result.success, format!("Restore failed: {}", result.error.unwrap_or_default()));
            match tokio::fs::read_to_string(&test_file).await {
                Ok(restored) => probe.check(
                    restored == content,
                    "Restored file content does not match original",
                ),
                Err(_) => probe.check(false, "Test file not found after restore"),
            }
            Ok::<(), BackupError>(())
        }
        .await;

        if let Err(e) = tokio::fs::remove_dir_all(&test_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %test_dir.display(), "Could not remove harness files: {}", e);
            }
        }
        self.discard(backup).await;
        outcome?;
        probe.details.restored_items = Some(1);
        probe.details.data_integrity = Some(probe.errors.is_empty());
        Ok(probe)
    }

    async fn config_round_trip(&self) -> Result<Probe> {
        let mut probe = Probe::default();
        let id = marker_id();
        let seed = UserRecord {
            id,
            email: format!("test_{}_{}@backup-test.local", Utc::now().timestamp_millis(), id),
            name: "Backup Test User".into(),
            role: "VIEWER".into(),
            active: true,
        };
        let entity = EntityRef::user(id);
        self.service.store().upsert(vec![Record::User(seed.clone())]).await?;

        let mut backup = None;
        let outcome = async {
            let meta = self.backup(BackupCategory::Config, &mut probe).await?;
            backup = Some(meta.clone());
            self.service.store().delete(entity).await?;

            let result = self.service.restore.restore_config(&meta.id).await;
            probe.check(result.success, format!("Restore failed: {}", result.error.unwrap_or_default()));
            match self.service.store().find(entity).await? {
                Some(Record::User(u)) => probe.check(
                    u.email == seed.email,
                    "Restored user data does not match original",
                ),
                _ => probe.check(false, "Test user not found after restore"),
            }
            Ok::<(), BackupError>(())
        }
        .await;

        self.forget(entity).await;
        self.discard(backup).await;
        outcome?;
        probe.details.restored_items = Some(1);
        probe.details.data_integrity = Some(probe.errors.is_empty());
        Ok(probe)
    }

    /// Dry run only; a live full restore would roll back the whole shop
    async fn full_dry_run(&self) -> Result<Probe> {
        let mut probe = Probe::default();
        let meta = self.backup(BackupCategory::Full, &mut probe).await?;
        let ok = self.service.restore.test_restore(&meta.id).await;
        probe.check(ok, "Restore test failed");
        probe.details.data_integrity = Some(ok);
        self.discard(Some(meta)).await;
        Ok(probe)
    }

    async fn granular_round_trip(&self) -> Result<Probe> {
        let mut probe = Probe::default();
        let seed = Self::seed_product(format!("__GRANULAR_TEST_{}", Utc::now().timestamp_millis()), 49.99);
        let entity = EntityRef::product(seed.id);
        self.service.store().upsert(vec![Record::Product(seed.clone())]).await?;

        let mut backup = None;
        let outcome = async {
            let meta = self.backup(BackupCategory::Config, &mut probe).await?;
            backup = Some(meta.clone());
            let mut modified = seed.clone();
            modified.name = "MODIFIED".into();
            modified.price = 999.99;
            self.service.store().upsert(vec![Record::Product(modified)]).await?;

            let result = self.service.restore.restore_granular(&meta.id, &[entity]).await;
            probe.check(
                result.success,
                format!("Granular restore failed: {}", result.error.unwrap_or_default()),
            );
            match self.service.store().find(entity).await? {
                Some(Record::Product(p)) if p.name != seed.name => probe.check(
                    false,
                    format!("Name not restored: expected \"{}\", got \"{}\"", seed.name, p.name),
                ),
                Some(Record::Product(p)) => probe.check(
                    p.price == seed.price,
                    format!("Price not restored: expected {}, got {}", seed.price, p.price),
                ),
                _ => probe.check(false, "Product not found after granular restore"),
            }
            Ok::<(), BackupError>(())
        }
        .await;

        self.forget(entity).await;
        self.discard(backup).await;
        outcome?;
        probe.details.restored_items = Some(1);
        probe.details.data_integrity = Some(probe.errors.is_empty());
        Ok(probe)
    }

    async fn scratch(&self) -> Result<StagingDir> {
        StagingDir::create(&self.service.config().storage.temp_path, "harness").await
    }

    async fn encryption_round_trip(&self) -> Result<Probe> {
        let mut probe = Probe::default();
        let scratch = self.scratch().await?;
        let plain = scratch.path().join("test-encryption.txt");
        let sealed = scratch.path().join("test-encryption.txt.enc");
        let opened = scratch.path().join("test-encryption.txt.dec");
        tokio::fs::write(&plain, ENCRYPTION_PLAINTEXT).await?;

        let pipeline = self.service.pipeline();
        pipeline.encrypt(&plain, &sealed).await?;
        let ciphertext = tokio::fs::read(&sealed).await?;
        probe.check(
            !ciphertext
                .windows(ENCRYPTION_PLAINTEXT.len())
                .any(|w| w == ENCRYPTION_PLAINTEXT.as_bytes()),
            "File not properly encrypted (plaintext visible)",
        );

        pipeline.decrypt(&sealed, &opened).await?;
        probe.check(
            tokio::fs::read_to_string(&opened).await? == ENCRYPTION_PLAINTEXT,
            "Decrypted content does not match original",
        );
        probe.details.data_integrity = Some(probe.errors.is_empty());
        Ok(probe)
    }

    async fn compression_round_trip(&self) -> Result<Probe> {
        let mut probe = Probe::default();
        let scratch = self.scratch().await?;
        let plain = scratch.path().join("test-compression.txt");
        let packed = scratch.path().join("test-compression.txt.gz");
        let unpacked = scratch.path().join("test-compression.txt.dec");
        let content = "A".repeat(10_000);
        tokio::fs::write(&plain, &content).await?;

        let pipeline = self.service.pipeline();
        let packed_size = pipeline.compress(&plain, &packed).await?;
        let ratio = packed_size as f64 / content.len() as f64;
        if ratio > MAX_COMPRESSION_RATIO {
            probe.warnings.push(format!(
                "Compression ratio poor: {:.2}% (expected < {:.0}%)",
                ratio * 100.0,
                MAX_COMPRESSION_RATIO * 100.0
            ));
        }

        pipeline.decompress(&packed, &unpacked).await?;
        probe.check(
            tokio::fs::read_to_string(&unpacked).await? == content,
            "Decompressed content does not match original",
        );
        probe.details.data_integrity = Some(probe.errors.is_empty());
        probe.details.performance_metrics = Some(PerformanceMetrics {
            compression_ratio: Some(ratio),
        });
        Ok(probe)
    }

    async fn integrity_check(&self) -> Result<Probe> {
        let mut probe = Probe::default();
        let meta = self.backup(BackupCategory::Full, &mut probe).await?;
        let outcome = self.service.monitor.verify_integrity(&meta.id).await;
        self.discard(Some(meta)).await;

        let ok = outcome?;
        probe.check(ok, "Integrity check failed");
        probe.details.data_integrity = Some(ok);
        Ok(probe)
    }

    /// Sidecar-only backup under `tier`, created `age` ago. The directory
    /// is recorded in `seeded` before anything is written to it.
    async fn seed_sidecar(
        &self,
        tier: BackupTier,
        status: BackupStatus,
        age: Duration,
        tags: &[VersionTag],
        seeded: &mut Vec<PathBuf>,
    ) -> Result<BackupMetadata> {
        let id = format!("harness_{}_{}", Utc::now().timestamp_millis(), marker_id());
        let dir = layout::backup_dir(&self.service.config().storage.base_path, tier, &id);
        seeded.push(dir.clone());
        tokio::fs::create_dir_all(&dir).await?;

        let key_id = self.service.pipeline().key_id().to_string();
        let mut meta = BackupMetadata::new(id, BackupCategory::Config, tier, dir, 0, key_id);
        meta.status = status;
        meta.created_at = Utc::now() - age;
        meta.completed_at = Some(meta.created_at);
        meta.tags = tags.to_vec();
        layout::write_metadata(&meta).await?;
        Ok(meta)
    }

    async fn unseed(&self, seeded: &[PathBuf]) {
        for dir in seeded {
            match tokio::fs::remove_dir_all(dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %dir.display(), "Could not remove harness seed: {}", e),
            }
        }
    }

    async fn retention_sweep(&self) -> Result<Probe> {
        let mut seeded = Vec::new();
        let outcome = self.retention_on_seeds(&mut seeded).await;
        self.unseed(&seeded).await;
        outcome
    }

    /// An expired untagged daily goes, a ROLLBACK-tagged one past the
    /// monthly cap stays. Only the seeds are swept.
    async fn retention_on_seeds(&self, seeded: &mut Vec<PathBuf>) -> Result<Probe> {
        let mut probe = Probe::default();
        let rules = &self.service.config().retention;
        let expired = self
            .seed_sidecar(
                BackupTier::Daily,
                BackupStatus::Completed,
                Duration::days(rules.daily_days + 10),
                &[],
                seeded,
            )
            .await?;
        let tagged = self
            .seed_sidecar(
                BackupTier::Monthly,
                BackupStatus::Completed,
                Duration::days(rules.monthly_days + 35),
                &[VersionTag::Rollback],
                seeded,
            )
            .await?;
        probe.details.backup_id = Some(expired.id.clone());

        let report = self
            .service
            .versions
            .sweep(vec![expired.clone(), tagged.clone()], Utc::now())
            .await;
        probe.errors.extend(report.errors.iter().cloned());
        probe.check(
            report.deleted == [expired.id.clone()],
            format!("Expected only {} deleted, got {:?}", expired.id, report.deleted),
        );
        probe.check(
            !tokio::fs::try_exists(&expired.path).await?,
            "Expired backup still on disk",
        );
        probe.check(
            tokio::fs::try_exists(&tagged.path).await?,
            "ROLLBACK-tagged backup was deleted",
        );
        probe.details.data_integrity = Some(probe.errors.is_empty());
        Ok(probe)
    }

    async fn monitoring_check(&self) -> Result<Probe> {
        let mut seeded = Vec::new();
        let outcome = self.alerts_on_seeds(&mut seeded).await;
        self.unseed(&seeded).await;
        let mut probe = outcome?;

        // Live catalog: storage pressure fails the scenario. The harness
        // leaves no backups behind, so a missing recent backup only warns.
        let monitor = &self.service.monitor;
        let health = monitor.check_health().await?;
        for alert in health.alerts.iter().filter(|a| a.severity == AlertSeverity::Critical) {
            if alert.alert_type == AlertType::NoRecentBackup {
                probe.warnings.push(alert.message.clone());
            } else {
                probe.errors.push(format!("System unhealthy: {}", alert.message));
            }
        }

        let storage = monitor.storage_info().await;
        let usage = storage.usage_ratio();
        let limits = &self.service.config().monitoring;
        if usage > limits.storage_critical {
            probe.errors.push(format!("Storage critically low: {:.2}%", usage * 100.0));
        } else if usage > limits.storage_warning {
            probe.warnings.push(format!("Storage usage high: {:.2}%", usage * 100.0));
        }
        probe.details.data_integrity = Some(probe.errors.is_empty());
        Ok(probe)
    }

    /// A fresh completed backup plus a failed one must raise exactly one
    /// BACKUP_FAILED warning; the same pair gone stale must go critical.
    async fn alerts_on_seeds(&self, seeded: &mut Vec<PathBuf>) -> Result<Probe> {
        let mut probe = Probe::default();
        let completed = self
            .seed_sidecar(BackupTier::Manual, BackupStatus::Completed, Duration::minutes(5), &[], seeded)
            .await?;
        let failed = self
            .seed_sidecar(BackupTier::Manual, BackupStatus::Failed, Duration::minutes(1), &[], seeded)
            .await?;

        let mut catalog: Vec<BackupMetadata> = self
            .service
            .engine
            .list_backups(None)
            .await?
            .into_iter()
            .filter(|b| b.id == completed.id || b.id == failed.id)
            .collect();
        probe.check(catalog.len() == 2, "Seeded backups missing from the catalog");

        let limits = &self.service.config().monitoring;
        let now = Utc::now();
        let fresh = assess(&catalog, StorageInfo::default(), now, limits);
        let kinds: Vec<(AlertType, AlertSeverity)> =
            fresh.alerts.iter().map(|a| (a.alert_type, a.severity)).collect();
        probe.check(
            kinds == [(AlertType::BackupFailed, AlertSeverity::Warning)],
            format!("Expected one BACKUP_FAILED warning, got {:?}", kinds),
        );
        probe.check(fresh.healthy, "Failed backup alone marked the system unhealthy");

        for backup in &mut catalog {
            backup.created_at = now - Duration::hours(limits.max_backup_age_hours + 1);
        }
        let stale = assess(&catalog, StorageInfo::default(), now, limits);
        probe.check(
            stale
                .alerts
                .iter()
                .any(|a| a.alert_type == AlertType::NoRecentBackup && a.severity == AlertSeverity::Critical),
            "Stale catalog raised no NO_RECENT_BACKUP alert",
        );
        probe.check(!stale.healthy, "Stale catalog reported healthy");
        Ok(probe)
    }
}
