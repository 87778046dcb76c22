//! End-to-end backup/restore scenarios over a throwaway SQLite shop.

use backup_core::engine::layout::{read_metadata, write_metadata};
use backup_core::models::{BackupCategory, BackupTier, EntityRef, VersionTag, CONFIG_ARTIFACT};
use backup_core::monitoring::alerts::MemoryAlertSink;
use backup_core::pipeline::Pipeline;
use backup_core::service::ServiceContext;
use backup_core::store::{ProductRecord, Record, SqliteStore, UserRecord};
use backup_core::tools::SqliteTool;
use backup_core::locks::LockRegistry;
use backup_core::{BackupConfig, BackupService};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const KEY: &str = "1f1e1d1c1b1a191817161514131211100f0e0d0c0b0a09080706050403020100";

struct Shop {
    _dir: TempDir,
    service: BackupService,
}

fn shop() -> Shop {
    let dir = TempDir::new().unwrap();
    let mut config = BackupConfig::default();
    config.encryption.key = Some(KEY.to_string());
    config.storage.base_path = dir.path().join("backups");
    config.storage.temp_path = dir.path().join("tmp");
    config.storage.reports_path = dir.path().join("reports");
    config.store.path = dir.path().join("shop.db");
    config.database.path = config.store.path.clone();
    config.files.root = dir.path().join("app");
    std::fs::create_dir_all(config.files.root.join("public/uploads")).unwrap();
    Shop {
        _dir: dir,
        service: service(config),
    }
}

/// Fresh collaborators and leases over `config`, as a second process would have
fn service(config: BackupConfig) -> BackupService {
    BackupService::new(ServiceContext {
        pipeline: Pipeline::from_config(&config).unwrap(),
        store: Arc::new(SqliteStore::open(&config.store.path, 2).unwrap()),
        database: Arc::new(SqliteTool::new(config.database.path.clone())),
        alerts: Arc::new(MemoryAlertSink::new()),
        locks: LockRegistry::new(),
        cancel: CancellationToken::new(),
        config,
    })
}

fn product(id: i64, name: &str, price: f64) -> ProductRecord {
    ProductRecord {
        id,
        name: name.to_string(),
        slug: format!("p-{}", id),
        price,
        active: true,
        category_id: None,
    }
}

async fn age(service: &BackupService, id: &str, days: i64) {
    let meta = service.engine.get_backup(id).await.unwrap();
    let mut meta = read_metadata(&meta.path).await.unwrap();
    meta.created_at = Utc::now() - Duration::days(days);
    write_metadata(&meta).await.unwrap();
}

#[tokio::test]
async fn test_database_restore_brings_back_deleted_product() {
    let shop = shop();
    let store = shop.service.store();
    store
        .upsert(vec![Record::Product(product(1, "Widget", 49.99))])
        .await
        .unwrap();

    let backup = shop.service.engine.create_full_backup().await.unwrap();
    assert!(store.delete(EntityRef::product(1)).await.unwrap());
    assert!(store.find(EntityRef::product(1)).await.unwrap().is_none());

    let result = shop.service.restore.restore_database_only(&backup.id).await;
    assert!(result.success, "{:?}", result.error);
    match store.find(EntityRef::product(1)).await.unwrap() {
        Some(Record::Product(p)) => {
            assert_eq!(p.name, "Widget");
            assert_eq!(p.price, 49.99);
        }
        other => panic!("product missing after restore: {:?}", other),
    }
}

#[tokio::test]
async fn test_encryption_hides_plaintext() {
    let shop = shop();
    let dir = TempDir::new().unwrap();
    let plain = dir.path().join("note.txt");
    let sealed = dir.path().join("note.txt.enc");
    let opened = dir.path().join("note.out");
    std::fs::write(&plain, "hello world").unwrap();

    let pipeline = shop.service.pipeline();
    pipeline.encrypt(&plain, &sealed).await.unwrap();
    let ciphertext = std::fs::read(&sealed).unwrap();
    assert!(!ciphertext.windows(11).any(|w| w == b"hello world"));

    pipeline.decrypt(&sealed, &opened).await.unwrap();
    assert_eq!(std::fs::read_to_string(&opened).unwrap(), "hello world");
}

#[tokio::test]
async fn test_empty_input_survives_transforms() {
    let shop = shop();
    let dir = TempDir::new().unwrap();
    let empty = dir.path().join("empty");
    std::fs::write(&empty, b"").unwrap();

    let pipeline = shop.service.pipeline();
    pipeline.encrypt(&empty, &dir.path().join("e.enc")).await.unwrap();
    pipeline.decrypt(&dir.path().join("e.enc"), &dir.path().join("e.dec")).await.unwrap();
    assert!(std::fs::read(dir.path().join("e.dec")).unwrap().is_empty());

    pipeline.compress(&empty, &dir.path().join("e.gz")).await.unwrap();
    pipeline.decompress(&dir.path().join("e.gz"), &dir.path().join("e.raw")).await.unwrap();
    assert!(std::fs::read(dir.path().join("e.raw")).unwrap().is_empty());
}

#[tokio::test]
async fn test_daily_retention_drops_only_expired() {
    let shop = shop();
    let engine = &shop.service.engine;
    let mut ids = Vec::new();
    for days in [10, 29, 40] {
        let b = engine
            .create_backup(BackupCategory::Config, BackupTier::Daily)
            .await
            .unwrap();
        age(&shop.service, &b.id, days).await;
        ids.push(b.id);
    }

    let report = shop.service.versions.enforce_retention_policy().await.unwrap();
    assert_eq!(report.deleted, vec![ids[2].clone()]);
    assert_eq!(report.kept, 2);

    let left: Vec<String> = engine.list_backups(None).await.unwrap().into_iter().map(|b| b.id).collect();
    assert!(left.contains(&ids[0]));
    assert!(left.contains(&ids[1]));
    assert!(!left.contains(&ids[2]));
}

#[tokio::test]
async fn test_tagged_backup_outlives_monthly_cap() {
    let shop = shop();
    let engine = &shop.service.engine;
    let tagged = engine
        .create_backup(BackupCategory::Config, BackupTier::Monthly)
        .await
        .unwrap();
    let beta = engine
        .create_backup(BackupCategory::Config, BackupTier::Monthly)
        .await
        .unwrap();
    let plain = engine
        .create_backup(BackupCategory::Config, BackupTier::Monthly)
        .await
        .unwrap();

    shop.service.versions.tag_version(&tagged.id, VersionTag::Rollback).await.unwrap();
    shop.service.versions.tag_version(&beta.id, VersionTag::Beta).await.unwrap();
    for id in [&tagged.id, &beta.id, &plain.id] {
        age(&shop.service, id, 400).await;
    }

    let report = shop.service.versions.enforce_retention_policy().await.unwrap();
    assert_eq!(report.kept, 1);
    assert!(report.deleted.contains(&beta.id));
    assert!(report.deleted.contains(&plain.id));
    assert!(engine.get_backup(&tagged.id).await.is_ok());
}

#[tokio::test]
async fn test_granular_restore_leaves_other_records_alone() {
    let shop = shop();
    let store = shop.service.store();
    let admin = UserRecord {
        id: 3,
        email: "admin@shop.local".into(),
        name: "Admin".into(),
        role: "ADMIN".into(),
        active: true,
    };
    store
        .upsert(vec![
            Record::Product(product(42, "Original", 12.5)),
            Record::Product(product(7, "Bystander", 3.0)),
            Record::User(admin),
        ])
        .await
        .unwrap();
    let backup = shop.service.engine.create_full_backup().await.unwrap();

    // Mutate the target and an unrelated record after the backup
    store
        .upsert(vec![
            Record::Product(product(42, "MODIFIED", 999.99)),
            Record::Product(product(7, "Bystander v2", 4.0)),
        ])
        .await
        .unwrap();
    let before = store.export_config().await.unwrap();

    let result = shop
        .service
        .restore
        .restore_granular(&backup.id, &[EntityRef::product(42)])
        .await;
    assert!(result.success, "{:?}", result.error);

    assert_eq!(
        store.find(EntityRef::product(42)).await.unwrap(),
        Some(Record::Product(product(42, "Original", 12.5)))
    );
    let after = store.export_config().await.unwrap();
    let others = |snapshot: &backup_core::store::ConfigSnapshot| -> Vec<Record> {
        snapshot
            .records()
            .into_iter()
            .filter(|r| r.entity() != EntityRef::product(42))
            .collect()
    };
    assert_eq!(others(&before), others(&after));
    assert_eq!(
        store.find(EntityRef::product(7)).await.unwrap(),
        Some(Record::Product(product(7, "Bystander v2", 4.0)))
    );
}

#[tokio::test]
async fn test_checksum_tracks_artifact_bytes() {
    let shop = shop();
    let backup = shop
        .service
        .engine
        .create_backup(BackupCategory::Config, BackupTier::Manual)
        .await
        .unwrap();
    let pipeline = shop.service.pipeline();

    let first = pipeline.checksum(&backup.path).await.unwrap();
    let second = pipeline.checksum(&backup.path).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first, backup.checksum);

    let artifact = backup.path.join(CONFIG_ARTIFACT);
    let mut bytes = std::fs::read(&artifact).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    std::fs::write(&artifact, bytes).unwrap();
    assert_ne!(pipeline.checksum(&backup.path).await.unwrap(), first);
}

#[tokio::test]
async fn test_restore_check_is_repeatable() {
    let shop = shop();
    let backup = shop.service.engine.create_full_backup().await.unwrap();
    let restore = &shop.service.restore;

    assert!(restore.test_restore(&backup.id).await);
    assert!(restore.test_restore(&backup.id).await);
    assert!(!restore.test_restore("full_0_missing").await);
    assert!(!restore.test_restore("full_0_missing").await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_separate_services_never_share_a_sequence() {
    let shop = shop();
    let other = service(shop.service.config().clone());

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..8 {
        let engine = if i % 2 == 0 {
            shop.service.engine.clone()
        } else {
            other.engine.clone()
        };
        tasks.spawn(async move {
            engine
                .create_backup(BackupCategory::Config, BackupTier::Manual)
                .await
        });
    }

    let mut sequences = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let backup = joined.unwrap().expect("every create succeeds");
        sequences.push(backup.sequence);
    }
    sequences.sort_unstable();
    assert_eq!(sequences, (1..=8).collect::<Vec<u64>>());
}
