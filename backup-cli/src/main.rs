//! Backup CLI - operator entry point
//!
//! One subcommand per backup, restore, versioning and monitoring operation,
//! plus `serve` for the admin HTTP API. Exits 0 on success and 1 on failure.

mod error;
mod routes;
mod state;

use anyhow::{bail, Context, Result};
use backup_core::harness::TestHarness;
use backup_core::models::{
    BackupCategory, BackupMetadata, BackupTier, EntityRef, RestoreMode, VersionFilter, VersionTag,
};
use backup_core::utils::{format_size, logger};
use backup_core::versioning::RollbackOptions;
use backup_core::{BackupConfig, BackupService};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "backup", author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file (defaults + environment otherwise)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a backup
    Create {
        #[arg(long = "type", default_value = "full")]
        category: BackupCategory,
        /// Retention tier; full backups default to daily, others to manual
        #[arg(long)]
        tier: Option<BackupTier>,
    },
    /// List backups, newest first
    List {
        #[arg(long = "type")]
        category: Option<BackupCategory>,
    },
    /// Restore a backup after a successful dry run
    Restore {
        #[arg(long)]
        id: String,
        #[arg(long, default_value = "FULL")]
        mode: RestoreMode,
        /// Entities for a granular restore, e.g. product:42,user:7
        #[arg(long, value_delimiter = ',')]
        items: Vec<EntityRef>,
    },
    /// Report backup health; fails when the system is unhealthy
    Health,
    /// Delete backups past their tier's retention
    Cleanup,
    /// List versions
    Versions {
        #[arg(long = "type")]
        category: Option<BackupCategory>,
        #[arg(long)]
        tag: Option<VersionTag>,
    },
    /// Compare two versions
    Compare {
        #[arg(long)]
        v1: String,
        #[arg(long)]
        v2: String,
    },
    /// Tag a version
    Tag {
        #[arg(long)]
        id: String,
        #[arg(long)]
        tag: VersionTag,
    },
    /// Roll back to a full backup, saving the current state first
    Rollback {
        #[arg(long)]
        id: String,
        #[arg(long)]
        skip_files: bool,
        #[arg(long)]
        skip_config: bool,
    },
    /// Verify one backup's checksum, or every backup
    Verify {
        #[arg(long)]
        id: Option<String>,
    },
    /// Run the backup/restore test suite
    Test,
    /// Print the weekly backup report
    Report,
    /// Delete one backup
    Delete {
        #[arg(long)]
        id: String,
    },
    /// Serve the admin HTTP API
    Serve {
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(args.config.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    let level = args.log_level.as_deref().unwrap_or(&config.log.level);
    if let Err(e) = logger::init(level) {
        eprintln!("Error: failed to initialise logging: {e:#}");
        return ExitCode::FAILURE;
    }

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    match run(args.command, config, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<BackupConfig> {
    let config = match path {
        Some(p) => BackupConfig::from_file(p)?,
        None => BackupConfig::from_env(),
    };
    Ok(config)
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Received SIGINT, cancelling");
        cancel.cancel();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_backup(b: &BackupMetadata) {
    println!(
        "{}  {:<8} {:<11} {:>10}  {}  {}",
        b.id,
        b.category,
        b.status,
        format_size(b.size),
        b.created_at.format("%Y-%m-%d %H:%M:%S"),
        b.path.display()
    );
}

async fn run(command: Command, config: BackupConfig, cancel: CancellationToken) -> Result<()> {
    let service = BackupService::from_config(config, cancel.clone())?;

    match command {
        Command::Create { category, tier } => {
            let tier = tier.unwrap_or(match category {
                BackupCategory::Full => BackupTier::Daily,
                _ => BackupTier::Manual,
            });
            let backup = service.engine.create_backup(category, tier).await?;
            println!("Backup created: {}", backup.id);
            println!("Size: {}", format_size(backup.size));
            println!("Path: {}", backup.path.display());
        }
        Command::List { category } => {
            let backups = service.engine.list_backups(category).await?;
            println!("{} backup(s)", backups.len());
            backups.iter().for_each(print_backup);
        }
        Command::Restore { id, mode, items } => {
            service.engine.get_backup(&id).await?;
            println!("Testing restore of {}...", id);
            if !service.restore.test_restore(&id).await {
                bail!("restore test failed for {}, aborting", id);
            }
            let result = service.restore.restore(&id, mode, &items).await;
            print_json(&result)?;
            if !result.success {
                bail!(
                    "restore failed: {}",
                    result.error.unwrap_or_else(|| "unknown error".into())
                );
            }
            println!("Restore completed in {} ms", result.duration_ms);
        }
        Command::Health => {
            let health = service.monitor.check_health().await?;
            print_json(&health)?;
            if !health.healthy {
                bail!("backup system unhealthy ({} alert(s))", health.alerts.len());
            }
        }
        Command::Cleanup => {
            let report = service.engine.cleanup_old_backups().await?;
            println!("Deleted {} backup(s), kept {}", report.deleted.len(), report.kept);
            for id in &report.deleted {
                println!("  - {}", id);
            }
            if !report.errors.is_empty() {
                bail!("cleanup incomplete: {}", report.errors.join("; "));
            }
        }
        Command::Versions { category, tag } => {
            let versions = service
                .versions
                .list_versions(&VersionFilter { category, tag })
                .await?;
            for v in &versions {
                let tag = v.tag.map(|t| t.to_string()).unwrap_or_default();
                println!("v{:<5} {:<16}", v.version, tag);
                print_backup(&v.backup);
            }
        }
        Command::Compare { v1, v2 } => {
            let comparison = service.versions.compare_versions(&v1, &v2).await?;
            print_json(&comparison)?;
        }
        Command::Tag { id, tag } => {
            let version = service.versions.tag_version(&id, tag).await?;
            println!("Tagged {} as {}", version.id(), tag);
        }
        Command::Rollback {
            id,
            skip_files,
            skip_config,
        } => {
            let outcome = service
                .versions
                .rollback_to_version(&id, RollbackOptions { skip_files, skip_config })
                .await?;
            println!("Safety backup: {}", outcome.safety_backup.id);
            print_json(&outcome.restore)?;
            if !outcome.restore.success {
                bail!(
                    "rollback failed; current state saved in {}",
                    outcome.safety_backup.id
                );
            }
        }
        Command::Verify { id: Some(id) } => {
            if !service.monitor.verify_integrity(&id).await? {
                bail!("integrity check failed for {}", id);
            }
            println!("Backup {} is valid", id);
        }
        Command::Verify { id: None } => {
            let summary = service.monitor.verify_all().await?;
            println!(
                "{} backup(s): {} valid, {} invalid",
                summary.total, summary.valid, summary.invalid
            );
            if summary.invalid > 0 {
                bail!("{} backup(s) failed verification", summary.invalid);
            }
        }
        Command::Test => {
            let run = TestHarness::new(service).run_full_suite().await?;
            for t in &run.suite.tests {
                let status = if t.passed { "PASS" } else { "FAIL" };
                println!("[{}] {} ({} ms)", status, t.test_name, t.duration_ms);
                for e in &t.errors {
                    println!("       {}", e);
                }
            }
            println!("Report: {}", run.report.display());
            if run.suite.failed > 0 {
                bail!("{}/{} tests failed", run.suite.failed, run.suite.total_tests);
            }
        }
        Command::Report => {
            println!("{}", service.monitor.weekly_report().await?);
        }
        Command::Delete { id } => {
            service.engine.delete_backup(&id).await?;
            println!("Deleted {}", id);
        }
        Command::Serve { port } => serve(service, port, cancel).await?,
    }
    Ok(())
}

async fn serve(service: BackupService, port: u16, cancel: CancellationToken) -> Result<()> {
    let app = routes::create_router(Arc::new(state::AppState::new(service)));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    tracing::info!("Server stopped");
    Ok(())
}
