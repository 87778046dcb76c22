//! Service container.
//!
//! One `ServiceContext` is built per process and shared by reference with
//! every engine; the CLI, HTTP API and test harness all go through
//! [`BackupService`].

use crate::config::BackupConfig;
use crate::engine::BackupEngine;
use crate::locks::LockRegistry;
use crate::monitoring::alerts::{AlertDispatcher, AlertSink, LogAlertSink, WebhookAlertSink};
use crate::monitoring::Monitor;
use crate::pipeline::Pipeline;
use crate::restore::RestoreEngine;
use crate::store::{AppStore, SqliteStore};
use crate::tools::{database_tool, DatabaseTool, ToolControl};
use crate::utils::errors::Result;
use crate::versioning::VersionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct ServiceContext {
    pub config: BackupConfig,
    pub pipeline: Pipeline,
    pub store: Arc<dyn AppStore>,
    pub database: Arc<dyn DatabaseTool>,
    pub alerts: Arc<dyn AlertSink>,
    pub locks: LockRegistry,
    pub cancel: CancellationToken,
}

impl ServiceContext {
    /// Deadline + cancel handle for one tool invocation
    pub fn control(&self) -> ToolControl {
        ToolControl::new(self.config.tool_timeout(), self.cancel.clone())
    }
}

#[derive(Clone)]
pub struct BackupService {
    ctx: Arc<ServiceContext>,
    pub engine: BackupEngine,
    pub restore: RestoreEngine,
    pub versions: VersionManager,
    pub monitor: Monitor,
}

impl BackupService {
    pub fn new(ctx: ServiceContext) -> Self {
        let ctx = Arc::new(ctx);
        Self {
            engine: BackupEngine::new(ctx.clone()),
            restore: RestoreEngine::new(ctx.clone()),
            versions: VersionManager::new(ctx.clone()),
            monitor: Monitor::new(ctx.clone()),
            ctx,
        }
    }

    /// Validate `config` and wire the shipped collaborators: SQLite
    /// application store, the configured database tool, log + webhook alerts.
    pub fn from_config(config: BackupConfig, cancel: CancellationToken) -> Result<Self> {
        config.validate()?;
        let pipeline = Pipeline::from_config(&config)?;
        let store: Arc<dyn AppStore> =
            Arc::new(SqliteStore::open(&config.store.path, config.store.pool_size)?);
        let database = database_tool(&config);

        let mut sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(LogAlertSink)];
        if let Some(url) = config.monitoring.webhook_url.clone() {
            sinks.push(Arc::new(WebhookAlertSink::new(
                url,
                Duration::from_secs(config.monitoring.alert_dedup_secs),
            )));
        }

        Ok(Self::new(ServiceContext {
            config,
            pipeline,
            store,
            database,
            alerts: Arc::new(AlertDispatcher::new(sinks)),
            locks: LockRegistry::new(),
            cancel,
        }))
    }

    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.ctx
    }

    pub fn config(&self) -> &BackupConfig {
        &self.ctx.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.ctx.pipeline
    }

    pub fn store(&self) -> &Arc<dyn AppStore> {
        &self.ctx.store
    }

    pub fn alerts(&self) -> &Arc<dyn AlertSink> {
        &self.ctx.alerts
    }
}
