//! Alert dispatch port and its shipped sinks.

use crate::utils::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    BackupFailed,
    BackupIncomplete,
    StorageLow,
    BackupCorruption,
    NoRecentBackup,
    RestoreFailed,
    TestSuiteFailed,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertType::BackupFailed => "BACKUP_FAILED",
            AlertType::BackupIncomplete => "BACKUP_INCOMPLETE",
            AlertType::StorageLow => "STORAGE_LOW",
            AlertType::BackupCorruption => "BACKUP_CORRUPTION",
            AlertType::NoRecentBackup => "NO_RECENT_BACKUP",
            AlertType::RestoreFailed => "RESTORE_FAILED",
            AlertType::TestSuiteFailed => "TEST_SUITE_FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupAlert {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl BackupAlert {
    pub fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            alert_type,
            severity,
            message: message.into(),
            details,
            timestamp: Utc::now(),
        }
    }

    pub fn critical(alert_type: AlertType, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::new(alert_type, AlertSeverity::Critical, message, details)
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alerts: &[BackupAlert]) -> Result<()>;
}

/// Writes alerts to the tracing log
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, alerts: &[BackupAlert]) -> Result<()> {
        for alert in alerts {
            let kind = alert.alert_type.to_string();
            match alert.severity {
                AlertSeverity::Critical => {
                    crate::critical!(alert = %kind, details = %alert.details, "{}", alert.message)
                }
                AlertSeverity::Warning => {
                    tracing::warn!(alert = %kind, details = %alert.details, "{}", alert.message)
                }
                AlertSeverity::Info => {
                    tracing::info!(alert = %kind, details = %alert.details, "{}", alert.message)
                }
            }
        }
        Ok(())
    }
}

/// Posts a Slack-style block message. Repeats of an alert type inside the
/// dedup window are dropped.
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: String,
    window: Duration,
    last_sent: DashMap<AlertType, Instant>,
    host: String,
}

impl WebhookAlertSink {
    pub fn new(url: String, window: Duration) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            url,
            window,
            last_sent: DashMap::new(),
            host,
        }
    }

    /// Alerts not sent within the window; marks them as sent
    fn admit(&self, alerts: &[BackupAlert]) -> Vec<BackupAlert> {
        let now = Instant::now();
        alerts
            .iter()
            .filter(|a| {
                let fresh = self
                    .last_sent
                    .get(&a.alert_type)
                    .map(|t| now.duration_since(*t) >= self.window)
                    .unwrap_or(true);
                if fresh {
                    self.last_sent.insert(a.alert_type, now);
                }
                fresh
            })
            .cloned()
            .collect()
    }

    fn payload(&self, alerts: &[BackupAlert]) -> serde_json::Value {
        let critical = alerts.iter().filter(|a| a.severity == AlertSeverity::Critical).count();
        let warnings = alerts.iter().filter(|a| a.severity == AlertSeverity::Warning).count();

        let mut blocks = vec![
            json!({"type": "header", "text": {"type": "plain_text", "text": "Backup System Alert"}}),
            json!({"type": "section", "text": {"type": "mrkdwn",
                "text": format!("*Critical Issues:* {}\n*Warnings:* {}\n*Host:* {}", critical, warnings, self.host)}}),
            json!({"type": "divider"}),
        ];
        for alert in alerts.iter().take(5) {
            let marker = if alert.severity == AlertSeverity::Critical { "[CRITICAL]" } else { "[WARNING]" };
            blocks.push(json!({"type": "section", "text": {"type": "mrkdwn",
                "text": format!("*{} {}*\n{}", marker, alert.alert_type, alert.message)}}));
        }
        json!({"text": "Backup System Alert", "blocks": blocks})
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send(&self, alerts: &[BackupAlert]) -> Result<()> {
        let admitted = self.admit(alerts);
        if admitted.is_empty() {
            tracing::debug!(suppressed = alerts.len(), "All alerts inside dedup window");
            return Ok(());
        }
        self.client
            .post(&self.url)
            .json(&self.payload(&admitted))
            .send()
            .await?
            .error_for_status()?;
        tracing::info!(count = admitted.len(), "Webhook alert sent");
        Ok(())
    }
}

/// Fans alerts out to several sinks. A failing sink is logged and skipped.
pub struct AlertDispatcher {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl AlertDispatcher {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AlertSink for AlertDispatcher {
    async fn send(&self, alerts: &[BackupAlert]) -> Result<()> {
        if alerts.is_empty() {
            return Ok(());
        }
        for sink in &self.sinks {
            if let Err(e) = sink.send(alerts).await {
                tracing::error!("Failed to dispatch alerts: {}", e);
            }
        }
        Ok(())
    }
}

/// Keeps every alert in memory; used by tests and the harness
#[derive(Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<BackupAlert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<BackupAlert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AlertSink for MemoryAlertSink {
    async fn send(&self, alerts: &[BackupAlert]) -> Result<()> {
        if let Ok(mut stored) = self.alerts.lock() {
            stored.extend_from_slice(alerts);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(t: AlertType) -> BackupAlert {
        BackupAlert::critical(t, "boom", json!({}))
    }

    #[test]
    fn test_dedup_window() {
        let sink = WebhookAlertSink::new("http://127.0.0.1:9/hook".into(), Duration::from_secs(60));
        let first = sink.admit(&[alert(AlertType::StorageLow), alert(AlertType::BackupFailed)]);
        assert_eq!(first.len(), 2);

        let second = sink.admit(&[alert(AlertType::StorageLow), alert(AlertType::BackupCorruption)]);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].alert_type, AlertType::BackupCorruption);
    }

    #[test]
    fn test_zero_window_admits_repeats() {
        let sink = WebhookAlertSink::new("http://127.0.0.1:9/hook".into(), Duration::ZERO);
        assert_eq!(sink.admit(&[alert(AlertType::StorageLow)]).len(), 1);
        assert_eq!(sink.admit(&[alert(AlertType::StorageLow)]).len(), 1);
    }

    #[test]
    fn test_payload_caps_sections() {
        let sink = WebhookAlertSink::new("http://x".into(), Duration::ZERO);
        let alerts: Vec<_> = (0..8).map(|_| alert(AlertType::BackupFailed)).collect();
        let payload = sink.payload(&alerts);
        // header + summary + divider + 5 alerts
        assert_eq!(payload["blocks"].as_array().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_dispatcher_survives_failing_sink() {
        let memory = Arc::new(MemoryAlertSink::new());
        let unreachable = Arc::new(WebhookAlertSink::new(
            "http://127.0.0.1:9/hook".into(),
            Duration::ZERO,
        ));
        let dispatcher = AlertDispatcher::new(vec![unreachable, memory.clone()]);

        dispatcher.send(&[alert(AlertType::BackupFailed)]).await.unwrap();
        assert_eq!(memory.alerts().len(), 1);
    }

    #[test]
    fn test_alert_json_shape() {
        let json = serde_json::to_value(alert(AlertType::NoRecentBackup)).unwrap();
        assert_eq!(json["type"], "NO_RECENT_BACKUP");
        assert_eq!(json["severity"], "CRITICAL");
    }
}
