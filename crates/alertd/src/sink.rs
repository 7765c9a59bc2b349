//! Notification sinks.
//!
//! Sinks act on decisions the core already made. Delivery is fire-and-forget
//! from the pipeline's point of view: a failed delivery is logged and never
//! rolls back dedup state.

use std::path::PathBuf;
use std::time::Duration;

use alerting::Notification;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::{DaemonError, DaemonResult};

/// Consumer of emitted notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, notification: &Notification) -> DaemonResult<()>;
}

/// Writes each notification to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, notification: &Notification) -> DaemonResult<()> {
        let payload = &notification.payload;
        info!(
            key = %notification.key,
            kind = %notification.kind,
            reason = %notification.reason,
            hits = payload.occurrence_count,
            priority = payload.priority.label(),
            first_seen = %payload.first_seen.to_rfc3339(),
            last_seen = %payload.last_seen.to_rfc3339(),
            "ALERT"
        );
        Ok(())
    }
}

/// Appends each notification as one JSON line.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl NotificationSink for JsonlSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    async fn deliver(&self, notification: &Notification) -> DaemonResult<()> {
        let mut line = serde_json::to_string(notification)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| DaemonError::Sink {
                sink: "jsonl",
                reason: format!("open {}: {e}", self.path.display()),
            })?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| DaemonError::Sink {
                sink: "jsonl",
                reason: format!("write {}: {e}", self.path.display()),
            })?;
        Ok(())
    }
}

/// POSTs each notification as JSON to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> DaemonResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, notification: &Notification) -> DaemonResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DaemonError::Sink {
                sink: "webhook",
                reason: format!("HTTP {status}"),
            });
        }
        Ok(())
    }
}
