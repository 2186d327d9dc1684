//! Backup event notifications.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

pub const EVENT_COMPLETED: &str = "backup.completed";
pub const EVENT_FAILED: &str = "backup.failed";
pub const EVENT_ALERT: &str = "backup.alert";

/// Receives backup lifecycle events. Implementations must not fail the
/// caller: delivery problems are logged and swallowed.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_success(&self, backup_id: &str, size: u64, duration: Duration);

    async fn notify_failure(&self, backup_id: &str, error: &str);

    async fn notify_alert(&self, message: &str);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookPayload {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub details: Details,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Details {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookPayload {
    pub fn success(backup_id: &str, size: u64, duration: Duration) -> Self {
        Self {
            event: EVENT_COMPLETED.to_string(),
            timestamp: Utc::now(),
            backup_id: Some(backup_id.to_string()),
            status: "success".to_string(),
            message: Some(format!("Backup {backup_id} completed successfully")),
            details: Details {
                size_bytes: Some(size),
                duration_ms: Some(duration.as_millis() as u64),
                error: None,
            },
        }
    }

    pub fn failure(backup_id: &str, error: &str) -> Self {
        Self {
            event: EVENT_FAILED.to_string(),
            timestamp: Utc::now(),
            backup_id: Some(backup_id.to_string()),
            status: "failure".to_string(),
            message: Some(format!("Backup {backup_id} failed")),
            details: Details {
                error: Some(error.to_string()),
                ..Details::default()
            },
        }
    }

    pub fn alert(message: &str) -> Self {
        Self {
            event: EVENT_ALERT.to_string(),
            timestamp: Utc::now(),
            backup_id: None,
            status: "alert".to_string(),
            message: Some(message.to_string()),
            details: Details::default(),
        }
    }
}

/// Posts JSON payloads to a single webhook URL.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// `None` when no URL is configured.
    pub fn new(url: &str) -> Option<Self> {
        if url.is_empty() {
            return None;
        }

        let client = match reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .user_agent(concat!("datasaver/", env!("CARGO_PKG_VERSION")))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "Failed to build webhook client, using defaults");
                reqwest::Client::new()
            }
        };

        Some(Self {
            url: url.to_string(),
            client,
        })
    }

    async fn send(&self, payload: WebhookPayload) {
        match self.client.post(&self.url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(event = %payload.event, "Webhook sent");
            }
            Ok(resp) => {
                warn!(event = %payload.event, status = %resp.status(), "Webhook returned error status");
            }
            Err(e) => {
                error!(event = %payload.event, error = %e, "Failed to send webhook");
            }
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_success(&self, backup_id: &str, size: u64, duration: Duration) {
        self.send(WebhookPayload::success(backup_id, size, duration)).await;
    }

    async fn notify_failure(&self, backup_id: &str, error: &str) {
        self.send(WebhookPayload::failure(backup_id, error)).await;
    }

    async fn notify_alert(&self, message: &str) {
        self.send(WebhookPayload::alert(message)).await;
    }
}
