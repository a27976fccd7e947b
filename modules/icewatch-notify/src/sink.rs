//! Alert delivery backends.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::info;

use icewatch_common::AlertKind;

use crate::payload::AlertPayload;

#[derive(Error, Debug)]
pub enum NotifyError {
    /// Worth retrying: timeouts, connection failures, 429/5xx.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Not worth retrying: bad payload, revoked webhook.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

/// Pluggable alert destination.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, alert: &AlertPayload) -> Result<(), NotifyError>;
}

// --- Webhook sink ---

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts Discord-style embeds to an incoming webhook.
pub struct WebhookSink {
    webhook_url: String,
    http: reqwest::Client,
}

impl WebhookSink {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            http: reqwest::Client::builder()
                .timeout(WEBHOOK_TIMEOUT)
                .build()
                .expect("Failed to build webhook HTTP client"),
        }
    }

    fn embed(alert: &AlertPayload) -> serde_json::Value {
        let fields: Vec<serde_json::Value> = alert
            .excerpts
            .iter()
            .map(|e| {
                let mut value = e.text.clone();
                if let Some(url) = &e.url {
                    value.push_str(&format!("\n[View on {}]({})", e.source, url));
                }
                json!({
                    "name": match &e.author {
                        Some(author) => format!("{} — {}", e.source, author),
                        None => e.source.clone(),
                    },
                    "value": value,
                    "inline": false,
                })
            })
            .collect();

        json!({
            "username": "ICE Activity Monitor",
            "embeds": [{
                "title": alert.title,
                "description": alert.summary,
                "color": alert.color,
                "fields": fields,
                "footer": {
                    "text": "ICE Activity Monitor | Unverified community reporting | Confirm before acting"
                },
            }],
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, alert: &AlertPayload) -> Result<(), NotifyError> {
        let payload = Self::embed(alert);

        let resp = self
            .http
            .post(&self.webhook_url)
            .header("X-Idempotency-Key", &alert.idempotency_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    NotifyError::Transient(e.to_string())
                } else {
                    NotifyError::Permanent(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            Err(NotifyError::Transient(format!(
                "webhook returned {status}: {body}"
            )))
        } else {
            Err(NotifyError::Permanent(format!(
                "webhook returned {status}: {body}"
            )))
        }
    }
}

// --- Log sink ---

/// Dry-run destination: alerts go to the log, nothing leaves the process.
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, alert: &AlertPayload) -> Result<(), NotifyError> {
        let kind = match alert.kind {
            AlertKind::New => "NEW",
            AlertKind::Update => "UPDATE",
        };
        info!(
            idempotency_key = %alert.idempotency_key,
            kind,
            title = %alert.title,
            "DRY RUN: would dispatch alert"
        );
        Ok(())
    }
}
