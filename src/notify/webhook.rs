//! Webhook sink: POSTs each event as JSON to a configured URL.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{EventSink, LedgerEvent};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Body sent to the webhook. `event_id` lets receivers drop duplicates.
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    event_id: Uuid,
    sent_at: chrono::DateTime<chrono::Utc>,
    #[serde(flatten)]
    event: &'a LedgerEvent,
}

pub struct WebhookSink {
    client: Client,
    url: SecretString,
}

impl WebhookSink {
    pub fn new(url: SecretString) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    async fn publish(&self, event: &LedgerEvent) -> Result<()> {
        let envelope = Envelope {
            event_id: Uuid::new_v4(),
            sent_at: chrono::Utc::now(),
            event,
        };

        let resp = self
            .client
            .post(self.url.expose_secret())
            .json(&envelope)
            .send()
            .await
            .context("Webhook request failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("Webhook returned {status} for {}", event.name());
        }

        debug!(event = event.name(), event_id = %envelope.event_id, "Webhook delivered");
        Ok(())
    }
}
