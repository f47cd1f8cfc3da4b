use anyhow::{Context, Result};
use async_nats::Client;
use tracing::{debug, info};

use super::messages::SessionEvent;
use super::EventSink;

/// Publishes session events as JSON to `<prefix>.<session_id>.<event>`
pub struct NatsEventSink {
    client: Client,
    subject_prefix: String,
}

impl NatsEventSink {
    /// Connect to NATS server
    pub async fn connect(url: &str, subject_prefix: impl Into<String>) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self {
            client,
            subject_prefix: subject_prefix.into(),
        })
    }

    pub fn subject_for(&self, event: &SessionEvent) -> String {
        subject_for(&self.subject_prefix, event)
    }
}

pub(crate) fn subject_for(prefix: &str, event: &SessionEvent) -> String {
    format!("{}.{}.{}", prefix, event.session_id(), event.kind())
}

#[async_trait::async_trait]
impl EventSink for NatsEventSink {
    async fn publish(&self, event: &SessionEvent) -> Result<()> {
        let subject = self.subject_for(event);
        let payload = serde_json::to_vec(event)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish session event")?;

        debug!("Published {} to {}", event.kind(), subject);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        info!("Flushing NATS connection");
        self.client.flush().await.context("Failed to flush NATS")?;
        Ok(())
    }
}
