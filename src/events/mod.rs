//! Session event publishing
//!
//! Events are informational: a failed publish is logged and never affects
//! the session. Without a NATS url, events only go to the log.

mod messages;
mod nats;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::config::NatsConfig;

pub use messages::SessionEvent;
pub use nats::NatsEventSink;

#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &SessionEvent) -> Result<()>;

    /// Push out anything buffered
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Writes events to the tracing log only
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventSink;

#[async_trait::async_trait]
impl EventSink for LogEventSink {
    async fn publish(&self, event: &SessionEvent) -> Result<()> {
        info!(event = event.kind(), session_id = event.session_id(), "Session event");
        Ok(())
    }
}

/// Build the sink described by `config`
pub async fn connect(config: &NatsConfig) -> Result<Arc<dyn EventSink>> {
    match &config.url {
        Some(url) => Ok(Arc::new(
            NatsEventSink::connect(url, config.subject_prefix.clone()).await?,
        )),
        None => Ok(Arc::new(LogEventSink)),
    }
}
