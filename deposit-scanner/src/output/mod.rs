//! Event sinks for detected deposits.
//!
//! - Stdout (JSON lines)
//! - Webhook (HTTP POST)
//! - Memory (collects events in process)

mod memory;
mod stdout;
mod webhook;

pub use memory::MemorySink;
pub use stdout::StdoutSink;
pub use webhook::WebhookSink;

use async_trait::async_trait;
use serde::Serialize;

use crate::{config::OutputMode, deposit::DepositEvent};

/// Receives deposits in block order. Delivery is at-least-once.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver a single deposit.
    async fn emit(&self, deposit: &DepositEvent) -> anyhow::Result<()>;

    /// Deliver the deposits of one block.
    async fn emit_batch(&self, deposits: &[DepositEvent]) -> anyhow::Result<()> {
        for deposit in deposits {
            self.emit(deposit).await?;
        }
        Ok(())
    }
}

/// Wire form of a delivered deposit.
#[derive(Debug, Serialize)]
pub struct DepositNotification<'a> {
    #[serde(flatten)]
    pub deposit: &'a DepositEvent,

    /// Timestamp of delivery (RFC 3339)
    pub detected_at: String,
}

impl<'a> DepositNotification<'a> {
    pub fn new(deposit: &'a DepositEvent) -> Self {
        Self {
            deposit,
            detected_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Create an event sink based on configuration.
pub fn create_sink(
    output_mode: &OutputMode,
    webhook_url: Option<&str>,
    pretty: bool,
) -> anyhow::Result<Box<dyn EventSink>> {
    match output_mode {
        OutputMode::Stdout if pretty => Ok(Box::new(StdoutSink::pretty())),
        OutputMode::Stdout => Ok(Box::new(StdoutSink::new())),
        OutputMode::Webhook => {
            let url = webhook_url
                .ok_or_else(|| anyhow::anyhow!("webhook_url required for webhook output mode"))?;
            Ok(Box::new(WebhookSink::new(url)?))
        }
    }
}
