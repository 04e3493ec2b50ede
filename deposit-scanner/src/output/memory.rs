//! In-memory event sink.

use std::sync::Mutex;

use async_trait::async_trait;

use super::EventSink;
use crate::deposit::DepositEvent;

/// Sink that keeps every delivered deposit, optionally failing on demand.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<DepositEvent>>,
    fail: Mutex<bool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deposits delivered so far, in delivery order.
    pub fn events(&self) -> Vec<DepositEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Make subsequent deliveries fail until reset.
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn emit(&self, deposit: &DepositEvent) -> anyhow::Result<()> {
        if *self.fail.lock().unwrap_or_else(|e| e.into_inner()) {
            anyhow::bail!("sink unavailable");
        }
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(deposit.clone());
        Ok(())
    }
}
