//! Webhook event sink.
//!
//! Posts deposits to a configured webhook URL.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{DepositNotification, EventSink};
use crate::deposit::DepositEvent;

/// Sink that POSTs deposits to a webhook URL.
pub struct WebhookSink {
    client: Client,
    url: String,
    /// Number of retries on failure
    max_retries: u32,
    /// Base retry delay, multiplied by the attempt number
    retry_delay: Duration,
}

impl WebhookSink {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Create a webhook sink with custom retry settings.
    pub fn with_retries(url: &str, max_retries: u32, retry_delay: Duration) -> anyhow::Result<Self> {
        let mut sink = Self::new(url)?;
        sink.max_retries = max_retries;
        sink.retry_delay = retry_delay;
        Ok(sink)
    }

    async fn post_with_retry<T: Serialize + ?Sized>(
        &self,
        body: &T,
        description: &str,
    ) -> anyhow::Result<()> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tracing::warn!("Webhook retry {} for {}", attempt, description);
                tokio::time::sleep(self.retry_delay * attempt).await;
            }

            match self.post_once(body).await {
                Ok(()) => {
                    tracing::debug!("Posted {} to webhook", description);
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Unknown webhook error")))
    }

    async fn post_once<T: Serialize + ?Sized>(&self, body: &T) -> anyhow::Result<()> {
        let response = self.client.post(&self.url).json(body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Webhook returned status {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            );
        }

        Ok(())
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    async fn emit(&self, deposit: &DepositEvent) -> anyhow::Result<()> {
        let description = format!("deposit {}", deposit.deposit_id());
        self.post_with_retry(&DepositNotification::new(deposit), &description)
            .await
    }

    async fn emit_batch(&self, deposits: &[DepositEvent]) -> anyhow::Result<()> {
        if deposits.is_empty() {
            return Ok(());
        }

        // Post batch as array
        let batch: Vec<DepositNotification<'_>> =
            deposits.iter().map(DepositNotification::new).collect();
        let description = format!("{} deposits", batch.len());
        self.post_with_retry(batch.as_slice(), &description).await
    }
}
