//! `newHeads` subscription used to wake the scan loop early.
//!
//! This never delivers deposits itself. It only publishes the latest head
//! number through a watch channel; the scan loop still polls the node and
//! scans through the regular confirmation-lagged path.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::{sync::watch, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::json_rpc::parse_quantity_u64;
use crate::{block::Height, error::TransportError};

#[derive(Debug, Deserialize)]
struct SubscriptionMessage {
    method: Option<String>,
    params: Option<SubscriptionParams>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionParams {
    result: HeadPayload,
}

#[derive(Debug, Deserialize)]
struct HeadPayload {
    number: String,
}

/// Extract the head number from an `eth_subscription` notification.
///
/// Returns `None` for anything else, e.g. the subscribe acknowledgement.
pub fn parse_head_notification(text: &str) -> Option<Height> {
    let message: SubscriptionMessage = serde_json::from_str(text).ok()?;
    if message.method.as_deref() != Some("eth_subscription") {
        return None;
    }
    parse_quantity_u64(&message.params?.result.number).ok()
}

/// WebSocket `newHeads` subscription with reconnect.
pub struct HeadSubscription {
    url: String,
    reconnect_delay: Duration,
}

impl HeadSubscription {
    pub fn new(url: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self {
            url: url.into(),
            reconnect_delay,
        }
    }

    /// Spawn the subscription task. The returned receiver observes the most
    /// recent head number (0 until the first notification).
    pub fn spawn(self, cancel: CancellationToken) -> (watch::Receiver<Height>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(0);
        let handle = tokio::spawn(async move { self.run(tx, cancel).await });
        (rx, handle)
    }

    async fn run(self, tx: watch::Sender<Height>, cancel: CancellationToken) {
        info!("Starting head subscription on {}", self.url);

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.subscribe_once(&tx) => result,
            };

            match result {
                Ok(()) => debug!("Head subscription closed by node"),
                Err(e) => warn!("Head subscription failed: {}", e),
            }

            if tx.is_closed() {
                debug!("No head listeners left");
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        info!("Head subscription stopped");
    }

    async fn subscribe_once(&self, tx: &watch::Sender<Height>) -> Result<(), TransportError> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        let (mut sender, mut receiver) = stream.split();

        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_subscribe",
            "params": ["newHeads"],
        });
        sender
            .send(Message::Text(request.to_string().into()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        while let Some(message) = receiver.next().await {
            match message.map_err(|e| TransportError::WebSocket(e.to_string()))? {
                Message::Text(text) => {
                    if let Some(height) = parse_head_notification(&text) {
                        debug!("New head {}", height);
                        // Heads can arrive out of order across reconnects.
                        tx.send_if_modified(|current| {
                            if height > *current {
                                *current = height;
                                true
                            } else {
                                false
                            }
                        });
                    }
                }
                // Pings are answered by tungstenite on the next read.
                Message::Close(_) => break,
                _ => {}
            }
        }

        Ok(())
    }
}
