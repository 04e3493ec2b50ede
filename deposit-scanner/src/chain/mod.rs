//! Access to the chain node.

mod heads;
mod json_rpc;

pub use heads::{parse_head_notification, HeadSubscription};
pub use json_rpc::{parse_quantity_u256, parse_quantity_u64, JsonRpcChainClient};

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    block::{Block, Height},
    error::{ChainError, TransportError},
};

/// Node operations the scanner depends on.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Height of the current chain tip.
    async fn current_height(&self) -> Result<Height, TransportError>;

    /// Fetch a block with full transaction objects. `Ok(None)` if the node
    /// does not know the block.
    async fn block_with_transactions(&self, height: Height) -> Result<Option<Block>, ChainError>;
}

/// Bounds every call of the wrapped client by a fixed timeout.
pub struct TimeoutChainClient<C> {
    inner: C,
    timeout: Duration,
}

impl<C: ChainClient> TimeoutChainClient<C> {
    pub fn new(inner: C, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<C: ChainClient> ChainClient for TimeoutChainClient<C> {
    async fn current_height(&self) -> Result<Height, TransportError> {
        tokio::time::timeout(self.timeout, self.inner.current_height())
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
    }

    async fn block_with_transactions(&self, height: Height) -> Result<Option<Block>, ChainError> {
        tokio::time::timeout(self.timeout, self.inner.block_with_transactions(height))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
    }
}
