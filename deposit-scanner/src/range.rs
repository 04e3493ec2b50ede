//! Ordered block retrieval over a height range.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, warn};

use crate::{
    block::{Block, Height},
    chain::ChainClient,
    error::{ChainError, TransportError},
};

/// Lazily fetches blocks `(from, to]` in increasing height order.
///
/// A block is requested only when the consumer asks for it. A transport
/// failure is yielded once and ends the stream, so nothing past the failed
/// height is ever produced.
pub struct RangeScanner {
    client: Arc<dyn ChainClient>,
}

impl RangeScanner {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self { client }
    }

    pub fn scan(
        &self,
        from_exclusive: Height,
        to_inclusive: Height,
    ) -> BoxStream<'static, Result<Block, TransportError>> {
        let client = Arc::clone(&self.client);

        stream::try_unfold(from_exclusive, move |previous| {
            let client = Arc::clone(&client);
            async move {
                if previous >= to_inclusive {
                    return Ok(None);
                }
                let height = previous + 1;
                let block = fetch_block(client.as_ref(), height).await?;
                Ok::<_, TransportError>(Some((block, height)))
            }
        })
        .boxed()
    }
}

/// Fetch one block, treating absent and undecodable blocks as empty.
async fn fetch_block(client: &dyn ChainClient, height: Height) -> Result<Block, TransportError> {
    match client.block_with_transactions(height).await {
        Ok(Some(block)) => {
            debug!(
                "Fetched block {} ({} transactions)",
                height,
                block.transactions.len()
            );
            Ok(block)
        }
        Ok(None) => {
            warn!("Block {} not returned by node, treating as empty", height);
            Ok(Block::empty(height))
        }
        Err(ChainError::Decode(e)) => {
            warn!("{}, treating as empty", e);
            Ok(Block::empty(height))
        }
        Err(ChainError::Transport(e)) => Err(e),
    }
}
