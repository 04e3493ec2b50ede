//! JSON-RPC 2.0 chain client over HTTP.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use primitive_types::U256;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{trace, warn};

use super::ChainClient;
use crate::{
    block::{Block, Height, Transaction},
    error::{ChainError, DecodeError, TransportError},
};

/// JSON-RPC 2.0 request
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Block as returned by `eth_getBlockByNumber` with full transactions.
#[derive(Debug, Deserialize)]
struct RpcBlock {
    #[serde(default)]
    transactions: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    hash: String,
    from: String,
    to: Option<String>,
    value: String,
    transaction_index: Option<String>,
}

/// Chain client for an Ethereum-style JSON-RPC endpoint.
pub struct JsonRpcChainClient {
    client: reqwest::Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl JsonRpcChainClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, TransportError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        trace!("RPC {} -> {}", method, self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Http(format!(
                "{} returned status {}",
                method,
                response.status()
            )));
        }

        let response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(TransportError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        serde_json::from_value(response.result.unwrap_or(Value::Null))
            .map_err(|e| TransportError::Malformed(format!("{}: {}", method, e)))
    }
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn current_height(&self) -> Result<Height, TransportError> {
        let quantity: String = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity_u64(&quantity).map_err(TransportError::Malformed)
    }

    async fn block_with_transactions(&self, height: Height) -> Result<Option<Block>, ChainError> {
        let raw: Option<Value> = self
            .call("eth_getBlockByNumber", json!([format!("{:#x}", height), true]))
            .await?;

        match raw {
            Some(raw) => decode_block(height, raw).map(Some).map_err(ChainError::from),
            None => Ok(None),
        }
    }
}

/// Decode a raw block. Transactions that cannot be decoded are skipped so a
/// single odd record does not hide the rest of the block.
fn decode_block(height: Height, raw: Value) -> Result<Block, DecodeError> {
    let rpc_block: RpcBlock = serde_json::from_value(raw).map_err(|e| DecodeError {
        height,
        reason: e.to_string(),
    })?;

    let mut transactions = Vec::with_capacity(rpc_block.transactions.len());
    for (position, raw_tx) in rpc_block.transactions.into_iter().enumerate() {
        match decode_transaction(position, raw_tx) {
            Ok(tx) => transactions.push(tx),
            Err(reason) => {
                warn!(
                    "Skipping undecodable transaction {} in block {}: {}",
                    position, height, reason
                );
            }
        }
    }

    Ok(Block {
        height,
        transactions,
    })
}

fn decode_transaction(position: usize, raw: Value) -> Result<Transaction, String> {
    // A block fetched without full transactions carries bare hashes.
    if raw.is_string() {
        return Err("transaction hash without body".to_string());
    }

    let tx: RpcTransaction = serde_json::from_value(raw).map_err(|e| e.to_string())?;
    let index = match tx.transaction_index.as_deref() {
        Some(quantity) => u32::try_from(parse_quantity_u64(quantity)?)
            .map_err(|_| format!("transaction index out of range: {}", quantity))?,
        None => u32::try_from(position).map_err(|e| e.to_string())?,
    };

    Ok(Transaction {
        hash: tx.hash,
        index,
        from: tx.from,
        to: tx.to.filter(|to| !to.is_empty()),
        value: parse_quantity_u256(&tx.value)?,
    })
}

fn strip_hex_prefix(quantity: &str) -> Result<&str, String> {
    let digits = quantity
        .strip_prefix("0x")
        .or_else(|| quantity.strip_prefix("0X"))
        .ok_or_else(|| format!("quantity {:?} is missing 0x prefix", quantity))?;
    if digits.is_empty() {
        return Err(format!("quantity {:?} has no digits", quantity));
    }
    Ok(digits)
}

/// Parse a hex-encoded JSON-RPC quantity into a `u64`.
pub fn parse_quantity_u64(quantity: &str) -> Result<u64, String> {
    let digits = strip_hex_prefix(quantity)?;
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid quantity {:?}: {}", quantity, e))
}

/// Parse a hex-encoded JSON-RPC quantity into a `U256`.
pub fn parse_quantity_u256(quantity: &str) -> Result<U256, String> {
    let digits = strip_hex_prefix(quantity)?;
    U256::from_str_radix(digits, 16)
        .map_err(|e| format!("invalid quantity {:?}: {:?}", quantity, e))
}
