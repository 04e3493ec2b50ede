//! Detected deposit types.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::block::{decimal_u256, Height};

/// Which matcher produced a deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositKind {
    /// Plain value transfer to the target address
    Native,
}

/// A confirmed transfer to the monitored address.
///
/// Delivery is at-least-once; consumers deduplicate by `tx_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    /// Transaction hash
    pub tx_hash: String,

    /// Sender address
    pub from: String,

    /// Recipient address as reported by the node
    pub to: String,

    /// Amount in the smallest native unit
    #[serde(with = "decimal_u256")]
    pub value: U256,

    /// Block height containing the transaction
    pub block_height: Height,

    /// Position of the transaction within the block
    pub tx_index: u32,

    /// Number of confirmations at detection time
    pub confirmations: u64,

    pub kind: DepositKind,
}

impl DepositEvent {
    /// Deduplication key for downstream consumers.
    pub fn deposit_id(&self) -> String {
        self.tx_hash.to_ascii_lowercase()
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Summary of one successfully scanned range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSummary {
    /// First height scanned
    pub start_height: Height,

    /// Last height scanned; the cursor moved here
    pub end_height: Height,

    pub blocks_scanned: u64,

    pub transactions_scanned: u64,

    pub deposits_found: u64,

    /// Sum of deposit values
    pub total_value: U256,

    /// Scan duration in milliseconds
    pub duration_ms: u64,
}

impl RangeSummary {
    pub fn new(start_height: Height, end_height: Height) -> Self {
        Self {
            start_height,
            end_height,
            ..Default::default()
        }
    }

    /// Account for the deposits found in one block.
    pub fn add_deposits(&mut self, deposits: &[DepositEvent]) {
        for deposit in deposits {
            self.total_value = self.total_value.saturating_add(deposit.value);
        }
        self.deposits_found += deposits.len() as u64;
    }
}
