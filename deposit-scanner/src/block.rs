//! Chain data as seen by the scanner.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Block index on the chain.
pub type Height = u64;

/// A transaction inside a retrieved block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction hash (0x-prefixed hex)
    pub hash: String,

    /// Position of the transaction within its block
    pub index: u32,

    /// Sender address
    pub from: String,

    /// Recipient address. `None` for contract creation.
    pub to: Option<String>,

    /// Transferred value in the smallest native unit
    #[serde(with = "decimal_u256")]
    pub value: U256,
}

/// A block and its transactions, in block order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub height: Height,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// A block with no transactions.
    pub fn empty(height: Height) -> Self {
        Self {
            height,
            transactions: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// Serializes a `U256` as a decimal string so that values above 2^53 survive
/// JSON consumers.
pub mod decimal_u256 {
    use primitive_types::U256;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_dec_str(&s).map_err(|e| D::Error::custom(format!("{:?}", e)))
    }
}
