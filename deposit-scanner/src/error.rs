//! Error types for the deposit scanner.
//!
//! Everything except [`ConfigError`] is retryable: the scan loop reports the
//! failure, leaves its cursor where it was and tries again on the next poll.

use std::time::Duration;

use thiserror::Error;

use crate::block::Height;

/// Failure talking to the chain node.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Malformed RPC response: {0}")]
    Malformed(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Http(err.to_string())
    }
}

/// A block was retrieved but its payload could not be understood.
#[derive(Debug, Error)]
#[error("Failed to decode block {height}: {reason}")]
pub struct DecodeError {
    pub height: Height,
    pub reason: String,
}

/// Errors returned by block retrieval.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Cursor persistence failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Cursor I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cursor serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Invalid configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("required_confirmations must be a positive integer")]
    ZeroConfirmations,

    #[error("{0} must not be empty")]
    Missing(&'static str),

    #[error("target_address must be 0x followed by 40 hex characters, got {0:?}")]
    InvalidAddress(String),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("webhook_url is required when output_mode = webhook")]
    MissingWebhookUrl,
}

/// Reasons a scan iteration ended without advancing the cursor.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Event sink error: {0:#}")]
    Sink(anyhow::Error),

    #[error("Scan cancelled")]
    Cancelled,
}

impl ScanError {
    /// Whether the loop should try again on the next poll.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ScanError::Cancelled)
    }
}
