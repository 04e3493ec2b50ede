//! Configuration for the deposit scanner.

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::{
    confirmation::{ConfirmationPolicy, DEFAULT_REQUIRED_CONFIRMATIONS},
    error::ConfigError,
};

/// Output mode for detected deposits.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Print deposits to stdout as JSON lines
    #[default]
    Stdout,
    /// POST deposits to a webhook URL
    Webhook,
}

/// Scanner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// JSON-RPC HTTP endpoint of the node
    #[serde(default = "default_rpc_endpoint")]
    pub rpc_endpoint: String,

    /// Optional WebSocket endpoint for `newHeads` wake-ups
    #[serde(default)]
    pub ws_endpoint: Option<String>,

    /// Address whose incoming transfers are reported
    pub target_address: String,

    /// Blocks required on top of a block before it is scanned
    #[serde(default = "default_required_confirmations")]
    pub required_confirmations: u64,

    /// Polling interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound for a single RPC call in milliseconds
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// State file for persisting the scan cursor
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Output mode for detected deposits
    #[serde(default)]
    pub output_mode: OutputMode,

    /// Webhook URL (required if output_mode = webhook)
    pub webhook_url: Option<String>,

    /// Pretty-print stdout output
    #[serde(default)]
    pub pretty_output: bool,
}

fn default_rpc_endpoint() -> String {
    "http://localhost:8545".to_string()
}

fn default_required_confirmations() -> u64 {
    DEFAULT_REQUIRED_CONFIRMATIONS
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

fn default_state_file() -> PathBuf {
    PathBuf::from("scanner_state.json")
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint: default_rpc_endpoint(),
            ws_endpoint: None,
            target_address: String::new(),
            required_confirmations: default_required_confirmations(),
            poll_interval_ms: default_poll_interval_ms(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            state_file: default_state_file(),
            output_mode: OutputMode::default(),
            webhook_url: None,
            pretty_output: false,
        }
    }
}

impl ScannerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ScannerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_endpoint.trim().is_empty() {
            return Err(ConfigError::Missing("rpc_endpoint"));
        }

        if self.target_address.trim().is_empty() {
            return Err(ConfigError::Missing("target_address"));
        }
        if !is_hex_address(&self.target_address) {
            return Err(ConfigError::InvalidAddress(self.target_address.clone()));
        }

        ConfirmationPolicy::new(self.required_confirmations)?;

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration("poll_interval_ms"));
        }
        if self.rpc_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("rpc_timeout_ms"));
        }

        if let Some(ws) = &self.ws_endpoint {
            if ws.trim().is_empty() {
                return Err(ConfigError::Missing("ws_endpoint"));
            }
        }

        if self.output_mode == OutputMode::Webhook && self.webhook_url.is_none() {
            return Err(ConfigError::MissingWebhookUrl);
        }

        Ok(())
    }

    pub fn confirmation_policy(&self) -> Result<ConfirmationPolicy, ConfigError> {
        ConfirmationPolicy::new(self.required_confirmations)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// `0x` followed by 40 hex digits, in any letter case.
fn is_hex_address(address: &str) -> bool {
    address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}
