//! Confirmation-lag arithmetic.
//!
//! A block is safe to scan once `required_confirmations` further blocks have
//! been built on top of it.

use crate::{block::Height, error::ConfigError};

/// Default number of confirmations before a deposit is reported.
pub const DEFAULT_REQUIRED_CONFIRMATIONS: u64 = 12;

/// Highest height considered final enough to scan, or `None` if the chain is
/// still shorter than the confirmation lag.
pub fn safe_height(current_height: Height, required_confirmations: u64) -> Option<Height> {
    current_height.checked_sub(required_confirmations)
}

/// Confirmation count of a block as seen from `current_height`. The block
/// itself counts as the first confirmation.
pub fn confirmations(current_height: Height, block_height: Height) -> u64 {
    current_height.saturating_sub(block_height) + 1
}

/// Validated confirmation requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    required_confirmations: u64,
}

impl ConfirmationPolicy {
    pub fn new(required_confirmations: u64) -> Result<Self, ConfigError> {
        if required_confirmations == 0 {
            return Err(ConfigError::ZeroConfirmations);
        }
        Ok(Self {
            required_confirmations,
        })
    }

    pub fn required_confirmations(&self) -> u64 {
        self.required_confirmations
    }

    pub fn safe_height(&self, current_height: Height) -> Option<Height> {
        safe_height(current_height, self.required_confirmations)
    }
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            required_confirmations: DEFAULT_REQUIRED_CONFIRMATIONS,
        }
    }
}
