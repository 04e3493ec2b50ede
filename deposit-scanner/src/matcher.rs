//! Deposit matching.
//!
//! Matchers inspect one block at a time and are free of side effects. New
//! detection strategies plug in as additional [`DepositMatcher`]
//! implementations composed through a [`MatcherSet`]; the scan loop does not
//! change.

use crate::{
    block::{Block, Height},
    confirmation::confirmations,
    deposit::{DepositEvent, DepositKind},
};

/// Per-iteration information a matcher needs besides the block.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext {
    /// Chain height observed by the poll that started this scan
    pub current_height: Height,
}

/// A strategy for finding deposits in a block.
pub trait DepositMatcher: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// All deposits in `block`, in transaction order.
    fn matches(&self, block: &Block, ctx: &MatchContext) -> Vec<DepositEvent>;
}

/// Matches plain value transfers to one address.
#[derive(Debug, Clone)]
pub struct NativeTransferMatcher {
    target_address: String,
}

impl NativeTransferMatcher {
    pub fn new(target_address: impl Into<String>) -> Self {
        Self {
            target_address: target_address.into(),
        }
    }
}

impl DepositMatcher for NativeTransferMatcher {
    fn name(&self) -> &'static str {
        "native"
    }

    fn matches(&self, block: &Block, ctx: &MatchContext) -> Vec<DepositEvent> {
        match_native_transfers(block, &self.target_address, ctx.current_height)
    }
}

/// Transfers in `block` with a nonzero value to `target_address`.
///
/// Addresses are compared without regard to letter case, so checksummed and
/// lowercase forms are equivalent.
pub fn match_native_transfers(
    block: &Block,
    target_address: &str,
    current_height: Height,
) -> Vec<DepositEvent> {
    block
        .transactions
        .iter()
        .filter(|tx| !tx.value.is_zero())
        .filter_map(|tx| {
            let to = tx.to.as_deref()?;
            if !to.eq_ignore_ascii_case(target_address) {
                return None;
            }
            Some(DepositEvent {
                tx_hash: tx.hash.clone(),
                from: tx.from.clone(),
                to: to.to_string(),
                value: tx.value,
                block_height: block.height,
                tx_index: tx.index,
                confirmations: confirmations(current_height, block.height),
                kind: DepositKind::Native,
            })
        })
        .collect()
}

/// Runs several matchers over each block.
#[derive(Default)]
pub struct MatcherSet {
    matchers: Vec<Box<dyn DepositMatcher>>,
}

impl MatcherSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, matcher: impl DepositMatcher + 'static) -> Self {
        self.push(Box::new(matcher));
        self
    }

    pub fn push(&mut self, matcher: Box<dyn DepositMatcher>) {
        self.matchers.push(matcher);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.matchers.iter().map(|m| m.name()).collect()
    }

    /// Events from every matcher, ordered by transaction index. Ties keep
    /// matcher registration order.
    pub fn match_block(&self, block: &Block, ctx: &MatchContext) -> Vec<DepositEvent> {
        let mut events: Vec<DepositEvent> = self
            .matchers
            .iter()
            .flat_map(|matcher| matcher.matches(block, ctx))
            .collect();
        events.sort_by_key(|event| event.tx_index);
        events
    }
}
