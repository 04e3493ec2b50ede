//! Deposit Scanner
//!
//! Watches an EVM-compatible chain for native-value transfers into a single
//! monitored address and reports each one exactly when it has collected
//! the required number of confirmations.
//!
//! - Confirmation-lagged scanning: only blocks at or below
//!   `current - required_confirmations` are inspected
//! - Durable cursor so a restarted scanner resumes where it left off
//! - Pluggable matchers and event sinks (stdout, webhook)
//! - Optional `newHeads` WebSocket subscription to cut polling latency
//!
//! # Architecture
//!
//! A [`ScanLoop`] polls `eth_blockNumber` through a [`ChainClient`], scans
//! `(cursor, safe_height]` block by block with a [`RangeScanner`], runs every
//! block through a [`MatcherSet`] and hands the results to an [`EventSink`].
//! Only after the whole range succeeded is `safe_height` written to the
//! [`CursorStore`]. Delivery is at-least-once; consumers deduplicate on the
//! transaction hash.

pub mod block;
pub mod chain;
pub mod config;
pub mod confirmation;
pub mod cursor;
pub mod deposit;
pub mod error;
pub mod matcher;
pub mod output;
pub mod range;
pub mod scan_loop;

pub use block::{Block, Height, Transaction};
pub use chain::{ChainClient, JsonRpcChainClient, TimeoutChainClient};
pub use config::{OutputMode, ScannerConfig};
pub use confirmation::ConfirmationPolicy;
pub use cursor::{CursorStore, FileCursorStore, MemoryCursorStore};
pub use deposit::{DepositEvent, DepositKind, RangeSummary};
pub use error::{ChainError, ConfigError, ScanError, StorageError, TransportError};
pub use matcher::{DepositMatcher, MatcherSet, NativeTransferMatcher};
pub use output::EventSink;
pub use range::RangeScanner;
pub use scan_loop::{IterationOutcome, LoopState, ScanLoop, ScanStats};
