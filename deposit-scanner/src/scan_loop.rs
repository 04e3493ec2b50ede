//! The confirmation-lagged scan loop.
//!
//! Each iteration polls the chain height, derives the safe height, scans
//! `(cursor, safe]` block by block, hands matches to the event sink and then
//! persists `safe` as the new cursor. The cursor is written once per range
//! and only after every block in it was matched and delivered, so a failure
//! anywhere in the range leaves it untouched and the whole range is retried.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    block::Height,
    chain::ChainClient,
    confirmation::ConfirmationPolicy,
    cursor::CursorStore,
    deposit::RangeSummary,
    error::ScanError,
    matcher::{MatchContext, MatcherSet},
    output::EventSink,
    range::RangeScanner,
};

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for the next poll
    Idle,
    /// Fetching the current chain height
    Polling,
    /// Scanning a confirmed range
    Scanning,
    /// Stopped by cancellation
    Cancelled,
}

/// Result of one successful iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// First run: the cursor was set to the current chain height.
    Seeded { height: Height },
    /// Nothing new is deep enough to scan.
    UpToDate {
        current_height: Height,
        safe_height: Option<Height>,
    },
    /// A range was scanned and the cursor moved to its end.
    Scanned(RangeSummary),
}

/// Counters over the lifetime of a loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub iterations: u64,
    pub ranges_scanned: u64,
    pub blocks_scanned: u64,
    pub transactions_scanned: u64,
    pub deposits_emitted: u64,
    pub failed_iterations: u64,
}

enum IdleWake {
    Interval,
    Head(bool),
    Cancelled,
}

/// Scan loop for one monitored address. Owns the cursor.
pub struct ScanLoop {
    client: Arc<dyn ChainClient>,
    scanner: RangeScanner,
    cursor_store: Arc<dyn CursorStore>,
    sink: Arc<dyn EventSink>,
    matchers: MatcherSet,
    policy: ConfirmationPolicy,
    poll_interval: Duration,
    cursor: Option<Height>,
    cursor_loaded: bool,
    state: LoopState,
    heads: Option<watch::Receiver<Height>>,
    stats: ScanStats,
}

impl ScanLoop {
    pub fn new(
        client: Arc<dyn ChainClient>,
        cursor_store: Arc<dyn CursorStore>,
        sink: Arc<dyn EventSink>,
        matchers: MatcherSet,
        policy: ConfirmationPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            scanner: RangeScanner::new(Arc::clone(&client)),
            client,
            cursor_store,
            sink,
            matchers,
            policy,
            poll_interval,
            cursor: None,
            cursor_loaded: false,
            state: LoopState::Idle,
            heads: None,
            stats: ScanStats::default(),
        }
    }

    /// Wake up early whenever the receiver observes a new head.
    pub fn with_head_notifications(mut self, heads: watch::Receiver<Height>) -> Self {
        self.heads = Some(heads);
        self
    }

    /// Ignore the stored cursor and resume scanning at `height`.
    ///
    /// Scanning starts at block 1 at the earliest; the genesis block is
    /// never fetched.
    pub fn with_start_height(mut self, height: Height) -> Self {
        self.cursor = Some(height.saturating_sub(1));
        self.cursor_loaded = true;
        self
    }

    /// Last fully processed height, if known yet.
    pub fn cursor(&self) -> Option<Height> {
        self.cursor
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// Run until `cancel` fires. Only cancellation ends the loop; every other
    /// failure is logged and retried after the poll interval.
    pub async fn run(mut self, cancel: CancellationToken) -> ScanStats {
        info!(
            "Starting scan loop ({} confirmations, {:?} interval, matchers: {:?})",
            self.policy.required_confirmations(),
            self.poll_interval,
            self.matchers.names()
        );

        loop {
            match self.run_iteration(&cancel).await {
                Ok(IterationOutcome::Scanned(summary)) => {
                    if summary.deposits_found > 0 {
                        info!(
                            "Found {} deposits, synced to height {}",
                            summary.deposits_found, summary.end_height
                        );
                    }
                }
                Ok(_) => {}
                Err(ScanError::Cancelled) => break,
                Err(e) => {
                    self.stats.failed_iterations += 1;
                    error!("Scan iteration failed: {}", e);
                }
            }

            if !self.idle(&cancel).await {
                break;
            }
        }

        self.state = LoopState::Cancelled;
        info!(
            "Scan loop stopped at cursor {:?}: {} ranges, {} blocks, {} deposits, {} failed iterations",
            self.cursor,
            self.stats.ranges_scanned,
            self.stats.blocks_scanned,
            self.stats.deposits_emitted,
            self.stats.failed_iterations
        );
        self.stats
    }

    /// One Polling -> Scanning pass. Ends in `Idle`, or in `Cancelled` when
    /// the token fired.
    pub async fn run_iteration(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<IterationOutcome, ScanError> {
        self.stats.iterations += 1;
        let result = self.poll_and_scan(cancel).await;
        self.state = match &result {
            Err(ScanError::Cancelled) => LoopState::Cancelled,
            _ => LoopState::Idle,
        };
        result
    }

    async fn poll_and_scan(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<IterationOutcome, ScanError> {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        if !self.cursor_loaded {
            self.cursor = self.cursor_store.load().await?;
            self.cursor_loaded = true;
        }

        self.transition(LoopState::Polling);
        let current_height = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
            height = self.client.current_height() => height?,
        };
        debug!("Current chain height {}", current_height);

        let Some(cursor) = self.cursor else {
            return self.seed_cursor(current_height).await;
        };

        self.transition(LoopState::Scanning);
        let safe_height = self.policy.safe_height(current_height);
        let to = match safe_height {
            Some(safe) if safe > cursor => safe,
            _ => {
                debug!(
                    "Nothing to scan: cursor {}, safe height {:?}",
                    cursor, safe_height
                );
                return Ok(IterationOutcome::UpToDate {
                    current_height,
                    safe_height,
                });
            }
        };

        let summary = self.scan_range(cursor, to, current_height, cancel).await?;

        self.cursor_store.save(to).await?;
        self.advance_cursor(to);

        self.stats.ranges_scanned += 1;
        self.stats.blocks_scanned += summary.blocks_scanned;
        self.stats.transactions_scanned += summary.transactions_scanned;

        info!(
            "Scanned blocks {}..={} ({} txs, {} deposits) in {}ms",
            summary.start_height,
            summary.end_height,
            summary.transactions_scanned,
            summary.deposits_found,
            summary.duration_ms
        );

        Ok(IterationOutcome::Scanned(summary))
    }

    async fn seed_cursor(&mut self, current_height: Height) -> Result<IterationOutcome, ScanError> {
        info!(
            "No stored cursor, starting at current chain height {}",
            current_height
        );
        self.cursor_store.save(current_height).await?;
        self.cursor = Some(current_height);
        Ok(IterationOutcome::Seeded {
            height: current_height,
        })
    }

    async fn scan_range(
        &mut self,
        cursor: Height,
        to: Height,
        current_height: Height,
        cancel: &CancellationToken,
    ) -> Result<RangeSummary, ScanError> {
        let start = std::time::Instant::now();
        let mut summary = RangeSummary::new(cursor + 1, to);
        let ctx = MatchContext { current_height };

        debug!(
            "Scanning blocks {}..={} (chain height {})",
            cursor + 1,
            to,
            current_height
        );

        let mut blocks = self.scanner.scan(cursor, to);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ScanError::Cancelled),
                next = blocks.next() => next,
            };
            let Some(block) = next else { break };
            let block = block?;

            summary.blocks_scanned += 1;
            summary.transactions_scanned += block.transactions.len() as u64;

            let deposits = self.matchers.match_block(&block, &ctx);
            if deposits.is_empty() {
                continue;
            }

            for deposit in &deposits {
                info!(
                    "Deposit detected: tx={}, from={}, value={}, block={}, confirmations={}",
                    deposit.tx_hash,
                    deposit.from,
                    deposit.value,
                    deposit.block_height,
                    deposit.confirmations
                );
            }

            self.sink
                .emit_batch(&deposits)
                .await
                .map_err(ScanError::Sink)?;
            self.stats.deposits_emitted += deposits.len() as u64;
            summary.add_deposits(&deposits);
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        Ok(summary)
    }

    fn advance_cursor(&mut self, height: Height) {
        match self.cursor {
            Some(cursor) if cursor >= height => {
                warn!("Refusing to move cursor back from {} to {}", cursor, height);
            }
            _ => self.cursor = Some(height),
        }
    }

    /// Wait for the next poll. Returns `false` once cancelled.
    async fn idle(&mut self, cancel: &CancellationToken) -> bool {
        self.transition(LoopState::Idle);

        let wake = tokio::select! {
            biased;
            _ = cancel.cancelled() => IdleWake::Cancelled,
            _ = tokio::time::sleep(self.poll_interval) => IdleWake::Interval,
            open = next_head(self.heads.as_mut()) => IdleWake::Head(open),
        };

        match wake {
            IdleWake::Cancelled => {
                self.state = LoopState::Cancelled;
                false
            }
            IdleWake::Interval => true,
            IdleWake::Head(true) => {
                if let Some(heads) = &self.heads {
                    debug!("Woken by new head {}", *heads.borrow());
                }
                true
            }
            IdleWake::Head(false) => {
                warn!("Head notifications ended, falling back to interval polling");
                self.heads = None;
                true
            }
        }
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            debug!("Scan loop {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}

async fn next_head(heads: Option<&mut watch::Receiver<Height>>) -> bool {
    match heads {
        Some(rx) => rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}
