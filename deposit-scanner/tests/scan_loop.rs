//! Scan loop behavior against an in-memory chain.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use deposit_scanner::{
    block::{Block, Height, Transaction},
    chain::ChainClient,
    confirmation::ConfirmationPolicy,
    cursor::{CursorStore, MemoryCursorStore},
    error::{ChainError, ScanError, StorageError, TransportError},
    matcher::{MatcherSet, NativeTransferMatcher},
    output::MemorySink,
    scan_loop::{IterationOutcome, LoopState, ScanLoop},
};
use primitive_types::U256;
use tokio_util::sync::CancellationToken;

const TARGET: &str = "0x52908400098527886e0f7030069857d2e4169ee7";
const OTHER: &str = "0x1111111111111111111111111111111111111111";

// ============================================================================
// Test doubles
// ============================================================================

#[derive(Default)]
struct MockChain {
    height: Mutex<Height>,
    blocks: Mutex<HashMap<Height, Block>>,
    fail_at: Mutex<Option<Height>>,
    hang_at: Mutex<Option<Height>>,
    fetched: Mutex<Vec<Height>>,
}

impl MockChain {
    fn at_height(height: Height) -> Arc<Self> {
        let chain = Self::default();
        *chain.height.lock().unwrap() = height;
        Arc::new(chain)
    }

    fn set_height(&self, height: Height) {
        *self.height.lock().unwrap() = height;
    }

    fn fail_at(&self, height: Option<Height>) {
        *self.fail_at.lock().unwrap() = height;
    }

    fn hang_at(&self, height: Option<Height>) {
        *self.hang_at.lock().unwrap() = height;
    }

    fn insert(&self, block: Block) {
        self.blocks.lock().unwrap().insert(block.height, block);
    }

    fn fetched(&self) -> Vec<Height> {
        self.fetched.lock().unwrap().clone()
    }

    fn clear_fetched(&self) {
        self.fetched.lock().unwrap().clear();
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn current_height(&self) -> Result<Height, TransportError> {
        Ok(*self.height.lock().unwrap())
    }

    async fn block_with_transactions(&self, height: Height) -> Result<Option<Block>, ChainError> {
        self.fetched.lock().unwrap().push(height);
        let hangs = *self.hang_at.lock().unwrap() == Some(height);
        if hangs {
            std::future::pending::<()>().await;
        }
        if *self.fail_at.lock().unwrap() == Some(height) {
            return Err(TransportError::Http(format!("node dropped request for {}", height)).into());
        }
        let block = self.blocks.lock().unwrap().get(&height).cloned();
        Ok(Some(block.unwrap_or_else(|| Block::empty(height))))
    }
}

/// Chain whose height endpoint is down.
struct UnreachableChain;

#[async_trait]
impl ChainClient for UnreachableChain {
    async fn current_height(&self) -> Result<Height, TransportError> {
        Err(TransportError::Http("connection refused".to_string()))
    }

    async fn block_with_transactions(&self, _height: Height) -> Result<Option<Block>, ChainError> {
        Err(TransportError::Http("connection refused".to_string()).into())
    }
}

/// Chain whose height request never answers.
struct StalledChain;

#[async_trait]
impl ChainClient for StalledChain {
    async fn current_height(&self) -> Result<Height, TransportError> {
        std::future::pending().await
    }

    async fn block_with_transactions(&self, height: Height) -> Result<Option<Block>, ChainError> {
        Ok(Some(Block::empty(height)))
    }
}

/// Store whose first loads fail.
struct FlakyStore {
    load_failures: Mutex<u32>,
    inner: MemoryCursorStore,
}

#[async_trait]
impl CursorStore for FlakyStore {
    async fn load(&self) -> Result<Option<Height>, StorageError> {
        {
            let mut failures = self.load_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(StorageError::Io(std::io::Error::other("disk not mounted")));
            }
        }
        self.inner.load().await
    }

    async fn save(&self, height: Height) -> Result<(), StorageError> {
        self.inner.save(height).await
    }
}

/// Store that loads fine but refuses to save.
struct ReadOnlyStore {
    height: Height,
}

#[async_trait]
impl CursorStore for ReadOnlyStore {
    async fn load(&self) -> Result<Option<Height>, StorageError> {
        Ok(Some(self.height))
    }

    async fn save(&self, _height: Height) -> Result<(), StorageError> {
        Err(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only filesystem",
        )))
    }
}

fn transfer(hash: &str, index: u32, to: &str, value: u64) -> Transaction {
    Transaction {
        hash: hash.to_string(),
        index,
        from: OTHER.to_string(),
        to: Some(to.to_string()),
        value: U256::from(value),
    }
}

fn scan_loop(
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn CursorStore>,
    sink: Arc<MemorySink>,
) -> ScanLoop {
    ScanLoop::new(
        chain,
        store,
        sink,
        MatcherSet::new().with(NativeTransferMatcher::new(TARGET)),
        ConfirmationPolicy::new(12).unwrap(),
        Duration::from_secs(1),
    )
}

fn chain_with_deposits() -> Arc<MockChain> {
    let chain = MockChain::at_height(100);
    chain.insert(Block {
        height: 83,
        transactions: vec![
            transfer("0xb2", 2, TARGET, 7),
            transfer("0xb0", 0, OTHER, 1_000),
            transfer("0xb1", 1, TARGET, 5),
        ],
    });
    chain.insert(Block {
        height: 86,
        transactions: vec![transfer("0xc0", 0, TARGET, 0)],
    });
    chain.insert(Block {
        height: 88,
        transactions: vec![transfer("0xd0", 4, TARGET, 1)],
    });
    chain.insert(Block {
        height: 89,
        transactions: vec![transfer("0xe0", 0, TARGET, 9)],
    });
    chain
}

// ============================================================================
// Range scanning
// ============================================================================

#[tokio::test]
async fn test_scans_confirmed_range_in_order() {
    let chain = chain_with_deposits();
    let store = Arc::new(MemoryCursorStore::with_height(80));
    let sink = Arc::new(MemorySink::new());
    let mut scan_loop = scan_loop(chain.clone(), store.clone(), sink.clone());

    let outcome = scan_loop
        .run_iteration(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(chain.fetched(), (81..=88).collect::<Vec<_>>());
    assert_eq!(scan_loop.cursor(), Some(88));
    assert_eq!(store.saves(), vec![88]);
    assert_eq!(scan_loop.state(), LoopState::Idle);

    let IterationOutcome::Scanned(summary) = outcome else {
        panic!("expected a scanned range");
    };
    assert_eq!(summary.start_height, 81);
    assert_eq!(summary.end_height, 88);
    assert_eq!(summary.blocks_scanned, 8);
    assert_eq!(summary.transactions_scanned, 5);
    assert_eq!(summary.deposits_found, 3);
    assert_eq!(summary.total_value, U256::from(13u64));

    let events = sink.events();
    let hashes: Vec<_> = events.iter().map(|e| e.tx_hash.as_str()).collect();
    assert_eq!(hashes, vec!["0xb1", "0xb2", "0xd0"]);
    assert_eq!(events[0].confirmations, 18);
    assert_eq!(events[2].confirmations, 13);
    assert!(events.iter().all(|e| e.confirmations >= 12));
}

#[tokio::test]
async fn test_failure_mid_range_leaves_cursor_and_retries_whole_range() {
    let chain = chain_with_deposits();
    chain.fail_at(Some(85));
    let store = Arc::new(MemoryCursorStore::with_height(80));
    let sink = Arc::new(MemorySink::new());
    let mut scan_loop = scan_loop(chain.clone(), store.clone(), sink.clone());
    let cancel = CancellationToken::new();

    let err = scan_loop.run_iteration(&cancel).await.unwrap_err();
    assert!(matches!(err, ScanError::Transport(_)));
    assert!(err.is_retryable());
    assert_eq!(chain.fetched(), vec![81, 82, 83, 84, 85]);
    assert_eq!(scan_loop.cursor(), Some(80));
    assert!(store.saves().is_empty());
    assert_eq!(scan_loop.state(), LoopState::Idle);

    // Block 83 was delivered before the failure and is delivered again.
    assert_eq!(sink.events().len(), 2);

    chain.fail_at(None);
    chain.clear_fetched();
    scan_loop.run_iteration(&cancel).await.unwrap();

    assert_eq!(chain.fetched(), (81..=88).collect::<Vec<_>>());
    assert_eq!(scan_loop.cursor(), Some(88));
    assert_eq!(store.saves(), vec![88]);
    assert_eq!(sink.events().len(), 5);
}

#[tokio::test]
async fn test_rescan_yields_identical_events() {
    let chain = chain_with_deposits();
    let cancel = CancellationToken::new();

    let first = Arc::new(MemorySink::new());
    let mut scan_loop_a = scan_loop(
        chain.clone(),
        Arc::new(MemoryCursorStore::with_height(80)),
        first.clone(),
    );
    scan_loop_a.run_iteration(&cancel).await.unwrap();

    let second = Arc::new(MemorySink::new());
    let mut scan_loop_b = scan_loop(
        chain.clone(),
        Arc::new(MemoryCursorStore::with_height(80)),
        second.clone(),
    );
    scan_loop_b.run_iteration(&cancel).await.unwrap();

    assert_eq!(first.events(), second.events());
}

#[tokio::test]
async fn test_cursor_only_moves_forward() {
    let chain = chain_with_deposits();
    let store = Arc::new(MemoryCursorStore::with_height(80));
    let sink = Arc::new(MemorySink::new());
    let mut scan_loop = scan_loop(chain.clone(), store.clone(), sink.clone());
    let cancel = CancellationToken::new();

    scan_loop.run_iteration(&cancel).await.unwrap();
    assert_eq!(scan_loop.cursor(), Some(88));

    // Node falls behind (e.g. a lagging replica behind a load balancer).
    chain.set_height(95);
    chain.clear_fetched();
    let outcome = scan_loop.run_iteration(&cancel).await.unwrap();
    assert_eq!(
        outcome,
        IterationOutcome::UpToDate {
            current_height: 95,
            safe_height: Some(83),
        }
    );
    assert!(chain.fetched().is_empty());
    assert_eq!(scan_loop.cursor(), Some(88));

    chain.set_height(101);
    scan_loop.run_iteration(&cancel).await.unwrap();
    assert_eq!(chain.fetched(), vec![89]);
    assert_eq!(scan_loop.cursor(), Some(89));
    assert_eq!(store.saves(), vec![88, 89]);

    let events = sink.events();
    assert_eq!(events.last().unwrap().tx_hash, "0xe0");
    assert_eq!(events.last().unwrap().confirmations, 13);
}

#[tokio::test]
async fn test_zero_value_transfers_are_not_deposits() {
    let chain = chain_with_deposits();
    let sink = Arc::new(MemorySink::new());
    let mut scan_loop = scan_loop(
        chain,
        Arc::new(MemoryCursorStore::with_height(85)),
        sink.clone(),
    );

    scan_loop
        .run_iteration(&CancellationToken::new())
        .await
        .unwrap();

    let hashes: Vec<_> = sink.events().into_iter().map(|e| e.tx_hash).collect();
    assert_eq!(hashes, vec!["0xd0".to_string()]);
}

// ============================================================================
// Cursor seeding and shallow chains
// ============================================================================

#[tokio::test]
async fn test_first_run_seeds_to_current_height() {
    let chain = chain_with_deposits();
    let store = Arc::new(MemoryCursorStore::new());
    let sink = Arc::new(MemorySink::new());
    let mut scan_loop = scan_loop(chain.clone(), store.clone(), sink.clone());
    let cancel = CancellationToken::new();

    let outcome = scan_loop.run_iteration(&cancel).await.unwrap();
    assert_eq!(outcome, IterationOutcome::Seeded { height: 100 });
    assert_eq!(store.saves(), vec![100]);
    assert!(chain.fetched().is_empty());

    // Nothing becomes scannable until block 101 has 12 confirmations.
    chain.set_height(112);
    assert!(matches!(
        scan_loop.run_iteration(&cancel).await.unwrap(),
        IterationOutcome::UpToDate { .. }
    ));

    chain.set_height(113);
    scan_loop.run_iteration(&cancel).await.unwrap();
    assert_eq!(chain.fetched(), vec![101]);
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn test_chain_shorter_than_confirmation_depth() {
    let chain = MockChain::at_height(5);
    let store = Arc::new(MemoryCursorStore::with_height(0));
    let mut scan_loop = scan_loop(chain.clone(), store.clone(), Arc::new(MemorySink::new()));

    let outcome = scan_loop
        .run_iteration(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        IterationOutcome::UpToDate {
            current_height: 5,
            safe_height: None,
        }
    );
    assert!(chain.fetched().is_empty());
    assert!(store.saves().is_empty());
}

// ============================================================================
// Failures that must not move the cursor
// ============================================================================

#[tokio::test]
async fn test_sink_failure_leaves_cursor() {
    let chain = chain_with_deposits();
    let store = Arc::new(MemoryCursorStore::with_height(80));
    let sink = Arc::new(MemorySink::new());
    sink.set_failing(true);
    let mut scan_loop = scan_loop(chain.clone(), store.clone(), sink.clone());
    let cancel = CancellationToken::new();

    let err = scan_loop.run_iteration(&cancel).await.unwrap_err();
    assert!(matches!(err, ScanError::Sink(_)));
    assert_eq!(scan_loop.cursor(), Some(80));
    assert!(store.saves().is_empty());

    sink.set_failing(false);
    scan_loop.run_iteration(&cancel).await.unwrap();
    assert_eq!(scan_loop.cursor(), Some(88));
    assert_eq!(sink.events().len(), 3);
}

#[tokio::test]
async fn test_storage_failure_leaves_cursor() {
    let chain = chain_with_deposits();
    let sink = Arc::new(MemorySink::new());
    let mut scan_loop = scan_loop(chain, Arc::new(ReadOnlyStore { height: 80 }), sink.clone());

    let err = scan_loop
        .run_iteration(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::Storage(_)));
    assert_eq!(scan_loop.cursor(), Some(80));
    assert_eq!(sink.events().len(), 3);
}

#[tokio::test]
async fn test_height_poll_failure() {
    let store = Arc::new(MemoryCursorStore::with_height(80));
    let mut scan_loop = scan_loop(
        Arc::new(UnreachableChain),
        store.clone(),
        Arc::new(MemorySink::new()),
    );

    let err = scan_loop
        .run_iteration(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::Transport(_)));
    assert_eq!(scan_loop.cursor(), Some(80));
    assert_eq!(scan_loop.state(), LoopState::Idle);
    assert_eq!(scan_loop.stats().iterations, 1);
}

#[tokio::test]
async fn test_cursor_load_failure_is_retried() {
    let chain = chain_with_deposits();
    let store = Arc::new(FlakyStore {
        load_failures: Mutex::new(1),
        inner: MemoryCursorStore::with_height(80),
    });
    let mut scan_loop = scan_loop(chain.clone(), store.clone(), Arc::new(MemorySink::new()));
    let cancel = CancellationToken::new();

    let err = scan_loop.run_iteration(&cancel).await.unwrap_err();
    assert!(matches!(err, ScanError::Storage(_)));
    assert_eq!(scan_loop.cursor(), None);
    assert!(chain.fetched().is_empty());

    // The stored cursor is picked up on the next try rather than reseeded.
    scan_loop.run_iteration(&cancel).await.unwrap();
    assert_eq!(chain.fetched(), (81..=88).collect::<Vec<_>>());
    assert_eq!(scan_loop.cursor(), Some(88));
    assert_eq!(store.inner.saves(), vec![88]);
}

// ============================================================================
// Run loop and cancellation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_run_stops_on_cancel() {
    let chain = chain_with_deposits();
    let store = Arc::new(MemoryCursorStore::with_height(80));
    let sink = Arc::new(MemorySink::new());
    let scan_loop = scan_loop(chain.clone(), store.clone(), sink.clone());

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(scan_loop.run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    chain.set_height(101);
    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();

    let stats = handle.await.unwrap();
    assert!(stats.iterations >= 3);
    assert_eq!(stats.ranges_scanned, 2);
    assert_eq!(stats.blocks_scanned, 9);
    assert_eq!(stats.deposits_emitted, 4);
    assert_eq!(stats.failed_iterations, 0);
    assert_eq!(store.height(), Some(89));
}

#[tokio::test(start_paused = true)]
async fn test_run_keeps_going_after_failures() {
    let chain = chain_with_deposits();
    chain.fail_at(Some(85));
    let store = Arc::new(MemoryCursorStore::with_height(80));
    let scan_loop = scan_loop(chain.clone(), store.clone(), Arc::new(MemorySink::new()));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(scan_loop.run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    chain.fail_at(None);
    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();

    let stats = handle.await.unwrap();
    assert!(stats.failed_iterations >= 2);
    assert_eq!(stats.ranges_scanned, 1);
    assert_eq!(store.height(), Some(88));
}

#[tokio::test]
async fn test_cancelled_loop_does_not_scan() {
    let chain = chain_with_deposits();
    let store = Arc::new(MemoryCursorStore::with_height(80));
    let scan_loop = scan_loop(chain.clone(), store.clone(), Arc::new(MemorySink::new()));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let stats = scan_loop.run(cancel).await;

    assert_eq!(stats.ranges_scanned, 0);
    assert!(chain.fetched().is_empty());
    assert!(store.saves().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_hung_block_fetch() {
    let chain = chain_with_deposits();
    chain.hang_at(Some(84));
    let store = Arc::new(MemoryCursorStore::with_height(80));
    let sink = Arc::new(MemorySink::new());
    let mut scan_loop = scan_loop(chain.clone(), store.clone(), sink.clone());

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle = tokio::spawn(async move {
        let result = scan_loop.run_iteration(&token).await;
        (result, scan_loop)
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let (result, scan_loop) = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("hung fetch was not interrupted")
        .unwrap();

    assert!(matches!(result, Err(ScanError::Cancelled)));
    assert_eq!(scan_loop.state(), LoopState::Cancelled);
    assert_eq!(scan_loop.cursor(), Some(80));
    assert!(store.saves().is_empty());
    assert_eq!(chain.fetched(), vec![81, 82, 83, 84]);
    assert_eq!(sink.events().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_hung_height_poll() {
    let store = Arc::new(MemoryCursorStore::with_height(80));
    let scan_loop = scan_loop(Arc::new(StalledChain), store.clone(), Arc::new(MemorySink::new()));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(scan_loop.run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let stats = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("hung height poll was not interrupted")
        .unwrap();

    assert_eq!(stats.iterations, 1);
    assert_eq!(stats.failed_iterations, 0);
    assert_eq!(stats.ranges_scanned, 0);
    assert!(store.saves().is_empty());
}
