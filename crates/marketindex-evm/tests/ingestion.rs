//! End-to-end ingestion tests: mock chain source → driver → in-memory store.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{b256, Address, Bytes, B256, U256};
use async_trait::async_trait;

use marketindex_core::checkpoint::Checkpoint;
use marketindex_core::entity::{Entity, EntityId, EntityKind, WriteIntent};
use marketindex_core::error::IndexerError;
use marketindex_core::event::EventKind;
use marketindex_core::fixtures::{self, block_hash, chain, BlockBuilder, MockChainSource};
use marketindex_core::handler::{HandlerRegistry, ListedHandler};
use marketindex_core::indexer::{IndexerConfig, IndexerState};
use marketindex_core::retry::RetryConfig;
use marketindex_core::store::EntityStore;
use marketindex_core::types::{Block, BlockSummary, EventFilter};
use marketindex_evm::{BlockReport, IndexerBuilder, IngestionDriver, StepOutcome};
use marketindex_storage::InMemoryStore;

const TX_LISTED: B256 = b256!("1234000000000000000000000000000000000000000000000000000000000000");
const TX_PURCHASED: B256 = b256!("5678000000000000000000000000000000000000000000000000000000000000");

fn seller() -> Address {
    Address::repeat_byte(0xaa)
}

fn buyer() -> Address {
    Address::repeat_byte(0xbb)
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: Some(10),
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        multiplier: 2.0,
        jitter_fraction: 0.0,
    }
}

fn builder(start_block: u64) -> IndexerBuilder {
    IndexerBuilder::new()
        .start_block(start_block)
        .poll_interval_ms(2)
        .retry(fast_retry())
}

/// Block 10: Listed{1, 0xAA…, 1000} in tx 0x1234… at log index 2.
/// Block 11: Purchased{1, 0xBB…, 1000} in tx 0x5678… at log index 0.
fn market_blocks() -> Vec<Block> {
    vec![
        BlockBuilder::new(10)
            .log(fixtures::listed_log(U256::from(1), seller(), U256::from(1000), TX_LISTED, 2))
            .build(),
        BlockBuilder::new(11)
            .log(fixtures::purchased_log(U256::from(1), buyer(), U256::from(1000), TX_PURCHASED, 0))
            .build(),
    ]
}

fn committed(step: Result<StepOutcome, IndexerError>) -> BlockReport {
    match step {
        Ok(StepOutcome::Committed(report)) => report,
        other => panic!("expected a committed block, got {other:?}"),
    }
}

async fn wait_for_checkpoint<S: EntityStore>(store: &S, block_number: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(cp) = store.checkpoint().await.unwrap() {
                if cp.block_number == block_number {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("checkpoint never reached");
}

#[tokio::test]
async fn listed_and_purchased_entities() {
    let source = Arc::new(MockChainSource::with_blocks(market_blocks()));
    let store = Arc::new(InMemoryStore::new());
    let mut driver = builder(10).build(source, Arc::clone(&store)).unwrap();

    let report = committed(driver.step().await);
    assert_eq!(report.block_number, 10);
    assert_eq!(report.entities_written, 1);

    let listed_id = EntityId::from_log(&TX_LISTED, 2);
    assert_eq!(
        listed_id.to_string(),
        "0x123400000000000000000000000000000000000000000000000000000000000000000002"
    );
    let Some(Entity::Listed(listed)) = store.get(&listed_id).await.unwrap() else {
        panic!("listed entity missing");
    };
    assert_eq!(listed.token_id, U256::from(1));
    assert_eq!(listed.seller, seller());
    assert_eq!(listed.price, U256::from(1000));
    assert_eq!(listed.block_number, 10);
    assert_eq!(listed.transaction_hash, TX_LISTED);

    committed(driver.step().await);
    let purchased_id = EntityId::from_log(&TX_PURCHASED, 0);
    assert_ne!(purchased_id, listed_id);
    let Some(Entity::Purchased(purchased)) = store.get(&purchased_id).await.unwrap() else {
        panic!("purchased entity missing");
    };
    assert_eq!(purchased.buyer, buyer());
    assert_eq!(purchased.block_number, 11);

    // The listing is untouched by the purchase.
    assert!(store.get(&listed_id).await.unwrap().is_some());
    assert_eq!(store.entity_count().await.unwrap(), 2);
    assert_eq!(driver.checkpoint().unwrap().block_number, 11);
    assert_eq!(driver.step().await.unwrap(), StepOutcome::Idle);
}

#[tokio::test]
async fn reported_reorg_rolls_back_to_ancestor() {
    let source = Arc::new(MockChainSource::with_blocks(market_blocks()));
    let store = Arc::new(InMemoryStore::new());
    let mut driver = builder(10)
        .build(Arc::clone(&source), Arc::clone(&store))
        .unwrap();

    committed(driver.step().await);
    committed(driver.step().await);
    assert_eq!(store.entity_count().await.unwrap(), 2);

    source.reorg(9, chain(10, 11, 1));
    assert_eq!(
        driver.step().await.unwrap(),
        StepOutcome::RolledBack { to: 9 }
    );
    assert_eq!(store.entity_count().await.unwrap(), 0);
    let cp = store.checkpoint().await.unwrap().unwrap();
    assert_eq!(cp.block_number, 9);
    assert_eq!(cp.block_hash, block_hash(9, 0));

    // The replacement fork is indexed on top of the ancestor.
    let report = committed(driver.step().await);
    assert_eq!((report.block_number, report.block_hash), (10, block_hash(10, 1)));
    committed(driver.step().await);
    assert_eq!(store.block_hash(11).await.unwrap(), Some(block_hash(11, 1)));
    assert_eq!(store.entity_count().await.unwrap(), 0);
}

#[tokio::test]
async fn silent_reorg_is_found_through_parent_hashes() {
    let mut blocks = chain(10, 12, 0);
    blocks[2] = BlockBuilder::new(12)
        .log(fixtures::listed_log(U256::from(7), seller(), U256::from(1), TX_LISTED, 0))
        .build();
    let source = Arc::new(MockChainSource::with_blocks(blocks));
    let store = Arc::new(InMemoryStore::new());
    let mut driver = builder(10)
        .build(Arc::clone(&source), Arc::clone(&store))
        .unwrap();
    for _ in 0..3 {
        committed(driver.step().await);
    }
    assert_eq!(store.entity_count().await.unwrap(), 1);

    // Blocks 11.. are replaced; block 13' does not extend 12.
    source.reorg_silently(10, chain(11, 13, 1));
    assert_eq!(
        driver.step().await.unwrap(),
        StepOutcome::RolledBack { to: 11 }
    );
    assert_eq!(
        driver.step().await.unwrap(),
        StepOutcome::RolledBack { to: 10 }
    );
    assert_eq!(store.entity_count().await.unwrap(), 0);

    for expected in 11..=13 {
        let report = committed(driver.step().await);
        assert_eq!(report.block_number, expected);
        assert_eq!(report.block_hash, block_hash(expected, 1));
    }
}

#[tokio::test]
async fn reprocessing_is_idempotent() {
    let source = Arc::new(MockChainSource::with_blocks(market_blocks()));
    let store = Arc::new(InMemoryStore::new());
    let mut driver = builder(10)
        .build(Arc::clone(&source), Arc::clone(&store))
        .unwrap();
    committed(driver.step().await);
    committed(driver.step().await);
    let before = store.entities().unwrap();

    // Commit block 11 a second time, as a restarted driver would.
    let block = &market_blocks()[1];
    let registry = HandlerRegistry::nft_market();
    let writes: Vec<WriteIntent> = marketindex_core::decoder::EventDecoder::new()
        .decode_block(block, &EventFilter::default())
        .into_iter()
        .map(|d| registry.dispatch(&d.result.unwrap()).unwrap())
        .collect();
    let cp = store.commit_block(&block.summary(), writes).await.unwrap();
    assert_eq!(cp.block_number, 11);

    assert_eq!(store.entities().unwrap(), before);
    assert_eq!(store.checkpoint().await.unwrap().unwrap().block_number, 11);
}

#[tokio::test]
async fn rollback_then_replay_reproduces_entities() {
    let source = Arc::new(MockChainSource::with_blocks(market_blocks()));
    let store = Arc::new(InMemoryStore::new());
    let mut driver = builder(10)
        .build(Arc::clone(&source), Arc::clone(&store))
        .unwrap();
    committed(driver.step().await);
    committed(driver.step().await);
    let before = store.entities().unwrap();

    store.rollback_to(9).await.unwrap();
    assert_eq!(store.entity_count().await.unwrap(), 0);

    // A fresh driver resumes from the rolled-back checkpoint.
    let mut replay = builder(10)
        .build(Arc::clone(&source), Arc::clone(&store))
        .unwrap();
    assert_eq!(replay.resume().await.unwrap().unwrap().block_number, 9);
    committed(replay.step().await);
    committed(replay.step().await);

    assert_eq!(store.entities().unwrap(), before);
}

#[tokio::test]
async fn driver_recovers_from_external_rollback() {
    let mut blocks = market_blocks();
    blocks.extend(chain(12, 12, 0));
    let source = Arc::new(MockChainSource::with_blocks(blocks));
    let store = Arc::new(InMemoryStore::new());
    let mut driver = builder(10)
        .build(Arc::clone(&source), Arc::clone(&store))
        .unwrap();
    committed(driver.step().await);
    committed(driver.step().await);
    let before = store.entities().unwrap();

    // An operator rolls the store back while the driver still believes
    // block 11 is its checkpoint.
    store.rollback_to(9).await.unwrap();

    let err = driver.step().await.unwrap_err();
    assert!(matches!(err, IndexerError::Commit { block_number: 12, .. }));
    assert!(driver.checkpoint().is_none());

    for expected in 10..=12 {
        assert_eq!(committed(driver.step().await).block_number, expected);
    }
    assert_eq!(store.entities().unwrap(), before);
    assert_eq!(store.checkpoint().await.unwrap().unwrap().block_number, 12);
}

#[tokio::test]
async fn decode_failures_and_unhandled_kinds_skip_only_the_log() {
    let mut garbage = fixtures::listed_log(U256::from(2), seller(), U256::from(5), TX_LISTED, 0);
    garbage.topics[0] = B256::repeat_byte(0x99);
    let mut short = fixtures::listed_log(U256::from(3), seller(), U256::from(5), TX_LISTED, 1);
    short.data = Bytes::from(vec![0u8; 31]);
    let block = BlockBuilder::new(10)
        .log(fixtures::purchased_log(U256::from(1), buyer(), U256::from(5), TX_PURCHASED, 3))
        .log(fixtures::listed_log(U256::from(1), seller(), U256::from(5), TX_LISTED, 2))
        .log(short)
        .log(garbage)
        .build();

    let mut registry = HandlerRegistry::new();
    registry
        .register(EventKind::Listed, Arc::new(ListedHandler))
        .unwrap();

    let source = Arc::new(MockChainSource::with_blocks([block]));
    let store = Arc::new(InMemoryStore::new());
    let mut driver = builder(10)
        .handlers(registry)
        .build(source, Arc::clone(&store))
        .unwrap();

    let report = committed(driver.step().await);
    assert_eq!(report.logs, 4);
    assert_eq!(report.decode_failures, 2);
    assert_eq!(report.unhandled, 1);
    assert_eq!(report.entities_written, 1);
    assert_eq!(store.entities_by_kind(EntityKind::NftListed).await.unwrap().len(), 1);
    assert!(store.entities_by_kind(EntityKind::NftPurchased).await.unwrap().is_empty());
}

#[tokio::test]
async fn contract_filter_ignores_other_emitters() {
    let mut foreign = fixtures::listed_log(U256::from(9), seller(), U256::from(5), TX_LISTED, 0);
    foreign.address = Address::repeat_byte(0x42);
    let block = BlockBuilder::new(10)
        .log(foreign)
        .log(fixtures::listed_log(U256::from(1), seller(), U256::from(5), TX_LISTED, 1))
        .build();

    let store = Arc::new(InMemoryStore::new());
    let mut driver = builder(10)
        .filter(EventFilter::address(fixtures::MOCK_CONTRACT))
        .build(Arc::new(MockChainSource::with_blocks([block])), Arc::clone(&store))
        .unwrap();

    let report = committed(driver.step().await);
    assert_eq!(report.logs, 1);
    assert_eq!(report.entities_written, 1);
    assert!(store.get(&EntityId::from_log(&TX_LISTED, 1)).await.unwrap().is_some());
}

/// Wraps an [`InMemoryStore`] and fails the next `n` block commits.
struct FlakyStore {
    inner: InMemoryStore,
    commit_failures: AtomicU32,
}

impl FlakyStore {
    fn failing(n: u32) -> Self {
        Self {
            inner: InMemoryStore::new(),
            commit_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl EntityStore for FlakyStore {
    async fn upsert(&self, entity: Entity) -> Result<(), IndexerError> {
        self.inner.upsert(entity).await
    }

    async fn get(&self, id: &EntityId) -> Result<Option<Entity>, IndexerError> {
        self.inner.get(id).await
    }

    async fn commit_block(
        &self,
        block: &BlockSummary,
        writes: Vec<WriteIntent>,
    ) -> Result<Checkpoint, IndexerError> {
        let failing = self
            .commit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(IndexerError::Commit {
                block_number: block.number,
                reason: "database is locked".into(),
            });
        }
        self.inner.commit_block(block, writes).await
    }

    async fn rollback_to(&self, block_number: u64) -> Result<Checkpoint, IndexerError> {
        self.inner.rollback_to(block_number).await
    }

    async fn checkpoint(&self) -> Result<Option<Checkpoint>, IndexerError> {
        self.inner.checkpoint().await
    }

    async fn block_hash(&self, block_number: u64) -> Result<Option<B256>, IndexerError> {
        self.inner.block_hash(block_number).await
    }

    async fn entities_by_kind(&self, kind: EntityKind) -> Result<Vec<Entity>, IndexerError> {
        self.inner.entities_by_kind(kind).await
    }

    async fn entity_count(&self) -> Result<u64, IndexerError> {
        self.inner.entity_count().await
    }
}

#[tokio::test]
async fn failed_commit_leaves_nothing_visible() {
    let source = Arc::new(MockChainSource::with_blocks(market_blocks()));
    let store = Arc::new(FlakyStore::failing(1));
    let mut driver = builder(10)
        .build(source, Arc::clone(&store))
        .unwrap();

    let err = driver.step().await.unwrap_err();
    assert!(matches!(err, IndexerError::Commit { block_number: 10, .. }));
    assert!(err.is_retryable());
    assert_eq!(store.entity_count().await.unwrap(), 0);
    assert!(store.checkpoint().await.unwrap().is_none());
    assert!(driver.checkpoint().is_none());

    // The same block is fetched and committed again.
    let report = committed(driver.step().await);
    assert_eq!(report.block_number, 10);
    assert_eq!(store.entity_count().await.unwrap(), 1);
}

#[tokio::test]
async fn run_retries_commit_and_source_failures() {
    let source = Arc::new(MockChainSource::with_blocks(market_blocks()));
    source.fail_next(3);
    let store = Arc::new(FlakyStore::failing(2));
    let mut driver = builder(10)
        .build(Arc::clone(&source), Arc::clone(&store))
        .unwrap();
    let stop = driver.stop_handle();

    let task = tokio::spawn(async move {
        let result = driver.run().await;
        (driver, result)
    });
    wait_for_checkpoint(store.as_ref(), 11).await;
    stop.stop();

    let (driver, result) = task.await.unwrap();
    result.unwrap();
    assert_eq!(driver.state(), IndexerState::Stopped);
    assert_eq!(store.entity_count().await.unwrap(), 2);
    assert!(source.requests() >= 3 + 2 + 2);
}

#[tokio::test]
async fn exhausted_retries_halt_the_driver() {
    let source = Arc::new(MockChainSource::with_blocks(market_blocks()));
    source.fail_next(100);
    let mut driver = builder(10)
        .retry(RetryConfig {
            max_retries: Some(2),
            ..fast_retry()
        })
        .build(source, Arc::new(InMemoryStore::new()))
        .unwrap();

    let err = driver.run().await.unwrap_err();
    assert!(matches!(err, IndexerError::Rpc(_)));
    assert_eq!(driver.state(), IndexerState::Halted);
}

#[tokio::test]
async fn missing_rollback_checkpoint_halts() {
    let source = Arc::new(MockChainSource::with_blocks(market_blocks()));
    let store = Arc::new(InMemoryStore::new());
    let mut driver = builder(10)
        .build(Arc::clone(&source), Arc::clone(&store))
        .unwrap();
    committed(driver.step().await);
    committed(driver.step().await);

    // Block 5 was never committed, so the store cannot roll back to it.
    source.reorg(5, chain(6, 11, 1));
    let err = driver.run().await.unwrap_err();
    assert!(matches!(err, IndexerError::CheckpointNotFound { block_number: 5 }));
    assert_eq!(driver.state(), IndexerState::Halted);
    assert_eq!(store.entity_count().await.unwrap(), 2);
}

#[tokio::test]
async fn stop_interrupts_idle_polling() {
    let store = Arc::new(InMemoryStore::new());
    let mut driver: IngestionDriver<MockChainSource, InMemoryStore> = IndexerBuilder::from_config(
        IndexerConfig {
            poll_interval_ms: 60_000,
            ..IndexerConfig::default()
        },
    )
    .build(Arc::new(MockChainSource::new()), store)
    .unwrap();
    let stop = driver.stop_handle();

    let task = tokio::spawn(async move {
        let result = driver.run().await;
        (driver, result)
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    stop.stop();

    let (driver, result) = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("driver did not stop")
        .unwrap();
    result.unwrap();
    assert_eq!(driver.state(), IndexerState::Stopped);
    assert!(stop.is_stopped());
}

#[tokio::test]
async fn genesis_block_is_indexed_without_base_checkpoint() {
    let genesis = BlockBuilder::new(0)
        .log(fixtures::listed_log(U256::from(1), seller(), U256::from(1), TX_LISTED, 0))
        .build();
    let store = Arc::new(InMemoryStore::new());
    let mut driver = builder(0)
        .build(
            Arc::new(MockChainSource::with_blocks([genesis])),
            Arc::clone(&store),
        )
        .unwrap();

    let report = committed(driver.step().await);
    assert_eq!(report.block_number, 0);
    assert_eq!(report.block_hash, block_hash(0, 0));
    assert!(matches!(
        store.rollback_to(0).await,
        Ok(Checkpoint { block_number: 0, .. })
    ));
}
