//! Test fixtures: typed mock events, encoded logs, blocks, and a scripted
//! chain source.
//!
//! Everything here builds values from explicit, typed arguments so handlers
//! and the decoder can be tested without a live chain.

use alloy_primitives::{address, Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::checkpoint::Checkpoint;
use crate::error::IndexerError;
use crate::event::{ChainEvent, EventKind, EventParams};
use crate::source::ChainSource;
use crate::types::{Block, RawLog};

/// Contract address stamped on mock events and logs.
pub const MOCK_CONTRACT: Address = address!("a16081f360e3847006db660bae1c6d1b2e17ec2a");
/// Block number of a default mock event.
pub const MOCK_BLOCK_NUMBER: u64 = 1;
/// Block timestamp of a default mock event.
pub const MOCK_BLOCK_TIMESTAMP: u64 = 1;
/// Log index of a default mock event.
pub const MOCK_LOG_INDEX: u32 = 1;

// ─── Events ───────────────────────────────────────────────────────────────────

/// A mock event with default block and transaction metadata.
pub fn new_mock_event(params: EventParams) -> ChainEvent {
    ChainEvent {
        block_number: MOCK_BLOCK_NUMBER,
        block_timestamp: MOCK_BLOCK_TIMESTAMP,
        transaction_hash: tx_hash(0xa1),
        log_index: MOCK_LOG_INDEX,
        address: MOCK_CONTRACT,
        params,
    }
}

/// Build an `NFTListed` event.
pub fn create_listed_event(token_id: U256, seller: Address, price: U256) -> ChainEvent {
    new_mock_event(EventParams::Listed {
        token_id,
        seller,
        price,
    })
}

/// Build an `NFTPurchased` event.
pub fn create_purchased_event(token_id: U256, buyer: Address, price: U256) -> ChainEvent {
    new_mock_event(EventParams::Purchased {
        token_id,
        buyer,
        price,
    })
}

/// A transaction hash filled with `seed`.
pub fn tx_hash(seed: u8) -> B256 {
    B256::repeat_byte(seed)
}

// ─── Logs ─────────────────────────────────────────────────────────────────────

/// Encode an `NFTListed` log as the marketplace contract emits it.
pub fn listed_log(
    token_id: U256,
    seller: Address,
    price: U256,
    transaction_hash: B256,
    log_index: u32,
) -> RawLog {
    encode_log(EventKind::Listed, token_id, seller, price, transaction_hash, log_index)
}

/// Encode an `NFTPurchased` log as the marketplace contract emits it.
pub fn purchased_log(
    token_id: U256,
    buyer: Address,
    price: U256,
    transaction_hash: B256,
    log_index: u32,
) -> RawLog {
    encode_log(EventKind::Purchased, token_id, buyer, price, transaction_hash, log_index)
}

/// Encode the raw log for an already-built event.
pub fn log_for_event(event: &ChainEvent) -> RawLog {
    let (kind, token_id, account, price) = match event.params {
        EventParams::Listed {
            token_id,
            seller,
            price,
        } => (EventKind::Listed, token_id, seller, price),
        EventParams::Purchased {
            token_id,
            buyer,
            price,
        } => (EventKind::Purchased, token_id, buyer, price),
    };
    let mut log = encode_log(kind, token_id, account, price, event.transaction_hash, event.log_index);
    log.address = event.address;
    log
}

fn encode_log(
    kind: EventKind,
    token_id: U256,
    account: Address,
    price: U256,
    transaction_hash: B256,
    log_index: u32,
) -> RawLog {
    RawLog {
        address: MOCK_CONTRACT,
        topics: vec![
            kind.topic0(),
            B256::from(token_id.to_be_bytes::<32>()),
            account.into_word(),
        ],
        data: Bytes::from(price.to_be_bytes::<32>().to_vec()),
        transaction_hash,
        log_index,
    }
}

// ─── Blocks ───────────────────────────────────────────────────────────────────

/// Deterministic block hash for `number` on fork `fork` (0 = main chain).
pub fn block_hash(number: u64, fork: u8) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[0] = 0xb0 | (fork & 0x0f);
    bytes[1] = fork;
    bytes[24..].copy_from_slice(&number.to_be_bytes());
    B256::from(bytes)
}

/// Fluent builder for mock blocks.
#[derive(Debug, Clone)]
pub struct BlockBuilder {
    block: Block,
}

impl BlockBuilder {
    /// A main-chain block whose parent is main-chain block `number - 1`.
    pub fn new(number: u64) -> Self {
        Self {
            block: Block {
                number,
                hash: block_hash(number, 0),
                parent_hash: number
                    .checked_sub(1)
                    .map_or(B256::ZERO, |parent| block_hash(parent, 0)),
                timestamp: 1_700_000_000 + number * 12,
                logs: Vec::new(),
            },
        }
    }

    /// Put this block on fork `fork` (its own hash changes, its parent does not).
    pub fn fork(mut self, fork: u8) -> Self {
        self.block.hash = block_hash(self.block.number, fork);
        self
    }

    pub fn parent_hash(mut self, parent_hash: B256) -> Self {
        self.block.parent_hash = parent_hash;
        self
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.block.timestamp = timestamp;
        self
    }

    pub fn log(mut self, log: RawLog) -> Self {
        self.block.logs.push(log);
        self
    }

    pub fn build(self) -> Block {
        self.block
    }
}

/// A contiguous chain of empty blocks `from..=to` on fork `fork`.
///
/// The first block's parent is main-chain block `from - 1`.
pub fn chain(from: u64, to: u64, fork: u8) -> Vec<Block> {
    (from..=to)
        .map(|n| {
            let parent = if n == from || fork == 0 {
                n.checked_sub(1).map_or(B256::ZERO, |p| block_hash(p, 0))
            } else {
                block_hash(n - 1, fork)
            };
            BlockBuilder::new(n).fork(fork).parent_hash(parent).build()
        })
        .collect()
}

// ─── MockChainSource ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MockState {
    blocks: BTreeMap<u64, Block>,
    pending_ancestor: Option<u64>,
    failures_left: u32,
    requests: u64,
}

/// Scripted in-memory chain source.
///
/// Serves whatever blocks it was given, can simulate reorgs (announced or
/// silent), and can fail a number of upcoming requests.
#[derive(Debug, Default)]
pub struct MockChainSource {
    state: Mutex<MockState>,
}

impl MockChainSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocks(blocks: impl IntoIterator<Item = Block>) -> Self {
        let source = Self::new();
        for block in blocks {
            source.push_block(block);
        }
        source
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `block` the canonical block at its height.
    pub fn push_block(&self, block: Block) {
        self.state().blocks.insert(block.number, block);
    }

    /// Replace every block above `ancestor` with `replacement` and announce
    /// the reorg through [`ChainSource::reorg_since`].
    pub fn reorg(&self, ancestor: u64, replacement: impl IntoIterator<Item = Block>) {
        self.replace_above(ancestor, replacement);
        self.state().pending_ancestor = Some(ancestor);
    }

    /// Like [`reorg`](Self::reorg) but without announcing it; only the
    /// parent hashes of new blocks reveal the fork.
    pub fn reorg_silently(&self, ancestor: u64, replacement: impl IntoIterator<Item = Block>) {
        self.replace_above(ancestor, replacement);
    }

    fn replace_above(&self, ancestor: u64, replacement: impl IntoIterator<Item = Block>) {
        let mut state = self.state();
        state.blocks.retain(|number, _| *number <= ancestor);
        for block in replacement {
            state.blocks.insert(block.number, block);
        }
    }

    /// Fail the next `count` `next_block` calls with an RPC error.
    pub fn fail_next(&self, count: u32) {
        self.state().failures_left = count;
    }

    /// Number of `next_block` calls served so far, failed ones included.
    pub fn requests(&self) -> u64 {
        self.state().requests
    }
}

#[async_trait]
impl ChainSource for MockChainSource {
    async fn next_block(&self, after_height: Option<u64>) -> Result<Option<Block>, IndexerError> {
        let mut state = self.state();
        state.requests += 1;
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(IndexerError::Rpc("mock source unavailable".into()));
        }
        let Some(target) = after_height.map_or(Some(0), |h| h.checked_add(1)) else {
            return Ok(None);
        };
        Ok(state.blocks.get(&target).cloned())
    }

    async fn reorg_since(&self, head: &Checkpoint) -> Result<Option<u64>, IndexerError> {
        let mut state = self.state();
        match state.pending_ancestor {
            Some(ancestor) if ancestor < head.block_number => {
                state.pending_ancestor = None;
                Ok(Some(ancestor))
            }
            _ => Ok(None),
        }
    }
}
