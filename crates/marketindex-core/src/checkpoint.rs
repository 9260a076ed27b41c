//! Checkpoints — the last block whose entities are durably committed.
//!
//! On restart the driver resumes from the store's checkpoint rather than
//! re-indexing from scratch.

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

use crate::types::BlockSummary;

/// A committed position in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last committed block number.
    pub block_number: u64,
    /// Last committed block hash.
    pub block_hash: B256,
    /// Unix timestamp of when this checkpoint was written.
    pub updated_at: i64,
}

impl Checkpoint {
    pub fn new(block_number: u64, block_hash: B256) -> Self {
        Self {
            block_number,
            block_hash,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// The checkpoint a block's commit advances to.
    pub fn for_block(block: &BlockSummary) -> Self {
        Self::new(block.number, block.hash)
    }

    /// The implicit checkpoint just below the first committed block.
    ///
    /// Returns `None` for the genesis block, which has no parent.
    pub fn parent_of(block: &BlockSummary) -> Option<Self> {
        block
            .number
            .checked_sub(1)
            .map(|number| Self::new(number, block.parent_hash))
    }

    /// Returns `true` if `block` is the direct successor of this checkpoint.
    pub fn is_parent_of(&self, block: &BlockSummary) -> bool {
        self.block_number
            .checked_add(1)
            .is_some_and(|n| n == block.number)
            && block.parent_hash == self.block_hash
    }
}
