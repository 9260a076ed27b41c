//! The chain source contract — where blocks come from.
//!
//! A real implementation wraps an RPC node; tests use
//! [`MockChainSource`](crate::fixtures::MockChainSource).

use async_trait::async_trait;

use crate::checkpoint::Checkpoint;
use crate::error::IndexerError;
use crate::types::Block;

/// Ordered stream of blocks plus reorg notifications.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// The block at `after_height + 1`, or the genesis block when
    /// `after_height` is `None`. Returns `Ok(None)` if that block does not
    /// exist yet.
    ///
    /// Connectivity failures are reported as [`IndexerError::Rpc`].
    async fn next_block(&self, after_height: Option<u64>) -> Result<Option<Block>, IndexerError>;

    /// If `head` is no longer on the canonical chain, the height of the last
    /// common ancestor.
    async fn reorg_since(&self, head: &Checkpoint) -> Result<Option<u64>, IndexerError>;
}
