//! The entity store contract.
//!
//! Implementations live in `marketindex-storage` (`InMemoryStore`,
//! `SqliteStore`). Every implementation must:
//!
//! - apply all writes of a block and advance the checkpoint atomically,
//!   so readers never observe a partial block;
//! - serialize `commit_block` and `rollback_to` against each other;
//! - keep enough checkpoint history to roll back to any committed block.

use async_trait::async_trait;

use crate::checkpoint::Checkpoint;
use crate::entity::{Entity, EntityId, EntityKind, WriteIntent};
use crate::error::IndexerError;
use crate::types::BlockSummary;

/// Durable keyed storage for entities and checkpoints.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Insert or replace an entity by id. Applying the same entity twice
    /// leaves the same stored state.
    async fn upsert(&self, entity: Entity) -> Result<(), IndexerError>;

    /// Fetch an entity by id.
    async fn get(&self, id: &EntityId) -> Result<Option<Entity>, IndexerError>;

    /// Atomically apply every write of `block` and advance the checkpoint to it.
    ///
    /// Fails with [`IndexerError::Commit`] (nothing applied) when the block does
    /// not extend the current checkpoint or a write belongs to another block.
    /// Re-committing an already committed block with the same hash is an
    /// idempotent replay.
    async fn commit_block(
        &self,
        block: &BlockSummary,
        writes: Vec<WriteIntent>,
    ) -> Result<Checkpoint, IndexerError>;

    /// Remove every entity written above `block_number` and reset the
    /// checkpoint to it.
    ///
    /// Fails with [`IndexerError::CheckpointNotFound`] if `block_number` was
    /// never committed.
    async fn rollback_to(&self, block_number: u64) -> Result<Checkpoint, IndexerError>;

    /// The current checkpoint, or `None` before the first commit.
    async fn checkpoint(&self) -> Result<Option<Checkpoint>, IndexerError>;

    /// Hash recorded for a committed block.
    async fn block_hash(
        &self,
        block_number: u64,
    ) -> Result<Option<alloy_primitives::B256>, IndexerError>;

    /// All entities of one kind, ordered by block number then id.
    async fn entities_by_kind(&self, kind: EntityKind) -> Result<Vec<Entity>, IndexerError>;

    /// Total number of stored entities.
    async fn entity_count(&self) -> Result<u64, IndexerError>;
}
