//! In-memory entity store.
//!
//! All state sits behind one mutex, so a block commit or rollback is a
//! single critical section: readers see either none or all of a block.
//! Data is lost when the process exits.

use alloy_primitives::B256;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use marketindex_core::checkpoint::Checkpoint;
use marketindex_core::entity::{Entity, EntityId, EntityKind, WriteIntent};
use marketindex_core::error::IndexerError;
use marketindex_core::store::EntityStore;
use marketindex_core::types::BlockSummary;

#[derive(Debug, Default)]
struct State {
    entities: HashMap<EntityId, Entity>,
    /// Entity ids grouped by the block that wrote them.
    by_block: BTreeMap<u64, BTreeSet<EntityId>>,
    /// Every committed checkpoint that is still on the indexed chain.
    history: BTreeMap<u64, Checkpoint>,
    head: Option<Checkpoint>,
}

impl State {
    fn put(&mut self, entity: Entity) {
        let id = *entity.id();
        if let Some(previous) = self.entities.get(&id) {
            let old_block = previous.block_number();
            if let Some(ids) = self.by_block.get_mut(&old_block) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_block.remove(&old_block);
                }
            }
        }
        self.by_block
            .entry(entity.block_number())
            .or_default()
            .insert(id);
        self.entities.insert(id, entity);
    }
}

/// In-memory [`EntityStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, IndexerError> {
        self.state
            .lock()
            .map_err(|_| IndexerError::Storage("in-memory store lock poisoned".into()))
    }

    /// Snapshot of every stored entity, ordered by block number then id.
    pub fn entities(&self) -> Result<Vec<Entity>, IndexerError> {
        let state = self.state()?;
        Ok(state
            .by_block
            .values()
            .flatten()
            .filter_map(|id| state.entities.get(id).cloned())
            .collect())
    }
}

/// Check that `block` may be committed on top of `state`.
///
/// Returns `true` when the block is already committed with the same hash
/// (an idempotent replay that must not move the checkpoint).
fn validate_commit(
    state: &State,
    block: &BlockSummary,
    writes: &[WriteIntent],
) -> Result<bool, IndexerError> {
    let reject = |reason: String| IndexerError::Commit {
        block_number: block.number,
        reason,
    };

    if let Some(stray) = writes
        .iter()
        .find(|w| w.entity.block_number() != block.number)
    {
        return Err(reject(format!(
            "entity {} belongs to block {}",
            stray.entity.id(),
            stray.entity.block_number()
        )));
    }

    match &state.head {
        None => Ok(false),
        Some(head) if head.is_parent_of(block) => Ok(false),
        Some(_) => match state.history.get(&block.number) {
            Some(cp) if cp.block_hash == block.hash => Ok(true),
            Some(cp) => Err(reject(format!(
                "block {} already committed with hash {}",
                block.number, cp.block_hash
            ))),
            None => Err(reject(format!(
                "block does not extend checkpoint {}",
                state.head.as_ref().map_or(0, |h| h.block_number)
            ))),
        },
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn upsert(&self, entity: Entity) -> Result<(), IndexerError> {
        self.state()?.put(entity);
        Ok(())
    }

    async fn get(&self, id: &EntityId) -> Result<Option<Entity>, IndexerError> {
        Ok(self.state()?.entities.get(id).cloned())
    }

    async fn commit_block(
        &self,
        block: &BlockSummary,
        writes: Vec<WriteIntent>,
    ) -> Result<Checkpoint, IndexerError> {
        let mut state = self.state()?;
        let replay = validate_commit(&state, block, &writes)?;

        let count = writes.len();
        for write in writes {
            state.put(write.entity);
        }

        if replay {
            debug!(block = block.number, entities = count, "replayed committed block");
            return Ok(state
                .head
                .clone()
                .unwrap_or_else(|| Checkpoint::for_block(block)));
        }

        if state.head.is_none() {
            if let Some(base) = Checkpoint::parent_of(block) {
                state.history.insert(base.block_number, base);
            }
        }
        let checkpoint = Checkpoint::for_block(block);
        state.history.insert(block.number, checkpoint.clone());
        state.head = Some(checkpoint.clone());

        debug!(block = block.number, hash = %block.hash, entities = count, "block committed");
        Ok(checkpoint)
    }

    async fn rollback_to(&self, block_number: u64) -> Result<Checkpoint, IndexerError> {
        let mut state = self.state()?;
        let target = state
            .history
            .get(&block_number)
            .cloned()
            .ok_or(IndexerError::CheckpointNotFound { block_number })?;

        let orphaned = match block_number.checked_add(1) {
            Some(first_orphan) => state.by_block.split_off(&first_orphan),
            None => BTreeMap::new(),
        };
        let mut removed = 0usize;
        for id in orphaned.values().flatten() {
            if state.entities.remove(id).is_some() {
                removed += 1;
            }
        }
        state.history.retain(|number, _| *number <= block_number);
        state.head = Some(target.clone());

        debug!(block_number, removed, "rolled back store");
        Ok(target)
    }

    async fn checkpoint(&self) -> Result<Option<Checkpoint>, IndexerError> {
        Ok(self.state()?.head.clone())
    }

    async fn block_hash(&self, block_number: u64) -> Result<Option<B256>, IndexerError> {
        Ok(self
            .state()?
            .history
            .get(&block_number)
            .map(|cp| cp.block_hash))
    }

    async fn entities_by_kind(&self, kind: EntityKind) -> Result<Vec<Entity>, IndexerError> {
        Ok(self
            .entities()?
            .into_iter()
            .filter(|e| e.kind() == kind)
            .collect())
    }

    async fn entity_count(&self) -> Result<u64, IndexerError> {
        Ok(self.state()?.entities.len() as u64)
    }
}
