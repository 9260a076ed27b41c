//! SQLite entity store for MarketIndex.
//!
//! Persists entities and checkpoint history to a single SQLite file. Each
//! block commit and rollback runs in one SQL transaction, and an async
//! mutex keeps commits and rollbacks from interleaving.
//!
//! # Usage
//! ```rust,no_run
//! use marketindex_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./market.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;
use tracing::debug;

use marketindex_core::checkpoint::Checkpoint;
use marketindex_core::entity::{Entity, EntityId, EntityKind, NftListed, NftPurchased, WriteIntent};
use marketindex_core::error::IndexerError;
use marketindex_core::store::EntityStore;
use marketindex_core::types::BlockSummary;

const ENTITY_COLUMNS: &str =
    "id, kind, token_id, account, price, block_number, block_timestamp, transaction_hash";

fn storage_err(e: impl std::fmt::Display) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed [`EntityStore`].
pub struct SqliteStore {
    pool: SqlitePool,
    /// Serializes `commit_block` / `rollback_to`.
    write_lock: Mutex<()>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./market.db"`) or a full
    /// SQLite URL (`"sqlite:./market.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let store = Self {
            pool,
            write_lock: Mutex::new(()),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Uses a single pooled connection that is never recycled, since every
    /// new connection to `sqlite::memory:` would see an empty database.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        let store = Self {
            pool,
            write_lock: Mutex::new(()),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entities (
                id               BLOB    PRIMARY KEY,
                kind             TEXT    NOT NULL,
                token_id         TEXT    NOT NULL,
                account          BLOB    NOT NULL,
                price            TEXT    NOT NULL,
                block_number     INTEGER NOT NULL,
                block_timestamp  INTEGER NOT NULL,
                transaction_hash BLOB    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                block_number INTEGER PRIMARY KEY,
                block_hash   BLOB    NOT NULL,
                updated_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_block ON entities (block_number);")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_kind ON entities (kind);")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }

    async fn head_in(
        tx: &mut Transaction<'_, Sqlite>,
    ) -> Result<Option<Checkpoint>, IndexerError> {
        let row = sqlx::query(
            "SELECT block_number, block_hash, updated_at FROM checkpoints
             ORDER BY block_number DESC LIMIT 1",
        )
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage_err)?;
        row.as_ref().map(checkpoint_from_row).transpose()
    }

    async fn checkpoint_at_in(
        tx: &mut Transaction<'_, Sqlite>,
        block_number: u64,
    ) -> Result<Option<Checkpoint>, IndexerError> {
        let row = sqlx::query(
            "SELECT block_number, block_hash, updated_at FROM checkpoints WHERE block_number = ?",
        )
        .bind(block_number as i64)
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage_err)?;
        row.as_ref().map(checkpoint_from_row).transpose()
    }

    async fn insert_checkpoint_in(
        tx: &mut Transaction<'_, Sqlite>,
        checkpoint: &Checkpoint,
    ) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints (block_number, block_hash, updated_at)
             VALUES (?, ?, ?)",
        )
        .bind(checkpoint.block_number as i64)
        .bind(checkpoint.block_hash.as_slice())
        .bind(checkpoint.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn put_in(tx: &mut Transaction<'_, Sqlite>, entity: &Entity) -> Result<(), IndexerError> {
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO entities ({ENTITY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(entity.id().as_slice())
        .bind(entity.kind().name())
        .bind(entity.token_id().to_string())
        .bind(entity.account().as_slice())
        .bind(entity.price().to_string())
        .bind(entity.block_number() as i64)
        .bind(entity.block_timestamp() as i64)
        .bind(entity.transaction_hash().as_slice())
        .execute(&mut **tx)
        .await
        .map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn upsert(&self, entity: Entity) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        Self::put_in(&mut tx, &entity).await?;
        tx.commit().await.map_err(storage_err)?;
        debug!(id = %entity.id(), kind = %entity.kind(), "entity upserted");
        Ok(())
    }

    async fn get(&self, id: &EntityId) -> Result<Option<Entity>, IndexerError> {
        let row = sqlx::query(&format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?"))
            .bind(id.as_slice())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(entity_from_row).transpose()
    }

    async fn commit_block(
        &self,
        block: &BlockSummary,
        writes: Vec<WriteIntent>,
    ) -> Result<Checkpoint, IndexerError> {
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

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let head = Self::head_in(&mut tx).await?;
        let replay = match &head {
            None => false,
            Some(h) if h.is_parent_of(block) => false,
            Some(h) => match Self::checkpoint_at_in(&mut tx, block.number).await? {
                Some(cp) if cp.block_hash == block.hash => true,
                Some(cp) => {
                    return Err(reject(format!(
                        "block {} already committed with hash {}",
                        block.number, cp.block_hash
                    )))
                }
                None => {
                    return Err(reject(format!(
                        "block does not extend checkpoint {}",
                        h.block_number
                    )))
                }
            },
        };

        for write in &writes {
            Self::put_in(&mut tx, &write.entity).await?;
        }

        let checkpoint = if replay {
            head.unwrap_or_else(|| Checkpoint::for_block(block))
        } else {
            if head.is_none() {
                if let Some(base) = Checkpoint::parent_of(block) {
                    Self::insert_checkpoint_in(&mut tx, &base).await?;
                }
            }
            let checkpoint = Checkpoint::for_block(block);
            Self::insert_checkpoint_in(&mut tx, &checkpoint).await?;
            checkpoint
        };

        tx.commit()
            .await
            .map_err(|e| reject(format!("transaction commit failed: {e}")))?;

        debug!(
            block = block.number,
            hash = %block.hash,
            entities = writes.len(),
            replay,
            "block committed"
        );
        Ok(checkpoint)
    }

    async fn rollback_to(&self, block_number: u64) -> Result<Checkpoint, IndexerError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let target = Self::checkpoint_at_in(&mut tx, block_number)
            .await?
            .ok_or(IndexerError::CheckpointNotFound { block_number })?;

        let removed = sqlx::query("DELETE FROM entities WHERE block_number > ?")
            .bind(block_number as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?
            .rows_affected();

        sqlx::query("DELETE FROM checkpoints WHERE block_number > ?")
            .bind(block_number as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;

        debug!(block_number, removed, "rolled back store");
        Ok(target)
    }

    async fn checkpoint(&self) -> Result<Option<Checkpoint>, IndexerError> {
        let row = sqlx::query(
            "SELECT block_number, block_hash, updated_at FROM checkpoints
             ORDER BY block_number DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.as_ref().map(checkpoint_from_row).transpose()
    }

    async fn block_hash(&self, block_number: u64) -> Result<Option<B256>, IndexerError> {
        let row = sqlx::query("SELECT block_hash FROM checkpoints WHERE block_number = ?")
            .bind(block_number as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref()
            .map(|r| b256_column(r, "block_hash"))
            .transpose()
    }

    async fn entities_by_kind(&self, kind: EntityKind) -> Result<Vec<Entity>, IndexerError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE kind = ? ORDER BY block_number, id"
        ))
        .bind(kind.name())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(entity_from_row).collect()
    }

    async fn entity_count(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM entities")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let cnt: i64 = row.try_get("cnt").map_err(storage_err)?;
        Ok(cnt as u64)
    }
}

// ─── Row decoding ────────────────────────────────────────────────────────────

fn bytes_column(row: &SqliteRow, column: &str) -> Result<Vec<u8>, IndexerError> {
    row.try_get::<Vec<u8>, _>(column).map_err(storage_err)
}

fn b256_column(row: &SqliteRow, column: &str) -> Result<B256, IndexerError> {
    let bytes = bytes_column(row, column)?;
    B256::try_from(bytes.as_slice())
        .map_err(|_| IndexerError::Storage(format!("column {column}: expected 32 bytes")))
}

fn u256_column(row: &SqliteRow, column: &str) -> Result<U256, IndexerError> {
    let text: String = row.try_get(column).map_err(storage_err)?;
    text.parse::<U256>()
        .map_err(|e| IndexerError::Storage(format!("column {column}: {e}")))
}

fn u64_column(row: &SqliteRow, column: &str) -> Result<u64, IndexerError> {
    let value: i64 = row.try_get(column).map_err(storage_err)?;
    Ok(value as u64)
}

fn checkpoint_from_row(row: &SqliteRow) -> Result<Checkpoint, IndexerError> {
    Ok(Checkpoint {
        block_number: u64_column(row, "block_number")?,
        block_hash: b256_column(row, "block_hash")?,
        updated_at: row.try_get("updated_at").map_err(storage_err)?,
    })
}

fn entity_from_row(row: &SqliteRow) -> Result<Entity, IndexerError> {
    let id = EntityId::from_slice(&bytes_column(row, "id")?)
        .ok_or_else(|| IndexerError::Storage("column id: expected 36 bytes".into()))?;
    let kind_name: String = row.try_get("kind").map_err(storage_err)?;
    let kind = EntityKind::from_name(&kind_name)
        .ok_or_else(|| IndexerError::Storage(format!("unknown entity kind '{kind_name}'")))?;
    let account_bytes = bytes_column(row, "account")?;
    if account_bytes.len() != 20 {
        return Err(IndexerError::Storage("column account: expected 20 bytes".into()));
    }
    let account = Address::from_slice(&account_bytes);

    let token_id = u256_column(row, "token_id")?;
    let price = u256_column(row, "price")?;
    let block_number = u64_column(row, "block_number")?;
    let block_timestamp = u64_column(row, "block_timestamp")?;
    let transaction_hash = b256_column(row, "transaction_hash")?;

    Ok(match kind {
        EntityKind::NftListed => Entity::Listed(NftListed {
            id,
            token_id,
            seller: account,
            price,
            block_number,
            block_timestamp,
            transaction_hash,
        }),
        EntityKind::NftPurchased => Entity::Purchased(NftPurchased {
            id,
            token_id,
            buyer: account,
            price,
            block_number,
            block_timestamp,
            transaction_hash,
        }),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
