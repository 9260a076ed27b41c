//! `marketindex status` / `marketindex rollback` — inspect and manage a SQLite store.

use anyhow::{Context, Result};

use marketindex_core::entity::EntityKind;
use marketindex_core::store::EntityStore;
use marketindex_storage::SqliteStore;

async fn open(db: &str) -> Result<SqliteStore> {
    SqliteStore::open(db)
        .await
        .with_context(|| format!("opening store {db}"))
}

pub async fn status(db: &str) -> Result<()> {
    let store = open(db).await?;
    match store.checkpoint().await? {
        Some(cp) => {
            println!("Checkpoint:  block {} ({})", cp.block_number, cp.block_hash);
            println!("Updated at:  {}", cp.updated_at);
        }
        None => println!("Checkpoint:  none"),
    }
    println!("Entities:    {}", store.entity_count().await?);
    for kind in [EntityKind::NftListed, EntityKind::NftPurchased] {
        let count = store.entities_by_kind(kind).await?.len();
        println!("  {:<13} {count}", kind.name());
    }
    Ok(())
}

pub async fn rollback(db: &str, block: u64) -> Result<()> {
    let store = open(db).await?;
    let before = store.entity_count().await?;
    let cp = store
        .rollback_to(block)
        .await
        .with_context(|| format!("rolling back to block {block}"))?;
    let after = store.entity_count().await?;
    tracing::info!(block = cp.block_number, removed = before - after, "Rollback complete");
    println!(
        "✓ Rolled back to block {} ({}), removed {} entities",
        cp.block_number,
        cp.block_hash,
        before - after
    );
    Ok(())
}
