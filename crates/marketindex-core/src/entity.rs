//! Persisted entities and the write intents handlers emit for them.

use alloy_primitives::{Address, FixedBytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::event::EventKind;

/// Deterministic entity key: `transaction_hash ‖ be_i32(log_index)`.
///
/// Unique per (transaction, log) pair and stable across re-processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub FixedBytes<36>);

impl EntityId {
    pub const LEN: usize = 36;

    /// Build the id of the entity created from log `log_index` of `tx_hash`.
    ///
    /// The log index is appended big-endian, so these ids are not
    /// byte-compatible with subgraph ids built by `Bytes.concatI32`, which
    /// appends it little-endian.
    pub fn from_log(tx_hash: &B256, log_index: u32) -> Self {
        let mut bytes = [0u8; Self::LEN];
        bytes[..32].copy_from_slice(tx_hash.as_slice());
        // Log indices are encoded as a signed 32-bit integer.
        bytes[32..].copy_from_slice(&(log_index as i32).to_be_bytes());
        Self(FixedBytes::from(bytes))
    }

    /// Rebuild an id from its raw bytes (e.g. a database column).
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        (bytes.len() == Self::LEN).then(|| Self(FixedBytes::from_slice(bytes)))
    }

    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    /// The transaction hash half of the id.
    pub fn transaction_hash(&self) -> B256 {
        B256::from_slice(&self.0[..32])
    }

    /// The log index half of the id.
    pub fn log_index(&self) -> i32 {
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.0[32..]);
        i32::from_be_bytes(word)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.as_slice()))
    }
}

/// Entity type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    NftListed,
    NftPurchased,
}

impl EntityKind {
    /// Stable name used as the entity type in storage.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NftListed => "NFTListed",
            Self::NftPurchased => "NFTPurchased",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "NFTListed" => Some(Self::NftListed),
            "NFTPurchased" => Some(Self::NftPurchased),
            _ => None,
        }
    }
}

impl From<EventKind> for EntityKind {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Listed => Self::NftListed,
            EventKind::Purchased => Self::NftPurchased,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A token put up for sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftListed {
    pub id: EntityId,
    pub token_id: U256,
    pub seller: Address,
    pub price: U256,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transaction_hash: B256,
}

/// A token bought from a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftPurchased {
    pub id: EntityId,
    pub token_id: U256,
    pub buyer: Address,
    pub price: U256,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transaction_hash: B256,
}

/// Any persisted entity.
///
/// Entities are append-only: created once per event, removed only when the
/// block that produced them is rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Entity {
    #[serde(rename = "NFTListed")]
    Listed(NftListed),
    #[serde(rename = "NFTPurchased")]
    Purchased(NftPurchased),
}

impl Entity {
    pub fn id(&self) -> &EntityId {
        match self {
            Self::Listed(e) => &e.id,
            Self::Purchased(e) => &e.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Listed(_) => EntityKind::NftListed,
            Self::Purchased(_) => EntityKind::NftPurchased,
        }
    }

    /// Block the entity was written at; rollbacks key off this.
    pub fn block_number(&self) -> u64 {
        match self {
            Self::Listed(e) => e.block_number,
            Self::Purchased(e) => e.block_number,
        }
    }

    pub fn token_id(&self) -> U256 {
        match self {
            Self::Listed(e) => e.token_id,
            Self::Purchased(e) => e.token_id,
        }
    }

    pub fn price(&self) -> U256 {
        match self {
            Self::Listed(e) => e.price,
            Self::Purchased(e) => e.price,
        }
    }

    /// The seller of a listing or the buyer of a purchase.
    pub fn account(&self) -> Address {
        match self {
            Self::Listed(e) => e.seller,
            Self::Purchased(e) => e.buyer,
        }
    }

    pub fn block_timestamp(&self) -> u64 {
        match self {
            Self::Listed(e) => e.block_timestamp,
            Self::Purchased(e) => e.block_timestamp,
        }
    }

    pub fn transaction_hash(&self) -> B256 {
        match self {
            Self::Listed(e) => e.transaction_hash,
            Self::Purchased(e) => e.transaction_hash,
        }
    }
}

/// An entity mutation produced by a handler, not yet applied to a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteIntent {
    pub entity: Entity,
}

impl WriteIntent {
    pub fn upsert(entity: Entity) -> Self {
        Self { entity }
    }
}

impl From<Entity> for WriteIntent {
    fn from(entity: Entity) -> Self {
        Self::upsert(entity)
    }
}
