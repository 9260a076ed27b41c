//! Decoded marketplace events.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use tiny_keccak::{Hasher, Keccak};

/// The event kinds emitted by the NFT marketplace contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    /// `NFTListed(uint256 indexed tokenId, address indexed seller, uint256 price)`
    Listed,
    /// `NFTPurchased(uint256 indexed tokenId, address indexed buyer, uint256 price)`
    Purchased,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::Listed, EventKind::Purchased];

    /// Canonical ABI signature used to derive `topics[0]`.
    pub fn signature(&self) -> &'static str {
        match self {
            Self::Listed => "NFTListed(uint256,address,uint256)",
            Self::Purchased => "NFTPurchased(uint256,address,uint256)",
        }
    }

    /// keccak256 of [`signature`](Self::signature).
    pub fn topic0(&self) -> B256 {
        let mut hasher = Keccak::v256();
        let mut output = [0u8; 32];
        hasher.update(self.signature().as_bytes());
        hasher.finalize(&mut output);
        B256::from(output)
    }

    /// Look up the kind whose signature hashes to `topic0`.
    pub fn from_topic0(topic0: &B256) -> Option<Self> {
        Self::ALL.into_iter().find(|k| &k.topic0() == topic0)
    }

    /// Name of the entity type this kind produces.
    pub fn entity_name(&self) -> &'static str {
        match self {
            Self::Listed => "NFTListed",
            Self::Purchased => "NFTPurchased",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listed => write!(f, "Listed"),
            Self::Purchased => write!(f, "Purchased"),
        }
    }
}

/// Typed event parameters, one variant per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventParams {
    Listed {
        token_id: U256,
        seller: Address,
        price: U256,
    },
    Purchased {
        token_id: U256,
        buyer: Address,
        price: U256,
    },
}

impl EventParams {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Listed { .. } => EventKind::Listed,
            Self::Purchased { .. } => EventKind::Purchased,
        }
    }
}

/// A single parameter value, as seen through [`ChainEvent::param`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamValue {
    Uint(U256),
    Address(Address),
}

/// A decoded log together with the block/transaction it came from.
///
/// Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transaction_hash: B256,
    pub log_index: u32,
    /// Contract that emitted the event.
    pub address: Address,
    pub params: EventParams,
}

impl ChainEvent {
    pub fn kind(&self) -> EventKind {
        self.params.kind()
    }

    /// Look up a parameter by its ABI name (`tokenId`, `seller`, `buyer`, `price`).
    pub fn param(&self, name: &str) -> Option<ParamValue> {
        match (&self.params, name) {
            (EventParams::Listed { token_id, .. }, "tokenId")
            | (EventParams::Purchased { token_id, .. }, "tokenId") => {
                Some(ParamValue::Uint(*token_id))
            }
            (EventParams::Listed { price, .. }, "price")
            | (EventParams::Purchased { price, .. }, "price") => Some(ParamValue::Uint(*price)),
            (EventParams::Listed { seller, .. }, "seller") => Some(ParamValue::Address(*seller)),
            (EventParams::Purchased { buyer, .. }, "buyer") => Some(ParamValue::Address(*buyer)),
            _ => None,
        }
    }
}
