//! Shared block and log types for the indexing pipeline.

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

// ─── BlockSummary ─────────────────────────────────────────────────────────────

/// A block header without its logs — enough to track progress and detect forks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Block number.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
    /// Parent block hash.
    pub parent_hash: B256,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: u64,
}

impl BlockSummary {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockSummary) -> bool {
        parent.number.checked_add(1).is_some_and(|n| n == self.number)
            && self.parent_hash == parent.hash
    }
}

// ─── Block / RawLog ───────────────────────────────────────────────────────────

/// A block as delivered by a chain source: header plus the logs it emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: u64,
    pub logs: Vec<RawLog>,
}

impl Block {
    /// The header of this block.
    pub fn summary(&self) -> BlockSummary {
        BlockSummary {
            number: self.number,
            hash: self.hash,
            parent_hash: self.parent_hash,
            timestamp: self.timestamp,
        }
    }
}

/// An undecoded EVM log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    /// Contract that emitted the log.
    pub address: Address,
    /// `topics[0]` is the event signature hash; the rest are indexed params.
    pub topics: Vec<B256>,
    /// ABI-encoded non-indexed params.
    pub data: Bytes,
    /// Hash of the transaction that emitted the log.
    pub transaction_hash: B256,
    /// Position of the log within its block.
    pub log_index: u32,
}

impl RawLog {
    /// Returns `topics[0]`, the event signature hash, if present.
    pub fn signature(&self) -> Option<&B256> {
        self.topics.first()
    }
}

// ─── EventFilter ──────────────────────────────────────────────────────────────

/// Filter for which logs the driver hands to the decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Only index logs from these contract addresses (empty = all addresses).
    #[serde(default)]
    pub addresses: Vec<Address>,
}

impl EventFilter {
    /// Create a filter for a single contract address.
    pub fn address(addr: Address) -> Self {
        Self {
            addresses: vec![addr],
        }
    }

    /// Add another contract address to the filter.
    pub fn or_address(mut self, addr: Address) -> Self {
        self.addresses.push(addr);
        self
    }

    /// Returns `true` if logs emitted by `address` pass this filter.
    pub fn matches_address(&self, address: &Address) -> bool {
        self.addresses.is_empty() || self.addresses.contains(address)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
