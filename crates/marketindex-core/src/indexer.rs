//! Indexer configuration and driver state types.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::IndexerError;
use crate::retry::RetryConfig;
use crate::types::EventFilter;

/// Configuration for an indexer instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Name for this indexer, used in logs.
    pub id: String,
    /// First block to index when the store has no checkpoint.
    pub start_block: u64,
    /// Contract address filter.
    pub filter: EventFilter,
    /// How long to wait before polling again when no new block exists (milliseconds).
    pub poll_interval_ms: u64,
    /// Backoff for source and commit failures.
    pub retry: RetryConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            id: "nft-market".into(),
            start_block: 0,
            filter: EventFilter::default(),
            poll_interval_ms: 2000,
            retry: RetryConfig::default(),
        }
    }
}

impl IndexerConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, IndexerError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| IndexerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, IndexerError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| IndexerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    /// Reject settings the driver cannot run with.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.id.trim().is_empty() {
            return Err(IndexerError::Config("id must not be empty".into()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(IndexerError::Config(
                "retry.multiplier must be at least 1.0".into(),
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(IndexerError::Config(
                "retry.initial_backoff_ms exceeds retry.max_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Runtime state of the ingestion driver.
///
/// ```text
/// Idle → FetchingBlock → DecodingLogs → Dispatching → Committing → Idle
///                 ↘ RollingBack (on reorg) → FetchingBlock
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// Waiting for the next poll.
    Idle,
    /// Asking the chain source for the block after the checkpoint.
    FetchingBlock,
    /// Decoding the block's logs.
    DecodingLogs,
    /// Running handlers over decoded events.
    Dispatching,
    /// Writing the block to the entity store.
    Committing,
    /// Rolling the store back to a common ancestor.
    RollingBack,
    /// Stopped by the operator.
    Stopped,
    /// Halted on an unrecoverable error.
    Halted,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::FetchingBlock => write!(f, "fetching-block"),
            Self::DecodingLogs => write!(f, "decoding-logs"),
            Self::Dispatching => write!(f, "dispatching"),
            Self::Committing => write!(f, "committing"),
            Self::RollingBack => write!(f, "rolling-back"),
            Self::Stopped => write!(f, "stopped"),
            Self::Halted => write!(f, "halted"),
        }
    }
}
