//! Error types for the marketindex pipeline.

use thiserror::Error;

/// Errors that can occur while decoding a single log.
///
/// Decode failures are per-log: the driver reports them and moves on to the
/// next log in the block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("log has no topics")]
    MissingSignature,

    #[error("unknown event signature {topic0}")]
    UnknownSignature { topic0: String },

    #[error("{kind}: expected {expected} topics, got {got}")]
    TopicCountMismatch {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{kind}: expected {expected} bytes of data, got {got}")]
    DataLengthMismatch {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{kind}: parameter '{param}' is not a valid {ty}")]
    InvalidParameter {
        kind: &'static str,
        param: &'static str,
        ty: &'static str,
    },

    #[error("ABI decode failed: {reason}")]
    AbiDecodeFailed { reason: String },
}

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("No handler registered for event kind '{kind}'")]
    UnregisteredKind { kind: String },

    #[error("A handler is already registered for event kind '{kind}'")]
    DuplicateHandler { kind: String },

    #[error("Handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    #[error("Commit of block {block_number} failed: {reason}")]
    Commit { block_number: u64, reason: String },

    #[error("No committed checkpoint at block {block_number}")]
    CheckpointNotFound { block_number: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },
}

impl IndexerError {
    /// Returns `true` if the driver should back off and try again.
    ///
    /// Source connectivity, storage, and commit failures leave the
    /// checkpoint untouched, so retrying the same block loses nothing.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Rpc(_) | Self::Storage(_) | Self::Commit { .. }
        )
    }

    /// Returns `true` for per-log failures that skip the log but not the block.
    pub fn is_per_log(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::UnregisteredKind { .. } | Self::Handler { .. }
        )
    }
}
