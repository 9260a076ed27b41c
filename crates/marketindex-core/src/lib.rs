//! marketindex-core — foundation for the reorg-safe NFT marketplace indexer.
//!
//! # Architecture
//!
//! ```text
//! ChainSource → IngestionDriver
//!                   ├── EventDecoder     (raw log → ChainEvent)
//!                   ├── HandlerRegistry  (ChainEvent → WriteIntent)
//!                   └── EntityStore      (atomic block commit, rollback)
//! ```
//!
//! The driver itself lives in `marketindex-evm`; storage backends live in
//! `marketindex-storage`.

pub mod checkpoint;
pub mod decoder;
pub mod entity;
pub mod error;
pub mod event;
pub mod fixtures;
pub mod handler;
pub mod indexer;
pub mod retry;
pub mod source;
pub mod store;
pub mod types;

pub use checkpoint::Checkpoint;
pub use decoder::EventDecoder;
pub use entity::{Entity, EntityId, EntityKind, NftListed, NftPurchased, WriteIntent};
pub use error::{DecodeError, IndexerError};
pub use event::{ChainEvent, EventKind, EventParams, ParamValue};
pub use handler::{EventHandler, HandlerRegistry};
pub use indexer::{IndexerConfig, IndexerState};
pub use retry::{RetryConfig, RetryPolicy};
pub use source::ChainSource;
pub use store::EntityStore;
pub use types::{Block, BlockSummary, EventFilter, RawLog};
