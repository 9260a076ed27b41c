//! Fluent builder API for creating indexers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use marketindex_core::fixtures::MockChainSource;
//! use marketindex_core::types::EventFilter;
//! use marketindex_evm::IndexerBuilder;
//! use marketindex_storage::InMemoryStore;
//!
//! let driver = IndexerBuilder::new()
//!     .id("market")
//!     .start_block(19_000_000)
//!     .poll_interval_ms(1_000)
//!     .filter(EventFilter::address(marketindex_core::fixtures::MOCK_CONTRACT))
//!     .build(Arc::new(MockChainSource::new()), Arc::new(InMemoryStore::new()))
//!     .unwrap();
//! ```

use std::sync::Arc;

use marketindex_core::error::IndexerError;
use marketindex_core::handler::HandlerRegistry;
use marketindex_core::indexer::IndexerConfig;
use marketindex_core::retry::RetryConfig;
use marketindex_core::source::ChainSource;
use marketindex_core::store::EntityStore;
use marketindex_core::types::EventFilter;

use crate::index_loop::IngestionDriver;

/// Fluent builder for `IndexerConfig` and the driver that runs it.
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    handlers: Option<HandlerRegistry>,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config, e.g. one loaded from JSON.
    pub fn from_config(config: IndexerConfig) -> Self {
        Self {
            config,
            handlers: None,
        }
    }

    /// Set the indexer ID (used in logs).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    /// Set the first block to index when the store has no checkpoint.
    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    /// Set the idle polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Set the contract address filter.
    pub fn filter(mut self, filter: EventFilter) -> Self {
        self.config.filter = filter;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Use a custom handler registry instead of [`HandlerRegistry::nft_market`].
    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = Some(handlers);
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Validate the config and build a driver over `source` and `store`.
    pub fn build<C, S>(
        self,
        source: Arc<C>,
        store: Arc<S>,
    ) -> Result<IngestionDriver<C, S>, IndexerError>
    where
        C: ChainSource,
        S: EntityStore,
    {
        self.config.validate()?;
        let handlers = self.handlers.unwrap_or_else(HandlerRegistry::nft_market);
        Ok(IngestionDriver::new(
            self.config,
            source,
            store,
            Arc::new(handlers),
        ))
    }
}
