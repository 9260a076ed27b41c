//! Event handlers and the registry that dispatches to them.
//!
//! Handlers are pure: they turn a [`ChainEvent`] into a [`WriteIntent`] and
//! never touch storage. The driver collects the intents for a block and
//! hands them to the store in one commit.

use std::collections::HashMap;
use std::sync::Arc;

use crate::entity::{Entity, EntityId, NftListed, NftPurchased, WriteIntent};
use crate::error::IndexerError;
use crate::event::{ChainEvent, EventKind, EventParams};

/// Trait for event handlers.
pub trait EventHandler: Send + Sync {
    /// Build the write intent for `event`.
    fn handle(&self, event: &ChainEvent) -> Result<WriteIntent, IndexerError>;

    /// Name used in logs and error messages.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> EventHandler for F
where
    F: Fn(&ChainEvent) -> Result<WriteIntent, IndexerError> + Send + Sync,
{
    fn handle(&self, event: &ChainEvent) -> Result<WriteIntent, IndexerError> {
        self(event)
    }
}

/// Copies an `NFTListed` event into an [`NftListed`] entity.
#[derive(Debug, Default, Clone, Copy)]
pub struct ListedHandler;

impl EventHandler for ListedHandler {
    fn handle(&self, event: &ChainEvent) -> Result<WriteIntent, IndexerError> {
        match &event.params {
            EventParams::Listed {
                token_id,
                seller,
                price,
            } => Ok(WriteIntent::upsert(Entity::Listed(NftListed {
                id: EntityId::from_log(&event.transaction_hash, event.log_index),
                token_id: *token_id,
                seller: *seller,
                price: *price,
                block_number: event.block_number,
                block_timestamp: event.block_timestamp,
                transaction_hash: event.transaction_hash,
            }))),
            other => Err(wrong_kind(self.name(), other.kind())),
        }
    }

    fn name(&self) -> &str {
        "handleNFTListed"
    }
}

/// Copies an `NFTPurchased` event into an [`NftPurchased`] entity.
#[derive(Debug, Default, Clone, Copy)]
pub struct PurchasedHandler;

impl EventHandler for PurchasedHandler {
    fn handle(&self, event: &ChainEvent) -> Result<WriteIntent, IndexerError> {
        match &event.params {
            EventParams::Purchased {
                token_id,
                buyer,
                price,
            } => Ok(WriteIntent::upsert(Entity::Purchased(NftPurchased {
                id: EntityId::from_log(&event.transaction_hash, event.log_index),
                token_id: *token_id,
                buyer: *buyer,
                price: *price,
                block_number: event.block_number,
                block_timestamp: event.block_timestamp,
                transaction_hash: event.transaction_hash,
            }))),
            other => Err(wrong_kind(self.name(), other.kind())),
        }
    }

    fn name(&self) -> &str {
        "handleNFTPurchased"
    }
}

fn wrong_kind(handler: &str, got: EventKind) -> IndexerError {
    IndexerError::Handler {
        handler: handler.to_string(),
        reason: format!("cannot handle {got} events"),
    }
}

/// Registry mapping each event kind to exactly one handler.
///
/// Built once at startup and passed to the driver; there is no global
/// registration.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the marketplace handlers for both event kinds.
    pub fn nft_market() -> Self {
        let mut registry = Self::new();
        registry.handlers.insert(EventKind::Listed, Arc::new(ListedHandler));
        registry
            .handlers
            .insert(EventKind::Purchased, Arc::new(PurchasedHandler));
        registry
    }

    /// Register the handler for `kind`. Fails if one is already registered.
    pub fn register(
        &mut self,
        kind: EventKind,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), IndexerError> {
        if self.handlers.contains_key(&kind) {
            return Err(IndexerError::DuplicateHandler {
                kind: kind.to_string(),
            });
        }
        tracing::debug!(kind = %kind, handler = handler.name(), "handler registered");
        self.handlers.insert(kind, handler);
        Ok(())
    }

    /// Returns `true` if a handler is registered for `kind`.
    pub fn handles(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Run the handler registered for the event's kind.
    pub fn dispatch(&self, event: &ChainEvent) -> Result<WriteIntent, IndexerError> {
        let kind = event.kind();
        let handler = self
            .handlers
            .get(&kind)
            .ok_or_else(|| IndexerError::UnregisteredKind {
                kind: kind.to_string(),
            })?;
        handler.handle(event)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("HandlerRegistry").field("kinds", &kinds).finish()
    }
}
