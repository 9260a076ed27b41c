//! The ingestion driver: fetch → decode → dispatch → commit, one block at a time.
//!
//! # Per-block cycle
//! ```text
//! Idle → FetchingBlock → DecodingLogs → Dispatching → Committing → Idle
//!                 ↘ RollingBack (source reports a reorg, or parent hash mismatch)
//! ```
//!
//! Blocks are processed strictly in chain order. Decode failures and events
//! without a handler skip the log, never the block. Source, storage and
//! commit failures leave the checkpoint untouched, so `run` backs off and
//! retries the same block. A missing rollback checkpoint halts the driver.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::B256;
use tokio::sync::watch;

use marketindex_core::checkpoint::Checkpoint;
use marketindex_core::decoder::EventDecoder;
use marketindex_core::error::IndexerError;
use marketindex_core::handler::HandlerRegistry;
use marketindex_core::indexer::{IndexerConfig, IndexerState};
use marketindex_core::retry::RetryPolicy;
use marketindex_core::source::ChainSource;
use marketindex_core::store::EntityStore;
use marketindex_core::types::Block;

/// Summary of one committed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReport {
    pub block_number: u64,
    pub block_hash: B256,
    /// Logs that passed the contract filter.
    pub logs: usize,
    pub entities_written: usize,
    pub decode_failures: usize,
    /// Events whose kind has no registered handler.
    pub unhandled: usize,
    pub handler_failures: usize,
}

/// Result of a single [`IngestionDriver::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A block was committed.
    Committed(BlockReport),
    /// The store was rolled back to `to`.
    RolledBack { to: u64 },
    /// The source has no new block yet.
    Idle,
}

/// Cooperative stop signal for a running driver.
///
/// Checked between blocks and while waiting, never during a commit.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Ask the driver to stop after the block it is working on.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Drives a [`ChainSource`] into an [`EntityStore`].
pub struct IngestionDriver<C, S> {
    config: IndexerConfig,
    source: Arc<C>,
    store: Arc<S>,
    handlers: Arc<HandlerRegistry>,
    decoder: EventDecoder,
    retry: RetryPolicy,
    state: IndexerState,
    checkpoint: Option<Checkpoint>,
    resumed: bool,
    stop: StopHandle,
    stop_rx: watch::Receiver<bool>,
}

impl<C: ChainSource, S: EntityStore> IngestionDriver<C, S> {
    pub fn new(
        config: IndexerConfig,
        source: Arc<C>,
        store: Arc<S>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        let (tx, stop_rx) = watch::channel(false);
        Self {
            retry: RetryPolicy::new(config.retry.clone()),
            decoder: EventDecoder::new(),
            state: IndexerState::Idle,
            checkpoint: None,
            resumed: false,
            stop: StopHandle { tx: Arc::new(tx) },
            stop_rx,
            config,
            source,
            store,
            handlers,
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn state(&self) -> IndexerState {
        self.state
    }

    /// The last committed block as seen by the driver.
    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoint.as_ref()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Load the checkpoint from the store. Called once, lazily.
    pub async fn resume(&mut self) -> Result<Option<Checkpoint>, IndexerError> {
        if !self.resumed {
            self.checkpoint = self.store.checkpoint().await?;
            self.resumed = true;
            match &self.checkpoint {
                Some(cp) => tracing::info!(
                    indexer = %self.config.id,
                    block = cp.block_number,
                    hash = %cp.block_hash,
                    "Resuming from checkpoint"
                ),
                None => tracing::info!(
                    indexer = %self.config.id,
                    start_block = self.config.start_block,
                    "No checkpoint, starting fresh"
                ),
            }
        }
        Ok(self.checkpoint.clone())
    }

    /// Height passed to [`ChainSource::next_block`].
    fn after_height(&self) -> Option<u64> {
        match &self.checkpoint {
            Some(cp) => Some(cp.block_number),
            None => self.config.start_block.checked_sub(1),
        }
    }

    /// Run one cycle: handle a pending reorg, or process the next block.
    pub async fn step(&mut self) -> Result<StepOutcome, IndexerError> {
        self.resume().await?;

        if let Some(cp) = self.checkpoint.clone() {
            if let Some(ancestor) = self.source.reorg_since(&cp).await? {
                tracing::warn!(
                    checkpoint = cp.block_number,
                    ancestor,
                    "Reorg reported by chain source"
                );
                return self.roll_back(ancestor).await;
            }
        }

        self.state = IndexerState::FetchingBlock;
        let Some(expected) = self.after_height().map_or(Some(0), |h| h.checked_add(1)) else {
            self.state = IndexerState::Idle;
            return Ok(StepOutcome::Idle);
        };
        let Some(block) = self.source.next_block(self.after_height()).await? else {
            self.state = IndexerState::Idle;
            return Ok(StepOutcome::Idle);
        };
        if block.number != expected {
            return Err(IndexerError::Rpc(format!(
                "chain source returned block {} instead of {expected}",
                block.number
            )));
        }

        if let Some(cp) = self.checkpoint.clone() {
            if block.parent_hash != cp.block_hash {
                tracing::warn!(
                    block = block.number,
                    parent = %block.parent_hash,
                    checkpoint = %cp.block_hash,
                    "Parent hash mismatch, stepping back one block"
                );
                let Some(ancestor) = cp.block_number.checked_sub(1) else {
                    self.state = IndexerState::Halted;
                    return Err(IndexerError::Aborted {
                        reason: "genesis block was replaced".into(),
                    });
                };
                return self.roll_back(ancestor).await;
            }
        }

        self.process_block(block).await.map(StepOutcome::Committed)
    }

    async fn roll_back(&mut self, ancestor: u64) -> Result<StepOutcome, IndexerError> {
        self.state = IndexerState::RollingBack;
        let checkpoint = self.store.rollback_to(ancestor).await?;
        tracing::info!(
            block = checkpoint.block_number,
            hash = %checkpoint.block_hash,
            "Rolled back"
        );
        self.checkpoint = Some(checkpoint);
        self.state = IndexerState::FetchingBlock;
        Ok(StepOutcome::RolledBack { to: ancestor })
    }

    async fn process_block(&mut self, block: Block) -> Result<BlockReport, IndexerError> {
        let summary = block.summary();

        self.state = IndexerState::DecodingLogs;
        let decoded = self.decoder.decode_block(&block, &self.config.filter);

        let mut report = BlockReport {
            block_number: summary.number,
            block_hash: summary.hash,
            logs: decoded.len(),
            entities_written: 0,
            decode_failures: 0,
            unhandled: 0,
            handler_failures: 0,
        };

        self.state = IndexerState::Dispatching;
        let mut writes = Vec::with_capacity(decoded.len());
        for log in decoded {
            let event = match log.result {
                Ok(event) => event,
                Err(e) => {
                    report.decode_failures += 1;
                    tracing::warn!(
                        block = summary.number,
                        log_index = log.log_index,
                        error = %e,
                        "Skipping undecodable log"
                    );
                    continue;
                }
            };
            match self.handlers.dispatch(&event) {
                Ok(write) => writes.push(write),
                Err(e @ IndexerError::UnregisteredKind { .. }) => {
                    report.unhandled += 1;
                    tracing::warn!(
                        block = summary.number,
                        log_index = log.log_index,
                        error = %e,
                        "Skipping log without handler"
                    );
                }
                Err(e) if e.is_per_log() => {
                    report.handler_failures += 1;
                    tracing::warn!(
                        block = summary.number,
                        log_index = log.log_index,
                        error = %e,
                        "Handler failed, skipping log"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        report.entities_written = writes.len();

        self.state = IndexerState::Committing;
        let checkpoint = match self.store.commit_block(&summary, writes).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                // The store may have been rolled back behind the driver's
                // back; reload its checkpoint on the next step.
                if matches!(e, IndexerError::Commit { .. }) {
                    self.checkpoint = None;
                    self.resumed = false;
                }
                return Err(e);
            }
        };
        self.checkpoint = Some(checkpoint);
        self.state = IndexerState::Idle;

        tracing::info!(
            block = report.block_number,
            hash = %report.block_hash,
            entities = report.entities_written,
            skipped = report.decode_failures + report.unhandled + report.handler_failures,
            "Block committed"
        );
        Ok(report)
    }

    /// Run until stopped or halted.
    ///
    /// Retryable failures back off per the retry policy; once it is
    /// exhausted, or on any other error, the driver halts and returns it.
    pub async fn run(&mut self) -> Result<(), IndexerError> {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut failures = 0u32;

        loop {
            if self.stop.is_stopped() {
                self.state = IndexerState::Stopped;
                tracing::info!(
                    indexer = %self.config.id,
                    checkpoint = ?self.checkpoint.as_ref().map(|cp| cp.block_number),
                    "Indexer stopped"
                );
                return Ok(());
            }

            match self.step().await {
                Ok(StepOutcome::Idle) => {
                    failures = 0;
                    self.pause(poll_interval).await;
                }
                Ok(_) => failures = 0,
                Err(e) if e.is_retryable() => {
                    failures += 1;
                    match self.retry.next_delay(failures) {
                        Some(delay) => {
                            tracing::warn!(
                                attempt = failures,
                                delay_ms = delay.as_millis() as u64,
                                state = %self.state,
                                error = %e,
                                "Retrying after failure"
                            );
                            self.pause(delay).await;
                        }
                        None => return Err(self.halt(e)),
                    }
                }
                Err(e) => return Err(self.halt(e)),
            }
        }
    }

    fn halt(&mut self, error: IndexerError) -> IndexerError {
        self.state = IndexerState::Halted;
        tracing::error!(indexer = %self.config.id, error = %error, "Indexer halted");
        error
    }

    /// Sleep for `duration`, waking early if a stop is requested.
    async fn pause(&mut self, duration: Duration) {
        if *self.stop_rx.borrow_and_update() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.stop_rx.changed() => {}
        }
    }
}
