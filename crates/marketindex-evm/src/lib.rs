//! marketindex-evm — ingestion driver, config builder, and JSON-RPC conversion.

pub mod builder;
pub mod fetcher;
pub mod index_loop;

pub use builder::IndexerBuilder;
pub use fetcher::{EvmRpcClient, RpcChainSource, RpcLog};
pub use index_loop::{BlockReport, IngestionDriver, StepOutcome, StopHandle};
