//! JSON-RPC block and log conversion.
//!
//! Turns `eth_getBlockByNumber` and `eth_getLogs` responses (hex strings)
//! into core [`Block`] / [`RawLog`] values, and adapts any
//! [`EvmRpcClient`] into a [`ChainSource`].

use std::str::FromStr;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use marketindex_core::checkpoint::Checkpoint;
use marketindex_core::error::IndexerError;
use marketindex_core::source::ChainSource;
use marketindex_core::types::{Block, EventFilter, RawLog};

/// A log object as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber", default)]
    pub block_number: Option<String>,
    #[serde(rename = "blockHash", default)]
    pub block_hash: Option<String>,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RpcLog {
    /// Parse a log object from JSON.
    pub fn from_json(v: &Value) -> Result<Self, IndexerError> {
        serde_json::from_value(v.clone()).map_err(|e| IndexerError::Rpc(format!("bad log: {e}")))
    }

    /// The block number, when the node included one.
    pub fn block_number_u64(&self) -> Result<Option<u64>, IndexerError> {
        self.block_number.as_deref().map(parse_hex_u64).transpose()
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// Convert to the core log type.
    pub fn to_raw_log(&self) -> Result<RawLog, IndexerError> {
        let topics = self
            .topics
            .iter()
            .map(|t| parse_b256(t, "topic"))
            .collect::<Result<Vec<_>, _>>()?;
        let log_index = u32::try_from(parse_hex_u64(&self.log_index)?)
            .map_err(|_| IndexerError::Rpc(format!("logIndex out of range: {}", self.log_index)))?;

        Ok(RawLog {
            address: Address::from_str(&self.address)
                .map_err(|e| IndexerError::Rpc(format!("bad address '{}': {e}", self.address)))?,
            topics,
            data: parse_bytes(&self.data)?,
            transaction_hash: parse_b256(&self.tx_hash, "transactionHash")?,
            log_index,
        })
    }
}

/// Parse a hex-encoded quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Result<u64, IndexerError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|e| IndexerError::Rpc(format!("bad quantity '{s}': {e}")))
}

fn parse_b256(s: &str, field: &str) -> Result<B256, IndexerError> {
    B256::from_str(s).map_err(|e| IndexerError::Rpc(format!("bad {field} '{s}': {e}")))
}

fn parse_bytes(s: &str) -> Result<Bytes, IndexerError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| IndexerError::Rpc(format!("bad data: {e}")))
}

fn str_field<'a>(v: &'a Value, field: &str) -> Result<&'a str, IndexerError> {
    v[field]
        .as_str()
        .ok_or_else(|| IndexerError::Rpc(format!("block is missing '{field}'")))
}

/// Build a [`Block`] from an `eth_getBlockByNumber` response and the
/// block's `eth_getLogs` result.
///
/// Removed logs and logs of other heights are dropped; the rest are ordered
/// by log index. A log whose `blockHash` differs from the header's hash
/// belongs to another fork and fails the whole block with a retryable
/// [`IndexerError::Rpc`].
pub fn block_from_json(v: &Value, logs: &[RpcLog]) -> Result<Block, IndexerError> {
    let number = parse_hex_u64(str_field(v, "number")?)?;
    let hash = parse_b256(str_field(v, "hash")?, "hash")?;

    let mut raw_logs = Vec::with_capacity(logs.len());
    for log in logs {
        if log.is_removed() {
            continue;
        }
        if matches!(log.block_number_u64()?, Some(n) if n != number) {
            continue;
        }
        if let Some(log_hash) = log.block_hash.as_deref() {
            let log_hash = parse_b256(log_hash, "blockHash")?;
            if log_hash != hash {
                return Err(IndexerError::Rpc(format!(
                    "log {} of block {number} has blockHash {log_hash}, header has {hash}",
                    log.log_index
                )));
            }
        }
        raw_logs.push(log.to_raw_log()?);
    }
    raw_logs.sort_by_key(|l| l.log_index);

    Ok(Block {
        number,
        hash,
        parent_hash: parse_b256(str_field(v, "parentHash")?, "parentHash")?,
        timestamp: parse_hex_u64(str_field(v, "timestamp")?)?,
        logs: raw_logs,
    })
}

/// Trait for fetching EVM data from a JSON-RPC provider.
///
/// Implementations return the raw JSON the node sent back.
#[async_trait]
pub trait EvmRpcClient: Send + Sync {
    /// `eth_getBlockByNumber(number, false)`; `None` when the block does not exist yet.
    async fn get_block(&self, number: u64) -> Result<Option<Value>, IndexerError>;

    /// `eth_getLogs` over `[from, to]` for the filter's addresses.
    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        filter: &EventFilter,
    ) -> Result<Vec<Value>, IndexerError>;
}

/// [`ChainSource`] backed by an [`EvmRpcClient`].
pub struct RpcChainSource<C> {
    client: C,
    filter: EventFilter,
}

impl<C: EvmRpcClient> RpcChainSource<C> {
    pub fn new(client: C, filter: EventFilter) -> Self {
        Self { client, filter }
    }

    async fn canonical_hash(&self, number: u64) -> Result<Option<B256>, IndexerError> {
        match self.client.get_block(number).await? {
            Some(v) => Ok(Some(parse_b256(str_field(&v, "hash")?, "hash")?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<C: EvmRpcClient> ChainSource for RpcChainSource<C> {
    async fn next_block(&self, after_height: Option<u64>) -> Result<Option<Block>, IndexerError> {
        let Some(number) = after_height.map_or(Some(0), |h| h.checked_add(1)) else {
            return Ok(None);
        };
        let Some(header) = self.client.get_block(number).await? else {
            return Ok(None);
        };
        let logs = self
            .client
            .get_logs(number, number, &self.filter)
            .await?
            .iter()
            .map(RpcLog::from_json)
            .collect::<Result<Vec<_>, _>>()?;
        block_from_json(&header, &logs).map(Some)
    }

    /// Reports the block below the checkpoint when the node's block at the
    /// checkpoint height has a different hash. Repeated calls walk back one
    /// block at a time until the hashes agree.
    async fn reorg_since(&self, head: &Checkpoint) -> Result<Option<u64>, IndexerError> {
        match self.canonical_hash(head.block_number).await? {
            Some(hash) if hash != head.block_hash => {
                tracing::warn!(
                    block = head.block_number,
                    stored = %head.block_hash,
                    canonical = %hash,
                    "checkpoint is no longer canonical"
                );
                Ok(head.block_number.checked_sub(1))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketindex_core::decoder::EventDecoder;
    use marketindex_core::event::EventKind;
    use serde_json::json;
    use std::collections::HashMap;

    const LISTED_LOG: &str = r#"{
        "address": "0xa16081f360e3847006db660bae1c6d1b2e17ec2a",
        "topics": [
            "TOPIC0",
            "0x0000000000000000000000000000000000000000000000000000000000000001",
            "0x000000000000000000000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        ],
        "data": "0x00000000000000000000000000000000000000000000000000000000000003e8",
        "blockNumber": "0xa",
        "blockHash": "0x000000000000000000000000000000000000000000000000000000000000aa0a",
        "transactionHash": "0x1234000000000000000000000000000000000000000000000000000000000000",
        "logIndex": "0x2",
        "removed": false
    }"#;

    fn listed_log_json() -> Value {
        let text = LISTED_LOG.replace("TOPIC0", &EventKind::Listed.topic0().to_string());
        serde_json::from_str(&text).unwrap()
    }

    fn header(number: u64) -> Value {
        json!({
            "number": format!("0x{number:x}"),
            "hash": format!("0x{:064x}", 0xaa00 + number),
            "parentHash": format!("0x{:064x}", 0xaa00 + number - 1),
            "timestamp": "0x6553f100",
            "transactions": []
        })
    }

    #[test]
    fn parse_hex_u64_basic() {
        assert_eq!(parse_hex_u64("0x1").unwrap(), 1);
        assert_eq!(parse_hex_u64("0xff").unwrap(), 255);
        assert_eq!(parse_hex_u64("1234").unwrap(), 0x1234);
        assert_eq!(parse_hex_u64("0x12a05f200").unwrap(), 5_000_000_000);
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[test]
    fn rpc_log_converts_and_decodes() {
        let rpc = RpcLog::from_json(&listed_log_json()).unwrap();
        assert_eq!(rpc.block_number_u64().unwrap(), Some(10));
        assert!(!rpc.is_removed());

        let raw = rpc.to_raw_log().unwrap();
        assert_eq!(raw.log_index, 2);
        assert_eq!(raw.topics.len(), 3);
        assert_eq!(raw.data.len(), 32);

        let block = block_from_json(&header(10), &[rpc]).unwrap();
        let event = EventDecoder::new().decode(&block.logs[0], &block.summary()).unwrap();
        assert_eq!(event.kind(), EventKind::Listed);
        assert_eq!(event.block_number, 10);
        assert_eq!(event.block_timestamp, 0x6553f100);
    }

    #[test]
    fn block_drops_removed_and_foreign_logs() {
        let mut removed = RpcLog::from_json(&listed_log_json()).unwrap();
        removed.removed = Some(true);
        let mut foreign = RpcLog::from_json(&listed_log_json()).unwrap();
        foreign.block_number = Some("0xb".into());
        let mut second = RpcLog::from_json(&listed_log_json()).unwrap();
        second.log_index = "0x1".into();
        let first = RpcLog::from_json(&listed_log_json()).unwrap();

        let block = block_from_json(&header(10), &[first, removed, foreign, second]).unwrap();
        assert_eq!(block.number, 10);
        let indices: Vec<u32> = block.logs.iter().map(|l| l.log_index).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn log_from_another_fork_fails_the_block() {
        let mut forked = RpcLog::from_json(&listed_log_json()).unwrap();
        forked.block_hash = Some(format!("0x{:064x}", 0xdeadu64));

        let err = block_from_json(&header(10), &[forked]).unwrap_err();
        assert!(matches!(err, IndexerError::Rpc(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn malformed_block_is_an_rpc_error() {
        let err = block_from_json(&json!({ "number": "0x1" }), &[]).unwrap_err();
        assert!(matches!(err, IndexerError::Rpc(_)));
    }

    struct StaticClient {
        blocks: HashMap<u64, Value>,
        logs: Vec<Value>,
    }

    #[async_trait]
    impl EvmRpcClient for StaticClient {
        async fn get_block(&self, number: u64) -> Result<Option<Value>, IndexerError> {
            Ok(self.blocks.get(&number).cloned())
        }

        async fn get_logs(
            &self,
            from: u64,
            _to: u64,
            _filter: &EventFilter,
        ) -> Result<Vec<Value>, IndexerError> {
            Ok(if from == 10 { self.logs.clone() } else { vec![] })
        }
    }

    #[tokio::test]
    async fn rpc_source_serves_blocks_and_reports_reorgs() {
        let client = StaticClient {
            blocks: [(10, header(10)), (11, header(11))].into_iter().collect(),
            logs: vec![listed_log_json()],
        };
        let source = RpcChainSource::new(client, EventFilter::default());

        let block = source.next_block(Some(9)).await.unwrap().unwrap();
        assert_eq!(block.number, 10);
        assert_eq!(block.logs.len(), 1);
        assert!(source.next_block(Some(11)).await.unwrap().is_none());

        let canonical = Checkpoint::for_block(&block.summary());
        assert_eq!(source.reorg_since(&canonical).await.unwrap(), None);

        let stale = Checkpoint::new(11, B256::repeat_byte(0xee));
        assert_eq!(source.reorg_since(&stale).await.unwrap(), Some(10));
    }
}
