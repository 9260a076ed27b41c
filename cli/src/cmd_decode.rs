//! `marketindex decode` — decode `eth_getLogs` log objects into entities.

use std::str::FromStr;

use alloy_primitives::B256;
use anyhow::{Context, Result};
use serde_json::Value;

use marketindex_core::decoder::EventDecoder;
use marketindex_core::handler::HandlerRegistry;
use marketindex_core::types::BlockSummary;
use marketindex_evm::RpcLog;

/// Decode a file holding one log object or an array of them.
///
/// Prints one entity per decodable log; failures are reported per log.
pub fn run(file: &str, json: bool) -> Result<()> {
    let content = std::fs::read_to_string(file).with_context(|| format!("reading {file}"))?;
    let value: Value = serde_json::from_str(&content).with_context(|| format!("parsing {file}"))?;
    let items = match value {
        Value::Array(items) => items,
        single => vec![single],
    };

    let decoder = EventDecoder::new();
    let registry = HandlerRegistry::nft_market();
    let mut failures = 0usize;

    for (i, item) in items.iter().enumerate() {
        let rpc = RpcLog::from_json(item)?;
        let log = rpc.to_raw_log()?;
        let block = BlockSummary {
            number: rpc.block_number_u64()?.unwrap_or_default(),
            hash: rpc
                .block_hash
                .as_deref()
                .map(B256::from_str)
                .transpose()
                .with_context(|| format!("log {i}: bad blockHash"))?
                .unwrap_or_default(),
            parent_hash: B256::ZERO,
            timestamp: 0,
        };

        let entity = decoder
            .decode(&log, &block)
            .map_err(anyhow::Error::from)
            .and_then(|event| registry.dispatch(&event).map_err(anyhow::Error::from));
        match entity {
            Ok(write) if json => println!("{}", serde_json::to_string_pretty(&write.entity)?),
            Ok(write) => {
                let e = &write.entity;
                println!("✓ log {i}: {}", e.kind());
                println!("  id:        {}", e.id());
                println!("  token id:  {}", e.token_id());
                println!("  account:   {}", e.account());
                println!("  price:     {}", e.price());
                println!("  block:     {}", e.block_number());
                println!("  tx:        {}", e.transaction_hash());
            }
            Err(e) => {
                failures += 1;
                eprintln!("✗ log {i}: {e}");
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} logs failed to decode", items.len());
    }
    Ok(())
}
