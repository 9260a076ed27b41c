//! `EventDecoder` — turns raw marketplace logs into typed [`ChainEvent`]s.
//!
//! Both marketplace events share one layout:
//!
//! ```text
//! topics[0]  keccak256(signature)
//! topics[1]  tokenId            uint256
//! topics[2]  seller | buyer     address (left-padded to 32 bytes)
//! data       price              uint256
//! ```

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{Address, B256, U256};
use rayon::prelude::*;
use std::collections::HashMap;

use crate::error::DecodeError;
use crate::event::{ChainEvent, EventKind, EventParams};
use crate::types::{Block, BlockSummary, EventFilter, RawLog};

#[derive(Debug, Clone, Copy)]
enum ParamType {
    Uint256,
    Address,
}

impl ParamType {
    fn dyn_type(self) -> DynSolType {
        match self {
            Self::Uint256 => DynSolType::Uint(256),
            Self::Address => DynSolType::Address,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Uint256 => "uint256",
            Self::Address => "address",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ParamSpec {
    name: &'static str,
    ty: ParamType,
}

/// Expected on-chain layout of one event kind.
#[derive(Debug, Clone)]
struct EventSchema {
    kind: EventKind,
    indexed: Vec<ParamSpec>,
    data: Vec<ParamSpec>,
}

impl EventSchema {
    fn for_kind(kind: EventKind) -> Self {
        let account = match kind {
            EventKind::Listed => "seller",
            EventKind::Purchased => "buyer",
        };
        Self {
            kind,
            indexed: vec![
                ParamSpec { name: "tokenId", ty: ParamType::Uint256 },
                ParamSpec { name: account, ty: ParamType::Address },
            ],
            data: vec![ParamSpec { name: "price", ty: ParamType::Uint256 }],
        }
    }

    fn label(&self) -> &'static str {
        self.kind.entity_name()
    }
}

/// A decode result for one log of a block.
#[derive(Debug, Clone)]
pub struct DecodedLog {
    pub log_index: u32,
    pub result: Result<ChainEvent, DecodeError>,
}

/// Pure, stateless decoder for the marketplace event kinds.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    schemas: HashMap<B256, EventSchema>,
}

impl EventDecoder {
    pub fn new() -> Self {
        let schemas = EventKind::ALL
            .into_iter()
            .map(|kind| (kind.topic0(), EventSchema::for_kind(kind)))
            .collect();
        Self { schemas }
    }

    /// Returns `true` if `topic0` is the signature of a known event kind.
    pub fn recognizes(&self, topic0: &B256) -> bool {
        self.schemas.contains_key(topic0)
    }

    /// Decode a single log emitted in `block`.
    pub fn decode(&self, log: &RawLog, block: &BlockSummary) -> Result<ChainEvent, DecodeError> {
        let topic0 = log.signature().ok_or(DecodeError::MissingSignature)?;
        let schema = self
            .schemas
            .get(topic0)
            .ok_or_else(|| DecodeError::UnknownSignature {
                topic0: topic0.to_string(),
            })?;

        let expected_topics = schema.indexed.len() + 1;
        if log.topics.len() != expected_topics {
            return Err(DecodeError::TopicCountMismatch {
                kind: schema.label(),
                expected: expected_topics,
                got: log.topics.len(),
            });
        }

        let mut values: HashMap<&'static str, DynSolValue> = HashMap::new();
        for (spec, topic) in schema.indexed.iter().zip(&log.topics[1..]) {
            values.insert(spec.name, decode_word(schema, spec, topic.as_slice())?);
        }

        let expected_data = schema.data.len() * 32;
        if log.data.len() != expected_data {
            return Err(DecodeError::DataLengthMismatch {
                kind: schema.label(),
                expected: expected_data,
                got: log.data.len(),
            });
        }
        for (spec, word) in schema.data.iter().zip(log.data.chunks_exact(32)) {
            values.insert(spec.name, decode_word(schema, spec, word)?);
        }

        let token_id = take_uint(schema, &values, "tokenId")?;
        let price = take_uint(schema, &values, "price")?;
        let params = match schema.kind {
            EventKind::Listed => EventParams::Listed {
                token_id,
                seller: take_address(schema, &values, "seller")?,
                price,
            },
            EventKind::Purchased => EventParams::Purchased {
                token_id,
                buyer: take_address(schema, &values, "buyer")?,
                price,
            },
        };

        Ok(ChainEvent {
            block_number: block.number,
            block_timestamp: block.timestamp,
            transaction_hash: log.transaction_hash,
            log_index: log.log_index,
            address: log.address,
            params,
        })
    }

    /// Decode every log of `block` that passes `filter`.
    ///
    /// Logs are decoded in parallel; results come back in ascending
    /// log-index order.
    pub fn decode_block(&self, block: &Block, filter: &EventFilter) -> Vec<DecodedLog> {
        let summary = block.summary();
        let mut decoded: Vec<DecodedLog> = block
            .logs
            .par_iter()
            .filter(|log| filter.matches_address(&log.address))
            .map(|log| DecodedLog {
                log_index: log.log_index,
                result: self.decode(log, &summary),
            })
            .collect();
        decoded.sort_by_key(|d| d.log_index);
        decoded
    }
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode one 32-byte ABI word as `spec.ty`.
fn decode_word(
    schema: &EventSchema,
    spec: &ParamSpec,
    word: &[u8],
) -> Result<DynSolValue, DecodeError> {
    // Addresses must be left-padded with zeros; anything else is a
    // different type squeezed into the same slot.
    if matches!(spec.ty, ParamType::Address) && word[..12].iter().any(|b| *b != 0) {
        return Err(DecodeError::InvalidParameter {
            kind: schema.label(),
            param: spec.name,
            ty: spec.ty.name(),
        });
    }
    spec.ty
        .dyn_type()
        .abi_decode(word)
        .map_err(|e| DecodeError::AbiDecodeFailed {
            reason: format!("{}.{}: {e}", schema.label(), spec.name),
        })
}

fn take_uint(
    schema: &EventSchema,
    values: &HashMap<&'static str, DynSolValue>,
    name: &'static str,
) -> Result<U256, DecodeError> {
    match values.get(name) {
        Some(DynSolValue::Uint(v, _)) => Ok(*v),
        _ => Err(DecodeError::InvalidParameter {
            kind: schema.label(),
            param: name,
            ty: "uint256",
        }),
    }
}

fn take_address(
    schema: &EventSchema,
    values: &HashMap<&'static str, DynSolValue>,
    name: &'static str,
) -> Result<Address, DecodeError> {
    match values.get(name) {
        Some(DynSolValue::Address(a)) => Ok(*a),
        _ => Err(DecodeError::InvalidParameter {
            kind: schema.label(),
            param: name,
            ty: "address",
        }),
    }
}
