//! Turns raw logs into [`DecodedEvent`]s using the resolved contract interface.
//!
//! Indexed parameters come from `topics[1..]`, non-indexed ones from the ABI encoded data
//! tail. Both are merged back in declaration order.

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{Address, B256};
use num_bigint::{BigInt, Sign};
use tracing::{debug, trace};

use crate::abi::{ContractInterface, EventParameter, EventSignature};
use crate::error::DecodeError;
use crate::types::{DecodedEvent, DecodedField, EventFilter, FieldValue, RawLog};

/// Decode `log` if it is one of the `wanted` events. Every rejection is an expected no-op.
pub fn decode(log: &RawLog, wanted: &EventFilter, interface: &ContractInterface) -> Option<DecodedEvent> {
    match try_decode(log, wanted, interface) {
        Ok(event) => Some(event),
        Err(e @ (DecodeError::UnknownSignature(_) | DecodeError::NotRequested(_))) => {
            trace!("Skipping log in tx {:?}: {}", log.transaction_hash, e);
            None
        }
        Err(e) => {
            debug!("Discarding log in tx {:?}: {}", log.transaction_hash, e);
            None
        }
    }
}

pub fn try_decode(
    log: &RawLog,
    wanted: &EventFilter,
    interface: &ContractInterface,
) -> Result<DecodedEvent, DecodeError> {
    let topics = log.topics();
    let selector = topics.first().ok_or(DecodeError::NoTopics)?;

    let signature = interface
        .event(selector)
        .ok_or(DecodeError::UnknownSignature(*selector))?;
    if !wanted.contains(&signature.name) {
        return Err(DecodeError::NotRequested(signature.name.clone()));
    }

    let block_number = log.block_number.ok_or(DecodeError::MissingMetadata("block number"))?;
    let transaction_hash = log
        .transaction_hash
        .ok_or(DecodeError::MissingMetadata("transaction hash"))?;

    let mut data_values = decode_data(signature, log.data().data.as_ref())?.into_iter();
    let mut indexed_topics = topics[1..].iter();

    let mut fields = Vec::with_capacity(signature.parameters.len());
    for param in &signature.parameters {
        let value = if param.indexed {
            let topic = indexed_topics
                .next()
                .ok_or_else(|| DecodeError::MissingTopic(param.name.clone()))?;
            decode_topic(param, topic)
        } else {
            let value = data_values
                .next()
                .ok_or_else(|| DecodeError::Data(format!("no data value for {}", param.name)))?;
            field_value(value)
        };
        fields.push(DecodedField {
            name: param.name.clone(),
            value,
        });
    }

    Ok(DecodedEvent {
        name: signature.name.clone(),
        block_number,
        transaction_hash,
        contract_address: log.address(),
        fields,
    })
}

fn decode_data(signature: &EventSignature, data: &[u8]) -> Result<Vec<DynSolValue>, DecodeError> {
    let mut types = Vec::new();
    for param in signature.parameters.iter().filter(|p| !p.indexed) {
        let ty = param.sol_type.clone().ok_or_else(|| DecodeError::UnsupportedType {
            name: param.name.clone(),
            ty: param.ty.clone(),
        })?;
        types.push(ty);
    }
    if types.is_empty() {
        return Ok(Vec::new());
    }

    let decoded = DynSolType::Tuple(types)
        .abi_decode_params(data)
        .map_err(|e| DecodeError::Data(e.to_string()))?;

    match decoded {
        DynSolValue::Tuple(values) => Ok(values),
        other => Ok(vec![other]),
    }
}

fn decode_topic(param: &EventParameter, topic: &B256) -> FieldValue {
    match &param.sol_type {
        Some(DynSolType::Address) => FieldValue::Address(Address::from_word(*topic)),
        Some(DynSolType::Uint(_)) => FieldValue::Int(BigInt::from_bytes_be(Sign::Plus, topic.as_slice())),
        Some(DynSolType::Int(_)) => FieldValue::Int(BigInt::from_signed_bytes_be(topic.as_slice())),
        Some(DynSolType::Bool) => FieldValue::Bool(topic[31] != 0),
        // Only the keccak256 of dynamic values is stored in the topic.
        Some(
            DynSolType::String
            | DynSolType::Bytes
            | DynSolType::Array(_)
            | DynSolType::FixedArray(..)
            | DynSolType::Tuple(_),
        ) => FieldValue::IndexedHash(*topic),
        _ => FieldValue::RawTopic(*topic),
    }
}

fn field_value(value: DynSolValue) -> FieldValue {
    match value {
        DynSolValue::Bool(b) => FieldValue::Bool(b),
        DynSolValue::Int(i, _) => {
            FieldValue::Int(BigInt::from_signed_bytes_be(&i.into_raw().to_be_bytes::<32>()))
        }
        DynSolValue::Uint(u, _) => FieldValue::Int(BigInt::from_bytes_be(Sign::Plus, &u.to_be_bytes::<32>())),
        DynSolValue::FixedBytes(word, size) => FieldValue::Bytes(word[..size].to_vec()),
        DynSolValue::Address(a) => FieldValue::Address(a),
        DynSolValue::Function(f) => FieldValue::Bytes(f.as_slice().to_vec()),
        DynSolValue::Bytes(b) => FieldValue::Bytes(b),
        DynSolValue::String(s) => FieldValue::Str(s),
        DynSolValue::Array(values) | DynSolValue::FixedArray(values) | DynSolValue::Tuple(values) => {
            FieldValue::List(values.into_iter().map(field_value).collect())
        }
        #[allow(unreachable_patterns)]
        other => FieldValue::Str(format!("{other:?}")),
    }
}
