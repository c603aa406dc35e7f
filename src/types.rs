use std::collections::HashSet;
use std::fmt;

use alloy_primitives::{Address, B256};
use num_bigint::BigInt;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Log entry as delivered by the node, either from a range query or a subscription.
pub type RawLog = alloy::rpc::types::Log;

/// Decoded value of a single event parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Str(String),
    Int(BigInt),
    Bool(bool),
    Address(Address),
    Bytes(Vec<u8>),
    /// Arrays and tuples decoded from the data payload.
    List(Vec<FieldValue>),
    /// Topic of an indexed dynamic parameter (string, bytes, array, tuple).
    /// The topic is the keccak256 of the value, the value itself is not recoverable.
    IndexedHash(B256),
    /// Topic of an indexed parameter whose type has no dedicated decoding, kept verbatim.
    RawTopic(B256),
}

impl FieldValue {
    pub fn is_indexed_hash(&self) -> bool {
        matches!(self, FieldValue::IndexedHash(_))
    }

    pub fn as_int(&self) -> Option<&BigInt> {
        match self {
            FieldValue::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            FieldValue::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Str(s) => Value::String(s.clone()),
            FieldValue::Int(i) => Value::String(i.to_string()),
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Address(a) => Value::String(a.to_checksum(None)),
            FieldValue::Bytes(b) => Value::String(format!("0x{}", hex::encode(b))),
            FieldValue::List(items) => Value::Array(items.iter().map(FieldValue::to_json).collect()),
            FieldValue::IndexedHash(h) | FieldValue::RawTopic(h) => Value::String(format!("{h:#x}")),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) => f.write_str(s),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Address(a) => f.write_str(&a.to_checksum(None)),
            FieldValue::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            FieldValue::List(_) => write!(f, "{}", self.to_json()),
            FieldValue::IndexedHash(h) | FieldValue::RawTopic(h) => write!(f, "{h:#x}"),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedField {
    pub name: String,
    pub value: FieldValue,
}

/// Event decoded from a raw log. `fields` follows the ABI declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedEvent {
    pub name: String,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub contract_address: Address,
    pub fields: Vec<DecodedField>,
}

impl DecodedEvent {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// Event names requested on the command line. Matching is exact and case sensitive.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    names: HashSet<String>,
}

impl EventFilter {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}
