//! Conversions between Value, serde_json and typed Rust values.

use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::value::Value;

/// Convert a Value to a Rust type via serde.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    let json = value_to_json(value);
    serde_json::from_value(json).map_err(|e| Error::decode(e.to_string()))
}

/// Convert a Rust type to a Value via serde.
pub fn to_value<T: Serialize>(data: &T) -> Result<Value> {
    let json = serde_json::to_value(data).map_err(|e| Error::encode(e.to_string()))?;
    Ok(json_to_value(json))
}

/// Object key marking a base64-encoded `Value::Bytes` in JSON.
pub const BYTES_TAG: &str = "$bytes";

/// Convert our Value to serde_json::Value.
///
/// `Bytes` become `{"$bytes": "<base64>"}`.
pub fn value_to_json(value: Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(b),
        Value::Integer(i) => serde_json::Value::Number(i.into()),
        Value::Float(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s),
        Value::Bytes(b) => {
            // JSON has no bytes; tag the base64 text so it decodes back to Bytes
            let encoded = base64::engine::general_purpose::STANDARD.encode(&b);
            let mut tagged = serde_json::Map::new();
            tagged.insert(BYTES_TAG.to_string(), serde_json::Value::String(encoded));
            serde_json::Value::Object(tagged)
        }
        Value::Array(arr) => serde_json::Value::Array(arr.into_iter().map(value_to_json).collect()),
        Value::Map(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, value_to_json(v)))
                .collect(),
        ),
    }
}

/// Convert serde_json::Value to our Value.
pub fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                Value::String(n.to_string())
            }
        }
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(arr) => Value::Array(arr.into_iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => match tagged_bytes(&map) {
            Some(bytes) => Value::Bytes(bytes),
            None => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, json_to_value(v)))
                    .collect(),
            ),
        },
    }
}

/// The bytes of a `{"$bytes": "<base64>"}` object. Anything else, including
/// a tag holding invalid base64, stays a map.
fn tagged_bytes(map: &serde_json::Map<String, serde_json::Value>) -> Option<Vec<u8>> {
    if map.len() != 1 {
        return None;
    }
    let encoded = map.get(BYTES_TAG)?.as_str()?;
    base64::engine::general_purpose::STANDARD.decode(encoded).ok()
}
