//! Extended JSON documents to records
//!
//! Binary payloads arrive as `{"$binary": {"base64": ..., "subType": ...}}`,
//! wide integers as `{"$numberLong": "..."}`. Values the pipeline has no use
//! for (nested documents, mixed arrays) become `Field::Null`.

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use serde_json::{Map, Value};

use crate::data::record::{Field, Record};
use crate::error::{Result, SlabError};

/// Convert one returned document
pub fn record_from_document(document: Map<String, Value>) -> Result<Record> {
    let mut record = Record::new();
    for (name, value) in document {
        let field = field_from_value(&name, value)?;
        record.insert(name, field);
    }
    Ok(record)
}

/// Convert one document value
pub fn field_from_value(name: &str, value: Value) -> Result<Field> {
    let field = match value {
        Value::Null => Field::Null,
        Value::Bool(b) => Field::Bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Field::Int(i),
            None => Field::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => Field::Text(s),
        Value::Array(items) => int_list(name, items)?,
        Value::Object(map) => wrapped(name, map)?,
    };
    Ok(field)
}

fn int_list(name: &str, items: Vec<Value>) -> Result<Field> {
    let mut ints = Vec::with_capacity(items.len());
    for item in items {
        match field_from_value(name, item)? {
            Field::Int(i) => ints.push(i),
            _ => return Ok(Field::Null),
        }
    }
    Ok(Field::Ints(ints))
}

fn wrapped(name: &str, mut map: Map<String, Value>) -> Result<Field> {
    if let Some(binary) = map.remove("$binary") {
        return binary_payload(name, binary).map(Field::Blob);
    }
    if let Some(Value::String(s)) = map.get("$numberLong").or_else(|| map.get("$numberInt")) {
        return s.parse::<i64>().map(Field::Int).map_err(|e| SlabError::Decode {
            field: name.to_string(),
            reason: format!("bad integer '{}': {}", s, e),
        });
    }
    if let Some(Value::String(s)) = map.get("$numberDouble") {
        return s.parse::<f64>().map(Field::Float).map_err(|e| SlabError::Decode {
            field: name.to_string(),
            reason: format!("bad double '{}': {}", s, e),
        });
    }
    if let Some(Value::String(s)) = map.get("$oid") {
        return Ok(Field::Text(s.clone()));
    }
    Ok(Field::Null)
}

/// Canonical `{"base64", "subType"}` and legacy plain-string forms
fn binary_payload(name: &str, binary: Value) -> Result<Bytes> {
    let encoded = match binary {
        Value::String(s) => s,
        Value::Object(mut inner) => match inner.remove("base64") {
            Some(Value::String(s)) => s,
            _ => {
                return Err(SlabError::Decode {
                    field: name.to_string(),
                    reason: "binary value has no base64 payload".into(),
                })
            }
        },
        _ => {
            return Err(SlabError::Decode {
                field: name.to_string(),
                reason: "malformed binary value".into(),
            })
        }
    };

    general_purpose::STANDARD
        .decode(encoded.as_bytes())
        .map(Bytes::from)
        .map_err(|e| SlabError::Decode {
            field: name.to_string(),
            reason: format!("invalid base64: {}", e),
        })
}
