//! Stored documents and the typed shard view over them
//!
//! A `Record` is a loose field map as it comes back from the store. After
//! payload decoding it can be narrowed into a `SubRecord`, the shard of one
//! subject's volume.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SlabError};

/// Scalar document key: external IDs, subject keys and shard keys
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(v) => write!(f, "{}", v),
            Key::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int(v)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Text(v.to_string())
    }
}

/// One value of a stored document
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Ints(Vec<i64>),
    /// Undecoded binary payload
    Blob(Bytes),
    /// Decoded intensity slab
    Data(Array3<f32>),
    /// Decoded label slab
    Label(Array3<i64>),
}

impl Field {
    /// Short name of the variant, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Field::Null => "null",
            Field::Bool(_) => "bool",
            Field::Int(_) => "int",
            Field::Float(_) => "float",
            Field::Text(_) => "text",
            Field::Ints(_) => "int list",
            Field::Blob(_) => "binary",
            Field::Data(_) => "data array",
            Field::Label(_) => "label array",
        }
    }

    /// Interpret the field as a document key
    pub fn as_key(&self) -> Option<Key> {
        match self {
            Field::Int(v) => Some(Key::Int(*v)),
            Field::Text(v) => Some(Key::Text(v.clone())),
            _ => None,
        }
    }
}

impl From<Key> for Field {
    fn from(key: Key) -> Self {
        match key {
            Key::Int(v) => Field::Int(v),
            Key::Text(v) => Field::Text(v),
        }
    }
}

/// A document as returned by the store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: HashMap<String, Field>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Field>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Field) -> Option<Field> {
        self.fields.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.get_mut(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Field> {
        self.fields.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Keep only the named fields; an empty projection keeps everything
    pub fn project(mut self, projection: &[String]) -> Self {
        if !projection.is_empty() {
            self.fields.retain(|name, _| projection.iter().any(|p| p == name));
        }
        self
    }

    fn take(&mut self, name: &str) -> Result<Field> {
        self.fields.remove(name).ok_or_else(|| SlabError::MissingField {
            field: name.to_string(),
        })
    }
}

impl From<Bytes> for Field {
    fn from(v: Bytes) -> Self {
        Field::Blob(v)
    }
}

impl From<i64> for Field {
    fn from(v: i64) -> Self {
        Field::Int(v)
    }
}

impl From<&str> for Field {
    fn from(v: &str) -> Self {
        Field::Text(v.to_string())
    }
}

impl From<Vec<i64>> for Field {
    fn from(v: Vec<i64>) -> Self {
        Field::Ints(v)
    }
}

/// Names of the document fields the pipeline reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldNames {
    /// Owning subject of a shard
    pub subject: String,
    /// Ordering key of a shard within its subject
    pub shard: String,
    /// Intensity payload
    pub data: String,
    /// Label payload
    pub label: String,
    /// Optional (x, y, z) placement of the shard inside the volume
    pub placement: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            subject: "subject".into(),
            shard: "id".into(),
            data: "subdata".into(),
            label: "sublabel".into(),
            placement: "coords".into(),
        }
    }
}

/// A decoded shard of one subject's volume
#[derive(Debug, Clone)]
pub struct SubRecord {
    pub subject: Key,
    pub shard: Key,
    pub data: Array3<f32>,
    pub label: Array3<i64>,
    pub placement: Option<[usize; 3]>,
}

impl SubRecord {
    /// Narrow a decoded record into a shard
    ///
    /// The data and label fields must already be decoded.
    pub fn from_record(mut record: Record, names: &FieldNames) -> Result<Self> {
        let subject = take_key(&mut record, &names.subject)?;
        let shard = take_key(&mut record, &names.shard)?;

        let data = match record.take(&names.data)? {
            Field::Data(a) => a,
            other => return Err(unexpected(&names.data, "data array", &other)),
        };
        let label = match record.take(&names.label)? {
            Field::Label(a) => a,
            other => return Err(unexpected(&names.label, "label array", &other)),
        };

        let placement = match record.remove(&names.placement) {
            None | Some(Field::Null) => None,
            Some(Field::Ints(v)) => Some(placement_from(&names.placement, &v)?),
            Some(other) => return Err(unexpected(&names.placement, "int list", &other)),
        };

        Ok(Self {
            subject,
            shard,
            data,
            label,
            placement,
        })
    }

    /// Extent of the shard along the stacking axis
    pub fn depth(&self) -> usize {
        self.data.dim().0
    }
}

fn take_key(record: &mut Record, name: &str) -> Result<Key> {
    let field = record.take(name)?;
    field.as_key().ok_or_else(|| unexpected(name, "int or text", &field))
}

fn placement_from(name: &str, values: &[i64]) -> Result<[usize; 3]> {
    match values {
        [x, y, z] if *x >= 0 && *y >= 0 && *z >= 0 => Ok([*x as usize, *y as usize, *z as usize]),
        _ => Err(SlabError::Decode {
            field: name.to_string(),
            reason: format!("expected three non-negative coordinates, got {:?}", values),
        }),
    }
}

fn unexpected(field: &str, expected: &'static str, found: &Field) -> SlabError {
    SlabError::UnexpectedFieldType {
        field: field.to_string(),
        expected,
        found: found.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded_record(subject: i64, shard: i64) -> Record {
        Record::new()
            .with("subject", subject)
            .with("id", shard)
            .with("subdata", Field::Data(Array3::zeros((2, 4, 4))))
            .with("sublabel", Field::Label(Array3::zeros((2, 4, 4))))
    }

    #[test]
    fn test_subrecord_from_decoded_record() {
        let record = decoded_record(7, 3).with("coords", vec![6i64, 0, 0]);
        let sub = SubRecord::from_record(record, &FieldNames::default()).unwrap();

        assert_eq!(sub.subject, Key::Int(7));
        assert_eq!(sub.shard, Key::Int(3));
        assert_eq!(sub.depth(), 2);
        assert_eq!(sub.placement, Some([6, 0, 0]));
    }

    #[test]
    fn test_undecoded_payload_is_rejected() {
        let record = decoded_record(1, 0).with("subdata", Bytes::from_static(b"raw"));
        let err = SubRecord::from_record(record, &FieldNames::default()).unwrap_err();
        assert!(matches!(err, SlabError::UnexpectedFieldType { found: "binary", .. }));
    }

    #[test]
    fn test_missing_shard_key() {
        let mut record = decoded_record(1, 0);
        record.remove("id");
        let err = SubRecord::from_record(record, &FieldNames::default()).unwrap_err();
        assert!(matches!(err, SlabError::MissingField { ref field } if field == "id"));
    }

    #[test]
    fn test_projection() {
        let record = decoded_record(1, 0).with("extra", "x");
        let projected = record.clone().project(&["subject".into(), "id".into()]);
        assert_eq!(projected.len(), 2);
        assert!(!projected.contains("extra"));

        assert_eq!(record.clone().project(&[]), record);
    }

    #[test]
    fn test_key_ordering() {
        let mut keys = vec![Key::Int(10), Key::Int(2), Key::Int(-1)];
        keys.sort();
        assert_eq!(keys, vec![Key::Int(-1), Key::Int(2), Key::Int(10)]);
    }
}
