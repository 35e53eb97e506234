//! Payload codec for shard arrays
//!
//! Shard payloads are stored as NumPy `.npy` blobs, which carry the exact
//! shape and dtype of the array. Intensity payloads of any numeric dtype
//! decode to `f32`. Label payloads of any integer dtype, or float masks
//! holding whole numbers, decode to `i64`.

use bytes::Bytes;
use ndarray::Array3;
use ndarray_npy::{ReadNpyError, ReadNpyExt, ReadableElement, WriteNpyExt};
use tracing::trace;

use super::record::{Field, FieldNames, Record};
use crate::error::{Result, SlabError};
use crate::metrics::standard::PAYLOAD_BYTES;

/// Decodes the data and label payloads of records in place
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    data_field: String,
    label_field: String,
}

impl RecordDecoder {
    pub fn new(data_field: impl Into<String>, label_field: impl Into<String>) -> Self {
        Self {
            data_field: data_field.into(),
            label_field: label_field.into(),
        }
    }

    pub fn from_names(names: &FieldNames) -> Self {
        Self::new(names.data.clone(), names.label.clone())
    }

    /// Replace the payload fields of a record with decoded arrays
    ///
    /// Fields that are already decoded are left alone. All other fields
    /// pass through untouched.
    pub fn decode(&self, mut record: Record) -> Result<Record> {
        let data = match record.remove(&self.data_field) {
            Some(Field::Blob(bytes)) => {
                PAYLOAD_BYTES.inc_by(bytes.len() as u64);
                Field::Data(decode_data(&self.data_field, &bytes)?)
            }
            Some(decoded @ Field::Data(_)) => decoded,
            Some(other) => return Err(wrong_payload(&self.data_field, &other)),
            None => {
                return Err(SlabError::MissingField {
                    field: self.data_field.clone(),
                })
            }
        };
        record.insert(self.data_field.clone(), data);

        let label = match record.remove(&self.label_field) {
            Some(Field::Blob(bytes)) => {
                PAYLOAD_BYTES.inc_by(bytes.len() as u64);
                Field::Label(decode_labels(&self.label_field, &bytes)?)
            }
            Some(decoded @ Field::Label(_)) => decoded,
            Some(other) => return Err(wrong_payload(&self.label_field, &other)),
            None => {
                return Err(SlabError::MissingField {
                    field: self.label_field.clone(),
                })
            }
        };
        record.insert(self.label_field.clone(), label);

        Ok(record)
    }

    /// Decode every record of a fetched batch
    pub fn decode_all(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        let decoded = records
            .into_iter()
            .map(|r| self.decode(r))
            .collect::<Result<Vec<_>>>()?;
        trace!("Decoded {} records", decoded.len());
        Ok(decoded)
    }
}

/// Encode an intensity slab as an `.npy` payload
pub fn encode_data(array: &Array3<f32>) -> Result<Bytes> {
    encode(array)
}

/// Encode a label slab as an `.npy` payload
pub fn encode_labels(array: &Array3<i64>) -> Result<Bytes> {
    encode(array)
}

fn encode<A: ndarray_npy::WritableElement>(array: &Array3<A>) -> Result<Bytes> {
    let mut buf = Vec::new();
    array
        .write_npy(&mut buf)
        .map_err(|e| SlabError::Internal {
            message: format!("Failed to encode array: {}", e),
        })?;
    Ok(Bytes::from(buf))
}

/// Decode an intensity payload, widening or narrowing to `f32`
pub fn decode_data(field: &str, bytes: &[u8]) -> Result<Array3<f32>> {
    if let Some(a) = try_read::<f32>(field, bytes)? {
        return Ok(a);
    }
    if let Some(a) = try_read::<f64>(field, bytes)? {
        return Ok(a.mapv(|v| v as f32));
    }
    if let Some(a) = try_read::<u8>(field, bytes)? {
        return Ok(a.mapv(f32::from));
    }
    if let Some(a) = try_read::<i8>(field, bytes)? {
        return Ok(a.mapv(f32::from));
    }
    if let Some(a) = try_read::<u16>(field, bytes)? {
        return Ok(a.mapv(f32::from));
    }
    if let Some(a) = try_read::<i16>(field, bytes)? {
        return Ok(a.mapv(f32::from));
    }
    if let Some(a) = try_read::<u32>(field, bytes)? {
        return Ok(a.mapv(|v| v as f32));
    }
    if let Some(a) = try_read::<i32>(field, bytes)? {
        return Ok(a.mapv(|v| v as f32));
    }
    if let Some(a) = try_read::<i64>(field, bytes)? {
        return Ok(a.mapv(|v| v as f32));
    }
    if let Some(a) = try_read::<u64>(field, bytes)? {
        return Ok(a.mapv(|v| v as f32));
    }
    Err(unsupported_dtype(field))
}

/// Decode a label payload, widening to `i64`
pub fn decode_labels(field: &str, bytes: &[u8]) -> Result<Array3<i64>> {
    if let Some(a) = try_read::<i64>(field, bytes)? {
        return Ok(a);
    }
    if let Some(a) = try_read::<u8>(field, bytes)? {
        return Ok(a.mapv(i64::from));
    }
    if let Some(a) = try_read::<i8>(field, bytes)? {
        return Ok(a.mapv(i64::from));
    }
    if let Some(a) = try_read::<u16>(field, bytes)? {
        return Ok(a.mapv(i64::from));
    }
    if let Some(a) = try_read::<i16>(field, bytes)? {
        return Ok(a.mapv(i64::from));
    }
    if let Some(a) = try_read::<u32>(field, bytes)? {
        return Ok(a.mapv(i64::from));
    }
    if let Some(a) = try_read::<i32>(field, bytes)? {
        return Ok(a.mapv(i64::from));
    }
    if let Some(a) = try_read::<u64>(field, bytes)? {
        return Ok(a.mapv(|v| v as i64));
    }
    if let Some(a) = try_read::<f32>(field, bytes)? {
        return integral_labels(field, a);
    }
    if let Some(a) = try_read::<f64>(field, bytes)? {
        return integral_labels(field, a);
    }
    Err(unsupported_dtype(field))
}

/// Float masks are accepted only if every value is a whole number
fn integral_labels<F: Copy + Into<f64>>(field: &str, array: Array3<F>) -> Result<Array3<i64>> {
    let bound = i64::MAX as f64;
    if let Some(&bad) = array.iter().find(|&&v| {
        let v: f64 = v.into();
        !v.is_finite() || v.fract() != 0.0 || v.abs() >= bound
    }) {
        return Err(SlabError::Decode {
            field: field.to_string(),
            reason: format!("label value {} is not an integer", Into::<f64>::into(bad)),
        });
    }
    Ok(array.mapv(|v| Into::<f64>::into(v) as i64))
}

/// Read the payload as `A`, or `None` if its dtype is something else
fn try_read<A: ReadableElement>(field: &str, bytes: &[u8]) -> Result<Option<Array3<A>>> {
    match Array3::<A>::read_npy(bytes) {
        Ok(array) => Ok(Some(array)),
        Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
        Err(e) => Err(SlabError::Decode {
            field: field.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn unsupported_dtype(field: &str) -> SlabError {
    SlabError::Decode {
        field: field.to_string(),
        reason: "unsupported element type".into(),
    }
}

fn wrong_payload(field: &str, found: &Field) -> SlabError {
    SlabError::UnexpectedFieldType {
        field: field.to_string(),
        expected: "binary",
        found: found.kind(),
    }
}
