//! Record codec
//!
//! Cached records are MessagePack maps. They are decoded into generic BSON
//! documents so any record shape can be persisted without a schema.

use std::io::Cursor;

use bson::{spec::BinarySubtype, Binary, Bson, DateTime, Document};
use rmpv::Value;

use crate::types::{BgSaveError, Result};

/// MessagePack extension type reserved for timestamps
const TIMESTAMP_EXT: i8 = -1;

/// Decodes raw cache values into documents
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordCodec;

impl RecordCodec {
    pub fn new() -> Self {
        Self
    }

    /// Decode one cached value.
    ///
    /// The value must be a single MessagePack map with string keys; trailing
    /// bytes after it are an error.
    pub fn decode(&self, raw: &[u8]) -> Result<Document> {
        let mut cursor = Cursor::new(raw);
        let value = rmpv::decode::read_value(&mut cursor)
            .map_err(|e| BgSaveError::Decode(format!("invalid MessagePack: {}", e)))?;

        let consumed = cursor.position() as usize;
        if consumed != raw.len() {
            return Err(BgSaveError::Decode(format!(
                "{} trailing bytes after record",
                raw.len() - consumed
            )));
        }

        match value {
            Value::Map(entries) => map_to_document(entries),
            other => Err(BgSaveError::Decode(format!(
                "expected a map at top level, found {}",
                type_name(&other)
            ))),
        }
    }
}

/// Make the record's identifier field agree with the id parsed from its key.
///
/// A missing field is filled in; a present field must hold the same integer.
pub fn bind_identity(record: &mut Document, field: &str, id: i64) -> Result<()> {
    let matches = match record.get(field) {
        None => {
            record.insert(field, Bson::Int64(id));
            return Ok(());
        }
        Some(Bson::Int32(v)) => i64::from(*v) == id,
        Some(Bson::Int64(v)) => *v == id,
        Some(Bson::Double(v)) => double_as_id(*v) == Some(id),
        Some(_) => false,
    };

    if matches {
        Ok(())
    } else {
        Err(BgSaveError::Identity(format!(
            "field {:?} is {} but key id is {}",
            field,
            record.get(field).map(|b| b.to_string()).unwrap_or_default(),
            id
        )))
    }
}

/// Largest magnitude at which every integer has an exact `f64`
const MAX_EXACT_DOUBLE: f64 = 9_007_199_254_740_992.0;

/// Integer value of a double, if it is one and it is exact.
fn double_as_id(v: f64) -> Option<i64> {
    if v.fract() != 0.0 || v.abs() >= MAX_EXACT_DOUBLE {
        return None;
    }
    Some(v as i64)
}

fn map_to_document(entries: Vec<(Value, Value)>) -> Result<Document> {
    let mut doc = Document::new();
    for (key, value) in entries {
        let key = match key {
            Value::String(s) => s
                .into_str()
                .ok_or_else(|| BgSaveError::Decode("map key is not valid UTF-8".into()))?,
            other => {
                return Err(BgSaveError::Decode(format!(
                    "map keys must be strings, found {}",
                    type_name(&other)
                )))
            }
        };
        if key.contains('\0') {
            return Err(BgSaveError::Decode(format!("map key {:?} contains NUL", key)));
        }
        doc.insert(key, to_bson(value)?);
    }
    Ok(doc)
}

fn to_bson(value: Value) -> Result<Bson> {
    Ok(match value {
        Value::Nil => Bson::Null,
        Value::Boolean(b) => Bson::Boolean(b),
        Value::Integer(i) => {
            if let Some(v) = i.as_i64() {
                match i32::try_from(v) {
                    Ok(small) => Bson::Int32(small),
                    Err(_) => Bson::Int64(v),
                }
            } else {
                return Err(BgSaveError::Decode(format!(
                    "integer {} does not fit in 64 signed bits",
                    i
                )));
            }
        }
        Value::F32(f) => Bson::Double(f64::from(f)),
        Value::F64(f) => Bson::Double(f),
        Value::String(s) => Bson::String(
            s.into_str()
                .ok_or_else(|| BgSaveError::Decode("string is not valid UTF-8".into()))?,
        ),
        Value::Binary(bytes) => Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes,
        }),
        Value::Array(items) => Bson::Array(
            items
                .into_iter()
                .map(to_bson)
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::Map(entries) => Bson::Document(map_to_document(entries)?),
        Value::Ext(TIMESTAMP_EXT, data) => Bson::DateTime(decode_timestamp(&data)?),
        Value::Ext(kind, _) => {
            return Err(BgSaveError::Decode(format!(
                "unsupported extension type {}",
                kind
            )))
        }
    })
}

/// Timestamp extension: 32-bit seconds, 64-bit packed nanos/seconds, or
/// 96-bit nanos + signed seconds.
fn decode_timestamp(data: &[u8]) -> Result<DateTime> {
    let (secs, nanos): (i64, u32) = match data.len() {
        4 => {
            let secs = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
            (i64::from(secs), 0)
        }
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(data);
            let packed = u64::from_be_bytes(buf);
            ((packed & 0x3_ffff_ffff) as i64, (packed >> 34) as u32)
        }
        12 => {
            let nanos = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&data[4..12]);
            (i64::from_be_bytes(buf), nanos)
        }
        n => {
            return Err(BgSaveError::Decode(format!(
                "timestamp extension has invalid length {}",
                n
            )))
        }
    };

    if nanos >= 1_000_000_000 {
        return Err(BgSaveError::Decode("timestamp nanoseconds out of range".into()));
    }

    secs.checked_mul(1000)
        .and_then(|ms| ms.checked_add(i64::from(nanos / 1_000_000)))
        .map(DateTime::from_millis)
        .ok_or_else(|| BgSaveError::Decode("timestamp out of range".into()))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Nil => "nil",
        Value::Boolean(_) => "boolean",
        Value::Integer(_) => "integer",
        Value::F32(_) | Value::F64(_) => "float",
        Value::String(_) => "string",
        Value::Binary(_) => "binary",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        Value::Ext(..) => "extension",
    }
}
