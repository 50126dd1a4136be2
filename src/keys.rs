//! Dirty key parsing
//!
//! Cache keys name their durable home: `players:42` is record 42 of the
//! `players` collection.

use std::fmt;
use std::str::FromStr;

use crate::types::{BgSaveError, Result};

/// Separator between collection name and record id
pub const KEY_SEPARATOR: char = ':';

/// A dirty key split into its collection and numeric record id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub collection: String,
    pub id: i64,
}

impl RecordKey {
    /// Parse a raw `collection:id` key.
    ///
    /// The key must split into exactly two non-empty parts, the id must be
    /// an integer, and the collection must be a usable MongoDB collection name.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split(KEY_SEPARATOR).collect();
        if parts.len() != 2 {
            return Err(BgSaveError::KeyFormat(format!(
                "cannot split key {:?} into collection and id",
                raw
            )));
        }

        let (collection, id) = (parts[0], parts[1]);
        if collection.is_empty() || id.is_empty() {
            return Err(BgSaveError::KeyFormat(format!(
                "empty collection or id in key {:?}",
                raw
            )));
        }
        validate_collection(collection, raw)?;

        let id = id.parse::<i64>().map_err(|e| {
            BgSaveError::KeyFormat(format!("non-numeric id in key {:?}: {}", raw, e))
        })?;

        Ok(Self {
            collection: collection.to_string(),
            id,
        })
    }
}

fn validate_collection(name: &str, raw: &str) -> Result<()> {
    if name.contains('$') || name.contains('\0') || name.starts_with("system.") {
        return Err(BgSaveError::KeyFormat(format!(
            "collection name {:?} in key {:?} is not allowed",
            name, raw
        )));
    }
    Ok(())
}

impl FromStr for RecordKey {
    type Err = BgSaveError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.collection, KEY_SEPARATOR, self.id)
    }
}
