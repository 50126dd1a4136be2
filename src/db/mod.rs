//! Durable side of the write-back
//!
//! One collection per key prefix; documents are matched on a numeric
//! identifier field.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use bson::Document;

use crate::types::Result;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Destination for flushed records.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Replace the document in `collection` whose `id_field` equals `id`,
    /// inserting `record` if there is none.
    ///
    /// Errors for which [`crate::BgSaveError::is_transport`] holds mean the
    /// store itself is unreachable; anything else is a rejection of this record.
    async fn upsert(&self, collection: &str, id_field: &str, id: i64, record: Document)
        -> Result<()>;
}
