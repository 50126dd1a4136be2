//! In-process document store for tests and local runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bson::Document;
use dashmap::{DashMap, DashSet};

use super::DocumentStore;
use crate::types::{BgSaveError, Result};

/// Store keeping each collection as an id-ordered map
#[derive(Default)]
pub struct MemoryStore {
    collections: DashMap<String, BTreeMap<i64, Document>>,
    rejected: DashSet<(String, i64)>,
    disconnected: AtomicBool,
    upserts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every upsert of `collection`/`id` as an invalid record.
    pub fn reject(&self, collection: &str, id: i64) {
        self.rejected.insert((collection.to_string(), id));
    }

    /// Toggle a simulated connection loss; upserts fail as transport errors.
    pub fn set_disconnected(&self, disconnected: bool) {
        self.disconnected.store(disconnected, Ordering::SeqCst);
    }

    pub fn get(&self, collection: &str, id: i64) -> Option<Document> {
        self.collections
            .get(collection)
            .and_then(|docs| docs.get(&id).cloned())
    }

    /// Number of documents in `collection`
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    /// Total upsert calls that reached the store, successful or not.
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(
        &self,
        collection: &str,
        _id_field: &str,
        id: i64,
        record: Document,
    ) -> Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);

        if self.disconnected.load(Ordering::SeqCst) {
            return Err(BgSaveError::Database("store disconnected".into()));
        }
        if self.rejected.contains(&(collection.to_string(), id)) {
            return Err(BgSaveError::Upsert(format!(
                "document {} rejected by {}",
                id, collection
            )));
        }

        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id, record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[tokio::test]
    async fn test_upsert_inserts_then_replaces() {
        let store = MemoryStore::new();
        store
            .upsert("players", "id", 42, doc! { "id": 42_i64, "name": "Ana" })
            .await
            .unwrap();
        store
            .upsert("players", "id", 42, doc! { "id": 42_i64, "name": "Bea" })
            .await
            .unwrap();

        assert_eq!(store.count("players"), 1);
        assert_eq!(
            store.get("players", 42).unwrap().get_str("name").unwrap(),
            "Bea"
        );
        assert_eq!(store.upsert_count(), 2);
    }

    #[tokio::test]
    async fn test_rejection_and_disconnect_errors() {
        let store = MemoryStore::new();
        store.reject("players", 1);

        let err = store.upsert("players", "id", 1, doc! {}).await.unwrap_err();
        assert!(!err.is_transport());

        store.set_disconnected(true);
        let err = store.upsert("players", "id", 2, doc! {}).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(store.count("players"), 0);
    }
}
