//! MongoDB document store
//!
//! The client is created once; its internal pool is reused by every flush.

use async_trait::async_trait;
use bson::{doc, Document};
use dashmap::DashSet;
use mongodb::{options::IndexOptions, Client, Database, IndexModel};
use tracing::{debug, info, warn};

use super::DocumentStore;
use crate::types::{BgSaveError, Result};

/// Database used when neither the configuration nor the URL names one
pub const DEFAULT_DATABASE: &str = "bgsave";

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoStore {
    db: Database,
    ensure_indexes: bool,
    indexed: std::sync::Arc<DashSet<String>>,
}

impl MongoStore {
    /// Connect and ping the server.
    ///
    /// `db_name` overrides the database named in the URL; with neither,
    /// [`DEFAULT_DATABASE`] is used.
    pub async fn connect(uri: &str, db_name: Option<&str>, ensure_indexes: bool) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Bound server selection so an unreachable server fails the call
        // instead of hanging the flush cycle.
        let timeout_uri = with_timeouts(uri);

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| BgSaveError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        let db = match db_name {
            Some(name) => client.database(name),
            None => client
                .default_database()
                .unwrap_or_else(|| client.database(DEFAULT_DATABASE)),
        };

        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| BgSaveError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db.name());

        Ok(Self {
            db,
            ensure_indexes,
            indexed: Default::default(),
        })
    }

    /// Name of the database records are written to
    pub fn db_name(&self) -> &str {
        self.db.name()
    }

    /// Create a unique index on the identifier field the first time a
    /// collection is written. Failure is logged and never retried.
    async fn ensure_index(&self, collection: &str, id_field: &str) {
        if !self.ensure_indexes || !self.indexed.insert(collection.to_string()) {
            return;
        }

        let model = IndexModel::builder()
            .keys(doc! { id_field: 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();

        match self
            .db
            .collection::<Document>(collection)
            .create_index(model)
            .await
        {
            Ok(result) => debug!(collection, index = %result.index_name, "Identifier index ready"),
            Err(e) => warn!(collection, error = %e, "Failed to create identifier index"),
        }
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn upsert(
        &self,
        collection: &str,
        id_field: &str,
        id: i64,
        record: Document,
    ) -> Result<()> {
        self.ensure_index(collection, id_field).await;

        self.db
            .collection::<Document>(collection)
            .replace_one(doc! { id_field: id }, record)
            .upsert(true)
            .await?;

        Ok(())
    }
}

fn with_timeouts(uri: &str) -> String {
    const TIMEOUTS: &str = "serverSelectionTimeoutMS=3000&connectTimeoutMS=3000";

    if uri.contains('?') {
        return format!("{}&{}", uri, TIMEOUTS);
    }
    let hosts_and_path = uri.split_once("://").map(|(_, rest)| rest).unwrap_or(uri);
    if hosts_and_path.contains('/') {
        format!("{}?{}", uri, TIMEOUTS)
    } else {
        format!("{}/?{}", uri, TIMEOUTS)
    }
}
