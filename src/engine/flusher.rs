//! Flush pipeline
//!
//! One flush cycle walks a [`FlushBatch`] in sub-batches:
//!
//! ```text
//! Idle → BatchReady → Fetching ─┬─▶ PerRecordProcessing* ─▶ Idle
//!                               └─▶ (transport failure) ───▶ Idle (aborted)
//! ```
//!
//! Per-record failures (miss, bad bytes, bad key, rejected write) skip only
//! that record. A failed round trip to either backend abandons the rest of
//! the cycle; those keys come back only when they are marked dirty again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use super::dirty::FlushBatch;
use super::EngineConfig;
use crate::cache::CacheStore;
use crate::codec::{bind_identity, RecordCodec};
use crate::db::DocumentStore;
use crate::keys::RecordKey;
use crate::types::{BgSaveError, Result};

/// Outcome of one flush cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Keys handed to the cycle
    pub requested: usize,
    /// Multi-get round trips attempted
    pub sub_batches: usize,
    pub persisted: usize,
    /// Keys with no value in the cache
    pub missing: usize,
    /// Values that failed to decode or disagreed with their key's id
    pub decode_failed: usize,
    pub key_invalid: usize,
    pub upsert_failed: usize,
    /// Keys never processed because the cycle was aborted
    pub lost: usize,
    pub aborted: bool,
    pub duration_ms: u64,
}

impl FlushReport {
    /// Keys dropped individually, excluding those lost to an abort
    pub fn skipped(&self) -> usize {
        self.missing + self.decode_failed + self.key_invalid + self.upsert_failed
    }

    fn record_skip(&mut self, err: &BgSaveError) {
        match err {
            BgSaveError::Missing(_) => self.missing += 1,
            BgSaveError::Decode(_) | BgSaveError::Identity(_) => self.decode_failed += 1,
            BgSaveError::KeyFormat(_) => self.key_invalid += 1,
            _ => self.upsert_failed += 1,
        }
    }

    fn abort(&mut self, lost: usize) {
        self.aborted = true;
        self.lost += lost;
    }
}

/// Copies dirty records from the cache into the document store
pub struct Flusher {
    cache: Arc<dyn CacheStore>,
    store: Arc<dyn DocumentStore>,
    codec: RecordCodec,
    batch_size: usize,
    id_field: String,
    io_timeout: Duration,
}

impl Flusher {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        store: Arc<dyn DocumentStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            cache,
            store,
            codec: RecordCodec::new(),
            batch_size: config.batch_size.max(1),
            id_field: config.id_field.clone(),
            io_timeout: config.io_timeout,
        }
    }

    /// Run one flush cycle over `batch`.
    ///
    /// Never fails: every error is logged and counted in the returned report.
    pub async fn flush(&self, batch: FlushBatch) -> FlushReport {
        let started = Instant::now();
        let mut report = FlushReport {
            requested: batch.len(),
            ..Default::default()
        };

        if batch.is_empty() {
            trace!("Empty flush batch");
            return report;
        }

        let mut remaining = batch.len();
        'cycle: for keys in batch.sub_batches(self.batch_size) {
            report.sub_batches += 1;

            let values = match self.fetch(keys).await {
                Ok(values) => values,
                Err(e) => {
                    error!(
                        sub_batch = report.sub_batches,
                        lost = remaining,
                        error = %e,
                        "Multi-get failed, abandoning flush cycle"
                    );
                    report.abort(remaining);
                    break;
                }
            };

            if values.len() != keys.len() {
                warn!(
                    requested = keys.len(),
                    returned = values.len(),
                    "Cache reply length differs from request, unmatched keys count as misses"
                );
            }

            let mut values = values.into_iter();
            for (i, key) in keys.iter().enumerate() {
                let raw = values.next().flatten();
                match self.persist(key, raw).await {
                    Ok(()) => report.persisted += 1,
                    Err(e) if e.is_transport() => {
                        let lost = remaining - i;
                        error!(key = %key, lost, error = %e, "Store unreachable, abandoning flush cycle");
                        report.abort(lost);
                        break 'cycle;
                    }
                    Err(e) => {
                        warn!(key = %key, kind = e.kind(), error = %e, "Skipping dirty key");
                        report.record_skip(&e);
                    }
                }
            }

            remaining -= keys.len();
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            requested = report.requested,
            persisted = report.persisted,
            skipped = report.skipped(),
            lost = report.lost,
            sub_batches = report.sub_batches,
            aborted = report.aborted,
            duration_ms = report.duration_ms,
            "Flush cycle finished"
        );

        report
    }

    async fn fetch(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        tokio::time::timeout(self.io_timeout, self.cache.multi_get(keys)).await?
    }

    async fn persist(&self, key: &str, raw: Option<Vec<u8>>) -> Result<()> {
        let raw = raw.ok_or_else(|| BgSaveError::Missing(key.to_string()))?;
        let mut record = self.codec.decode(&raw)?;
        let parsed = RecordKey::parse(key)?;
        bind_identity(&mut record, &self.id_field, parsed.id)?;

        tokio::time::timeout(
            self.io_timeout,
            self.store
                .upsert(&parsed.collection, &self.id_field, parsed.id, record),
        )
        .await??;

        debug!(collection = %parsed.collection, id = parsed.id, "Record saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::MemoryStore;
    use async_trait::async_trait;
    use bson::Document;
    use rmpv::Value;

    /// Cache whose replies are cut short after `keep` entries
    struct TruncatingCache {
        inner: MemoryCache,
        keep: usize,
    }

    #[async_trait]
    impl CacheStore for TruncatingCache {
        async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
            let mut values = self.inner.multi_get(keys).await?;
            values.truncate(self.keep);
            Ok(values)
        }
    }

    /// Cache that stalls on one call (zero based)
    struct StallingCache {
        inner: MemoryCache,
        stall_on: usize,
    }

    #[async_trait]
    impl CacheStore for StallingCache {
        async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
            let call = self.inner.call_count();
            let values = self.inner.multi_get(keys).await?;
            if call == self.stall_on {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(values)
        }
    }

    /// Store whose writes never complete
    struct StallingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl DocumentStore for StallingStore {
        async fn upsert(
            &self,
            collection: &str,
            id_field: &str,
            id: i64,
            record: Document,
        ) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            self.inner.upsert(collection, id_field, id, record).await
        }
    }

    fn players(count: i64) -> (MemoryCache, Vec<String>) {
        let cache = MemoryCache::new();
        let keys: Vec<String> = (1..=count).map(|i| format!("players:{}", i)).collect();
        for (i, key) in keys.iter().enumerate() {
            cache.set(key.clone(), packed(i as i64 + 1, "p"));
        }
        (cache, keys)
    }

    fn timed_config(batch_size: usize) -> EngineConfig {
        EngineConfig {
            batch_size,
            io_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    fn packed(id: i64, name: &str) -> Vec<u8> {
        let value = Value::Map(vec![
            (Value::from("id"), Value::from(id)),
            (Value::from("name"), Value::from(name)),
        ]);
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &value).unwrap();
        buf
    }

    fn flusher(cache: &Arc<MemoryCache>, store: &Arc<MemoryStore>, batch_size: usize) -> Flusher {
        let config = EngineConfig {
            batch_size,
            ..Default::default()
        };
        Flusher::new(cache.clone(), store.clone(), &config)
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryStore::new());

        let report = flusher(&cache, &store, 1024).flush(FlushBatch::default()).await;

        assert_eq!(report, FlushReport::default());
        assert_eq!(cache.call_count(), 0);
    }

    #[tokio::test]
    async fn test_per_key_failures_are_classified() {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryStore::new());
        cache.set("players:1", packed(1, "ok"));
        cache.set("players:2", b"\xc1".to_vec());
        cache.set("players:x", packed(3, "bad id"));
        cache.set("players:4", packed(5, "wrong id"));
        cache.set("players:6", packed(6, "rejected"));
        store.reject("players", 6);

        let batch = FlushBatch::from(vec![
            "players:1".to_string(),
            "players:2".into(),
            "players:x".into(),
            "players:4".into(),
            "players:6".into(),
            "players:7".into(),
        ]);
        let report = flusher(&cache, &store, 1024).flush(batch).await;

        assert_eq!(report.persisted, 1);
        assert_eq!(report.decode_failed, 2);
        assert_eq!(report.key_invalid, 1);
        assert_eq!(report.upsert_failed, 1);
        assert_eq!(report.missing, 1);
        assert!(!report.aborted);
        assert_eq!(store.count("players"), 1);
    }

    #[tokio::test]
    async fn test_store_disconnect_aborts_cycle() {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryStore::new());
        let keys: Vec<String> = (1..=5).map(|i| format!("players:{}", i)).collect();
        for (i, key) in keys.iter().enumerate() {
            cache.set(key.clone(), packed(i as i64 + 1, "p"));
        }
        store.set_disconnected(true);

        let report = flusher(&cache, &store, 2).flush(FlushBatch::from(keys)).await;

        assert!(report.aborted);
        assert_eq!(report.lost, 5);
        assert_eq!(report.sub_batches, 1);
        assert_eq!(store.upsert_count(), 1);
        assert_eq!(cache.call_count(), 1);
    }

    #[tokio::test]
    async fn test_short_cache_reply_counts_tail_as_missing() {
        let (inner, keys) = players(5);
        let cache = Arc::new(TruncatingCache { inner, keep: 3 });
        let store = Arc::new(MemoryStore::new());
        let flusher = Flusher::new(cache.clone(), store.clone(), &EngineConfig::default());

        let report = flusher.flush(FlushBatch::from(keys.clone())).await;

        assert!(!report.aborted);
        assert_eq!(report.persisted, 3);
        assert_eq!(report.missing, 2);
        for id in 1..=3 {
            assert!(store.get("players", id).is_some());
        }
        assert!(store.get("players", 4).is_none());
        assert!(store.get("players", 5).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_multi_get_times_out_and_aborts() {
        let (inner, keys) = players(5);
        let cache = Arc::new(StallingCache { inner, stall_on: 1 });
        let store = Arc::new(MemoryStore::new());
        let flusher = Flusher::new(cache.clone(), store.clone(), &timed_config(2));

        let report = flusher.flush(FlushBatch::from(keys)).await;

        assert!(report.aborted);
        assert_eq!(report.persisted, 2);
        assert_eq!(report.lost, 3);
        assert_eq!(report.sub_batches, 2);
        assert_eq!(cache.inner.call_count(), 2);
        assert_eq!(store.count("players"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_upsert_times_out_and_aborts() {
        let (cache, keys) = players(5);
        let cache = Arc::new(cache);
        let store = Arc::new(StallingStore {
            inner: MemoryStore::new(),
        });
        let flusher = Flusher::new(cache.clone(), store.clone(), &timed_config(2));

        let report = flusher.flush(FlushBatch::from(keys)).await;

        assert!(report.aborted);
        assert_eq!(report.persisted, 0);
        assert_eq!(report.lost, 5);
        assert_eq!(cache.call_count(), 1);
        assert_eq!(store.inner.upsert_count(), 0);
    }

    #[tokio::test]
    async fn test_report_skipped_sum() {
        let report = FlushReport {
            missing: 1,
            decode_failed: 2,
            key_invalid: 3,
            upsert_failed: 4,
            lost: 100,
            ..Default::default()
        };
        assert_eq!(report.skipped(), 10);
    }
}
