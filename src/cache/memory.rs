//! In-process cache for tests and local runs.
//!
//! Records every `multi_get` it serves and can be told to fail specific
//! calls, which is how transport failures are simulated.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;

use super::CacheStore;
use crate::types::{BgSaveError, Result};

/// Cache backed by a concurrent map
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Vec<u8>>,
    calls: Mutex<Vec<Vec<String>>>,
    failing_calls: Mutex<HashSet<usize>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw value under `key`.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Remove `key`, simulating eviction.
    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Make the `call`-th `multi_get` (zero based) fail with a cache error.
    pub fn fail_call(&self, call: usize) {
        lock(&self.failing_calls).insert(call);
    }

    /// Keys requested by each `multi_get`, in call order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        lock(&self.calls).clone()
    }

    /// Number of `multi_get` round trips served so far, failed ones included.
    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// How many times `key` was requested across all calls.
    pub fn fetches_of(&self, key: &str) -> usize {
        lock(&self.calls)
            .iter()
            .flat_map(|call| call.iter())
            .filter(|k| k.as_str() == key)
            .count()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let call = {
            let mut calls = lock(&self.calls);
            calls.push(keys.to_vec());
            calls.len() - 1
        };

        if lock(&self.failing_calls).contains(&call) {
            return Err(BgSaveError::Cache(format!(
                "injected failure on call {}",
                call
            )));
        }

        Ok(keys
            .iter()
            .map(|key| self.entries.get(key).map(|v| v.value().clone()))
            .collect())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_positional_results_with_misses() {
        let cache = MemoryCache::new();
        cache.set("a:1", b"one".to_vec());
        cache.set("a:3", b"three".to_vec());

        let keys = vec!["a:1".to_string(), "a:2".to_string(), "a:3".to_string()];
        let values = cache.multi_get(&keys).await.unwrap();

        assert_eq!(values, vec![Some(b"one".to_vec()), None, Some(b"three".to_vec())]);
        assert_eq!(cache.calls(), vec![keys]);
    }

    #[tokio::test]
    async fn test_injected_failure_only_hits_selected_call() {
        let cache = MemoryCache::new();
        cache.fail_call(1);
        let keys = vec!["a:1".to_string()];

        assert!(cache.multi_get(&keys).await.is_ok());
        assert!(matches!(
            cache.multi_get(&keys).await,
            Err(BgSaveError::Cache(_))
        ));
        assert!(cache.multi_get(&keys).await.is_ok());
        assert_eq!(cache.call_count(), 3);
        assert_eq!(cache.fetches_of("a:1"), 3);
    }
}
