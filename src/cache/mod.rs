//! Cache side of the write-back
//!
//! The flusher only needs one operation from the cache: fetch the current
//! values of a batch of keys in a single round trip.

pub mod memory;
pub mod redis;

use async_trait::async_trait;

use crate::types::Result;

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

/// Source of current record values.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch values for `keys` in one round trip.
    ///
    /// The result is positional: entry `i` belongs to `keys[i]`, `None` marks
    /// a miss. An `Err` means the round trip itself failed.
    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;
}
