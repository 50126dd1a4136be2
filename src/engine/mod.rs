//! Write-back engine
//!
//! Wires a [`DirtyNotifier`] to a [`Coalescer`] task through a bounded queue,
//! and gives the coalescer a [`Flusher`] over the configured backends.
//!
//! # Usage
//!
//! ```ignore
//! let (notifier, handle) = spawn_engine(EngineConfig::default(), cache, store);
//!
//! notifier.mark_dirty("players:42").await;
//!
//! // Flush anything pending and stop
//! handle.shutdown().await?;
//! ```

pub mod coalescer;
pub mod dirty;
pub mod flusher;
pub mod notifier;
pub mod stats;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::CacheStore;
use crate::db::DocumentStore;
use crate::types::{BgSaveError, Result};

pub use coalescer::Coalescer;
pub use dirty::{DirtySet, FlushBatch};
pub use flusher::{FlushReport, Flusher};
pub use notifier::{Ack, DirtyNotifier};
pub use stats::{EngineStats, StatsSnapshot};

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time between flush decisions
    pub flush_interval: Duration,
    /// Maximum keys per cache round trip
    pub batch_size: usize,
    /// Notifications the queue holds before producers wait
    pub queue_capacity: usize,
    /// How long a producer waits on a full queue before dropping its key
    pub enqueue_timeout: Duration,
    /// Upper bound on any single cache or store round trip
    pub io_timeout: Duration,
    /// Document field holding the record id
    pub id_field: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(100),
            batch_size: 1024,
            queue_capacity: 4096,
            enqueue_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(30),
            id_field: "id".to_string(),
        }
    }
}

/// Owner's handle on a running engine
pub struct EngineHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
    stats: Arc<EngineStats>,
}

impl EngineHandle {
    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    /// Stop the coalescer after one final flush of everything queued.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        self.task
            .await
            .map_err(|e| BgSaveError::Internal(format!("Coalescer task failed: {}", e)))
    }
}

/// Start the engine on the current tokio runtime.
///
/// Dropping the returned [`EngineHandle`] also stops the engine.
pub fn spawn_engine(
    config: EngineConfig,
    cache: Arc<dyn CacheStore>,
    store: Arc<dyn DocumentStore>,
) -> (DirtyNotifier, EngineHandle) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let stats = Arc::new(EngineStats::new());

    let flusher = Flusher::new(cache, store, &config);
    let coalescer = Coalescer::new(
        rx,
        flusher,
        config.flush_interval,
        Arc::clone(&stats),
        shutdown_rx,
    );

    info!(
        flush_interval_ms = config.flush_interval.as_millis() as u64,
        batch_size = config.batch_size,
        queue_capacity = config.queue_capacity,
        id_field = %config.id_field,
        "Starting write-back engine"
    );
    let task = tokio::spawn(coalescer.run());

    let notifier = DirtyNotifier::new(tx, config.enqueue_timeout, Arc::clone(&stats));
    let handle = EngineHandle {
        shutdown_tx,
        task,
        stats,
    };
    (notifier, handle)
}
