//! Coalescer - single owner of the dirty set
//!
//! Multiplexes three event sources in one `select!` loop:
//! queued notifications, the flush timer, and shutdown. The flush runs
//! inline, so the dirty set is never touched by two things at once and a
//! key queued during a flush lands in the next cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::dirty::DirtySet;
use super::flusher::Flusher;
use super::stats::EngineStats;

pub struct Coalescer {
    rx: mpsc::Receiver<String>,
    dirty: DirtySet,
    flusher: Flusher,
    interval: Duration,
    stats: Arc<EngineStats>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl Coalescer {
    pub fn new(
        rx: mpsc::Receiver<String>,
        flusher: Flusher,
        interval: Duration,
        stats: Arc<EngineStats>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            rx,
            dirty: DirtySet::new(),
            flusher,
            interval,
            stats,
            shutdown_rx,
        }
    }

    /// Run until shutdown is signalled or every notifier has been dropped,
    /// then flush whatever is still pending.
    pub async fn run(mut self) {
        info!(interval_ms = self.interval.as_millis() as u64, "Coalescer started");

        let timer = tokio::time::sleep(self.interval);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Coalescer shutting down");
                    break;
                }
                key = self.rx.recv() => match key {
                    Some(key) => self.mark(key),
                    None => {
                        info!("All notifiers dropped, coalescer stopping");
                        break;
                    }
                },
                () = &mut timer => {
                    self.flush_pending().await;
                    timer.as_mut().reset(Instant::now() + self.interval);
                }
            }
        }

        // Keys already accepted into the queue belong to the final cycle.
        self.rx.close();
        while let Ok(key) = self.rx.try_recv() {
            self.mark(key);
        }
        self.flush_pending().await;

        info!("Coalescer stopped");
    }

    fn mark(&mut self, key: String) {
        if self.dirty.mark(key) {
            self.stats.set_pending(self.dirty.len());
        }
    }

    async fn flush_pending(&mut self) {
        if self.dirty.is_empty() {
            trace!("No dirty keys");
            return;
        }

        let batch = self.dirty.drain();
        self.stats.set_pending(0);
        debug!(keys = batch.len(), "Handing dirty keys to flusher");

        let report = self.flusher.flush(batch).await;
        self.stats.record_cycle(&report);
    }
}
