//! Ingestion side of the engine
//!
//! [`DirtyNotifier`] is the only way into the coalescer. Handles are cheap to
//! clone and can be used from any number of tasks; they share nothing with
//! the coalescer except the bounded queue.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::{
    self,
    error::{SendTimeoutError, TrySendError},
};
use tokio::time::Instant;
use tracing::warn;

use super::stats::EngineStats;

/// Acknowledgment returned for every notification.
///
/// It carries no outcome: bad keys are discovered and dropped during the
/// flush, long after the caller has moved on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Ack {}

/// Handle for marking cache keys dirty
#[derive(Clone)]
pub struct DirtyNotifier {
    tx: mpsc::Sender<String>,
    enqueue_timeout: Duration,
    stats: Arc<EngineStats>,
}

impl DirtyNotifier {
    pub(crate) fn new(
        tx: mpsc::Sender<String>,
        enqueue_timeout: Duration,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            tx,
            enqueue_timeout,
            stats,
        }
    }

    /// Queue one key for the next flush.
    ///
    /// Waits up to the enqueue timeout while the queue is full, then drops
    /// the notification.
    pub async fn mark_dirty(&self, key: impl Into<String>) -> Ack {
        let key = key.into();
        match self.enqueue(key, self.enqueue_timeout).await {
            Enqueued::Queued => {}
            Enqueued::TimedOut(key) => {
                self.stats.record_rejected(1);
                warn!(key = %key, timeout_ms = self.enqueue_timeout.as_millis() as u64, "Dirty queue full, notification dropped");
            }
            Enqueued::Closed(key) => {
                self.stats.record_rejected(1);
                warn!(key = %key, "Engine stopped, notification dropped");
            }
        }
        Ack::default()
    }

    /// Queue several keys for the next flush.
    ///
    /// The whole call shares one enqueue timeout. Keys still waiting when it
    /// runs out are only queued if a slot is free right away.
    pub async fn mark_dirties<I, K>(&self, keys: I) -> Ack
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let deadline = Instant::now() + self.enqueue_timeout;
        let mut keys = keys.into_iter();
        let mut dropped = 0u64;
        let mut closed = false;

        while let Some(key) = keys.next() {
            let wait = deadline.saturating_duration_since(Instant::now());
            match self.enqueue(key.into(), wait).await {
                Enqueued::Queued => {}
                Enqueued::TimedOut(_) => dropped += 1,
                Enqueued::Closed(_) => {
                    dropped += 1 + keys.by_ref().count() as u64;
                    closed = true;
                    break;
                }
            }
        }

        if dropped > 0 {
            self.stats.record_rejected(dropped);
            if closed {
                warn!(dropped, "Engine stopped, notifications dropped");
            } else {
                warn!(dropped, timeout_ms = self.enqueue_timeout.as_millis() as u64, "Dirty queue full, notifications dropped");
            }
        }
        Ack::default()
    }

    /// Current free slots in the queue
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }

    async fn enqueue(&self, key: String, wait: Duration) -> Enqueued {
        let sent = if wait.is_zero() {
            self.tx.try_send(key).map_err(|e| match e {
                TrySendError::Full(key) => SendTimeoutError::Timeout(key),
                TrySendError::Closed(key) => SendTimeoutError::Closed(key),
            })
        } else {
            self.tx.send_timeout(key, wait).await
        };

        match sent {
            Ok(()) => {
                self.stats.record_received();
                Enqueued::Queued
            }
            Err(SendTimeoutError::Timeout(key)) => Enqueued::TimedOut(key),
            Err(SendTimeoutError::Closed(key)) => Enqueued::Closed(key),
        }
    }
}

enum Enqueued {
    Queued,
    TimedOut(String),
    Closed(String),
}
