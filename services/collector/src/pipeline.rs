//! Pipeline: the bounded queue between DeviceWorkers and the
//! DataProcessingService pool.
//!
//! A plain bounded mpsc channel sheds the newest message when full, which
//! is wrong here: a burst from one device must not starve delivery of a
//! fresher sample from that same device, and other devices must be
//! unaffected. So on overflow this sheds the *oldest* queued message for
//! the *same device* instead, which needs a custom queue rather than
//! `mpsc`.

use collector_model::value::DeviceDataMessage;
use collector_model::DeviceId;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub total_received: AtomicU64,
    pub total_delivered: AtomicU64,
    pub current_queue_size: AtomicUsize,
    pub shed_count: AtomicU64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            total_received: self.total_received.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            current_queue_size: self.current_queue_size.load(Ordering::Relaxed),
            shed_count: self.shed_count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStatsSnapshot {
    pub total_received: u64,
    pub total_delivered: u64,
    pub current_queue_size: usize,
    pub shed_count: u64,
}

struct Inner {
    queue: parking_lot::Mutex<VecDeque<DeviceDataMessage>>,
    capacity: usize,
    notify: Notify,
    stats: PipelineStats,
}

/// A bounded, shed-oldest-per-device message queue. Clone freely - every
/// clone shares the same underlying queue.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl Pipeline {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: parking_lot::Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                notify: Notify::new(),
                stats: PipelineStats::default(),
            }),
        }
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Enqueues `message`. When full, drops the oldest queued message from
    /// the same device to make room; if the device has no other queued
    /// message, the new one is shed instead, since dropping an unrelated
    /// device's data is never acceptable.
    pub fn push(&self, message: DeviceDataMessage) {
        self.inner.stats.total_received.fetch_add(1, Ordering::Relaxed);
        let mut queue = self.inner.queue.lock();
        if queue.len() >= self.inner.capacity {
            let device_id = message.device_id;
            match queue.iter().position(|m| m.device_id == device_id) {
                Some(idx) => {
                    queue.remove(idx);
                    self.inner.stats.shed_count.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    warn!(device_id, "pipeline full and no prior message to shed for this device, dropping newest");
                    self.inner.stats.shed_count.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }
        queue.push_back(message);
        self.inner.stats.current_queue_size.store(queue.len(), Ordering::Relaxed);
        drop(queue);
        self.inner.notify.notify_one();
    }

    /// Dequeues the oldest message, waiting if the queue is empty.
    /// Returns `None` only when the pipeline is being torn down - in
    /// practice this never happens since `Pipeline` has no explicit close,
    /// so callers can treat this as infallible.
    pub async fn recv(&self) -> Option<DeviceDataMessage> {
        loop {
            {
                let mut queue = self.inner.queue.lock();
                if let Some(message) = queue.pop_front() {
                    self.inner.stats.current_queue_size.store(queue.len(), Ordering::Relaxed);
                    self.inner.stats.total_delivered.fetch_add(1, Ordering::Relaxed);
                    return Some(message);
                }
            }
            self.inner.notify.notified().await;
        }
    }
}
