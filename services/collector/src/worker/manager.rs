//! WorkerManager: owns the registry of running `DeviceWorker` tasks - one
//! `DashMap` keyed by device id holding everything needed to stop or
//! inspect a worker without touching the others.

use super::device_worker::{SharedWorkerStatus, WorkerStatus};
use super::factory::WorkerFactory;
use crate::cache_writer::CacheWriter;
use crate::pipeline::Pipeline;
use chrono::Utc;
use collector_model::device::Device;
use collector_model::point::DataPoint;
use collector_model::DeviceId;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long `stop`/`restart` wait for a worker task to exit on its own
/// before detaching and aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct WorkerEntry {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    status: SharedWorkerStatus,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ManagerStats {
    pub total_workers: usize,
    pub running_workers: usize,
}

/// Registry of active device workers. `start`/`stop`/`restart` are the
/// only mutation points; `status`/`has`/`stats` are read-only snapshots
/// safe to call from the introspection API.
pub struct WorkerManager {
    factory: WorkerFactory,
    pipeline: Pipeline,
    cache_writer: Arc<CacheWriter>,
    workers: DashMap<DeviceId, WorkerEntry>,
}

impl WorkerManager {
    pub fn new(factory: WorkerFactory, pipeline: Pipeline, cache_writer: Arc<CacheWriter>) -> Self {
        Self {
            factory,
            pipeline,
            cache_writer,
            workers: DashMap::new(),
        }
    }

    /// Spawns a worker for `device`. Returns `true` as long as the worker
    /// task was spawned, even if its first connect attempt later fails -
    /// reconnect is the worker's own responsibility.
    pub fn start(&self, device: Device, points: Vec<DataPoint>) -> bool {
        if self.workers.contains_key(&device.id) {
            return false;
        }
        let device_id = device.id;
        let status: SharedWorkerStatus = Arc::new(RwLock::new(WorkerStatus::default()));
        let cancel = CancellationToken::new();
        let worker = self
            .factory
            .create(device, points, self.pipeline.clone(), status.clone(), self.cache_writer.clone());

        let worker_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            worker.run(worker_cancel).await;
        });

        self.workers.insert(
            device_id,
            WorkerEntry {
                cancel,
                handle,
                status,
            },
        );
        info!(device_id, "worker started");
        true
    }

    /// Signals the worker to stop and waits up to `STOP_TIMEOUT` for it to
    /// finish. A worker stuck in a blocking driver call is detached and
    /// its task aborted rather than hanging the caller forever. Returns
    /// `false` if no worker was running for `device_id`.
    pub async fn stop(&self, device_id: DeviceId) -> bool {
        let Some((_, mut entry)) = self.workers.remove(&device_id) else {
            return false;
        };
        entry.cancel.cancel();
        match tokio::time::timeout(STOP_TIMEOUT, &mut entry.handle).await {
            Ok(_) => info!(device_id, "worker stopped"),
            Err(_) => {
                entry.handle.abort();
                warn!(
                    device_id,
                    timeout_secs = STOP_TIMEOUT.as_secs(),
                    "worker did not stop in time, detached and aborted its task"
                );
            }
        }
        true
    }

    /// Stops then restarts the worker for `device`, always recording a
    /// new `worker_restarted_at` even if the device was not previously
    /// running. This timestamp is owned here, not by the cache writer.
    pub async fn restart(&self, device: Device, points: Vec<DataPoint>) -> bool {
        let device_id = device.id;
        self.stop(device_id).await;
        let started = self.start(device, points);
        if let Some(entry) = self.workers.get(&device_id) {
            entry.status.write().worker_restarted_at = Some(Utc::now().timestamp_millis());
        }
        started
    }

    pub fn has(&self, device_id: DeviceId) -> bool {
        self.workers.contains_key(&device_id)
    }

    pub fn status(&self, device_id: DeviceId) -> Option<WorkerStatus> {
        self.workers.get(&device_id).map(|e| e.status.read().clone())
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            total_workers: self.workers.len(),
            running_workers: self.workers.iter().filter(|e| !e.handle.is_finished()).count(),
        }
    }

    /// Stops every worker, used on graceful shutdown.
    pub async fn stop_all(&self) {
        let device_ids: Vec<DeviceId> = self.workers.iter().map(|e| *e.key()).collect();
        for device_id in device_ids {
            self.stop(device_id).await;
        }
    }
}
