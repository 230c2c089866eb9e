//! DeviceWorker: owns one device's driver instance and runs its scan
//! loop - read, scale, detect change, forward downstream.

use super::reconnect::{ConnectionState, ReconnectState};
use super::state::WorkerState;
use crate::cache_writer::CacheWriter;
use crate::driver::{DriverConfig, ProtocolDriver};
use crate::pipeline::Pipeline;
use chrono::Utc;
use collector_model::device::Device;
use collector_model::point::DataPoint;
use collector_model::value::{detect_value_changed, DeviceDataMessage, Quality, TimestampedValue, Value};
use collector_model::PointId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub state: Option<WorkerState>,
    pub last_error: Option<String>,
    pub connected_at: Option<i64>,
    pub worker_restarted_at: Option<i64>,
    pub reconnect_attempts: u64,
}

pub type SharedWorkerStatus = Arc<RwLock<WorkerStatus>>;

pub struct DeviceWorker {
    device: Device,
    points: Vec<DataPoint>,
    driver: Box<dyn ProtocolDriver>,
    pipeline: Pipeline,
    reconnect: ReconnectState,
    status: SharedWorkerStatus,
    cache_writer: Arc<CacheWriter>,
    last_samples: HashMap<PointId, (Value, Quality)>,
}

impl DeviceWorker {
    pub fn new(
        device: Device,
        points: Vec<DataPoint>,
        driver: Box<dyn ProtocolDriver>,
        pipeline: Pipeline,
        status: SharedWorkerStatus,
        cache_writer: Arc<CacheWriter>,
    ) -> Self {
        let reconnect = ReconnectState::new(device.settings.clone());
        Self {
            device,
            points,
            driver,
            pipeline,
            reconnect,
            status,
            cache_writer,
            last_samples: HashMap::new(),
        }
    }

    /// Updates the in-process status snapshot and mirrors the state into
    /// the `worker:<device_id>:status` cache key.
    async fn set_state(&self, state: WorkerState) {
        self.status.write().state = Some(state);
        let snapshot = self.status.read().clone();
        let status_json = serde_json::json!({
            "state": format!("{state:?}").to_ascii_uppercase(),
            "connected_at": snapshot.connected_at,
            "worker_restarted_at": snapshot.worker_restarted_at,
            "reconnect_attempts": snapshot.reconnect_attempts,
        });
        self.cache_writer.write_worker_status(self.device.id, &status_json).await;
    }

    /// Runs the scan loop until `cancel` fires. Never returns early on a
    /// single failed scan - reconnects and keeps going; a device error
    /// must not take down the worker.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.set_state(WorkerState::Initializing).await;
        let config = DriverConfig {
            device_id: self.device.id,
            endpoint: self.device.endpoint.clone(),
            connection_timeout: Duration::from_millis(self.device.settings.connection_timeout_ms),
            read_timeout: Duration::from_millis(self.device.settings.read_timeout_ms),
            write_timeout: Duration::from_millis(self.device.settings.write_timeout_ms),
        };
        if let Err(e) = self.driver.initialize(config).await {
            warn!(device_id = self.device.id, error = %e, "driver initialization failed");
            self.set_state(WorkerState::Error).await;
            self.status.write().last_error = Some(e.to_string());
            return;
        }

        self.set_state(WorkerState::Connecting).await;
        if !self.connect_with_retry(&cancel).await {
            return; // cancelled while connecting
        }

        let mut ticker = tokio::time::interval(Duration::from_millis(self.device.settings.polling_interval_ms));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.set_state(WorkerState::Stopping).await;
                    let _ = self.driver.disconnect().await;
                    self.set_state(WorkerState::Stopped).await;
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once().await {
                        warn!(device_id = self.device.id, error = %e, "scan failed, entering reconnect");
                        self.status.write().last_error = Some(e.to_string());
                        if !self.connect_with_retry(&cancel).await {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Retries connect with the configured backoff until it succeeds or
    /// the retry budget is exhausted. Returns `false` only when
    /// cancelled mid-retry.
    async fn connect_with_retry(&mut self, cancel: &CancellationToken) -> bool {
        loop {
            self.set_state(WorkerState::Connecting).await;
            match self.driver.connect().await {
                Ok(()) => {
                    self.reconnect.on_connected();
                    self.set_state(WorkerState::Running).await;
                    let mut status = self.status.write();
                    status.connected_at = Some(Utc::now().timestamp_millis());
                    status.reconnect_attempts = self.reconnect.stats().total_attempts;
                    drop(status);
                    info!(device_id = self.device.id, "connected");
                    return true;
                }
                Err(e) => {
                    warn!(device_id = self.device.id, error = %e, "connect failed");
                    self.status.write().last_error = Some(e.to_string());
                    match self.reconnect.on_failed() {
                        Some(delay) => {
                            self.set_state(WorkerState::Reconnecting).await;
                            self.status.write().reconnect_attempts = self.reconnect.stats().total_attempts;
                            tokio::select! {
                                _ = cancel.cancelled() => return false,
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => {
                            warn!(device_id = self.device.id, "retry budget exhausted, device offline");
                            self.set_state(WorkerState::DeviceOffline).await;
                            debug_assert_eq!(self.reconnect.connection_state(), ConnectionState::Failed);
                            // Keep waiting on cancellation rather than busy-looping; an
                            // operator restart is required to bring the device back.
                            cancel.cancelled().await;
                            return false;
                        }
                    }
                }
            }
        }
    }

    async fn scan_once(&mut self) -> collector_errors::Result<()> {
        let enabled_points: Vec<DataPoint> = self.points.iter().filter(|p| p.enabled).cloned().collect();
        let readings = self.driver.read_values(&enabled_points).await?;
        let timestamp = Utc::now().timestamp_millis();

        let mut samples = Vec::with_capacity(readings.len());
        for reading in readings {
            let point = match enabled_points.iter().find(|p| p.id == reading.point_id) {
                Some(p) => p,
                None => continue,
            };
            let (value, out_of_range) = if point.data_type.is_numeric() {
                let raw = reading.raw_value.as_f64().unwrap_or(0.0);
                let (engineering, out_of_range) = point.apply_scaling(raw);
                (Value::Float(engineering), out_of_range)
            } else {
                (reading.raw_value.clone(), false)
            };
            let quality = if out_of_range {
                Quality::Uncertain
            } else {
                reading.quality
            };

            let previous = self.last_samples.get(&point.id).map(|(v, q)| (v, *q));
            let value_changed = detect_value_changed(previous, &value, quality, point.deadband);

            self.last_samples.insert(point.id, (value.clone(), quality));

            samples.push(TimestampedValue {
                point_id: point.id,
                value,
                quality,
                timestamp,
                source: self.device.name.clone(),
                value_changed,
            });
        }

        let message = DeviceDataMessage::new(self.device.id, self.device.protocol, timestamp, 0, samples);
        self.pipeline.push(message);
        Ok(())
    }
}
