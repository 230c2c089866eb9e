//! DataProcessingService: the pool of consumer tasks that drain the
//! `Pipeline` and fan each sample out to the cache, alarms, and virtual
//! points. Alarm evaluation and virtual point propagation are each
//! retried once on failure before the point is skipped for this scan.

use crate::alarm_engine::AlarmEngine;
use crate::cache_writer::CacheWriter;
use crate::pipeline::Pipeline;
use crate::virtual_points::VirtualPointEngine;
use collector_calc::StateStore;
use collector_model::value::DeviceDataMessage;
use collector_model::PointId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct DataProcessingService<S: StateStore> {
    pipeline: Pipeline,
    cache_writer: Arc<CacheWriter>,
    alarm_engine: Arc<AlarmEngine<S>>,
    virtual_points: Arc<VirtualPointEngine<S>>,
}

impl<S: StateStore> DataProcessingService<S> {
    pub fn new(
        pipeline: Pipeline,
        cache_writer: Arc<CacheWriter>,
        alarm_engine: Arc<AlarmEngine<S>>,
        virtual_points: Arc<VirtualPointEngine<S>>,
    ) -> Self {
        Self {
            pipeline,
            cache_writer,
            alarm_engine,
            virtual_points,
        }
    }

    /// Spawns `pool_size` consumer tasks draining the shared pipeline,
    /// returning their handles so the caller can await them at shutdown.
    pub fn spawn_pool(self: Arc<Self>, pool_size: usize, cancel: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        (0..pool_size.max(1))
            .map(|worker_index| {
                let service = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { service.consume_loop(worker_index, cancel).await })
            })
            .collect()
    }

    async fn consume_loop(&self, worker_index: usize, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                message = self.pipeline.recv() => {
                    let Some(message) = message else { return };
                    self.process_message(worker_index, message).await;
                }
            }
        }
    }

    async fn process_message(&self, worker_index: usize, message: DeviceDataMessage) {
        // Normalize: build the point-id -> numeric-value snapshot that
        // formulas and alarms read against.
        let point_values: HashMap<PointId, f64> = message
            .points
            .iter()
            .filter_map(|s| s.value.as_f64().map(|v| (s.point_id, v)))
            .collect();

        for (index, sample) in message.points.iter().enumerate() {
            // Step 2: cache write (best-effort, never blocks the pipeline).
            self.cache_writer.write_sample(message.device_id, index as u32, sample).await;

            if !sample.value_changed {
                continue;
            }

            // Step 3: alarm evaluation, retried once on failure.
            if let Err(e) = self.evaluate_alarms_with_retry(sample.point_id, &sample.value, sample.timestamp).await {
                warn!(worker_index, point_id = sample.point_id, error = %e, "alarm evaluation failed after retry, skipping for this scan");
            }

            // Step 4: virtual point propagation, retried once on failure.
            self.propagate_virtual_points_with_retry(sample.point_id, &point_values).await;
        }

        self.cache_writer.write_device_meta(message.device_id, message.timestamp).await;
        // Step 5: notification hook - pub/sub fan-out already happens
        // inside CacheWriter's write-then-publish helpers, so there is no
        // separate step here; this is the extension point a future
        // websocket/webhook notifier would plug into.
    }

    async fn evaluate_alarms_with_retry(
        &self,
        point_id: PointId,
        value: &collector_model::value::Value,
        timestamp: i64,
    ) -> collector_errors::Result<()> {
        match self.alarm_engine.evaluate_point(point_id, value, timestamp).await {
            Ok(_) => Ok(()),
            Err(_) => self.alarm_engine.evaluate_point(point_id, value, timestamp).await.map(|_| ()),
        }
    }

    async fn propagate_virtual_points_with_retry(&self, point_id: PointId, point_values: &HashMap<PointId, f64>) {
        let first = self.virtual_points.on_point_changed(point_id, point_values).await;
        if !first.is_empty() {
            return;
        }
        // `on_point_changed` returns an empty vec both for "no dependents"
        // and for a transient evaluation failure; retry once to cover the
        // latter.
        self.virtual_points.on_point_changed(point_id, point_values).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm_engine::AlarmEngine;
    use collector_calc::{CalcEngine, MemoryStateStore};
    use collector_model::device::Protocol;
    use collector_model::value::{Quality, TimestampedValue, Value};
    use collector_rtdb::MemoryRtdb;
    use std::time::Duration;

    fn service() -> (Arc<DataProcessingService<MemoryStateStore>>, Pipeline) {
        let pipeline = Pipeline::new(100);
        let rtdb = Arc::new(MemoryRtdb::new());
        let cache_writer = Arc::new(CacheWriter::new(rtdb, 300_000));
        let calc = CalcEngine::new(Arc::new(MemoryStateStore::new()), "proc-test");
        let alarm_engine = Arc::new(AlarmEngine::new(vec![], calc, cache_writer.clone(), Duration::from_secs(1)));
        let calc2 = CalcEngine::new(Arc::new(MemoryStateStore::new()), "proc-test-vp");
        let vp_engine = Arc::new(VirtualPointEngine::new(vec![], calc2, cache_writer.clone(), Duration::from_secs(1)).unwrap());
        let service = Arc::new(DataProcessingService::new(pipeline.clone(), cache_writer, alarm_engine, vp_engine));
        (service, pipeline)
    }

    #[tokio::test]
    async fn processes_a_scan_message_without_panicking() {
        let (service, pipeline) = service();
        pipeline.push(DeviceDataMessage::new(
            1,
            Protocol::ModbusTcp,
            1000,
            0,
            vec![TimestampedValue {
                point_id: 1,
                value: Value::Float(42.0),
                quality: Quality::Good,
                timestamp: 1000,
                source: "test".into(),
                value_changed: true,
            }],
        ));
        let message = pipeline.recv().await.unwrap();
        service.process_message(0, message).await;
    }
}
