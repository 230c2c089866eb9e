//! CacheWriter: the one place that writes to the hot cache. Every write
//! is best-effort - a cache outage must never stall the scan pipeline,
//! so failures are logged and counted, never propagated to the caller.

use bytes::Bytes;
use collector_model::alarm::{AlarmOccurrence, Severity};
use collector_model::value::{Quality, TimestampedValue};
use collector_model::{DeviceId, PointId};
use collector_rtdb::{keyspace, Rtdb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Default)]
pub struct CacheWriterStats {
    pub write_errors: AtomicU64,
}

impl CacheWriterStats {
    pub fn error_count(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }
}

pub struct CacheWriter {
    rtdb: Arc<dyn Rtdb>,
    latest_ttl_ms: u64,
    stats: CacheWriterStats,
}

impl CacheWriter {
    pub fn new(rtdb: Arc<dyn Rtdb>, latest_ttl_ms: u64) -> Self {
        Self {
            rtdb,
            latest_ttl_ms,
            stats: CacheWriterStats::default(),
        }
    }

    pub fn stats(&self) -> u64 {
        self.stats.error_count()
    }

    /// Writes `point:<device>_point_<index>:latest` with the configured
    /// TTL, and mirrors the same JSON into `device:<device>:points` under
    /// field `<index>` so the whole device's points can be read back in
    /// one hash fetch.
    pub async fn write_sample(&self, device_id: DeviceId, point_index: u32, sample: &TimestampedValue) {
        let key = keyspace::point_latest(device_id, point_index);
        let Ok(bytes) = serde_json::to_vec(sample).map(Bytes::from) else {
            self.record_error("serialize sample");
            return;
        };
        if let Err(e) = self.rtdb.set_ex(&key, bytes.clone(), self.latest_ttl_ms).await {
            self.record_error(&format!("write {key}: {e}"));
            return;
        }
        let hash_key = keyspace::device_points(device_id);
        if let Err(e) = self.rtdb.hash_set(&hash_key, &point_index.to_string(), bytes).await {
            self.record_error(&format!("update {hash_key}: {e}"));
        }
    }

    pub async fn write_device_meta(&self, device_id: DeviceId, last_scan_ms: i64) {
        let key = keyspace::device_meta(device_id);
        if let Err(e) = self
            .rtdb
            .hash_set(&key, "last_scan", Bytes::from(last_scan_ms.to_string()))
            .await
        {
            self.record_error(&format!("update {key}: {e}"));
        }
    }

    /// Writes `virtual_point:<id>:result`: `quality` is GOOD when the
    /// formula evaluated cleanly, UNCERTAIN when the value came from the
    /// point's configured error-handling fallback instead, and BAD when
    /// the result couldn't be coerced to the point's declared data type.
    pub async fn write_virtual_point_result(&self, point_id: PointId, value: f64, quality: Quality, timestamp: i64) {
        let key = keyspace::virtual_point_result(point_id);
        let bytes = Bytes::from(
            serde_json::json!({ "value": value, "quality": quality, "timestamp": timestamp }).to_string(),
        );
        if let Err(e) = self.rtdb.set(&key, bytes).await {
            self.record_error(&format!("write {key}: {e}"));
        }
    }

    pub async fn write_worker_status(&self, device_id: DeviceId, status_json: &serde_json::Value) {
        let key = keyspace::worker_status(device_id);
        if let Err(e) = self.rtdb.set_and_publish(&key, keyspace::CHANNEL_ALL, status_json).await {
            self.record_error(&format!("write {key}: {e}"));
        }
    }

    /// Writes the active-occurrence key and publishes on the severity's
    /// channel fan-out: every alarm goes to `alarms:all`, HIGH/CRITICAL
    /// also go to their dedicated channel.
    pub async fn write_alarm_active(&self, rule_id: i64, occurrence: &AlarmOccurrence) {
        let key = keyspace::alarm_active(rule_id);
        let Ok(value) = serde_json::to_value(occurrence) else {
            self.record_error("serialize occurrence");
            return;
        };
        if let Err(e) = self.rtdb.set_and_publish(&key, keyspace::CHANNEL_ALL, &value).await {
            self.record_error(&format!("write {key}: {e}"));
        }
        self.publish_severity_channel(occurrence.severity, &value).await;
    }

    /// Removes the active-occurrence key and publishes the cleared
    /// occurrence on the same channels the triggering event went to;
    /// trigger and clear are each published as one event.
    pub async fn clear_alarm_active(&self, rule_id: i64, occurrence: &AlarmOccurrence) {
        let key = keyspace::alarm_active(rule_id);
        if let Err(e) = self.rtdb.del(&key).await {
            self.record_error(&format!("clear {key}: {e}"));
        }
        let Ok(value) = serde_json::to_value(occurrence) else {
            self.record_error("serialize occurrence");
            return;
        };
        if let Err(e) = self.rtdb.publish(keyspace::CHANNEL_ALL, &value.to_string()).await {
            self.record_error(&format!("publish {}: {e}", keyspace::CHANNEL_ALL));
        }
        self.publish_severity_channel(occurrence.severity, &value).await;
    }

    async fn publish_severity_channel(&self, severity: Severity, value: &serde_json::Value) {
        let channel = match severity {
            Severity::Critical => Some(keyspace::CHANNEL_CRITICAL),
            Severity::High => Some(keyspace::CHANNEL_HIGH),
            _ => None,
        };
        if let Some(channel) = channel {
            if let Err(e) = self.rtdb.publish(channel, &value.to_string()).await {
                self.record_error(&format!("publish {channel}: {e}"));
            }
        }
    }

    fn record_error(&self, reason: &str) {
        self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
        warn!(reason, "cache write failed, continuing without blocking pipeline");
    }
}
