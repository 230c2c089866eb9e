//! Cache key layout - bit-exact external contract. Every key
//! the collector writes goes through one of these builders so the wire
//! format cannot drift between `CacheWriter`, `AlarmEngine`, and tests.

use collector_model::{DeviceId, PointId};

pub fn point_latest(device_id: DeviceId, point_index: u32) -> String {
    format!("point:{device_id}_point_{point_index}:latest")
}

pub fn device_points(device_id: DeviceId) -> String {
    format!("device:{device_id}:points")
}

pub fn device_meta(device_id: DeviceId) -> String {
    format!("device:{device_id}:meta")
}

pub fn alarm_active(rule_id: i64) -> String {
    format!("alarm:active:{rule_id}")
}

pub fn virtual_point_result(id: PointId) -> String {
    format!("virtual_point:{id}:result")
}

pub fn worker_status(device_id: DeviceId) -> String {
    format!("worker:{device_id}:status")
}

pub const CHANNEL_ALL: &str = "alarms:all";
pub const CHANNEL_HIGH: &str = "alarms:high";
pub const CHANNEL_CRITICAL: &str = "alarms:critical";
