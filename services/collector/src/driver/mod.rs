//! ProtocolDriver - the boundary between the collector and a field device's
//! wire protocol. Concrete protocols (Modbus, MQTT, BACnet, ...) each
//! implement this trait; the rest of the runtime never sees
//! protocol-specific types.

pub mod mock;

use async_trait::async_trait;
use collector_model::point::DataPoint;
use collector_model::value::{Quality, Value};
use collector_model::{DeviceId, PointId};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    Uninitialized,
    Initialized,
    Connected,
    Disconnected,
    Error,
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub device_id: DeviceId,
    pub endpoint: String,
    pub connection_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

/// One raw sample read back from a device, before engineering-unit
/// scaling. Numeric point types carry `Value::Float`/`Value::Int`, which
/// the worker scales and clamps; `Value::Bool`/`Value::Str` pass through
/// untouched for digital and string points.
#[derive(Debug, Clone)]
pub struct RawReading {
    pub point_id: PointId,
    pub raw_value: Value,
    pub quality: Quality,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DriverStatistics {
    pub reads_total: u64,
    pub read_errors_total: u64,
    pub writes_total: u64,
    pub write_errors_total: u64,
}

/// The contract every protocol implementation must satisfy. All methods
/// are fallible independently: a failed `read_values` does not imply the
/// connection dropped, and callers (the DeviceWorker) decide when a string
/// of failures should trigger a reconnect.
#[async_trait]
pub trait ProtocolDriver: Send + Sync {
    async fn initialize(&mut self, config: DriverConfig) -> collector_errors::Result<()>;
    async fn connect(&mut self) -> collector_errors::Result<()>;
    async fn disconnect(&mut self) -> collector_errors::Result<()>;

    async fn read_values(&mut self, points: &[DataPoint]) -> collector_errors::Result<Vec<RawReading>>;
    async fn write_value(&mut self, point: &DataPoint, value: Value) -> collector_errors::Result<()>;

    fn status(&self) -> DriverStatus;
    fn statistics(&self) -> DriverStatistics;
}
