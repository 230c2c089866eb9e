//! A `ProtocolDriver` test double that simulates a device generating
//! sinusoidal readings, with hooks to force connect/read failures so
//! worker-level reconnect behavior can be exercised without a real field
//! device.

use super::{DriverConfig, DriverStatistics, DriverStatus, ProtocolDriver, RawReading};
use async_trait::async_trait;
use collector_errors::{CollectorError, Result};
use collector_model::point::{DataPoint, DataType};
use collector_model::value::{Quality, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Produces a reading appropriate to `data_type`: a sinusoidal float for
/// numeric points, its sign as a bool for digital points, and a plain
/// string tag for string points.
fn simulated_value(data_type: DataType, t: f64) -> Value {
    let wave = (t / 10.0).sin();
    match data_type {
        DataType::Bool => Value::Bool(wave >= 0.0),
        DataType::String => Value::Str(format!("sim-{}", t as i64)),
        _ => Value::Float(50.0 + 10.0 * wave),
    }
}

/// Shared failure-injection switches, clonable into test code so it can
/// flip behavior while a worker holds the driver.
#[derive(Clone, Default)]
pub struct FaultInjector {
    fail_connect: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

pub struct SimulatedDriver {
    config: Option<DriverConfig>,
    status: DriverStatus,
    faults: FaultInjector,
    tick: AtomicU64,
    stats: DriverStatistics,
}

impl SimulatedDriver {
    pub fn new(faults: FaultInjector) -> Self {
        Self {
            config: None,
            status: DriverStatus::Uninitialized,
            faults,
            tick: AtomicU64::new(0),
            stats: DriverStatistics::default(),
        }
    }
}

#[async_trait]
impl ProtocolDriver for SimulatedDriver {
    async fn initialize(&mut self, config: DriverConfig) -> Result<()> {
        self.config = Some(config);
        self.status = DriverStatus::Initialized;
        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        let endpoint = self
            .config
            .as_ref()
            .map(|c| c.endpoint.clone())
            .unwrap_or_default();

        if self.faults.fail_connect.load(Ordering::SeqCst) {
            self.status = DriverStatus::Error;
            return Err(CollectorError::Unreachable {
                endpoint,
                reason: "simulated connect failure".into(),
            });
        }
        self.status = DriverStatus::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.status = DriverStatus::Disconnected;
        Ok(())
    }

    async fn read_values(&mut self, points: &[DataPoint]) -> Result<Vec<RawReading>> {
        if self.status != DriverStatus::Connected {
            return Err(CollectorError::Unreachable {
                endpoint: self
                    .config
                    .as_ref()
                    .map(|c| c.endpoint.clone())
                    .unwrap_or_default(),
                reason: "not connected".into(),
            });
        }
        if self.faults.fail_reads.load(Ordering::SeqCst) {
            self.stats.read_errors_total += 1;
            return Err(CollectorError::Timeout(1000));
        }

        let t = self.tick.fetch_add(1, Ordering::SeqCst) as f64;
        self.stats.reads_total += 1;
        Ok(points
            .iter()
            .map(|p| RawReading {
                point_id: p.id,
                raw_value: simulated_value(p.data_type, t),
                quality: Quality::Good,
            })
            .collect())
    }

    async fn write_value(&mut self, _point: &DataPoint, _value: Value) -> Result<()> {
        if self.status != DriverStatus::Connected {
            return Err(CollectorError::NotWritable("device not connected".into()));
        }
        self.stats.writes_total += 1;
        Ok(())
    }

    fn status(&self) -> DriverStatus {
        self.status
    }

    fn statistics(&self) -> DriverStatistics {
        self.stats
    }
}
