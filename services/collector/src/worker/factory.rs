//! WorkerFactory: builds a `DeviceWorker` from config plus a concrete
//! `ProtocolDriver` for the device's protocol.

use super::device_worker::{DeviceWorker, SharedWorkerStatus};
use crate::cache_writer::CacheWriter;
use crate::driver::mock::{FaultInjector, SimulatedDriver};
use crate::driver::ProtocolDriver;
use crate::pipeline::Pipeline;
use collector_model::device::{Device, Protocol};
use collector_model::point::DataPoint;
use std::sync::Arc;

/// Builds the `Box<dyn ProtocolDriver>` for a device's protocol. Only
/// `SimulatedDriver` is wired up in this workspace; a real deployment
/// would match on `Protocol::ModbusTcp` etc. here and construct the
/// matching codec.
pub trait DriverFactory: Send + Sync {
    fn build(&self, protocol: Protocol) -> Box<dyn ProtocolDriver>;
}

pub struct SimulatedDriverFactory {
    faults: FaultInjector,
}

impl SimulatedDriverFactory {
    pub fn new() -> Self {
        Self {
            faults: FaultInjector::new(),
        }
    }

    pub fn faults(&self) -> FaultInjector {
        self.faults.clone()
    }
}

impl Default for SimulatedDriverFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverFactory for SimulatedDriverFactory {
    fn build(&self, _protocol: Protocol) -> Box<dyn ProtocolDriver> {
        Box::new(SimulatedDriver::new(self.faults.clone()))
    }
}

pub struct WorkerFactory {
    driver_factory: Box<dyn DriverFactory>,
}

impl WorkerFactory {
    pub fn new(driver_factory: Box<dyn DriverFactory>) -> Self {
        Self { driver_factory }
    }

    pub fn create(
        &self,
        device: Device,
        points: Vec<DataPoint>,
        pipeline: Pipeline,
        status: SharedWorkerStatus,
        cache_writer: Arc<CacheWriter>,
    ) -> DeviceWorker {
        let driver = self.driver_factory.build(device.protocol);
        DeviceWorker::new(device, points, driver, pipeline, status, cache_writer)
    }
}
