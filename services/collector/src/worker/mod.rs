//! Worker subsystem: C2 (DeviceWorker), C3 (WorkerFactory), C4 (WorkerManager).

pub mod device_worker;
pub mod factory;
pub mod manager;
pub mod reconnect;
pub mod state;

pub use device_worker::{DeviceWorker, SharedWorkerStatus, WorkerStatus};
pub use factory::{DriverFactory, SimulatedDriverFactory, WorkerFactory};
pub use manager::{ManagerStats, WorkerManager};
pub use state::WorkerState;
