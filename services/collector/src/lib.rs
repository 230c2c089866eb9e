//! PulseOne Collector - industrial data acquisition runtime.
//!
//! Wires together the worker subsystem (C1-C4: drivers, device workers,
//! the worker factory and manager), the `Pipeline` (C5), the
//! `DataProcessingService` consumer pool (C6), and the three downstream
//! engines it fans out to: `VirtualPointEngine` (C7), `AlarmEngine` (C8),
//! and `CacheWriter` (C9).

pub mod alarm_engine;
pub mod cache_writer;
pub mod config;
pub mod config_store;
pub mod driver;
pub mod pipeline;
pub mod processing;
pub mod virtual_points;
pub mod worker;
