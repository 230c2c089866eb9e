//! Domain types shared across the PulseOne Collector runtime.
//!
//! This crate has no I/O and no async - it is pure data plus the
//! validation and small conversions (engineering-unit scaling,
//! severity/state integer mappings) that the rest of the workspace
//! relies on being bit-exact with the external cache contract.

pub mod alarm;
pub mod device;
pub mod point;
pub mod value;
pub mod virtual_point;

pub use alarm::{
    AlarmKind, AlarmOccurrence, AlarmRule, OccurrenceState, Severity, TargetType,
    TriggerCondition,
};
pub use device::{Device, DeviceSettings, Protocol};
pub use point::{DataPoint, DataType, PointAddress};
pub use value::{DeviceDataMessage, Quality, TimestampedValue, Value};
pub use virtual_point::{ErrorHandling, Trigger, VirtualPoint, VirtualPointInput};

/// Stable device identifier assigned by the configuration store.
pub type DeviceId = i64;

/// Stable data-point identifier assigned by the configuration store.
pub type PointId = i64;
