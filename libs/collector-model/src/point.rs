//! Data point configuration.

use crate::{DeviceId, PointId};
use collector_errors::{CollectorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    #[serde(rename = "BOOL")]
    Bool,
    #[serde(rename = "INT16")]
    Int16,
    #[serde(rename = "UINT16")]
    UInt16,
    #[serde(rename = "INT32")]
    Int32,
    #[serde(rename = "UINT32")]
    UInt32,
    #[serde(rename = "FLOAT32")]
    Float32,
    #[serde(rename = "FLOAT64")]
    Float64,
    #[serde(rename = "STRING")]
    String,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::String | Self::Bool)
    }

    /// Coerces a raw numeric formula result into this data type's
    /// representable range. Returns `None` when the value can't be
    /// represented: non-finite, fractional for an integer type, out of
    /// range, or `STRING` (the formula engine only produces numbers).
    pub fn coerce_f64(&self, v: f64) -> Option<f64> {
        if !v.is_finite() {
            return None;
        }
        match self {
            Self::Bool => Some(if v != 0.0 { 1.0 } else { 0.0 }),
            Self::Int16 => coerce_integer(v, i16::MIN as f64, i16::MAX as f64),
            Self::UInt16 => coerce_integer(v, 0.0, u16::MAX as f64),
            Self::Int32 => coerce_integer(v, i32::MIN as f64, i32::MAX as f64),
            Self::UInt32 => coerce_integer(v, 0.0, u32::MAX as f64),
            Self::Float32 => {
                if v.abs() > f32::MAX as f64 {
                    None
                } else {
                    Some(v as f32 as f64)
                }
            }
            Self::Float64 => Some(v),
            Self::String => None,
        }
    }
}

fn coerce_integer(v: f64, min: f64, max: f64) -> Option<f64> {
    if v.fract() != 0.0 || v < min || v > max {
        None
    } else {
        Some(v)
    }
}

/// A point's device-local address: either a numeric register/offset
/// or a protocol-specific string (e.g. an MQTT topic or BACnet object id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointAddress {
    Numeric(i64),
    Named(String),
}

impl std::fmt::Display for PointAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Named(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPoint {
    pub id: PointId,
    pub device_id: DeviceId,
    pub name: String,
    pub address: PointAddress,
    pub data_type: DataType,
    #[serde(default)]
    pub unit: String,
    pub scaling_factor: f64,
    pub scaling_offset: f64,
    pub min_value: f64,
    pub max_value: f64,
    /// Hysteresis band below which a numeric change is not reported
    /// as `value_changed`.
    pub deadband: f64,
    pub writable: bool,
    pub enabled: bool,
    #[serde(default)]
    pub protocol_params: HashMap<String, String>,
}

impl DataPoint {
    pub fn validate(&self) -> Result<()> {
        if self.scaling_factor == 0.0 {
            return Err(CollectorError::config(
                "scaling_factor",
                "must not be zero",
            ));
        }
        if self.min_value.is_finite() && self.max_value.is_finite() && self.min_value > self.max_value
        {
            return Err(CollectorError::config(
                "min_value/max_value",
                "min_value must be <= max_value",
            ));
        }
        if self.deadband < 0.0 {
            return Err(CollectorError::config("deadband", "must be >= 0"));
        }
        Ok(())
    }

    /// Engineering-unit conversion from a raw numeric reading:
    /// `engineering = raw * scaling_factor + scaling_offset`, clamped to
    /// `[min_value, max_value]` when both bounds are finite. Returns
    /// whether the raw value was out of range (caller tags quality
    /// UNCERTAIN in that case).
    pub fn apply_scaling(&self, raw: f64) -> (f64, bool) {
        let engineering = raw * self.scaling_factor + self.scaling_offset;
        if self.min_value.is_finite() && self.max_value.is_finite() {
            if engineering < self.min_value || engineering > self.max_value {
                return (engineering.clamp(self.min_value, self.max_value), true);
            }
        }
        (engineering, false)
    }
}
