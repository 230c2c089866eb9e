//! Sampled values and the per-scan message that carries them downstream.

use crate::{DeviceId, PointId};
use crate::device::Protocol;
use serde::{Deserialize, Serialize};

/// Trustworthiness tag attached to every sampled value (GLOSSARY).
///
/// The integer mapping is a stable external contract:
/// `0=GOOD, 1=UNCERTAIN, 2=BAD, 3=NOT_CONNECTED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Quality {
    Good,
    Uncertain,
    Bad,
    NotConnected,
}

impl From<Quality> for u8 {
    fn from(q: Quality) -> Self {
        match q {
            Quality::Good => 0,
            Quality::Uncertain => 1,
            Quality::Bad => 2,
            Quality::NotConnected => 3,
        }
    }
}

impl TryFrom<u8> for Quality {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Good),
            1 => Ok(Self::Uncertain),
            2 => Ok(Self::Bad),
            3 => Ok(Self::NotConnected),
            other => Err(format!("unknown quality code: {other}")),
        }
    }
}

impl Quality {
    /// Ranks quality so "improved" has a clear meaning:
    /// GOOD is best, NOT_CONNECTED is worst.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Good => 3,
            Self::Uncertain => 2,
            Self::Bad => 1,
            Self::NotConnected => 0,
        }
    }
}

/// A sampled value. Numeric, boolean, and string points all flow
/// through the same pipeline via this tagged variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Str(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedValue {
    pub point_id: PointId,
    pub value: Value,
    pub quality: Quality,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub source: String,
    /// Whether this sample differs from the previous one beyond the
    /// point's deadband.
    pub value_changed: bool,
}

/// The outcome of one scan cycle for one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDataMessage {
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub device_id: DeviceId,
    pub protocol: Protocol,
    pub timestamp: i64,
    pub priority: u8,
    pub points: Vec<TimestampedValue>,
}

impl DeviceDataMessage {
    pub fn new(
        device_id: DeviceId,
        protocol: Protocol,
        timestamp: i64,
        priority: u8,
        points: Vec<TimestampedValue>,
    ) -> Self {
        Self {
            message_type: "device_data",
            device_id,
            protocol,
            timestamp,
            priority,
            points,
        }
    }
}

/// Determine `value_changed`: true iff quality
/// improved, the value differs beyond deadband (numeric) or at all
/// (non-numeric), or there is no previous sample.
pub fn detect_value_changed(
    previous: Option<(&Value, Quality)>,
    current: &Value,
    current_quality: Quality,
    deadband: f64,
) -> bool {
    let Some((prev_value, prev_quality)) = previous else {
        return true;
    };

    if current_quality.rank() > prev_quality.rank() {
        return true;
    }

    match (prev_value.as_f64(), current.as_f64()) {
        (Some(p), Some(c)) => (c - p).abs() > deadband,
        _ => prev_value != current,
    }
}
