//! Alarm rules and occurrences.

use crate::PointId;
use collector_errors::{CollectorError, Result};
use serde::{Deserialize, Serialize};

/// What an alarm rule is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetType {
    #[serde(rename = "data_point")]
    DataPoint,
    #[serde(rename = "virtual_point")]
    VirtualPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmKind {
    Analog,
    Digital,
    Script,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerCondition {
    OnTrue,
    OnFalse,
    OnChange,
}

/// Severity, lowest to highest. The integer mapping is a stable
/// external contract: `0=INFO .. 4=CRITICAL`. Unknown strings at
/// ingestion are rejected rather than defaulting to INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8")]
pub enum Severity {
    Info = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl From<Severity> for u8 {
    fn from(s: Severity) -> Self {
        s as u8
    }
}

impl TryFrom<u8> for Severity {
    type Error = CollectorError;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Info),
            1 => Ok(Self::Low),
            2 => Ok(Self::Medium),
            3 => Ok(Self::High),
            4 => Ok(Self::Critical),
            other => Err(CollectorError::Validation(format!(
                "severity out of range 0..4: {other}"
            ))),
        }
    }
}

impl Severity {
    /// Ingestion accepts either an integer or a known name; unknown
    /// strings are `ConfigInvalid`, never silently coerced to INFO.
    pub fn from_str_strict(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INFO" => Ok(Self::Info),
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(CollectorError::config(
                "severity",
                format!("unknown severity string: {other}"),
            )),
        }
    }
}

/// Occurrence lifecycle state. Integer mapping is a stable external
/// contract: `0=INACTIVE, 1=ACTIVE, 2=ACKNOWLEDGED, 3=CLEARED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8")]
pub enum OccurrenceState {
    Inactive = 0,
    Active = 1,
    Acknowledged = 2,
    Cleared = 3,
}

impl From<OccurrenceState> for u8 {
    fn from(s: OccurrenceState) -> Self {
        s as u8
    }
}

impl OccurrenceState {
    /// Terminal states hold no open occurrence row.
    pub fn is_non_terminal(&self) -> bool {
        matches!(self, Self::Active | Self::Acknowledged)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmRule {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub target_type: TargetType,
    pub target_id: PointId,
    pub kind: AlarmKind,
    pub high_high: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub low_low: Option<f64>,
    pub deadband: f64,
    pub trigger_condition: Option<TriggerCondition>,
    pub condition_script: Option<String>,
    pub message_template: String,
    pub message_script: Option<String>,
    pub severity: Severity,
    pub priority: u32,
    pub auto_clear: bool,
    pub enabled: bool,
}

impl AlarmRule {
    /// Threshold ordering invariant: when all thresholds
    /// are present, `low_low <= low <= high <= high_high`; deadband >= 0.
    pub fn validate(&self) -> Result<()> {
        if self.deadband < 0.0 {
            return Err(CollectorError::config("deadband", "must be >= 0"));
        }
        if self.kind != AlarmKind::Analog {
            return Ok(());
        }
        let thresholds: Vec<f64> = [self.low_low, self.low, self.high, self.high_high]
            .into_iter()
            .flatten()
            .collect();
        if thresholds.windows(2).any(|w| w[0] > w[1]) {
            return Err(CollectorError::config(
                "thresholds",
                "must satisfy low_low <= low <= high <= high_high",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmOccurrence {
    pub id: i64,
    pub rule_id: i64,
    pub tenant_id: i64,
    pub occurrence_time: i64,
    pub trigger_value: f64,
    pub state: OccurrenceState,
    pub severity: Severity,
    pub cleared_time: Option<i64>,
    pub ack_time: Option<i64>,
    pub context_data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_rule() -> AlarmRule {
        AlarmRule {
            id: 1,
            tenant_id: 1,
            name: "high temp".into(),
            target_type: TargetType::DataPoint,
            target_id: 4,
            kind: AlarmKind::Analog,
            high_high: Some(40.0),
            high: Some(35.0),
            low: Some(10.0),
            low_low: Some(5.0),
            deadband: 2.0,
            trigger_condition: None,
            condition_script: None,
            message_template: "{point_name} at {value}, limit {limit}".into(),
            message_script: None,
            severity: Severity::High,
            priority: 0,
            auto_clear: true,
            enabled: true,
        }
    }

    #[test]
    fn threshold_ordering_enforced() {
        let mut r = base_rule();
        r.high = Some(3.0); // now high < low, invalid
        assert!(r.validate().is_err());
    }

    #[test]
    fn valid_thresholds_pass() {
        assert!(base_rule().validate().is_ok());
    }

    #[test]
    fn severity_integer_roundtrip_lossless() {
        for i in 0..=4u8 {
            let sev = Severity::try_from(i).unwrap();
            let back: u8 = sev.into();
            assert_eq!(i, back);
        }
    }

    #[test]
    fn unknown_severity_string_is_config_invalid() {
        assert!(Severity::from_str_strict("SUPER_BAD").is_err());
    }

    #[test]
    fn known_severity_strings_parse() {
        assert_eq!(Severity::from_str_strict("critical").unwrap(), Severity::Critical);
    }
}
