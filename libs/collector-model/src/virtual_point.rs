//! Virtual (calculated) points.

use crate::point::DataType;
use crate::PointId;
use collector_errors::{CollectorError, Result};
use serde::{Deserialize, Serialize};

/// What causes a virtual point to recalculate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    OnChange,
    Periodic,
    OnDemand,
    EventDriven,
}

/// What to do when formula evaluation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorHandling {
    ReturnNull,
    ReturnLast,
    ReturnZero,
    ReturnDefault,
}

/// Binds a formula variable name to a source point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualPointInput {
    pub alias: String,
    pub source_point_id: PointId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualPoint {
    pub id: PointId,
    pub tenant_id: i64,
    pub name: String,
    pub formula: String,
    pub inputs: Vec<VirtualPointInput>,
    pub trigger: Trigger,
    /// Only meaningful when `trigger == Periodic`.
    pub interval_ms: Option<u64>,
    pub error_handling: ErrorHandling,
    pub default_value: Option<f64>,
    pub data_type: DataType,
    pub enabled: bool,
    #[serde(skip)]
    pub last_value: Option<f64>,
    #[serde(skip)]
    pub last_calc_time: Option<i64>,
}

impl VirtualPoint {
    /// Input aliases must be unique and non-empty; a periodic trigger
    /// requires `interval_ms`; `ReturnDefault` requires `default_value`
    ///
    pub fn validate(&self) -> Result<()> {
        if self.formula.trim().is_empty() {
            return Err(CollectorError::config("formula", "must not be empty"));
        }
        let mut aliases = std::collections::HashSet::new();
        for input in &self.inputs {
            if input.alias.trim().is_empty() {
                return Err(CollectorError::config("inputs", "alias must not be empty"));
            }
            if !aliases.insert(input.alias.as_str()) {
                return Err(CollectorError::config(
                    "inputs",
                    format!("duplicate alias: {}", input.alias),
                ));
            }
        }
        if self.trigger == Trigger::Periodic && self.interval_ms.is_none() {
            return Err(CollectorError::config(
                "interval_ms",
                "required when trigger is PERIODIC",
            ));
        }
        if self.error_handling == ErrorHandling::ReturnDefault && self.default_value.is_none() {
            return Err(CollectorError::config(
                "default_value",
                "required when error_handling is RETURN_DEFAULT",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vp() -> VirtualPoint {
        VirtualPoint {
            id: 1,
            tenant_id: 1,
            name: "power".into(),
            formula: "voltage * current".into(),
            inputs: vec![
                VirtualPointInput {
                    alias: "voltage".into(),
                    source_point_id: 10,
                },
                VirtualPointInput {
                    alias: "current".into(),
                    source_point_id: 11,
                },
            ],
            trigger: Trigger::OnChange,
            interval_ms: None,
            error_handling: ErrorHandling::ReturnLast,
            default_value: None,
            data_type: DataType::Float64,
            enabled: true,
            last_value: None,
            last_calc_time: None,
        }
    }

    #[test]
    fn duplicate_alias_rejected() {
        let mut v = vp();
        v.inputs[1].alias = "voltage".into();
        assert!(v.validate().is_err());
    }

    #[test]
    fn periodic_without_interval_rejected() {
        let mut v = vp();
        v.trigger = Trigger::Periodic;
        assert!(v.validate().is_err());
    }

    #[test]
    fn return_default_without_value_rejected() {
        let mut v = vp();
        v.error_handling = ErrorHandling::ReturnDefault;
        assert!(v.validate().is_err());
    }

    #[test]
    fn well_formed_point_validates() {
        assert!(vp().validate().is_ok());
    }
}
