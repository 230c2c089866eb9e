//! Device and per-device settings.

use crate::DeviceId;
use collector_errors::{CollectorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Protocol family a device speaks. The concrete wire codec is external
/// to this crate (see `ProtocolDriver` in the collector service).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "MODBUS_TCP")]
    ModbusTcp,
    #[serde(rename = "MODBUS_RTU")]
    ModbusRtu,
    #[serde(rename = "MQTT")]
    Mqtt,
    #[serde(rename = "BACNET_IP")]
    BacnetIp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModbusTcp => "MODBUS_TCP",
            Self::ModbusRtu => "MODBUS_RTU",
            Self::Mqtt => "MQTT",
            Self::BacnetIp => "BACNET_IP",
        }
    }
}

/// Per-device tunables governing scan cadence, timeouts, and the
/// reconnect backoff policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub polling_interval_ms: u64,
    pub connection_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// 0 means unbounded retries.
    pub max_retry_count: u32,
    pub retry_interval_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_time_ms: u64,
    pub max_backoff_time_ms: u64,
    pub keep_alive_enabled: bool,
    pub keep_alive_interval_s: u64,
    pub keep_alive_timeout_s: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            polling_interval_ms: 1000,
            connection_timeout_ms: 3000,
            read_timeout_ms: 3000,
            write_timeout_ms: 3000,
            max_retry_count: 0,
            retry_interval_ms: 1000,
            backoff_multiplier: 2.0,
            backoff_time_ms: 1000,
            max_backoff_time_ms: 60_000,
            keep_alive_enabled: false,
            keep_alive_interval_s: 30,
            keep_alive_timeout_s: 5,
        }
    }
}

impl DeviceSettings {
    /// Validate the invariants: all durations positive,
    /// `retry_interval_ms <= max_backoff_time_ms`, non-negative retry cap.
    pub fn validate(&self) -> Result<()> {
        if self.polling_interval_ms == 0 {
            return Err(CollectorError::config(
                "polling_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.connection_timeout_ms == 0
            || self.read_timeout_ms == 0
            || self.write_timeout_ms == 0
        {
            return Err(CollectorError::config(
                "timeouts",
                "connection/read/write timeouts must all be greater than 0",
            ));
        }
        if self.retry_interval_ms == 0 || self.backoff_time_ms == 0 || self.max_backoff_time_ms == 0
        {
            return Err(CollectorError::config(
                "retry_interval_ms/backoff_time_ms/max_backoff_time_ms",
                "must all be greater than 0",
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(CollectorError::config(
                "backoff_multiplier",
                "must be >= 1.0",
            ));
        }
        if self.retry_interval_ms > self.max_backoff_time_ms {
            return Err(CollectorError::config(
                "retry_interval_ms",
                "must be <= max_backoff_time_ms",
            ));
        }
        Ok(())
    }

    /// Exponential backoff with the configured multiplier, capped at
    /// `max_backoff_time_ms`: `min(retry_interval_ms *
    /// backoff_multiplier^n, max_backoff_time_ms)`.
    pub fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        let scaled = self.retry_interval_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        if scaled.is_finite() && scaled < self.max_backoff_time_ms as f64 {
            scaled as u64
        } else {
            self.max_backoff_time_ms
        }
    }

    /// `max_retry_count == 0` means unbounded.
    pub fn retries_exhausted(&self, attempt: u32) -> bool {
        self.max_retry_count != 0 && attempt >= self.max_retry_count
    }
}

/// A configured field device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub protocol: Protocol,
    pub endpoint: String,
    pub enabled: bool,
    #[serde(default)]
    pub config: HashMap<String, String>,
    pub settings: DeviceSettings,
}

impl Device {
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(CollectorError::config("endpoint", "must not be empty"));
        }
        self.settings.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DeviceSettings {
        DeviceSettings::default()
    }

    #[test]
    fn polling_interval_zero_is_invalid() {
        let mut s = settings();
        s.polling_interval_ms = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn retry_interval_must_not_exceed_max_backoff() {
        let mut s = settings();
        s.retry_interval_ms = 100_000;
        s.max_backoff_time_ms = 1_000;
        assert!(s.validate().is_err());
    }

    #[test]
    fn max_retry_count_zero_means_unbounded() {
        let s = settings();
        assert_eq!(s.max_retry_count, 0);
        assert!(!s.retries_exhausted(1_000_000));
    }

    #[test]
    fn backoff_delay_is_capped() {
        let mut s = settings();
        s.retry_interval_ms = 1000;
        s.backoff_multiplier = 2.0;
        s.max_backoff_time_ms = 5000;
        assert_eq!(s.backoff_delay_ms(0), 1000);
        assert_eq!(s.backoff_delay_ms(1), 2000);
        assert_eq!(s.backoff_delay_ms(2), 4000);
        assert_eq!(s.backoff_delay_ms(3), 5000); // capped, would be 8000
    }
}
