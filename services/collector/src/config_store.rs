//! ConfigStore - the external system of record.
//!
//! The collector treats device/point/alarm/virtual-point configuration and
//! alarm occurrence persistence as owned by an external store (a database
//! in production). This module defines the trait boundary and an in-memory
//! double used by tests and examples.

use async_trait::async_trait;
use collector_errors::Result;
use collector_model::alarm::{AlarmOccurrence, AlarmRule};
use collector_model::device::Device;
use collector_model::point::DataPoint;
use collector_model::virtual_point::VirtualPoint;
use collector_model::DeviceId;
use dashmap::DashMap;
use std::sync::Arc;

#[async_trait]
pub trait ConfigStore: Send + Sync + 'static {
    async fn find_all_devices(&self) -> Result<Vec<Device>>;
    async fn find_device_by_id(&self, device_id: DeviceId) -> Result<Option<Device>>;
    async fn find_data_points_by_device_id(&self, device_id: DeviceId) -> Result<Vec<DataPoint>>;
    async fn find_alarm_rules(&self) -> Result<Vec<AlarmRule>>;
    async fn find_virtual_points(&self) -> Result<Vec<VirtualPoint>>;

    async fn save_alarm_occurrence(&self, occurrence: AlarmOccurrence) -> Result<()>;
    async fn update_alarm_occurrence(&self, occurrence: AlarmOccurrence) -> Result<()>;
    async fn find_active_alarm_occurrences(&self) -> Result<Vec<AlarmOccurrence>>;
}

/// In-memory `ConfigStore` double. Seeded once at construction, mutated
/// only through the alarm-occurrence write methods - device/point/rule
/// configuration is treated as read-only after load, matching how the
/// collector itself never writes configuration back.
#[derive(Default)]
pub struct StaticConfigStore {
    devices: Vec<Device>,
    points_by_device: DashMap<DeviceId, Vec<DataPoint>>,
    alarm_rules: Vec<AlarmRule>,
    virtual_points: Vec<VirtualPoint>,
    occurrences: DashMap<i64, AlarmOccurrence>,
}

impl StaticConfigStore {
    pub fn new(
        devices: Vec<Device>,
        points_by_device: Vec<(DeviceId, Vec<DataPoint>)>,
        alarm_rules: Vec<AlarmRule>,
        virtual_points: Vec<VirtualPoint>,
    ) -> Arc<Self> {
        let points = DashMap::new();
        for (device_id, points_for_device) in points_by_device {
            points.insert(device_id, points_for_device);
        }
        Arc::new(Self {
            devices,
            points_by_device: points,
            alarm_rules,
            virtual_points,
            occurrences: DashMap::new(),
        })
    }

    /// Seeds an occurrence directly, for tests exercising startup recovery
    /// without going through `save_alarm_occurrence`.
    pub fn seed_occurrence(&self, occurrence: AlarmOccurrence) {
        self.occurrences.insert(occurrence.id, occurrence);
    }
}

#[async_trait]
impl ConfigStore for StaticConfigStore {
    async fn find_all_devices(&self) -> Result<Vec<Device>> {
        Ok(self.devices.clone())
    }

    async fn find_device_by_id(&self, device_id: DeviceId) -> Result<Option<Device>> {
        Ok(self.devices.iter().find(|d| d.id == device_id).cloned())
    }

    async fn find_data_points_by_device_id(&self, device_id: DeviceId) -> Result<Vec<DataPoint>> {
        Ok(self
            .points_by_device
            .get(&device_id)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn find_alarm_rules(&self) -> Result<Vec<AlarmRule>> {
        Ok(self.alarm_rules.clone())
    }

    async fn find_virtual_points(&self) -> Result<Vec<VirtualPoint>> {
        Ok(self.virtual_points.clone())
    }

    async fn save_alarm_occurrence(&self, occurrence: AlarmOccurrence) -> Result<()> {
        self.occurrences.insert(occurrence.id, occurrence);
        Ok(())
    }

    async fn update_alarm_occurrence(&self, occurrence: AlarmOccurrence) -> Result<()> {
        self.occurrences.insert(occurrence.id, occurrence);
        Ok(())
    }

    async fn find_active_alarm_occurrences(&self) -> Result<Vec<AlarmOccurrence>> {
        Ok(self
            .occurrences
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|o| o.state.is_non_terminal())
            .collect())
    }
}
