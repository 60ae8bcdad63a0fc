//! Device registry: the single owner of every [`DeviceRecord`]

use super::DeviceRecord;
use crate::config::TrvConfig;
use std::collections::HashMap;

/// Records indexed by name, radio id and cloud id.
///
/// Built once from configuration; the set of devices never changes
/// afterwards, so the indexes are plain positions into `records`.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    records: Vec<DeviceRecord>,
    by_name: HashMap<String, usize>,
    by_radio: HashMap<u32, usize>,
    by_cloud: HashMap<u64, usize>,
}

impl DeviceRegistry {
    /// Build from validated configuration. Later duplicates are ignored;
    /// `BridgeConfig::validate` rejects them before this point.
    pub fn from_config(trvs: &[TrvConfig]) -> Self {
        let mut registry = Self::default();
        for trv in trvs {
            registry.insert(DeviceRecord::from(trv));
        }
        registry
    }

    /// Add a record unless one of its identifiers is already taken.
    /// Returns whether the record was added.
    pub fn insert(&mut self, record: DeviceRecord) -> bool {
        if self.by_name.contains_key(record.name())
            || self.by_radio.contains_key(&record.radio_id())
            || self.by_cloud.contains_key(&record.cloud_id())
        {
            return false;
        }

        let index = self.records.len();
        self.by_name.insert(record.name().to_string(), index);
        self.by_radio.insert(record.radio_id(), index);
        self.by_cloud.insert(record.cloud_id(), index);
        self.records.push(record);
        true
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&DeviceRecord> {
        self.by_name.get(name).map(|&i| &self.records[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut DeviceRecord> {
        let index = *self.by_name.get(name)?;
        self.records.get_mut(index)
    }

    pub fn by_radio_id_mut(&mut self, radio_id: u32) -> Option<&mut DeviceRecord> {
        let index = *self.by_radio.get(&radio_id)?;
        self.records.get_mut(index)
    }

    pub fn by_cloud_id_mut(&mut self, cloud_id: u64) -> Option<&mut DeviceRecord> {
        let index = *self.by_cloud.get(&cloud_id)?;
        self.records.get_mut(index)
    }

    /// Device names in configuration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.name())
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DeviceRecord> {
        self.records.iter_mut()
    }
}
