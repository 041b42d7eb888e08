use std::collections::HashMap;

use crate::address::BdAddr;

use super::advertised_device::AdvertisedDevice;

/// Devices retained by a scan, at most one per address.
#[derive(Debug, Clone, Default)]
pub struct ScanResults {
    devices: HashMap<String, AdvertisedDevice>,
}

impl ScanResults {
    pub fn count(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, address: &BdAddr) -> Option<&AdvertisedDevice> {
        self.devices.get(&address.to_string())
    }

    /// Positional access; the order is unspecified but stable while no scan runs.
    pub fn device(&self, index: usize) -> Option<&AdvertisedDevice> {
        self.devices.values().nth(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AdvertisedDevice> {
        self.devices.values()
    }

    /// First sighting wins, later reports for the same key are ignored.
    pub(crate) fn retain_first(&mut self, device: &AdvertisedDevice) -> bool {
        let key = device.address().to_string();
        if self.devices.contains_key(&key) {
            return false;
        }
        self.devices.insert(key, device.clone());
        true
    }

    pub(crate) fn clear(&mut self) {
        self.devices.clear();
    }
}
