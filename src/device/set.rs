//! Named device sets and their delta

use crate::device::types::{Device, DeviceType, Nic};
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Devices of a container or profile, keyed by device name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSet {
    devices: BTreeMap<String, Device>,
}

impl DeviceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from raw key/value maps, validating every device
    pub fn from_maps(maps: &BTreeMap<String, BTreeMap<String, String>>) -> Result<Self> {
        let mut set = Self::new();
        for (name, map) in maps {
            let device = Device::from_map(map).map_err(|e| match e {
                Error::InvalidDeviceType(t) => Error::ConfigValidation(format!(
                    "Device '{}' has invalid type '{}'",
                    name, t
                )),
                other => Error::ConfigValidation(format!("Device '{}': {}", name, other)),
            })?;
            set.insert(name.clone(), device);
        }
        Ok(set)
    }

    pub fn to_maps(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.devices
            .iter()
            .map(|(name, device)| (name.clone(), device.to_map()))
            .collect()
    }

    pub fn insert(&mut self, name: impl Into<String>, device: Device) -> Option<Device> {
        self.devices.insert(name.into(), device)
    }

    pub fn get(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Device)> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Overlay `other` on top of this set; devices with the same name are replaced
    pub fn extend(&mut self, other: &DeviceSet) {
        for (name, device) in other.iter() {
            self.devices.insert(name.clone(), device.clone());
        }
    }

    /// Compute the devices to remove and to add to go from `self` to `next`
    ///
    /// A device whose value changed shows up in both lists. Only nic and disk
    /// devices are returned.
    pub fn update(&self, next: &DeviceSet) -> (DeviceSet, DeviceSet) {
        let mut removed = DeviceSet::new();
        let mut added = DeviceSet::new();

        for (name, device) in self.iter() {
            if !is_live(device) {
                continue;
            }
            if next.get(name) != Some(device) {
                removed.insert(name.clone(), device.clone());
            }
        }

        for (name, device) in next.iter() {
            if !is_live(device) {
                continue;
            }
            if self.get(name) != Some(device) {
                added.insert(name.clone(), device.clone());
            }
        }

        (removed, added)
    }

    /// Copy of this set where every unnamed nic takes the interface name
    /// recorded for the same, otherwise identical, nic in `prev`
    pub fn with_recorded_names(&self, prev: &DeviceSet) -> DeviceSet {
        let mut set = self.clone();
        for (name, device) in set.devices.iter_mut() {
            let Device::Nic(nic) = device else {
                continue;
            };
            if !nic.name.is_empty() {
                continue;
            }
            let Some(Device::Nic(old)) = prev.get(name) else {
                continue;
            };
            let unnamed = Nic {
                name: String::new(),
                ..old.clone()
            };
            if !old.name.is_empty() && unnamed == *nic {
                nic.name = old.name.clone();
            }
        }
        set
    }
}

impl<'a> IntoIterator for &'a DeviceSet {
    type Item = (&'a String, &'a Device);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Device>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}

/// Device types that can be applied to a running container
fn is_live(device: &Device) -> bool {
    matches!(device.device_type(), DeviceType::Nic | DeviceType::Disk)
}
