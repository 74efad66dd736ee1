//! Device types and per-type key validation

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Reserved key selecting the device variant
pub const TYPE_KEY: &str = "type";

/// Device type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    None,
    Nic,
    Disk,
    UnixChar,
    UnixBlock,
}

impl DeviceType {
    pub const ALL: [DeviceType; 5] = [
        DeviceType::None,
        DeviceType::Nic,
        DeviceType::Disk,
        DeviceType::UnixChar,
        DeviceType::UnixBlock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::None => "none",
            DeviceType::Nic => "nic",
            DeviceType::Disk => "disk",
            DeviceType::UnixChar => "unix-char",
            DeviceType::UnixBlock => "unix-block",
        }
    }

    /// Integer code stored in the devices table
    pub fn db_code(&self) -> i64 {
        match self {
            DeviceType::None => 0,
            DeviceType::Nic => 1,
            DeviceType::Disk => 2,
            DeviceType::UnixChar => 3,
            DeviceType::UnixBlock => 4,
        }
    }

    pub fn from_db_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(DeviceType::None),
            1 => Ok(DeviceType::Nic),
            2 => Ok(DeviceType::Disk),
            3 => Ok(DeviceType::UnixChar),
            4 => Ok(DeviceType::UnixBlock),
            _ => Err(Error::InvalidDbType(code)),
        }
    }

    /// Check whether `key=value` is allowed for this type
    ///
    /// `type` is the discriminator and never a config key.
    pub fn allows(&self, key: &str, value: &str) -> bool {
        if key == TYPE_KEY {
            return false;
        }
        match self {
            DeviceType::UnixChar | DeviceType::UnixBlock => {
                matches!(key, "path" | "major" | "minor" | "uid" | "gid" | "mode")
            }
            DeviceType::Nic => match key {
                "parent" | "name" | "hwaddr" | "mtu" => true,
                "nictype" => NicType::from_str(value).is_ok(),
                _ => false,
            },
            DeviceType::Disk => matches!(key, "path" | "source" | "readonly" | "optional"),
            DeviceType::None => false,
        }
    }
}

impl FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DeviceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidDeviceType(s.to_string()))
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a type tag to its database code
pub fn device_type_to_db_type(tag: &str) -> Result<i64> {
    Ok(DeviceType::from_str(tag)?.db_code())
}

/// Map a database code back to its type tag
pub fn db_type_to_device_type(code: i64) -> Result<&'static str> {
    Ok(DeviceType::from_db_code(code)?.as_str())
}

pub fn valid_device_type(tag: &str) -> bool {
    DeviceType::from_str(tag).is_ok()
}

/// Check a single key/value pair against the rules of a type tag
///
/// Unknown tags reject every key.
pub fn valid_device_config(tag: &str, key: &str, value: &str) -> bool {
    DeviceType::from_str(tag).is_ok_and(|t| t.allows(key, value))
}

/// Interface type of a nic device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NicType {
    /// No `nictype` given
    #[default]
    Default,
    Bridged,
}

impl NicType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NicType::Default => "",
            NicType::Bridged => "bridged",
        }
    }
}

impl FromStr for NicType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Ok(NicType::Default),
            "bridged" => Ok(NicType::Bridged),
            other => Err(Error::InvalidDeviceConfig {
                device_type: DeviceType::Nic.to_string(),
                key: "nictype".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Network interface device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Nic {
    /// Host bridge the interface is attached to
    pub parent: String,
    /// Interface name inside the container
    pub name: String,
    pub hwaddr: String,
    pub mtu: String,
    pub nictype: NicType,
}

/// Disk (mount) device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disk {
    /// Mount point inside the container
    pub path: String,
    /// Host path: directory, file or block device
    pub source: String,
    pub readonly: String,
    pub optional: String,
}

impl Disk {
    pub fn is_readonly(&self) -> bool {
        is_true(&self.readonly)
    }

    pub fn is_optional(&self) -> bool {
        is_true(&self.optional)
    }
}

/// Device node (character or block)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnixDevice {
    pub path: String,
    pub major: String,
    pub minor: String,
    pub uid: String,
    pub gid: String,
    pub mode: String,
}

/// A typed device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Device {
    None,
    Nic(Nic),
    Disk(Disk),
    UnixChar(UnixDevice),
    UnixBlock(UnixDevice),
}

impl Device {
    pub fn device_type(&self) -> DeviceType {
        match self {
            Device::None => DeviceType::None,
            Device::Nic(_) => DeviceType::Nic,
            Device::Disk(_) => DeviceType::Disk,
            Device::UnixChar(_) => DeviceType::UnixChar,
            Device::UnixBlock(_) => DeviceType::UnixBlock,
        }
    }

    /// Build a device from its raw key/value form
    ///
    /// The map must carry `type`; every other key is checked against the
    /// rules of that type. Absent keys read as empty strings.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self> {
        let tag = map.get(TYPE_KEY).map(String::as_str).unwrap_or_default();
        let device_type = DeviceType::from_str(tag)?;

        for (key, value) in map {
            if key == TYPE_KEY {
                continue;
            }
            if !device_type.allows(key, value) {
                return Err(Error::InvalidDeviceConfig {
                    device_type: tag.to_string(),
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }

        let get = |key: &str| map.get(key).cloned().unwrap_or_default();

        let device = match device_type {
            DeviceType::None => Device::None,
            DeviceType::Nic => Device::Nic(Nic {
                parent: get("parent"),
                name: get("name"),
                hwaddr: get("hwaddr"),
                mtu: get("mtu"),
                nictype: NicType::from_str(&get("nictype"))?,
            }),
            DeviceType::Disk => Device::Disk(Disk {
                path: get("path"),
                source: get("source"),
                readonly: get("readonly"),
                optional: get("optional"),
            }),
            DeviceType::UnixChar | DeviceType::UnixBlock => {
                let dev = UnixDevice {
                    path: get("path"),
                    major: get("major"),
                    minor: get("minor"),
                    uid: get("uid"),
                    gid: get("gid"),
                    mode: get("mode"),
                };
                if device_type == DeviceType::UnixChar {
                    Device::UnixChar(dev)
                } else {
                    Device::UnixBlock(dev)
                }
            }
        };

        Ok(device)
    }

    /// Raw key/value form: `type` plus every non-empty field
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(TYPE_KEY.to_string(), self.device_type().to_string());

        let fields: Vec<(&str, &str)> = match self {
            Device::None => Vec::new(),
            Device::Nic(nic) => vec![
                ("parent", nic.parent.as_str()),
                ("name", nic.name.as_str()),
                ("hwaddr", nic.hwaddr.as_str()),
                ("mtu", nic.mtu.as_str()),
                ("nictype", nic.nictype.as_str()),
            ],
            Device::Disk(disk) => vec![
                ("path", disk.path.as_str()),
                ("source", disk.source.as_str()),
                ("readonly", disk.readonly.as_str()),
                ("optional", disk.optional.as_str()),
            ],
            Device::UnixChar(dev) | Device::UnixBlock(dev) => vec![
                ("path", dev.path.as_str()),
                ("major", dev.major.as_str()),
                ("minor", dev.minor.as_str()),
                ("uid", dev.uid.as_str()),
                ("gid", dev.gid.as_str()),
                ("mode", dev.mode.as_str()),
            ],
        };

        for (key, value) in fields {
            if !value.is_empty() {
                map.insert(key.to_string(), value.to_string());
            }
        }

        map
    }
}

/// Flag convention shared by `readonly` and `optional`
pub fn is_true(value: &str) -> bool {
    value == "1" || value == "true"
}

#[cfg(test)]
pub(crate) fn raw(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
