//! Configuration file parsing for gangway
//!
//! Parses `gangway.toml` manifests using serde

use crate::device::DeviceSet;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Device tables as written in the manifest: device name -> key -> value
pub type RawDevices = BTreeMap<String, BTreeMap<String, toml::Value>>;

/// Load configuration from a file
pub fn load(path: &Path) -> Result<GangwayConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: GangwayConfig = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Root configuration structure
#[derive(Debug, Deserialize)]
pub struct GangwayConfig {
    /// Global configuration settings
    #[serde(default)]
    pub config: GlobalConfig,

    /// Device profiles shared between containers
    #[serde(default)]
    pub profiles: Vec<ProfileDef>,

    /// Container definitions
    #[serde(default)]
    pub containers: Vec<ContainerDef>,
}

impl GangwayConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let mut profiles = HashSet::new();
        for profile in &self.profiles {
            if !profiles.insert(profile.name.as_str()) {
                return Err(Error::ConfigValidation(format!(
                    "Duplicate profile name: {}",
                    profile.name
                )));
            }
            profile.device_set()?;
        }

        let mut containers = HashSet::new();
        for container in &self.containers {
            if !containers.insert(container.name.as_str()) {
                return Err(Error::ConfigValidation(format!(
                    "Duplicate container name: {}",
                    container.name
                )));
            }

            for profile in &container.profiles {
                if !profiles.contains(profile.as_str()) {
                    return Err(Error::ConfigValidation(format!(
                        "Container '{}' uses unknown profile '{}'",
                        container.name, profile
                    )));
                }
            }

            container.device_set()?;
        }

        Ok(())
    }

    /// Get a container definition by name
    pub fn get_container(&self, name: &str) -> Result<&ContainerDef> {
        self.containers
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::ContainerNotFound(name.to_string()))
    }

    pub fn get_profile(&self, name: &str) -> Option<&ProfileDef> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Devices a container ends up with: its profiles in order, then its own
    /// devices, later entries replacing earlier ones by name
    pub fn expanded_devices(&self, container: &ContainerDef) -> Result<DeviceSet> {
        let mut devices = DeviceSet::new();
        for name in &container.profiles {
            let profile = self.get_profile(name).ok_or_else(|| {
                Error::ConfigValidation(format!(
                    "Container '{}' uses unknown profile '{}'",
                    container.name, name
                ))
            })?;
            devices.extend(&profile.device_set()?);
        }
        devices.extend(&container.device_set()?);
        Ok(devices)
    }
}

/// Global configuration section
#[derive(Debug, Deserialize)]
pub struct GlobalConfig {
    /// Base directory for gangway state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// SQLite database (defaults to `<data_dir>/gangway.db`)
    pub database: Option<PathBuf>,

    /// Binary re-executed as privileged helper (defaults to this executable)
    pub helper: Option<PathBuf>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: None,
            helper: None,
        }
    }
}

impl GlobalConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.data_dir.join("gangway.db"))
    }

    /// Host directory holding live mount staging directories
    pub fn shmounts_dir(&self) -> PathBuf {
        self.data_dir.join("shmounts")
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/gangway")
}

/// Profile definition
#[derive(Debug, Deserialize)]
pub struct ProfileDef {
    pub name: String,

    #[serde(default)]
    pub devices: RawDevices,
}

impl ProfileDef {
    pub fn device_set(&self) -> Result<DeviceSet> {
        device_set(&format!("profile '{}'", self.name), &self.devices)
    }
}

/// Container definition
#[derive(Debug, Deserialize)]
pub struct ContainerDef {
    pub name: String,

    /// Whether the container shares device nodes with the host
    #[serde(default)]
    pub privileged: bool,

    /// Profiles applied before the container's own devices
    #[serde(default)]
    pub profiles: Vec<String>,

    /// Runtime config file the translated lines go to
    pub config_path: Option<PathBuf>,

    #[serde(default)]
    pub devices: RawDevices,
}

impl ContainerDef {
    pub fn device_set(&self) -> Result<DeviceSet> {
        device_set(&format!("container '{}'", self.name), &self.devices)
    }

    /// Get the effective runtime config path for this container
    pub fn effective_config_path(&self, global: &GlobalConfig) -> PathBuf {
        self.config_path.clone().unwrap_or_else(|| {
            global
                .data_dir
                .join("containers")
                .join(&self.name)
                .join("config")
        })
    }
}

/// A device value from the manifest, in the string form devices use
#[derive(Debug, Clone, PartialEq, Eq)]
struct DeviceValue(String);

impl TryFrom<&toml::Value> for DeviceValue {
    type Error = String;

    fn try_from(value: &toml::Value) -> std::result::Result<Self, Self::Error> {
        match value {
            toml::Value::String(s) => Ok(DeviceValue(s.clone())),
            toml::Value::Integer(i) => Ok(DeviceValue(i.to_string())),
            toml::Value::Boolean(b) => Ok(DeviceValue(b.to_string())),
            other => Err(format!("unsupported value type: {}", other.type_str())),
        }
    }
}

fn device_set(owner: &str, devices: &RawDevices) -> Result<DeviceSet> {
    let mut maps = BTreeMap::new();
    for (name, raw) in devices {
        let mut map = BTreeMap::new();
        for (key, value) in raw {
            let DeviceValue(value) = DeviceValue::try_from(value).map_err(|e| {
                Error::ConfigValidation(format!("{}: device '{}' key '{}': {}", owner, name, key, e))
            })?;
            map.insert(key.clone(), value);
        }
        maps.insert(name.clone(), map);
    }

    DeviceSet::from_maps(&maps).map_err(|e| match e {
        Error::ConfigValidation(msg) => Error::ConfigValidation(format!("{}: {}", owner, msg)),
        other => other,
    })
}
