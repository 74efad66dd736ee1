//! Translation of devices into runtime config lines
//!
//! Network keys follow the runtime's dotted `lxc.network.*` grammar, mounts
//! use mount-table syntax (`source target fstype options 0 0`).

use crate::device::types::{Device, Disk, Nic};
use crate::error::{Error, Result};
use std::fmt;
use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;
use std::process::Command;

pub const NETWORK_TYPE: &str = "lxc.network.type";
pub const NETWORK_HWADDR: &str = "lxc.network.hwaddr";
pub const NETWORK_MTU: &str = "lxc.network.mtu";
pub const NETWORK_LINK: &str = "lxc.network.link";
pub const NETWORK_NAME: &str = "lxc.network.name";
pub const MOUNT_ENTRY: &str = "lxc.mount.entry";
pub const CGROUP_DEVICES_ALLOW: &str = "lxc.cgroup.devices.allow";

/// One runtime configuration entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLine {
    pub key: String,
    pub value: String,
}

impl ConfigLine {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for ConfigLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.key, self.value)
    }
}

/// Translate a device into the config lines describing it
pub fn translate(device: &Device) -> Result<Vec<ConfigLine>> {
    match device {
        Device::None => Ok(Vec::new()),
        Device::Nic(nic) => Ok(translate_nic(nic)),
        Device::Disk(disk) => translate_disk(disk, SourceKind::classify(&disk.source), detect_fs),
        Device::UnixChar(_) => Err(Error::NotImplemented(
            "unix-char device translation".to_string(),
        )),
        Device::UnixBlock(_) => Err(Error::NotImplemented(
            "unix-block device translation".to_string(),
        )),
    }
}

fn translate_nic(nic: &Nic) -> Vec<ConfigLine> {
    let mut lines = vec![ConfigLine::new(NETWORK_TYPE, "veth")];

    let optional = [
        (NETWORK_HWADDR, &nic.hwaddr),
        (NETWORK_MTU, &nic.mtu),
        (NETWORK_LINK, &nic.parent),
        (NETWORK_NAME, &nic.name),
    ];
    for (key, value) in optional {
        if !value.is_empty() {
            lines.push(ConfigLine::new(key, value.as_str()));
        }
    }

    lines
}

fn translate_disk(
    disk: &Disk,
    kind: SourceKind,
    detect: impl Fn(&str) -> Result<String>,
) -> Result<Vec<ConfigLine>> {
    let mut lines = Vec::new();
    let target = normalize_disk_path(&disk.path);

    let (fstype, mut options) = match kind {
        SourceKind::BlockDevice { rdev } => {
            let fstype = detect(&disk.source)?;
            lines.push(ConfigLine::new(CGROUP_DEVICES_ALLOW, block_allow_rule(rdev)));
            (fstype, Vec::new())
        }
        SourceKind::Directory => ("none".to_string(), vec!["bind", "create=dir"]),
        SourceKind::File => ("none".to_string(), vec!["bind", "create=file"]),
    };

    options.extend(flag_options(disk));

    lines.push(ConfigLine::new(
        MOUNT_ENTRY,
        mount_entry(&disk.source, target, &fstype, &options),
    ));
    Ok(lines)
}

/// Container mount point relative to the rootfs
///
/// `/` and the empty path map to the rootfs itself.
pub fn normalize_disk_path(path: &str) -> &str {
    match path {
        "" | "/" => "",
        p => p.strip_prefix('/').unwrap_or(p),
    }
}

/// `ro` and `optional` options derived from the disk flags
pub fn flag_options(disk: &Disk) -> Vec<&'static str> {
    let mut options = Vec::new();
    if disk.is_readonly() {
        options.push("ro");
    }
    if disk.is_optional() {
        options.push("optional");
    }
    options
}

/// Format a mount-table entry; no options means `defaults`
pub fn mount_entry(source: &str, target: &str, fstype: &str, options: &[&str]) -> String {
    let opts = if options.is_empty() {
        "defaults".to_string()
    } else {
        options.join(",")
    };
    format!("{} {} {} {} 0 0", source, target, fstype, opts)
}

/// Cgroup rule allowing access to a block device
pub fn block_allow_rule(rdev: u64) -> String {
    format!("b {}:{} rwm", rdev >> 8, rdev & 0xFF)
}

/// What a disk source points at on the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    BlockDevice { rdev: u64 },
    Directory,
    /// Anything else, including paths that do not exist
    File,
}

impl SourceKind {
    pub fn classify(source: impl AsRef<Path>) -> Self {
        match fs::metadata(source) {
            Ok(meta) if meta.file_type().is_block_device() => {
                SourceKind::BlockDevice { rdev: meta.rdev() }
            }
            Ok(meta) if meta.is_dir() => SourceKind::Directory,
            _ => SourceKind::File,
        }
    }
}

pub fn is_block_device(source: &str) -> bool {
    matches!(SourceKind::classify(source), SourceKind::BlockDevice { .. })
}

/// Detect the filesystem on a block device with blkid(8)
pub fn detect_fs(device: &str) -> Result<String> {
    let output = Command::new("blkid")
        .args(["-s", "TYPE", "-o", "value", device])
        .output()
        .map_err(|e| Error::Mount(format!("Failed to run blkid on {}: {}", device, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Mount(format!(
            "Unable to detect filesystem on {}: {}",
            device,
            stderr.trim()
        )));
    }

    let fstype = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if fstype.is_empty() {
        return Err(Error::Mount(format!("No filesystem found on {}", device)));
    }
    Ok(fstype)
}
