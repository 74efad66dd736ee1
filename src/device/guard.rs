//! Privilege guard for device sets
//!
//! Block device mounts give a container raw access to host storage, so only
//! privileged containers may have them. The guard runs before any attach.

use crate::container::ContainerHandle;
use crate::device::set::DeviceSet;
use crate::device::translate::is_block_device;
use crate::device::types::Device;
use crate::error::{Error, Result};

/// Reject block device disk sources unless the container is privileged
pub fn validate_device_set(container: &dyn ContainerHandle, devices: &DeviceSet) -> Result<()> {
    validate_device_set_with(container, devices, is_block_device)
}

/// Same as [`validate_device_set`] with the block device check supplied
pub fn validate_device_set_with(
    container: &dyn ContainerHandle,
    devices: &DeviceSet,
    is_block: impl Fn(&str) -> bool,
) -> Result<()> {
    if container.is_privileged() {
        return Ok(());
    }

    for (name, device) in devices {
        if let Device::Disk(disk) = device {
            if is_block(&disk.source) {
                tracing::warn!(
                    container = %container.name(),
                    device = %name,
                    source = %disk.source,
                    "refusing block device for unprivileged container"
                );
                return Err(Error::PrivilegeRequired {
                    device: name.clone(),
                    container: container.name().to_string(),
                });
            }
        }
    }

    Ok(())
}
