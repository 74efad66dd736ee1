//! Device model for containers and profiles
//!
//! Provides:
//! - The closed device type vocabulary and its database codes
//! - Per-type key validation
//! - Translation of devices into runtime config lines
//! - The privilege guard for block device mounts

pub mod guard;
pub mod set;
pub mod translate;
pub mod types;

pub use guard::{validate_device_set, validate_device_set_with};
pub use set::DeviceSet;
pub use translate::{translate, ConfigLine};
pub use types::{Device, DeviceType, Disk, Nic, NicType};
