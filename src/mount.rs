//! Disk mounts for containers
//!
//! Provides:
//! - Static mount entries that survive a restart
//! - Live mounts into a running container through a staging directory
//! - Live unmounts through the privileged helper

use crate::container::ContainerHandle;
use crate::device::translate::{flag_options, mount_entry, normalize_disk_path, MOUNT_ENTRY};
use crate::device::translate::{detect_fs, SourceKind};
use crate::device::Disk;
use crate::error::{BestEffort, Error, Result};
use crate::helper::PrivilegedHelper;
use crate::network::veth::generate_temp_name;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use std::fs;
use std::path::{Path, PathBuf};

/// Where the shared staging directory appears inside every container
pub const CONTAINER_SHMOUNTS: &str = "/.gangway-mounts";

/// Prefix of staging directory names
const STAGING_PREFIX: &str = "gangway_";

/// How a disk source is mounted live
#[derive(Debug, Clone, PartialEq, Eq)]
struct MountPlan {
    fstype: String,
    flags: MsFlags,
    options: Vec<&'static str>,
}

impl MountPlan {
    fn for_disk(disk: &Disk) -> Result<Self> {
        let meta = fs::metadata(&disk.source).map_err(|e| {
            Error::Mount(format!("Unable to access source {}: {}", disk.source, e))
        })?;

        let mut plan = match SourceKind::classify(&disk.source) {
            SourceKind::Directory => MountPlan {
                fstype: "none".to_string(),
                flags: MsFlags::MS_BIND,
                options: vec!["bind", "create=dir"],
            },
            SourceKind::BlockDevice { .. } => MountPlan {
                fstype: detect_fs(&disk.source)?,
                flags: MsFlags::empty(),
                options: Vec::new(),
            },
            SourceKind::File => {
                return Err(Error::Mount(format!(
                    "Unsupported source {} ({:?}): only directories and block devices can be mounted live",
                    disk.source,
                    meta.file_type()
                )));
            }
        };

        plan.options.extend(flag_options(disk));
        if disk.is_readonly() {
            plan.flags |= MsFlags::MS_RDONLY;
        }
        Ok(plan)
    }

    fn is_bind(&self) -> bool {
        self.flags.contains(MsFlags::MS_BIND)
    }
}

/// A source mounted on a private staging directory
///
/// Dropping it detaches whatever is still mounted there and removes the
/// directory.
struct StagingMount {
    dir: PathBuf,
}

impl StagingMount {
    fn create(parent: &Path, source: &str, plan: &MountPlan) -> Result<Self> {
        fs::create_dir_all(parent)?;
        let dir = parent.join(format!("{}{}", STAGING_PREFIX, generate_temp_name()));
        fs::create_dir(&dir)?;
        let staging = Self { dir };

        let fstype = (!plan.is_bind()).then_some(plan.fstype.as_str());
        mount(
            Some(source),
            &staging.dir,
            fstype,
            plan.flags,
            None::<&str>,
        )
        .map_err(|e| {
            Error::Mount(format!(
                "Failed to mount {} on {}: {}",
                source,
                staging.dir.display(),
                e
            ))
        })?;

        // Bind mounts ignore MS_RDONLY on the first call
        if plan.is_bind() && plan.flags.contains(MsFlags::MS_RDONLY) {
            mount(
                None::<&str>,
                &staging.dir,
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                None::<&str>,
            )
            .map_err(|e| Error::Mount(format!("Failed to remount read-only: {}", e)))?;
        }

        Ok(staging)
    }

    /// Path of the staging directory as seen from inside the container
    fn container_path(&self) -> PathBuf {
        let base = self.dir.file_name().unwrap_or_default();
        Path::new(CONTAINER_SHMOUNTS).join(base)
    }
}

impl Drop for StagingMount {
    fn drop(&mut self) {
        // Nothing is left mounted here once the helper moved it
        let _ = umount2(&self.dir, MntFlags::MNT_DETACH);
        if let Err(e) = fs::remove_dir(&self.dir) {
            tracing::warn!(dir = %self.dir.display(), error = %e, "failed to remove staging directory");
        }
    }
}

/// Mount manager working through an injected privileged helper
pub struct MountManager<'a> {
    helper: &'a dyn PrivilegedHelper,
    /// Host directory holding per-container staging directories
    shmounts: PathBuf,
}

impl<'a> MountManager<'a> {
    pub fn new(helper: &'a dyn PrivilegedHelper, shmounts: impl Into<PathBuf>) -> Self {
        Self {
            helper,
            shmounts: shmounts.into(),
        }
    }

    /// Mount a disk into a container
    ///
    /// The static entry is always recorded. For a running container the
    /// source is also mounted live; a live failure only counts for disks
    /// not marked optional.
    pub fn attach_mount(&self, container: &dyn ContainerHandle, disk: &Disk) -> Result<BestEffort> {
        let plan = MountPlan::for_disk(disk)?;

        let entry = mount_entry(
            &disk.source,
            normalize_disk_path(&disk.path),
            &plan.fstype,
            &plan.options,
        );
        container.set_config_item(MOUNT_ENTRY, &entry)?;
        tracing::debug!(container = %container.name(), entry = %entry, "recorded mount entry");

        let operation = format!("live mount {} on {}", disk.source, disk.path);
        let Some(pid) = container.init_pid() else {
            return Ok(BestEffort::ok(operation));
        };

        match self.live_mount(container.name(), pid, disk, &plan) {
            Ok(()) => {
                tracing::info!(
                    container = %container.name(),
                    source = %disk.source,
                    path = %disk.path,
                    "mounted disk"
                );
                Ok(BestEffort::ok(operation))
            }
            Err(e) if disk.is_optional() => Ok(BestEffort::record(operation, Err(e))),
            Err(e) => Err(e),
        }
    }

    fn live_mount(&self, container: &str, pid: i32, disk: &Disk, plan: &MountPlan) -> Result<()> {
        let staging = StagingMount::create(&self.shmounts.join(container), &disk.source, plan)?;
        self.helper
            .move_mount(pid, &staging.container_path(), Path::new(&disk.path))
    }

    /// Unmount a disk from a running container
    ///
    /// The static mount entry stays in the container's config: dropping a
    /// single entry needs a read-modify-write of the whole config file.
    // TODO: rewrite the runtime config without this disk's lxc.mount.entry
    pub fn detach_mount(&self, container: &dyn ContainerHandle, disk: &Disk) -> Result<()> {
        tracing::debug!(
            container = %container.name(),
            path = %disk.path,
            "static mount entry is kept until the config is rewritten"
        );

        let Some(pid) = container.init_pid() else {
            return Ok(());
        };

        self.helper.unmount(pid, Path::new(&disk.path))?;
        tracing::info!(container = %container.name(), path = %disk.path, "unmounted disk");
        Ok(())
    }
}
