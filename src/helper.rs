//! Privileged helper for namespace-scoped operations
//!
//! Entering a single namespace of a running container is done by a
//! short-lived re-exec of this binary rather than in-process: `setns` on a
//! mount namespace requires a single-threaded caller, and a thread left in
//! the wrong namespace would leak into unrelated work.
//!
//! Exit status protocol of the helper subcommands:
//! - `0`: success
//! - `3`: the target namespace could not be entered
//! - anything else: the operation failed, message on stderr

use crate::error::{Error, Result};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sched::{setns, CloneFlags};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Exit code reported when the helper cannot enter a namespace
pub const EXIT_NAMESPACE_UNAVAILABLE: i32 = 3;

pub const FORKMOUNT: &str = "forkmount";
pub const FORKUMOUNT: &str = "forkumount";
pub const FORKNETDEL: &str = "forknetdel";

/// Operations performed inside a running container's namespaces
pub trait PrivilegedHelper {
    /// Move the mount at `source` (container-relative) onto `target`
    fn move_mount(&self, pid: i32, source: &Path, target: &Path) -> Result<()>;

    /// Unmount `target` inside the container
    fn unmount(&self, pid: i32, target: &Path) -> Result<()>;

    /// Delete interface `name` from the container's network namespace
    fn delete_interface(&self, pid: i32, name: &str) -> Result<()>;
}

/// Helper backed by re-executing a binary with a helper subcommand
#[derive(Debug, Clone)]
pub struct Reexec {
    exe: PathBuf,
}

impl Reexec {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }

    /// Re-exec the currently running binary
    pub fn current() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    fn run(&self, subcommand: &str, args: &[&str]) -> Result<()> {
        let command = format!("{} {}", subcommand, args.join(" "));
        tracing::debug!(exe = %self.exe.display(), command = %command, "invoking privileged helper");

        let output = Command::new(&self.exe)
            .arg(subcommand)
            .args(args)
            .output()
            .map_err(|e| Error::HelperUnavailable {
                command: command.clone(),
                message: format!("Failed to spawn {}: {}", self.exe.display(), e),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        classify_exit(command, output.status.code(), stderr.trim())
    }
}

/// Turn a helper exit status into a result
fn classify_exit(command: String, code: Option<i32>, stderr: &str) -> Result<()> {
    let message = stderr.to_string();
    match code {
        Some(0) => Ok(()),
        Some(EXIT_NAMESPACE_UNAVAILABLE) => Err(Error::HelperUnavailable { command, message }),
        Some(code) => Err(Error::HelperFailed {
            command,
            message: format!("exit status {}: {}", code, message),
        }),
        None => Err(Error::HelperFailed {
            command,
            message: format!("terminated by signal: {}", message),
        }),
    }
}

impl PrivilegedHelper for Reexec {
    fn move_mount(&self, pid: i32, source: &Path, target: &Path) -> Result<()> {
        let pid = pid.to_string();
        let source = source.to_string_lossy();
        let target = target.to_string_lossy();
        self.run(FORKMOUNT, &[pid.as_str(), &*source, &*target])
    }

    fn unmount(&self, pid: i32, target: &Path) -> Result<()> {
        let pid = pid.to_string();
        let target = target.to_string_lossy();
        self.run(FORKUMOUNT, &[pid.as_str(), &*target])
    }

    fn delete_interface(&self, pid: i32, name: &str) -> Result<()> {
        let pid = pid.to_string();
        self.run(FORKNETDEL, &[pid.as_str(), name])
    }
}

/// Map a helper subcommand result onto its exit code
pub fn exit_code(result: &Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(Error::HelperUnavailable { .. }) => EXIT_NAMESPACE_UNAVAILABLE,
        Err(_) => 1,
    }
}

/// Join a namespace of `pid`; runs in the helper process only
fn enter_namespace(pid: i32, ns: &str, flag: CloneFlags) -> Result<()> {
    let path = format!("/proc/{}/ns/{}", pid, ns);
    let unavailable = |message: String| Error::HelperUnavailable {
        command: format!("setns {}", path),
        message,
    };

    let file = File::open(&path).map_err(|e| unavailable(e.to_string()))?;
    setns(&file, flag).map_err(|e| unavailable(e.to_string()))?;
    Ok(())
}

/// `forkmount`: move a staged mount into the container's mount namespace
pub fn fork_mount(pid: i32, source: &Path, target: &Path) -> Result<()> {
    enter_namespace(pid, "mnt", CloneFlags::CLONE_NEWNS)?;

    // setns on a mount namespace resets root and cwd to the container's
    fs::create_dir_all(target)?;

    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_MOVE,
        None::<&str>,
    )
    .map_err(|e| {
        Error::Mount(format!(
            "Failed to move {} onto {}: {}",
            source.display(),
            target.display(),
            e
        ))
    })
}

/// `forkumount`: detach a mount inside the container's mount namespace
pub fn fork_umount(pid: i32, target: &Path) -> Result<()> {
    enter_namespace(pid, "mnt", CloneFlags::CLONE_NEWNS)?;

    umount2(target, MntFlags::MNT_DETACH)
        .map_err(|e| Error::Mount(format!("Failed to unmount {}: {}", target.display(), e)))
}

/// `forknetdel`: delete an interface inside the container's network namespace
pub fn fork_netdel(pid: i32, name: &str) -> Result<()> {
    enter_namespace(pid, "net", CloneFlags::CLONE_NEWNET)?;

    let output = Command::new("ip")
        .args(["link", "del", name])
        .output()
        .map_err(|e| Error::Network(format!("Failed to run ip link del {}: {}", name, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Network(format!(
            "Failed to delete {}: {}",
            name,
            stderr.trim()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexec_success() {
        let helper = Reexec::new("true");
        assert!(helper.delete_interface(1, "eth0").is_ok());
        assert!(helper.unmount(1, Path::new("/mnt")).is_ok());
    }

    #[test]
    fn test_reexec_failure_is_helper_failed() {
        let helper = Reexec::new("false");
        let err = helper
            .move_mount(1, Path::new("/.gangway-mounts/x"), Path::new("/mnt"))
            .unwrap_err();
        match err {
            Error::HelperFailed { command, .. } => {
                assert_eq!(command, "forkmount 1 /.gangway-mounts/x /mnt");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_reexec_missing_binary_is_unavailable() {
        let helper = Reexec::new("/nonexistent/gangway-helper");
        assert!(matches!(
            helper.delete_interface(1, "eth0"),
            Err(Error::HelperUnavailable { .. })
        ));
    }

    #[test]
    fn test_classify_exit() {
        assert!(classify_exit("forknetdel 1 eth0".into(), Some(0), "").is_ok());
        match classify_exit("forknetdel 1 eth0".into(), Some(3), "no netns").unwrap_err() {
            Error::HelperUnavailable { message, .. } => assert_eq!(message, "no netns"),
            other => panic!("unexpected error: {}", other),
        }
        assert!(matches!(
            classify_exit("forkumount 1 /mnt".into(), Some(1), "busy"),
            Err(Error::HelperFailed { .. })
        ));
        assert!(matches!(
            classify_exit("forkumount 1 /mnt".into(), None, ""),
            Err(Error::HelperFailed { .. })
        ));
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(exit_code(&Ok(())), 0);
        assert_eq!(
            exit_code(&Err(Error::HelperUnavailable {
                command: "setns".into(),
                message: "EPERM".into()
            })),
            EXIT_NAMESPACE_UNAVAILABLE
        );
        assert_eq!(exit_code(&Err(Error::Mount("busy".into()))), 1);
    }

    #[test]
    fn test_enter_missing_namespace_is_unavailable() {
        // PIDs are capped well below i32::MAX
        assert!(matches!(
            fork_netdel(i32::MAX, "eth0"),
            Err(Error::HelperUnavailable { .. })
        ));
    }
}
