//! Live container handles
//!
//! Provides:
//! - The `ContainerHandle` seam used by the nic, mount and delta code
//! - A host-backed container reading its interfaces from procfs
//! - The container's static runtime config file

use crate::device::ConfigLine;
use crate::error::{Error, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// What the device code needs to know about a container
pub trait ContainerHandle {
    fn name(&self) -> &str;

    /// Database id of the container row
    fn id(&self) -> i64;

    /// PID of the container's init process, `None` when stopped
    fn init_pid(&self) -> Option<i32>;

    fn is_privileged(&self) -> bool;

    /// Interfaces currently present in the container's network namespace
    fn interfaces(&self) -> Result<Vec<String>>;

    /// Append an item to the static config, applied on next start
    fn set_config_item(&self, key: &str, value: &str) -> Result<()>;
}

/// A container on this host
#[derive(Debug, Clone)]
pub struct Container {
    id: i64,
    name: String,
    pid: Option<i32>,
    privileged: bool,
    config: RuntimeConfig,
}

impl Container {
    pub fn new(id: i64, name: impl Into<String>, config: RuntimeConfig) -> Self {
        Self {
            id,
            name: name.into(),
            pid: None,
            privileged: false,
            config,
        }
    }

    /// Mark the container as running with the given init PID
    pub fn with_pid(mut self, pid: Option<i32>) -> Self {
        self.pid = pid;
        self
    }

    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl ContainerHandle for Container {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn init_pid(&self) -> Option<i32> {
        self.pid
    }

    fn is_privileged(&self) -> bool {
        self.privileged
    }

    fn interfaces(&self) -> Result<Vec<String>> {
        let pid = self
            .pid
            .ok_or_else(|| Error::ContainerNotRunning(self.name.clone()))?;
        // procfs shows the network namespace of the process it describes
        let content = fs::read_to_string(format!("/proc/{}/net/dev", pid))?;
        Ok(parse_net_dev(&content))
    }

    fn set_config_item(&self, key: &str, value: &str) -> Result<()> {
        self.config.append(&ConfigLine::new(key, value))
    }
}

/// Extract interface names from `/proc/<pid>/net/dev`
fn parse_net_dev(content: &str) -> Vec<String> {
    content
        .lines()
        .skip(2)
        .filter_map(|line| line.split_once(':'))
        .map(|(name, _)| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Static runtime config file of a container (`key = value` per line)
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    path: PathBuf,
}

impl RuntimeConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a single line, creating the file if needed
    pub fn append(&self, line: &ConfigLine) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Replace the whole file with the given lines
    pub fn write(&self, lines: &[ConfigLine]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content: String = lines.iter().map(|l| format!("{}\n", l)).collect();
        fs::write(&self.path, content)?;
        Ok(())
    }

    /// Read back all items; a missing file has none
    pub fn items(&self) -> Result<Vec<ConfigLine>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| l.split_once('='))
            .map(|(k, v)| ConfigLine::new(k.trim(), v.trim()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:    1296      16    0    0    0     0          0         0     1296      16    0    0    0     0       0          0
  eth0: 1825713    1409    0    0    0     0          0         0    94310    1093    0    0    0     0       0          0
  eth1:       0       0    0    0    0     0          0         0        0       0    0    0    0     0       0          0
";

    #[test]
    fn test_parse_net_dev() {
        assert_eq!(parse_net_dev(NET_DEV), vec!["lo", "eth0", "eth1"]);
        assert!(parse_net_dev("").is_empty());
    }

    #[test]
    fn test_runtime_config_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::new(dir.path().join("web").join("config"));
        assert!(config.items().unwrap().is_empty());

        config
            .append(&ConfigLine::new("lxc.mount.entry", "/srv data none bind,create=dir 0 0"))
            .unwrap();
        config
            .append(&ConfigLine::new("lxc.network.type", "veth"))
            .unwrap();

        let items = config.items().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key, "lxc.mount.entry");
        assert_eq!(items[0].value, "/srv data none bind,create=dir 0 0");
    }

    #[test]
    fn test_runtime_config_write_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::new(dir.path().join("config"));
        config.append(&ConfigLine::new("lxc.network.type", "veth")).unwrap();
        config
            .write(&[ConfigLine::new("lxc.network.link", "br0")])
            .unwrap();
        assert_eq!(
            config.items().unwrap(),
            vec![ConfigLine::new("lxc.network.link", "br0")]
        );
    }

    #[test]
    fn test_stopped_container_has_no_interfaces() {
        let dir = tempfile::tempdir().unwrap();
        let container = Container::new(1, "web", RuntimeConfig::new(dir.path().join("config")));
        assert!(matches!(
            container.interfaces(),
            Err(Error::ContainerNotRunning(_))
        ));
    }

    #[test]
    fn test_own_process_interfaces() {
        let dir = tempfile::tempdir().unwrap();
        let container = Container::new(1, "self", RuntimeConfig::new(dir.path().join("config")))
            .with_pid(Some(std::process::id() as i32));
        if let Ok(interfaces) = container.interfaces() {
            assert!(interfaces.iter().all(|i| !i.contains(':')));
        }
    }
}
