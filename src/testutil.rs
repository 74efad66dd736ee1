//! Fakes for the injected host capabilities

use crate::container::ContainerHandle;
use crate::device::ConfigLine;
use crate::error::{Error, Result};
use crate::helper::PrivilegedHelper;
use crate::network::LinkOps;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub struct FakeContainer {
    name: String,
    id: i64,
    pid: Option<i32>,
    privileged: bool,
    interfaces: Option<Vec<String>>,
    config: RefCell<Vec<ConfigLine>>,
}

impl FakeContainer {
    pub fn stopped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            id: 1,
            pid: None,
            privileged: false,
            interfaces: Some(Vec::new()),
            config: RefCell::new(Vec::new()),
        }
    }

    pub fn running(name: &str, pid: i32) -> Self {
        Self {
            pid: Some(pid),
            ..Self::stopped(name)
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn with_interfaces(mut self, names: &[&str]) -> Self {
        self.interfaces = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn with_interface_error(mut self) -> Self {
        self.interfaces = None;
        self
    }

    pub fn config_items(&self) -> Vec<ConfigLine> {
        self.config.borrow().clone()
    }
}

impl ContainerHandle for FakeContainer {
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
        self.interfaces
            .clone()
            .ok_or_else(|| Error::Network("cannot list interfaces".into()))
    }

    fn set_config_item(&self, key: &str, value: &str) -> Result<()> {
        self.config.borrow_mut().push(ConfigLine::new(key, value));
        Ok(())
    }
}

/// Host link layer where veth ends know their peer
#[derive(Default)]
pub struct FakeLinks {
    links: RefCell<BTreeMap<String, Option<String>>>,
    bridges: RefCell<BTreeMap<String, Vec<String>>>,
    moved: RefCell<Vec<(String, i32, String)>>,
    fail_move: bool,
    fail_delete: bool,
}

impl FakeLinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bridge(self, name: &str) -> Self {
        self.bridges.borrow_mut().insert(name.to_string(), Vec::new());
        self
    }

    pub fn with_move_failure(mut self) -> Self {
        self.fail_move = true;
        self
    }

    pub fn with_delete_failure(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    pub fn exists(&self, iface: &str) -> bool {
        self.links.borrow().contains_key(iface)
    }

    pub fn host_links(&self) -> BTreeSet<String> {
        self.links.borrow().keys().cloned().collect()
    }

    pub fn bridge_members(&self, bridge: &str) -> Vec<String> {
        self.bridges.borrow().get(bridge).cloned().unwrap_or_default()
    }

    /// Interfaces moved into containers as (host name, pid, new name)
    pub fn moved(&self) -> Vec<(String, i32, String)> {
        self.moved.borrow().clone()
    }

    fn require(&self, iface: &str) -> Result<()> {
        if self.exists(iface) {
            Ok(())
        } else {
            Err(Error::Network(format!("Cannot find device \"{}\"", iface)))
        }
    }
}

impl LinkOps for FakeLinks {
    fn create_veth(&self, host: &str, peer: &str) -> Result<()> {
        let mut links = self.links.borrow_mut();
        if links.contains_key(host) || links.contains_key(peer) {
            return Err(Error::Network("File exists".into()));
        }
        links.insert(host.to_string(), Some(peer.to_string()));
        links.insert(peer.to_string(), Some(host.to_string()));
        Ok(())
    }

    fn set_up(&self, iface: &str) -> Result<()> {
        self.require(iface)
    }

    fn add_to_bridge(&self, bridge: &str, iface: &str) -> Result<()> {
        self.require(iface)?;
        let mut bridges = self.bridges.borrow_mut();
        let members = bridges
            .get_mut(bridge)
            .ok_or_else(|| Error::Network(format!("Cannot find device \"{}\"", bridge)))?;
        members.push(iface.to_string());
        Ok(())
    }

    fn set_hwaddr(&self, iface: &str, _hwaddr: &str) -> Result<()> {
        self.require(iface)
    }

    fn set_mtu(&self, iface: &str, _mtu: &str) -> Result<()> {
        self.require(iface)
    }

    fn move_to_netns(&self, iface: &str, pid: i32, name: &str) -> Result<()> {
        self.require(iface)?;
        if self.fail_move {
            return Err(Error::Network("Invalid \"netns\" value".into()));
        }
        let mut links = self.links.borrow_mut();
        links.remove(iface);
        for peer in links.values_mut() {
            if peer.as_deref() == Some(iface) {
                *peer = None;
            }
        }
        self.moved
            .borrow_mut()
            .push((iface.to_string(), pid, name.to_string()));
        Ok(())
    }

    fn delete_link(&self, iface: &str) -> Result<()> {
        self.require(iface)?;
        if self.fail_delete {
            return Err(Error::Network("Operation not permitted".into()));
        }
        let mut links = self.links.borrow_mut();
        let mut gone = vec![iface.to_string()];
        if let Some(Some(peer)) = links.remove(iface) {
            links.remove(&peer);
            gone.push(peer);
        }
        for members in self.bridges.borrow_mut().values_mut() {
            members.retain(|m| !gone.contains(m));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelperCall {
    MoveMount(i32, PathBuf, PathBuf),
    Unmount(i32, PathBuf),
    DeleteInterface(i32, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HelperMode {
    #[default]
    Succeed,
    Unavailable,
    Fail,
}

/// Privileged helper that records calls instead of spawning processes
#[derive(Default)]
pub struct FakeHelper {
    mode: HelperMode,
    calls: RefCell<Vec<HelperCall>>,
}

impl FakeHelper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: HelperMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn calls(&self) -> Vec<HelperCall> {
        self.calls.borrow().clone()
    }

    fn respond(&self, call: HelperCall) -> Result<()> {
        let command = format!("{:?}", call);
        self.calls.borrow_mut().push(call);
        match self.mode {
            HelperMode::Succeed => Ok(()),
            HelperMode::Unavailable => Err(Error::HelperUnavailable {
                command,
                message: "setns: Operation not permitted".into(),
            }),
            HelperMode::Fail => Err(Error::HelperFailed {
                command,
                message: "exit status 1".into(),
            }),
        }
    }
}

impl PrivilegedHelper for FakeHelper {
    fn move_mount(&self, pid: i32, source: &Path, target: &Path) -> Result<()> {
        self.respond(HelperCall::MoveMount(
            pid,
            source.to_path_buf(),
            target.to_path_buf(),
        ))
    }

    fn unmount(&self, pid: i32, target: &Path) -> Result<()> {
        self.respond(HelperCall::Unmount(pid, target.to_path_buf()))
    }

    fn delete_interface(&self, pid: i32, name: &str) -> Result<()> {
        self.respond(HelperCall::DeleteInterface(pid, name.to_string()))
    }
}
