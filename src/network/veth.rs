//! Veth pair management for container nics
//!
//! A veth pair connects a container to a host bridge. One end stays on the
//! host and joins the bridge, the other is moved into the container's
//! network namespace. Deleting either end destroys both.

use crate::error::{Error, Result};
use std::process::Command;

/// Prefix of ephemeral host-side interface names
pub const TEMP_NIC_PREFIX: &str = "gwy";

/// Host link operations
pub trait LinkOps {
    /// Create a veth pair `host` <-> `peer`
    fn create_veth(&self, host: &str, peer: &str) -> Result<()>;

    fn set_up(&self, iface: &str) -> Result<()>;

    fn add_to_bridge(&self, bridge: &str, iface: &str) -> Result<()>;

    fn set_hwaddr(&self, iface: &str, hwaddr: &str) -> Result<()>;

    fn set_mtu(&self, iface: &str, mtu: &str) -> Result<()>;

    /// Move `iface` into the network namespace of `pid`, renaming it to `name`
    fn move_to_netns(&self, iface: &str, pid: i32, name: &str) -> Result<()>;

    fn delete_link(&self, iface: &str) -> Result<()>;
}

/// Link operations through ip(8)
#[derive(Debug, Clone, Copy, Default)]
pub struct IpCommand;

impl IpCommand {
    fn run(&self, args: &[&str]) -> Result<()> {
        let output = Command::new("ip")
            .args(args)
            .output()
            .map_err(|e| Error::Network(format!("Failed to run ip {}: {}", args.join(" "), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Network(format!(
                "ip {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(())
    }
}

impl LinkOps for IpCommand {
    fn create_veth(&self, host: &str, peer: &str) -> Result<()> {
        self.run(&["link", "add", host, "type", "veth", "peer", "name", peer])
    }

    fn set_up(&self, iface: &str) -> Result<()> {
        self.run(&["link", "set", "dev", iface, "up"])
    }

    fn add_to_bridge(&self, bridge: &str, iface: &str) -> Result<()> {
        self.run(&["link", "set", "dev", iface, "master", bridge])
    }

    fn set_hwaddr(&self, iface: &str, hwaddr: &str) -> Result<()> {
        self.run(&["link", "set", "dev", iface, "address", hwaddr])
    }

    fn set_mtu(&self, iface: &str, mtu: &str) -> Result<()> {
        self.run(&["link", "set", "dev", iface, "mtu", mtu])
    }

    fn move_to_netns(&self, iface: &str, pid: i32, name: &str) -> Result<()> {
        let pid = pid.to_string();
        self.run(&["link", "set", "dev", iface, "netns", &pid, "name", name])
    }

    fn delete_link(&self, iface: &str) -> Result<()> {
        self.run(&["link", "del", iface])
    }
}

/// Generate a random ephemeral interface name
///
/// Fits in IFNAMSIZ (15 chars); randomness avoids a host-wide naming lock.
pub fn generate_temp_name() -> String {
    let bytes: [u8; 4] = rand::random();
    format!("{}{}", TEMP_NIC_PREFIX, hex::encode(bytes))
}

/// A freshly created veth pair with ephemeral names
#[derive(Debug, Clone)]
pub struct VethPair {
    /// End that joins the host bridge
    host_side: String,
    /// End that is moved into the container
    peer: String,
}

impl VethPair {
    pub fn create(links: &dyn LinkOps) -> Result<Self> {
        let host_side = generate_temp_name();
        let peer = generate_temp_name();

        links.create_veth(&host_side, &peer)?;
        tracing::debug!(host = %host_side, peer = %peer, "created veth pair");

        Ok(Self { host_side, peer })
    }

    pub fn host_side(&self) -> &str {
        &self.host_side
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}
