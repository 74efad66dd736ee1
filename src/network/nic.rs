//! Live nic attach/detach for running containers

use crate::container::ContainerHandle;
use crate::device::{Nic, NicType};
use crate::error::{BestEffort, Error, Result};
use crate::helper::PrivilegedHelper;
use crate::network::veth::{LinkOps, VethPair};

/// Interface name used when nothing better is known
const FIRST_INTERFACE: &str = "eth0";

/// A bridged veth pair whose peer still sits in the host namespace
#[derive(Debug, Clone)]
pub struct AttachedNic {
    /// Host-side name of the end to move into the container
    pub peer: String,
    /// Name the interface gets inside the container
    pub name: String,
    /// Whether `name` was picked here rather than configured
    pub assigned: bool,
}

/// Nic manager working through injected link and helper capabilities
pub struct NicManager<'a> {
    links: &'a dyn LinkOps,
    helper: &'a dyn PrivilegedHelper,
}

impl<'a> NicManager<'a> {
    pub fn new(links: &'a dyn LinkOps, helper: &'a dyn PrivilegedHelper) -> Self {
        Self { links, helper }
    }

    pub fn links(&self) -> &'a dyn LinkOps {
        self.links
    }

    /// First `ethN` not present in the container
    pub fn next_unused_interface_name(&self, container: &dyn ContainerHandle) -> String {
        let existing = match container.interfaces() {
            Ok(list) if !list.is_empty() => list,
            _ => return FIRST_INTERFACE.to_string(),
        };

        (0..)
            .map(|i| format!("eth{}", i))
            .find(|name| !existing.contains(name))
            .unwrap_or_else(|| FIRST_INTERFACE.to_string())
    }

    /// Create a veth pair for a bridged nic and join its host end to the bridge
    ///
    /// On success the peer is left in the host namespace for the caller to
    /// move. On failure the pair is removed; a failed removal is pushed onto
    /// `warnings`.
    pub fn attach_nic(
        &self,
        container: &dyn ContainerHandle,
        nic: &Nic,
        warnings: &mut Vec<BestEffort>,
    ) -> Result<AttachedNic> {
        if nic.nictype != NicType::Bridged {
            return Err(Error::Network(format!(
                "Unsupported nic type: {:?}",
                nic.nictype.as_str()
            )));
        }
        if nic.parent.is_empty() {
            return Err(Error::Network("No bridge given".to_string()));
        }

        let (name, assigned) = if nic.name.is_empty() {
            (self.next_unused_interface_name(container), true)
        } else {
            (nic.name.clone(), false)
        };

        let pair = VethPair::create(self.links)?;

        if let Err(e) = self.join_bridge(&pair, nic) {
            // Deleting the peer takes the host end with it
            let cleanup = self.remove_interface(pair.peer());
            if cleanup.failed() {
                warnings.push(cleanup);
            }
            return Err(e);
        }

        tracing::info!(
            container = %container.name(),
            bridge = %nic.parent,
            host = %pair.host_side(),
            peer = %pair.peer(),
            name = %name,
            "attached veth pair to bridge"
        );

        Ok(AttachedNic {
            peer: pair.peer().to_string(),
            name,
            assigned,
        })
    }

    fn join_bridge(&self, pair: &VethPair, nic: &Nic) -> Result<()> {
        self.links.add_to_bridge(&nic.parent, pair.host_side())?;
        self.links.set_up(pair.host_side())?;

        // Must happen before the peer leaves the host namespace
        if !nic.hwaddr.is_empty() {
            self.links.set_hwaddr(pair.peer(), &nic.hwaddr)?;
        }
        if !nic.mtu.is_empty() {
            self.links.set_mtu(pair.host_side(), &nic.mtu)?;
            self.links.set_mtu(pair.peer(), &nic.mtu)?;
        }

        Ok(())
    }

    /// Delete an interface from inside the container's network namespace
    ///
    /// Returns `Err` when the helper ran and failed. When the namespace
    /// cannot be entered at all the failure is returned as a failed
    /// `BestEffort` so device removal can go on.
    pub fn detach_nic(&self, container: &dyn ContainerHandle, name: &str) -> Result<BestEffort> {
        let operation = format!("detach nic {} from {}", name, container.name());

        let Some(pid) = container.init_pid() else {
            return Ok(BestEffort::ok(operation));
        };

        match self.helper.delete_interface(pid, name) {
            Ok(()) => {
                tracing::info!(container = %container.name(), nic = %name, "detached nic");
                Ok(BestEffort::ok(operation))
            }
            Err(e @ Error::HelperUnavailable { .. }) => Ok(BestEffort::record(operation, Err(e))),
            Err(e) => Err(e),
        }
    }

    /// Delete a host interface, ignoring failure
    pub fn remove_interface(&self, name: &str) -> BestEffort {
        BestEffort::record(
            format!("remove interface {}", name),
            self.links.delete_link(name),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeContainer, FakeHelper, FakeLinks, HelperCall, HelperMode};

    fn bridged(parent: &str) -> Nic {
        Nic {
            parent: parent.to_string(),
            nictype: NicType::Bridged,
            ..Default::default()
        }
    }

    #[test]
    fn test_next_unused_after_existing() {
        let links = FakeLinks::new();
        let helper = FakeHelper::new();
        let nics = NicManager::new(&links, &helper);

        let container = FakeContainer::running("web", 42).with_interfaces(&["lo", "eth0", "eth1"]);
        assert_eq!(nics.next_unused_interface_name(&container), "eth2");

        let gap = FakeContainer::running("web", 42).with_interfaces(&["eth1"]);
        assert_eq!(nics.next_unused_interface_name(&gap), "eth0");
    }

    #[test]
    fn test_next_unused_empty_or_error() {
        let links = FakeLinks::new();
        let helper = FakeHelper::new();
        let nics = NicManager::new(&links, &helper);

        let empty = FakeContainer::running("web", 42).with_interfaces(&[]);
        assert_eq!(nics.next_unused_interface_name(&empty), "eth0");

        let broken = FakeContainer::running("web", 42).with_interface_error();
        assert_eq!(nics.next_unused_interface_name(&broken), "eth0");
    }

    #[test]
    fn test_attach_assigns_name_and_joins_bridge() {
        let links = FakeLinks::new().with_bridge("br0");
        let helper = FakeHelper::new();
        let nics = NicManager::new(&links, &helper);
        let container = FakeContainer::running("web", 42).with_interfaces(&["lo", "eth0"]);

        let attached = nics.attach_nic(&container, &bridged("br0"), &mut Vec::new()).unwrap();
        assert_eq!(attached.name, "eth1");
        assert!(attached.assigned);
        assert!(links.exists(&attached.peer));
        assert_eq!(links.bridge_members("br0").len(), 1);
    }

    #[test]
    fn test_attach_keeps_configured_name() {
        let links = FakeLinks::new().with_bridge("br0");
        let helper = FakeHelper::new();
        let nics = NicManager::new(&links, &helper);
        let container = FakeContainer::running("web", 42);

        let mut nic = bridged("br0");
        nic.name = "lan0".to_string();
        let attached = nics.attach_nic(&container, &nic, &mut Vec::new()).unwrap();
        assert_eq!(attached.name, "lan0");
        assert!(!attached.assigned);
    }

    #[test]
    fn test_attach_bridge_failure_leaves_nothing() {
        let links = FakeLinks::new();
        let helper = FakeHelper::new();
        let nics = NicManager::new(&links, &helper);
        let container = FakeContainer::running("web", 42);

        let before = links.host_links();
        let mut warnings = Vec::new();
        let err = nics
            .attach_nic(&container, &bridged("br-missing"), &mut warnings)
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)));
        assert_eq!(links.host_links(), before);
        assert!(links.host_links().is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_attach_cleanup_failure_reported() {
        let links = FakeLinks::new().with_delete_failure();
        let helper = FakeHelper::new();
        let nics = NicManager::new(&links, &helper);
        let container = FakeContainer::running("web", 42);

        let mut warnings = Vec::new();
        assert!(nics
            .attach_nic(&container, &bridged("br-missing"), &mut warnings)
            .is_err());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].operation().starts_with("remove interface gwy"));
        assert_eq!(links.host_links().len(), 2);
    }

    #[test]
    fn test_attach_requires_bridged_with_parent() {
        let links = FakeLinks::new().with_bridge("br0");
        let helper = FakeHelper::new();
        let nics = NicManager::new(&links, &helper);
        let container = FakeContainer::running("web", 42);

        let plain = Nic {
            parent: "br0".to_string(),
            ..Default::default()
        };
        assert!(nics.attach_nic(&container, &plain, &mut Vec::new()).is_err());
        assert!(nics.attach_nic(&container, &bridged(""), &mut Vec::new()).is_err());
        assert!(links.host_links().is_empty());
    }

    #[test]
    fn test_detach_invokes_helper() {
        let links = FakeLinks::new();
        let helper = FakeHelper::new();
        let nics = NicManager::new(&links, &helper);
        let container = FakeContainer::running("web", 42);

        let outcome = nics.detach_nic(&container, "eth0").unwrap();
        assert!(!outcome.failed());
        assert_eq!(
            helper.calls(),
            vec![HelperCall::DeleteInterface(42, "eth0".to_string())]
        );
    }

    #[test]
    fn test_detach_unavailable_namespace_is_warning() {
        let links = FakeLinks::new();
        let helper = FakeHelper::new().with_mode(HelperMode::Unavailable);
        let nics = NicManager::new(&links, &helper);
        let container = FakeContainer::running("web", 42);

        let outcome = nics.detach_nic(&container, "eth0").unwrap();
        assert!(outcome.failed());
        assert!(matches!(
            outcome.error(),
            Some(Error::HelperUnavailable { .. })
        ));
    }

    #[test]
    fn test_detach_helper_failure_is_error() {
        let links = FakeLinks::new();
        let helper = FakeHelper::new().with_mode(HelperMode::Fail);
        let nics = NicManager::new(&links, &helper);
        let container = FakeContainer::running("web", 42);

        assert!(matches!(
            nics.detach_nic(&container, "eth0"),
            Err(Error::HelperFailed { .. })
        ));
    }

    #[test]
    fn test_remove_interface_swallows_failure() {
        let links = FakeLinks::new();
        let helper = FakeHelper::new();
        let nics = NicManager::new(&links, &helper);

        let outcome = nics.remove_interface("gwydeadbeef");
        assert!(outcome.failed());
    }
}
