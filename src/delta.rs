//! Live device reconciliation
//!
//! Moves a running container from its previous device set to the next one
//! and persists the new set in the same transaction.
//!
//! Only the first disk change of a call is applied: after removing or
//! adding a disk the applier stops and reports where it stopped.

use crate::container::ContainerHandle;
use crate::device::translate::is_block_device;
use crate::device::{validate_device_set_with, Device, DeviceSet};
use crate::error::{BestEffort, Error, Result};
use crate::helper::PrivilegedHelper;
use crate::mount::MountManager;
use crate::network::{LinkOps, NicManager};
use crate::store::{self, OwnerKind};
use rusqlite::{Connection, Transaction};
use std::path::PathBuf;

// Kept apart from the crate `Result` alias, which the expansion would pick up
mod machine {
    use state_machines::state_machine;

    state_machine! {
        name: DeltaMachine,
        dynamic: true,
        initial: Pending,
        states: [Pending, Detaching, Attaching, Settled, Failed],
        events {
            detach {
                transition: { from: Pending, to: Detaching }
            }
            attach {
                transition: { from: [Pending, Detaching], to: Attaching }
            }
            settle {
                transition: { from: [Pending, Detaching, Attaching], to: Settled }
            }
            fail {
                transition: { from: [Detaching, Attaching], to: Failed }
            }
        }
    }
}

use machine::*;

/// What a delta run did
#[derive(Debug, Default)]
pub struct DeltaReport {
    /// Devices removed from the container
    pub detached: Vec<String>,
    /// Devices added to the container
    pub attached: Vec<String>,
    /// Failures that did not abort the run
    pub warnings: Vec<BestEffort>,
    /// Disk device after which the run stopped
    pub stopped_early: Option<String>,
    /// Final state of the run
    pub state: String,
}

impl DeltaReport {
    fn warn(&mut self, outcome: BestEffort) {
        if outcome.failed() {
            self.warnings.push(outcome);
        }
    }

    /// What happened to the changes left after an early stop
    ///
    /// The whole next set is stored even when the run stops early, so a
    /// later apply sees nothing left to do. The skipped devices show up
    /// once the container restarts.
    pub fn stop_notice(&self) -> Option<String> {
        self.stopped_early.as_ref().map(|name| {
            format!(
                "stopped after disk '{}'; remaining changes are stored and take effect when the container restarts",
                name
            )
        })
    }
}

/// One delta run: the state machine plus what it has done so far
struct DeltaRun {
    machine: DynamicDeltaMachine<()>,
    report: DeltaReport,
}

impl DeltaRun {
    fn new() -> Self {
        Self {
            machine: DeltaMachine::new(()).into_dynamic(),
            report: DeltaReport::default(),
        }
    }

    fn step(&mut self, event: DeltaMachineEvent, label: &str) -> Result<()> {
        let from = self.machine.current_state().to_string();
        self.machine
            .handle(event)
            .map_err(|_| Error::DeltaTransition(format!("cannot {} from {}", label, from)))?;
        tracing::trace!(from = %from, to = %self.machine.current_state(), "delta transition");
        Ok(())
    }

    /// Move to Failed and hand back the error
    fn abort(&mut self, err: Error) -> Error {
        if self.machine.handle(DeltaMachineEvent::Fail).is_err() {
            tracing::debug!(state = %self.machine.current_state(), "delta failed outside a working state");
        }
        err
    }

    fn settle(mut self, stopped_early: Option<String>) -> Result<DeltaReport> {
        self.step(DeltaMachineEvent::Settle, "settle")?;
        self.report.stopped_early = stopped_early;
        self.report.state = self.machine.current_state().to_string();
        Ok(self.report)
    }
}

/// Applies device deltas to running containers
pub struct DeltaApplier<'a> {
    nics: NicManager<'a>,
    mounts: MountManager<'a>,
    is_block: fn(&str) -> bool,
}

impl<'a> DeltaApplier<'a> {
    pub fn new(
        links: &'a dyn LinkOps,
        helper: &'a dyn PrivilegedHelper,
        shmounts: impl Into<PathBuf>,
    ) -> Self {
        Self {
            nics: NicManager::new(links, helper),
            mounts: MountManager::new(helper, shmounts),
            is_block: is_block_device,
        }
    }

    /// Replace the host block device check used by the privilege guard
    #[cfg(test)]
    pub fn with_block_check(mut self, is_block: fn(&str) -> bool) -> Self {
        self.is_block = is_block;
        self
    }

    /// Apply the difference between `prev` and `next` to a running container
    ///
    /// Removals come first, then additions, each in device name order.
    pub fn apply(
        &self,
        tx: &Transaction<'_>,
        container: &dyn ContainerHandle,
        prev: &DeviceSet,
        next: &DeviceSet,
    ) -> Result<DeltaReport> {
        let pid = container
            .init_pid()
            .ok_or_else(|| Error::ContainerNotRunning(container.name().to_string()))?;

        let (removed, added) = prev.update(next);
        let mut run = DeltaRun::new();

        if !removed.is_empty() {
            run.step(DeltaMachineEvent::Detach, "detach")?;
        }

        for (name, device) in &removed {
            match self.remove(container, name, device, &mut run.report) {
                Ok(()) => run.report.detached.push(name.clone()),
                Err(e) => return Err(run.abort(e.for_device("removing", name, container.name()))),
            }

            if matches!(device, Device::Disk(_)) {
                tracing::debug!(device = %name, "stopping after disk removal");
                return run.settle(Some(name.clone()));
            }
        }

        if !added.is_empty() {
            run.step(DeltaMachineEvent::Attach, "attach")?;
        }

        for (name, device) in &added {
            match self.add(tx, container, pid, name, device, &mut run.report) {
                Ok(()) => run.report.attached.push(name.clone()),
                Err(e) => return Err(run.abort(e.for_device("adding", name, container.name()))),
            }

            if matches!(device, Device::Disk(_)) {
                tracing::debug!(device = %name, "stopping after disk addition");
                return run.settle(Some(name.clone()));
            }
        }

        run.settle(None)
    }

    fn remove(
        &self,
        container: &dyn ContainerHandle,
        name: &str,
        device: &Device,
        report: &mut DeltaReport,
    ) -> Result<()> {
        match device {
            Device::Nic(nic) => {
                if nic.name.is_empty() {
                    return Err(Error::MissingDeviceField {
                        device: name.to_string(),
                        field: "name".to_string(),
                    });
                }
                report.warn(self.nics.detach_nic(container, &nic.name)?);
                Ok(())
            }
            Device::Disk(disk) => self.mounts.detach_mount(container, disk),
            _ => Ok(()),
        }
    }

    fn add(
        &self,
        tx: &Transaction<'_>,
        container: &dyn ContainerHandle,
        pid: i32,
        name: &str,
        device: &Device,
        report: &mut DeltaReport,
    ) -> Result<()> {
        match device {
            Device::Nic(nic) => {
                let attached = self.nics.attach_nic(container, nic, &mut report.warnings)?;
                tracing::debug!(
                    device = %name,
                    interface = %attached.name,
                    assigned = attached.assigned,
                    "nic ready to move"
                );

                if let Err(e) = self
                    .nics
                    .links()
                    .move_to_netns(&attached.peer, pid, &attached.name)
                {
                    report.warn(self.nics.remove_interface(&attached.peer));
                    return Err(e);
                }

                report.warn(BestEffort::record(
                    format!("record interface name {} for {}", attached.name, name),
                    store::record_nic_name(tx, container.id(), name, &attached.name),
                ));
                Ok(())
            }
            Device::Disk(disk) => {
                for (field, value) in [("source", &disk.source), ("path", &disk.path)] {
                    if value.is_empty() {
                        return Err(Error::MissingDeviceField {
                            device: name.to_string(),
                            field: field.to_string(),
                        });
                    }
                }
                let outcome = self.mounts.attach_mount(container, disk)?;
                report.warn(outcome);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Replace a container's devices, applying the change live when it runs
///
/// Unnamed nics keep the interface name recorded when they were attached.
/// Nothing is persisted unless every step succeeds.
pub fn update_devices(
    conn: &mut Connection,
    container: &dyn ContainerHandle,
    next: &DeviceSet,
    applier: &DeltaApplier<'_>,
) -> Result<DeltaReport> {
    validate_device_set_with(container, next, applier.is_block)?;

    let tx = conn.transaction()?;
    let prev = store::load_devices(&tx, OwnerKind::Container, container.id())?;
    let next = next.with_recorded_names(&prev);
    store::replace_devices(&tx, OwnerKind::Container, container.id(), &next)?;

    let report = if container.init_pid().is_some() {
        applier.apply(&tx, container, &prev, &next)?
    } else {
        DeltaReport::default()
    };

    tx.commit()?;
    tracing::info!(
        container = %container.name(),
        detached = report.detached.len(),
        attached = report.attached.len(),
        warnings = report.warnings.len(),
        "devices updated"
    );
    Ok(report)
}
