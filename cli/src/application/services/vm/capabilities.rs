//! What each kind of host supports.
//!
//! Virtual guests support the whole lifecycle. Bare-metal servers are
//! provisioned out of band, so only reboot and metadata apply to them.

use anyhow::{Context, Result};
use cpi_common::Networks;

use crate::application::ports::{CloudApi, RemoteRunner, SettingsStore};
use crate::application::services::Ports;
use crate::application::services::{disk, network};
use crate::domain::error::{CpiError, is_not_supported};
use crate::domain::storage::DiskHandle;
use crate::domain::vm::{Stemcell, VmHandle, VmKind, VmMetadata, metadata_tags};

/// Operations whose availability depends on the kind of host.
#[allow(async_fn_in_trait)]
pub trait VmCapabilities {
    /// Attach `disk` and return its device path inside the guest.
    async fn attach_disk<C, R, S>(
        &self,
        ports: Ports<'_, C, R, S>,
        disk: &DiskHandle,
    ) -> Result<String>
    where
        C: CloudApi,
        R: RemoteRunner,
        S: SettingsStore;

    async fn detach_disk<C, R, S>(&self, ports: Ports<'_, C, R, S>, disk: &DiskHandle) -> Result<()>
    where
        C: CloudApi,
        R: RemoteRunner,
        S: SettingsStore;

    async fn configure_networks<C, R, S>(
        &self,
        ports: Ports<'_, C, R, S>,
        networks: &Networks,
    ) -> Result<()>
    where
        C: CloudApi,
        R: RemoteRunner,
        S: SettingsStore;

    async fn reboot(&self, cloud: &impl CloudApi) -> Result<()>;

    /// Reinstall `stemcell` on the host.
    async fn reload_os(&self, cloud: &impl CloudApi, stemcell: &Stemcell) -> Result<()>;

    async fn set_metadata(&self, cloud: &impl CloudApi, metadata: &VmMetadata) -> Result<()>;

    /// Remove the host's settings record and cancel it.
    async fn delete<C, R, S>(&self, ports: Ports<'_, C, R, S>) -> Result<()>
    where
        C: CloudApi,
        R: RemoteRunner,
        S: SettingsStore;
}

fn unsupported(vm: &VmHandle, operation: &str) -> anyhow::Error {
    CpiError::NotSupported(format!("{operation} on {} '{}'", vm.kind, vm.id)).into()
}

async fn set_tags(cloud: &impl CloudApi, vm: &VmHandle, metadata: &VmMetadata) -> Result<()> {
    cloud
        .set_tags(vm, &metadata_tags(metadata))
        .await
        .context("setting tags")?;
    tracing::info!(vm_id = vm.id, tags = metadata.len(), "metadata set");
    Ok(())
}

async fn reboot(cloud: &impl CloudApi, vm: &VmHandle) -> Result<()> {
    cloud.reboot(vm).await.context("rebooting")?;
    tracing::info!(vm_id = vm.id, "reboot requested");
    Ok(())
}

// ── Virtual guest ─────────────────────────────────────────────────────────────

pub struct VirtualGuest<'a>(pub &'a VmHandle);

impl VmCapabilities for VirtualGuest<'_> {
    async fn attach_disk<C, R, S>(
        &self,
        ports: Ports<'_, C, R, S>,
        disk: &DiskHandle,
    ) -> Result<String>
    where
        C: CloudApi,
        R: RemoteRunner,
        S: SettingsStore,
    {
        disk::attach_disk(ports, self.0, disk).await
    }

    async fn detach_disk<C, R, S>(&self, ports: Ports<'_, C, R, S>, disk: &DiskHandle) -> Result<()>
    where
        C: CloudApi,
        R: RemoteRunner,
        S: SettingsStore,
    {
        disk::detach_disk(ports, self.0, disk).await
    }

    async fn configure_networks<C, R, S>(
        &self,
        ports: Ports<'_, C, R, S>,
        networks: &Networks,
    ) -> Result<()>
    where
        C: CloudApi,
        R: RemoteRunner,
        S: SettingsStore,
    {
        network::configure_networks(ports, self.0, networks).await
    }

    async fn reboot(&self, cloud: &impl CloudApi) -> Result<()> {
        reboot(cloud, self.0).await
    }

    async fn reload_os(&self, cloud: &impl CloudApi, stemcell: &Stemcell) -> Result<()> {
        cloud.reload_os(self.0, stemcell).await?;
        tracing::info!(vm_id = self.0.id, stemcell_id = stemcell.id, "OS reload issued");
        Ok(())
    }

    async fn set_metadata(&self, cloud: &impl CloudApi, metadata: &VmMetadata) -> Result<()> {
        set_tags(cloud, self.0, metadata).await
    }

    async fn delete<C, R, S>(&self, ports: Ports<'_, C, R, S>) -> Result<()>
    where
        C: CloudApi,
        R: RemoteRunner,
        S: SettingsStore,
    {
        let vm = self.0;
        match ports.settings.delete(vm).await {
            Ok(()) => tracing::debug!(vm_id = vm.id, "settings deleted"),
            Err(err) if is_not_supported(&err) => {
                tracing::debug!(vm_id = vm.id, "settings store has nothing to delete");
            }
            Err(err) => {
                tracing::warn!(
                    vm_id = vm.id,
                    error = %format!("{err:#}"),
                    "deleting settings failed"
                );
            }
        }
        ports
            .cloud
            .cancel_instance(vm)
            .await
            .context("cancelling instance")?;
        tracing::info!(vm_id = vm.id, "instance cancelled");
        Ok(())
    }
}

// ── Bare-metal server ─────────────────────────────────────────────────────────

pub struct BareMetalServer<'a>(pub &'a VmHandle);

impl VmCapabilities for BareMetalServer<'_> {
    async fn attach_disk<C, R, S>(&self, _: Ports<'_, C, R, S>, _: &DiskHandle) -> Result<String>
    where
        C: CloudApi,
        R: RemoteRunner,
        S: SettingsStore,
    {
        Err(unsupported(self.0, "attaching disks"))
    }

    async fn detach_disk<C, R, S>(&self, _: Ports<'_, C, R, S>, _: &DiskHandle) -> Result<()>
    where
        C: CloudApi,
        R: RemoteRunner,
        S: SettingsStore,
    {
        Err(unsupported(self.0, "detaching disks"))
    }

    async fn configure_networks<C, R, S>(&self, _: Ports<'_, C, R, S>, _: &Networks) -> Result<()>
    where
        C: CloudApi,
        R: RemoteRunner,
        S: SettingsStore,
    {
        Err(unsupported(self.0, "configuring networks"))
    }

    async fn reboot(&self, cloud: &impl CloudApi) -> Result<()> {
        reboot(cloud, self.0).await
    }

    async fn reload_os(&self, _: &impl CloudApi, _: &Stemcell) -> Result<()> {
        Err(unsupported(self.0, "reloading the OS"))
    }

    async fn set_metadata(&self, cloud: &impl CloudApi, metadata: &VmMetadata) -> Result<()> {
        set_tags(cloud, self.0, metadata).await
    }

    async fn delete<C, R, S>(&self, _: Ports<'_, C, R, S>) -> Result<()>
    where
        C: CloudApi,
        R: RemoteRunner,
        S: SettingsStore,
    {
        Err(unsupported(self.0, "deleting"))
    }
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

/// A host viewed through the capabilities of its kind.
pub enum Vm<'a> {
    VirtualGuest(VirtualGuest<'a>),
    BareMetal(BareMetalServer<'a>),
}

impl<'a> Vm<'a> {
    #[must_use]
    pub fn new(handle: &'a VmHandle) -> Self {
        match handle.kind {
            VmKind::VirtualGuest => Self::VirtualGuest(VirtualGuest(handle)),
            VmKind::BareMetal => Self::BareMetal(BareMetalServer(handle)),
        }
    }
}

impl VmCapabilities for Vm<'_> {
    async fn attach_disk<C, R, S>(
        &self,
        ports: Ports<'_, C, R, S>,
        disk: &DiskHandle,
    ) -> Result<String>
    where
        C: CloudApi,
        R: RemoteRunner,
        S: SettingsStore,
    {
        match self {
            Self::VirtualGuest(vm) => vm.attach_disk(ports, disk).await,
            Self::BareMetal(vm) => vm.attach_disk(ports, disk).await,
        }
    }

    async fn detach_disk<C, R, S>(&self, ports: Ports<'_, C, R, S>, disk: &DiskHandle) -> Result<()>
    where
        C: CloudApi,
        R: RemoteRunner,
        S: SettingsStore,
    {
        match self {
            Self::VirtualGuest(vm) => vm.detach_disk(ports, disk).await,
            Self::BareMetal(vm) => vm.detach_disk(ports, disk).await,
        }
    }

    async fn configure_networks<C, R, S>(
        &self,
        ports: Ports<'_, C, R, S>,
        networks: &Networks,
    ) -> Result<()>
    where
        C: CloudApi,
        R: RemoteRunner,
        S: SettingsStore,
    {
        match self {
            Self::VirtualGuest(vm) => vm.configure_networks(ports, networks).await,
            Self::BareMetal(vm) => vm.configure_networks(ports, networks).await,
        }
    }

    async fn reboot(&self, cloud: &impl CloudApi) -> Result<()> {
        match self {
            Self::VirtualGuest(vm) => vm.reboot(cloud).await,
            Self::BareMetal(vm) => vm.reboot(cloud).await,
        }
    }

    async fn reload_os(&self, cloud: &impl CloudApi, stemcell: &Stemcell) -> Result<()> {
        match self {
            Self::VirtualGuest(vm) => vm.reload_os(cloud, stemcell).await,
            Self::BareMetal(vm) => vm.reload_os(cloud, stemcell).await,
        }
    }

    async fn set_metadata(&self, cloud: &impl CloudApi, metadata: &VmMetadata) -> Result<()> {
        match self {
            Self::VirtualGuest(vm) => vm.set_metadata(cloud, metadata).await,
            Self::BareMetal(vm) => vm.set_metadata(cloud, metadata).await,
        }
    }

    async fn delete<C, R, S>(&self, ports: Ports<'_, C, R, S>) -> Result<()>
    where
        C: CloudApi,
        R: RemoteRunner,
        S: SettingsStore,
    {
        match self {
            Self::VirtualGuest(vm) => vm.delete(ports).await,
            Self::BareMetal(vm) => vm.delete(ports).await,
        }
    }
}
