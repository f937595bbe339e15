//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain` and `cpi_common`, never from
//! `crate::infra` or `crate::commands`.

use anyhow::Result;
use cpi_common::AgentEnv;

use crate::domain::network::NicInventory;
use crate::domain::storage::{DiskHandle, DiskOrder, HostCredential};
use crate::domain::vm::{HostActivity, InstanceTemplate, RemoteHost, Stemcell, Vlan, VmHandle};

// ── Cloud API Port ────────────────────────────────────────────────────────────

/// Provisioning and inventory operations of the IaaS.
///
/// Lookups return `Ok(None)` when the object does not exist; every other
/// failure is an error.
#[allow(async_fn_in_trait)]
pub trait CloudApi {
    /// Resolve an image template by id.
    async fn get_stemcell(&self, id: u64) -> Result<Option<Stemcell>>;
    /// Resolve a VLAN id to its network space.
    async fn get_vlan(&self, id: u32) -> Result<Option<Vlan>>;

    /// Order a new virtual guest.
    async fn create_instance(&self, template: &InstanceTemplate) -> Result<VmHandle>;
    /// Look up a virtual guest or bare-metal server by id.
    async fn find_vm(&self, id: u64) -> Result<Option<VmHandle>>;
    /// Look up a host by its primary or backend IP.
    async fn find_vm_by_ip(&self, ip: &str) -> Result<Option<VmHandle>>;
    /// Current and most recent provisioning transactions of the host.
    async fn host_activity(&self, vm: &VmHandle) -> Result<HostActivity>;
    /// Reinstall `stemcell` on an existing host.
    async fn reload_os(&self, vm: &VmHandle, stemcell: &Stemcell) -> Result<()>;
    /// Upgrade the host with an ephemeral disk of `size_gb`.
    async fn attach_ephemeral_disk(&self, vm: &VmHandle, size_gb: u32) -> Result<()>;
    /// The host's NICs with their VLANs and subnets.
    async fn nic_inventory(&self, vm: &VmHandle) -> Result<NicInventory>;
    /// Replace the host's tags.
    async fn set_tags(&self, vm: &VmHandle, tags: &[String]) -> Result<()>;
    async fn reboot(&self, vm: &VmHandle) -> Result<()>;
    async fn cancel_instance(&self, vm: &VmHandle) -> Result<()>;

    async fn find_disk(&self, id: u64) -> Result<Option<DiskHandle>>;
    /// Order a block volume and return it once provisioned.
    async fn order_disk(&self, order: &DiskOrder) -> Result<DiskHandle>;
    async fn cancel_disk(&self, disk: &DiskHandle) -> Result<()>;

    /// The iSCSI identity issued for `vm` on `disk`, if the host is allowed.
    async fn allowed_host_credential(
        &self,
        vm: &VmHandle,
        disk: &DiskHandle,
    ) -> Result<Option<HostCredential>>;
    /// Allow `vm` to access `disk`.
    async fn authorize_host(&self, vm: &VmHandle, disk: &DiskHandle) -> Result<()>;
    /// Revoke `vm`'s access to `disk`.
    async fn deauthorize_host(&self, vm: &VmHandle, disk: &DiskHandle) -> Result<()>;
}

// ── Remote Command Runner Port ────────────────────────────────────────────────

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Shell execution and file transfer on a provisioned host.
///
/// Implementations report connection failures as
/// [`crate::domain::CpiError::TransientRemote`]; a command that ran and
/// exited non-zero is an `Ok` output.
#[allow(async_fn_in_trait)]
pub trait RemoteRunner {
    /// Run `script` with the host's shell and capture its output.
    async fn exec(&self, host: &RemoteHost, script: &str) -> Result<CommandOutput>;
    /// Write `contents` to `path`, creating parent directories.
    async fn upload(&self, host: &RemoteHost, path: &str, contents: &[u8]) -> Result<()>;
    /// Read the file at `path`.
    async fn download(&self, host: &RemoteHost, path: &str) -> Result<Vec<u8>>;
}

// ── Settings Store Port ───────────────────────────────────────────────────────

/// Persistence of a VM's [`AgentEnv`].
#[allow(async_fn_in_trait)]
pub trait SettingsStore {
    /// Read the current settings; a missing record is
    /// [`crate::domain::CpiError::NotFound`].
    async fn fetch(&self, vm: &VmHandle) -> Result<AgentEnv>;
    /// Replace the stored settings.
    async fn update(&self, vm: &VmHandle, env: &AgentEnv) -> Result<()>;
    /// Remove the stored settings; backends without deletion return
    /// [`crate::domain::CpiError::NotSupported`].
    async fn delete(&self, vm: &VmHandle) -> Result<()>;
}
