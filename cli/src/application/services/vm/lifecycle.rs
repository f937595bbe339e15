//! VM lifecycle operations: create (or reload), delete, existence checks.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use std::fmt;

use anyhow::{Context, Result};
use cpi_common::Networks;
use serde_json::{Map, Value};

use crate::application::ports::{CloudApi, RemoteRunner, SettingsStore};
use crate::application::services::Ports;
use crate::application::services::network::normalize_for_vm;
use crate::application::services::remote::exec_checked;
use crate::application::services::vm::capabilities::{Vm, VmCapabilities};
use crate::domain::agent_env::build_agent_env;
use crate::domain::config::VmConfig;
use crate::domain::error::{CpiError, is_not_found};
use crate::domain::iscsi::set_password_script;
use crate::domain::network::{declared_dynamic_ip, declared_vlan_ids};
use crate::poll::poll_until;
use crate::domain::vm::{
    EPHEMERAL_DISK_PATH, HostActivity, Stemcell, VmCloudProperties, VmHandle, build_template,
};

/// Account the initial password is applied to.
const PRIVILEGED_USER: &str = "root";

/// Hostname suffix format, UTC with millisecond precision.
const HOSTNAME_TIMESTAMP: &str = "%Y%m%d-%H%M%S-%3f";

/// Everything `create_vm` receives from the caller.
#[derive(Debug, Clone, Default)]
pub struct CreateVmRequest {
    pub agent_id: String,
    pub stemcell_id: u64,
    pub cloud_properties: VmCloudProperties,
    pub networks: Networks,
    /// Disk locality hints; recorded in the log only.
    pub disk_ids: Vec<String>,
    pub env: Map<String, Value>,
}

/// Stages of VM creation, in order. Each stage depends on the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateState {
    Requested,
    StemcellResolved,
    Provisioned,
    Reloaded,
    NetworkNormalized,
    SettingsSynchronized,
    Ready,
}

impl fmt::Display for CreateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Requested => "requested",
            Self::StemcellResolved => "stemcell resolved",
            Self::Provisioned => "provisioned",
            Self::Reloaded => "reloaded",
            Self::NetworkNormalized => "network normalized",
            Self::SettingsSynchronized => "settings synchronized",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

fn enter(state: CreateState, vm_id: Option<u64>) {
    match vm_id {
        Some(id) => tracing::info!(vm_id = id, state = %state, "create vm"),
        None => tracing::info!(state = %state, "create vm"),
    }
}

/// Creates a VM, or reloads an existing host when the declared dynamic
/// network carries an IP.
///
/// No cloud resource is rolled back on failure.
///
/// # Errors
///
/// Returns an error wrapped with the failing stage name.
pub async fn create_vm<C, R, S>(
    ports: Ports<'_, C, R, S>,
    req: &CreateVmRequest,
) -> Result<VmHandle>
where
    C: CloudApi,
    R: RemoteRunner,
    S: SettingsStore,
{
    let config = ports.config;
    enter(CreateState::Requested, None);
    if !req.disk_ids.is_empty() {
        tracing::debug!(disk_ids = ?req.disk_ids, "disk locality hints ignored");
    }

    let stemcell = find_stemcell(ports.cloud, req.stemcell_id)
        .await
        .context("resolving stemcell")?;
    enter(CreateState::StemcellResolved, None);

    let vm = match declared_dynamic_ip(&req.networks) {
        Some(ip) => {
            let vm = reload_host(ports, ip, &stemcell)
                .await
                .context("reloading host")?;
            enter(CreateState::Reloaded, Some(vm.id));
            vm
        }
        None => {
            let vm = provision(ports, req, &stemcell)
                .await
                .context("provisioning instance")?;
            enter(CreateState::Provisioned, Some(vm.id));
            vm
        }
    };

    let size_gb = req.cloud_properties.ephemeral_disk_size;
    let (vm, ephemeral_path) = if size_gb > 0 {
        let vm = attach_ephemeral(ports.cloud, &config.vm, &vm, size_gb)
            .await
            .context("attaching ephemeral disk")?;
        (vm, EPHEMERAL_DISK_PATH)
    } else {
        (vm, "")
    };

    let networks = normalize_for_vm(ports, &vm, &req.networks)
        .await
        .context("normalizing networks")?;
    enter(CreateState::NetworkNormalized, Some(vm.id));

    let env = build_agent_env(
        &req.agent_id,
        &vm,
        &config.agent,
        networks,
        ephemeral_path,
        req.env.clone(),
    );
    ports
        .settings
        .update(&vm, &env)
        .await
        .context("synchronizing settings")?;
    enter(CreateState::SettingsSynchronized, Some(vm.id));

    if let Some(password) = &config.agent.initial_password {
        let host = vm.remote_host(&config.ssh.user);
        exec_checked(
            ports.remote,
            &host,
            "chpasswd",
            &set_password_script(PRIVILEGED_USER, password),
        )
        .await
        .context("setting initial password")?;
    }

    enter(CreateState::Ready, Some(vm.id));
    Ok(vm)
}

/// # Errors
///
/// Returns [`CpiError::NotFound`] when no image template has this id.
pub async fn find_stemcell(cloud: &impl CloudApi, id: u64) -> Result<Stemcell> {
    cloud
        .get_stemcell(id)
        .await?
        .ok_or_else(|| CpiError::NotFound(format!("stemcell '{id}'")).into())
}

async fn reload_host<C, R, S>(
    ports: Ports<'_, C, R, S>,
    ip: &str,
    stemcell: &Stemcell,
) -> Result<VmHandle>
where
    C: CloudApi,
    R: RemoteRunner,
    S: SettingsStore,
{
    if !ports.config.vm.reuse_hosts {
        return Err(CpiError::Configuration(format!(
            "dynamic network declares IP {ip} but vm.reuse_hosts is disabled"
        ))
        .into());
    }
    let vm = ports
        .cloud
        .find_vm_by_ip(ip)
        .await?
        .ok_or_else(|| CpiError::NotFound(format!("host with IP '{ip}'")))?;
    tracing::info!(vm_id = vm.id, ip, "reusing existing host");

    let before = ports.cloud.host_activity(&vm).await?;
    Vm::new(&vm).reload_os(ports.cloud, stemcell).await?;
    wait_for_transaction(ports.cloud, &ports.config.vm, &vm, before).await
}

async fn provision<C, R, S>(
    ports: Ports<'_, C, R, S>,
    req: &CreateVmRequest,
    stemcell: &Stemcell,
) -> Result<VmHandle>
where
    C: CloudApi,
    R: RemoteRunner,
    S: SettingsStore,
{
    let mut vlans = Vec::new();
    for id in declared_vlan_ids(&req.networks) {
        let vlan = ports
            .cloud
            .get_vlan(id)
            .await?
            .ok_or_else(|| CpiError::NotFound(format!("VLAN '{id}'")))?;
        vlans.push(vlan);
    }

    let timestamp = chrono::Utc::now().format(HOSTNAME_TIMESTAMP).to_string();
    let template = build_template(
        &req.cloud_properties,
        stemcell,
        &vlans,
        &timestamp,
        ports.config.vm.max_hostname_length,
    )?;
    let vm = ports.cloud.create_instance(&template).await?;
    tracing::info!(vm_id = vm.id, hostname = %template.hostname, "instance ordered");
    wait_until_ready(ports.cloud, &ports.config.vm, &vm).await
}

async fn attach_ephemeral(
    cloud: &impl CloudApi,
    config: &VmConfig,
    vm: &VmHandle,
    size_gb: u32,
) -> Result<VmHandle> {
    let before = cloud.host_activity(vm).await?;
    cloud.attach_ephemeral_disk(vm, size_gb).await?;
    tracing::info!(vm_id = vm.id, size_gb, "ephemeral disk ordered");
    wait_for_transaction(cloud, config, vm, before).await
}

/// Waits for the transaction a request queued after `before` to show up,
/// then for the host to settle. A host still idle right after the request
/// has not started the work yet.
async fn wait_for_transaction(
    cloud: &impl CloudApi,
    config: &VmConfig,
    vm: &VmHandle,
    before: HostActivity,
) -> Result<VmHandle> {
    let before = &before;
    poll_until(
        &format!("transaction on {} '{}' to start", vm.kind, vm.id),
        config.ready_timeout(),
        config.ready_interval(),
        move || async move {
            let activity = cloud.host_activity(vm).await?;
            Ok(activity.started_since(before).then_some(()))
        },
    )
    .await?;
    tracing::debug!(vm_id = vm.id, "transaction started");
    wait_until_ready(cloud, config, vm).await
}

/// Waits until `vm` has no active transaction and is powered on, then
/// returns a fresh handle (addresses and credentials settle only then).
///
/// # Errors
///
/// Returns [`CpiError::Timeout`] after `vm.ready_timeout`, or
/// [`CpiError::NotFound`] if the host disappeared.
pub async fn wait_until_ready(
    cloud: &impl CloudApi,
    config: &VmConfig,
    vm: &VmHandle,
) -> Result<VmHandle> {
    poll_until(
        &format!("{} '{}' to become ready", vm.kind, vm.id),
        config.ready_timeout(),
        config.ready_interval(),
        move || async move { Ok(cloud.host_activity(vm).await?.is_ready().then_some(())) },
    )
    .await?;
    find_vm(cloud, vm.id).await
}

/// Resolves a VM handle, failing when the host does not exist.
///
/// # Errors
///
/// Returns [`CpiError::NotFound`] for an unknown id.
pub async fn find_vm(cloud: &impl CloudApi, id: u64) -> Result<VmHandle> {
    cloud
        .find_vm(id)
        .await?
        .ok_or_else(|| CpiError::NotFound(format!("VM '{id}'")).into())
}

/// # Errors
///
/// Propagates cloud API failures other than not-found.
pub async fn has_vm(cloud: &impl CloudApi, id: u64) -> Result<bool> {
    match find_vm(cloud, id).await {
        Ok(_) => Ok(true),
        Err(err) if is_not_found(&err) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Deletes settings and cancels the VM.
///
/// # Errors
///
/// Fails when the VM does not exist, is a bare-metal server, or cancellation
/// fails. A failing settings deletion is logged and does not stop
/// cancellation.
pub async fn delete_vm<C, R, S>(ports: Ports<'_, C, R, S>, id: u64) -> Result<()>
where
    C: CloudApi,
    R: RemoteRunner,
    S: SettingsStore,
{
    let vm = find_vm(ports.cloud, id).await.context("resolving VM")?;
    Vm::new(&vm).delete(ports).await.context("deleting VM")
}
