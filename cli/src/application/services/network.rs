//! Network reconfiguration of an existing VM.

use anyhow::{Context, Result};
use cpi_common::Networks;

use crate::application::ports::{CloudApi, RemoteRunner, SettingsStore};
use crate::application::services::Ports;
use crate::domain::error::CpiError;
use crate::domain::network::normalize;
use crate::domain::vm::VmHandle;

/// Normalizes `declared` against `vm`'s NICs.
///
/// # Errors
///
/// Fails when the NIC inventory cannot be read or the networks cannot be
/// bound ([`CpiError::Configuration`]).
pub async fn normalize_for_vm<C, R, S>(
    ports: Ports<'_, C, R, S>,
    vm: &VmHandle,
    declared: &Networks,
) -> Result<Networks>
where
    C: CloudApi,
    R: RemoteRunner,
    S: SettingsStore,
{
    let nics = ports
        .cloud
        .nic_inventory(vm)
        .await
        .context("reading NIC inventory")?;
    let networks = normalize(declared, &nics, &ports.config.network.interface_prefix)
        .map_err(CpiError::from)?;
    tracing::debug!(vm_id = vm.id, networks = networks.len(), "networks normalized");
    Ok(networks)
}

/// Replaces the networks in `vm`'s settings with the normalized `declared`
/// set.
///
/// # Errors
///
/// Fails on normalization errors or settings store failures.
pub async fn configure_networks<C, R, S>(
    ports: Ports<'_, C, R, S>,
    vm: &VmHandle,
    declared: &Networks,
) -> Result<()>
where
    C: CloudApi,
    R: RemoteRunner,
    S: SettingsStore,
{
    let networks = normalize_for_vm(ports, vm, declared)
        .await
        .context("normalizing networks")?;
    let mut env = ports
        .settings
        .fetch(vm)
        .await
        .context("fetching settings")?;
    env.networks = networks;
    ports
        .settings
        .update(vm, &env)
        .await
        .context("updating settings")?;
    tracing::info!(vm_id = vm.id, "networks configured");
    Ok(())
}
