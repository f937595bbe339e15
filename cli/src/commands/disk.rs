//! Persistent disk methods.

use anyhow::{Context, Result};
use serde_json::Value;

use crate::application::ports::{CloudApi, RemoteRunner, SettingsStore};
use crate::application::services::Ports;
use crate::application::services::disk;
use crate::application::services::vm::{Vm, VmCapabilities, find_vm};
use crate::commands::args::Args;
use crate::domain::storage::DiskCloudProperties;

/// `[size_mb, cloud_properties, vm_id]`
pub async fn create_disk(cloud: &impl CloudApi, args: &Args<'_>) -> Result<Value> {
    let size_mb: u64 = args.required(0, "size")?;
    let props: DiskCloudProperties = args.optional(1, "cloud_properties")?;
    let vm = find_vm(cloud, args.id(2, "vm_id")?)
        .await
        .context("resolving VM for disk placement")?;
    let created = disk::create_disk(cloud, size_mb, &props, &vm).await?;
    Ok(Value::String(created.id.to_string()))
}

pub async fn delete_disk(cloud: &impl CloudApi, args: &Args<'_>) -> Result<Value> {
    disk::delete_disk(cloud, args.id(0, "disk_id")?).await?;
    Ok(Value::Null)
}

pub async fn has_disk(cloud: &impl CloudApi, args: &Args<'_>) -> Result<Value> {
    Ok(Value::Bool(disk::has_disk(cloud, args.id(0, "disk_id")?).await?))
}

pub async fn attach_disk<C, R, S>(ports: Ports<'_, C, R, S>, args: &Args<'_>) -> Result<Value>
where
    C: CloudApi,
    R: RemoteRunner,
    S: SettingsStore,
{
    let vm = find_vm(ports.cloud, args.id(0, "vm_id")?).await?;
    let volume = disk::find_disk(ports.cloud, args.id(1, "disk_id")?).await?;
    let device = Vm::new(&vm).attach_disk(ports, &volume).await?;
    tracing::info!(vm_id = vm.id, disk_id = volume.id, device = %device, "disk attached");
    Ok(Value::Null)
}

pub async fn detach_disk<C, R, S>(ports: Ports<'_, C, R, S>, args: &Args<'_>) -> Result<Value>
where
    C: CloudApi,
    R: RemoteRunner,
    S: SettingsStore,
{
    let vm = find_vm(ports.cloud, args.id(0, "vm_id")?).await?;
    let volume = disk::find_disk(ports.cloud, args.id(1, "disk_id")?).await?;
    Vm::new(&vm).detach_disk(ports, &volume).await?;
    Ok(Value::Null)
}

pub async fn get_disks<C, R, S>(ports: Ports<'_, C, R, S>, args: &Args<'_>) -> Result<Value>
where
    C: CloudApi,
    R: RemoteRunner,
    S: SettingsStore,
{
    let vm = find_vm(ports.cloud, args.id(0, "vm_id")?).await?;
    let ids = disk::get_disks(ports.settings, &vm).await?;
    Ok(Value::from(ids))
}
