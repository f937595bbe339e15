//! VM methods.

use anyhow::Result;
use cpi_common::Networks;
use serde_json::{Map, Value};

use crate::application::ports::{CloudApi, RemoteRunner, SettingsStore};
use crate::application::services::Ports;
use crate::application::services::vm::{
    CreateVmRequest, Vm, VmCapabilities, create_vm as create, delete_vm as delete, find_vm,
    has_vm as exists,
};
use crate::commands::args::{Args, text};
use crate::domain::vm::{VmCloudProperties, VmMetadata};

/// `[agent_id, stemcell_id, cloud_properties, networks, disk_ids, env]`
pub async fn create_vm<C, R, S>(ports: Ports<'_, C, R, S>, args: &Args<'_>) -> Result<Value>
where
    C: CloudApi,
    R: RemoteRunner,
    S: SettingsStore,
{
    let disk_ids: Vec<Value> = args.optional(4, "disk_ids")?;
    let req = CreateVmRequest {
        agent_id: args.required(0, "agent_id")?,
        stemcell_id: args.id(1, "stemcell_id")?,
        cloud_properties: args.required::<VmCloudProperties>(2, "cloud_properties")?,
        networks: args.required::<Networks>(3, "networks")?,
        disk_ids: disk_ids.iter().map(text).collect(),
        env: args.optional::<Map<String, Value>>(5, "env")?,
    };
    let vm = create(ports, &req).await?;
    Ok(Value::String(vm.id.to_string()))
}

pub async fn delete_vm<C, R, S>(ports: Ports<'_, C, R, S>, args: &Args<'_>) -> Result<Value>
where
    C: CloudApi,
    R: RemoteRunner,
    S: SettingsStore,
{
    delete(ports, args.id(0, "vm_id")?).await?;
    Ok(Value::Null)
}

pub async fn has_vm(cloud: &impl CloudApi, args: &Args<'_>) -> Result<Value> {
    Ok(Value::Bool(exists(cloud, args.id(0, "vm_id")?).await?))
}

pub async fn reboot_vm(cloud: &impl CloudApi, args: &Args<'_>) -> Result<Value> {
    let vm = find_vm(cloud, args.id(0, "vm_id")?).await?;
    Vm::new(&vm).reboot(cloud).await?;
    Ok(Value::Null)
}

/// Metadata values that are not strings are rendered as JSON text.
pub async fn set_vm_metadata(cloud: &impl CloudApi, args: &Args<'_>) -> Result<Value> {
    let id = args.id(0, "vm_id")?;
    let raw: Map<String, Value> = args.required(1, "metadata")?;
    let metadata: VmMetadata = raw.iter().map(|(k, v)| (k.clone(), text(v))).collect();
    let vm = find_vm(cloud, id).await?;
    Vm::new(&vm).set_metadata(cloud, &metadata).await?;
    Ok(Value::Null)
}

pub async fn configure_networks<C, R, S>(
    ports: Ports<'_, C, R, S>,
    args: &Args<'_>,
) -> Result<Value>
where
    C: CloudApi,
    R: RemoteRunner,
    S: SettingsStore,
{
    let id = args.id(0, "vm_id")?;
    let networks: Networks = args.required(1, "networks")?;
    let vm = find_vm(ports.cloud, id).await?;
    Vm::new(&vm).configure_networks(ports, &networks).await?;
    Ok(Value::Null)
}
