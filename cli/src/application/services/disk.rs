//! Persistent disk use-cases: the iSCSI attach/detach engine plus disk
//! create/delete/inspect.
//!
//! Nothing is cached between calls. Device state comes from the guest, access
//! state from the cloud API, and the disk map from the settings store.

use std::collections::BTreeSet;

use anyhow::{Context, Result};

use crate::application::ports::{CloudApi, RemoteRunner, SettingsStore};
use crate::application::services::Ports;
use crate::application::services::remote::{exec_checked, exec_succeeds};
use crate::domain::devices::{
    DETECT_MULTIPATH, DeviceDiff, Enumeration, ensure_device_limit, first_partition,
    parse_session_disks, resolve_new_device,
};
use crate::domain::error::CpiError;
use crate::domain::iscsi::{
    block_device_check, configure_initiator_script, discovery_login_script,
    list_sessions_script, mount_store_script, multipath_map_script, reset_iscsi_script,
    unmount_store_script,
};
use crate::domain::storage::{DiskCloudProperties, DiskHandle, DiskOrder, HostCredential};
use crate::domain::vm::{RemoteHost, VmHandle};
use crate::poll::poll_until;

/// Resolves a disk handle, failing when the disk does not exist.
///
/// # Errors
///
/// Returns [`CpiError::NotFound`] for an unknown id.
pub async fn find_disk(cloud: &impl CloudApi, id: u64) -> Result<DiskHandle> {
    cloud
        .find_disk(id)
        .await?
        .ok_or_else(|| CpiError::NotFound(format!("disk '{id}'")).into())
}

/// Attaches `disk` to `vm` over iSCSI and records the device path in the
/// VM's settings. Returns the device path.
///
/// Safe to call again after a partial failure: authorization is skipped when
/// already granted, and a device already logged in from the volume's portal
/// is reused without a second login.
///
/// # Errors
///
/// Fails when authorization never becomes visible, the host carries too many
/// iSCSI devices, no new device appears in time, or a remote step fails.
pub async fn attach_disk<C, R, S>(
    ports: Ports<'_, C, R, S>,
    vm: &VmHandle,
    disk: &DiskHandle,
) -> Result<String>
where
    C: CloudApi,
    R: RemoteRunner,
    S: SettingsStore,
{
    tracing::info!(vm_id = vm.id, disk_id = disk.id, "attaching disk");

    let credential = ensure_authorized(ports, vm, disk)
        .await
        .context("authorizing host on volume")?;

    let host = vm.remote_host(&ports.config.ssh.user);
    let multipath = exec_succeeds(ports.remote, &host, DETECT_MULTIPATH)
        .await
        .context("detecting multipath tools")?;
    let enumeration = Enumeration::from_multipath_present(multipath);
    tracing::debug!(vm_id = vm.id, ?enumeration, "device enumeration selected");

    let before = list_devices(ports.remote, &host, enumeration)
        .await
        .context("listing devices before login")?;
    ensure_device_limit(&before).context("listing devices before login")?;

    let device = match session_device(ports.remote, &host, enumeration, disk, &before).await? {
        Some(device) => {
            tracing::info!(
                vm_id = vm.id,
                disk_id = disk.id,
                device = %device,
                "reusing existing iSCSI session"
            );
            device
        }
        None => login_device(ports, &host, enumeration, disk, &credential, &before).await?,
    };
    let path = enumeration.device_path(&device);

    let mut env = ports
        .settings
        .fetch(vm)
        .await
        .context("fetching settings")?;
    env.attach_persistent_disk(&disk.id.to_string(), &path);
    ports
        .settings
        .update(vm, &env)
        .await
        .context("updating settings")?;

    tracing::info!(vm_id = vm.id, disk_id = disk.id, device = %path, "disk attached");
    Ok(path)
}

/// Device of a live session to the volume's portal that is already listed
/// in `before`.
async fn session_device(
    remote: &impl RemoteRunner,
    host: &RemoteHost,
    enumeration: Enumeration,
    disk: &DiskHandle,
    before: &BTreeSet<String>,
) -> Result<Option<String>> {
    let out = exec_checked(remote, host, "listing iSCSI sessions", &list_sessions_script()).await?;
    for scsi_disk in parse_session_disks(&out, &disk.target_address) {
        let device = match enumeration {
            Enumeration::Partitions => scsi_disk,
            Enumeration::Multipath => {
                let map = exec_checked(
                    remote,
                    host,
                    "resolving multipath map",
                    &multipath_map_script(&scsi_disk),
                )
                .await?;
                map.trim().to_string()
            }
        };
        if before.contains(&device) {
            return Ok(Some(device));
        }
    }
    Ok(None)
}

/// Configures the initiator, logs in to the volume's portal and waits for
/// the new device.
async fn login_device<C, R, S>(
    ports: Ports<'_, C, R, S>,
    host: &RemoteHost,
    enumeration: Enumeration,
    disk: &DiskHandle,
    credential: &HostCredential,
    before: &BTreeSet<String>,
) -> Result<String>
where
    C: CloudApi,
    R: RemoteRunner,
    S: SettingsStore,
{
    let cfg = &ports.config.disk;
    exec_checked(
        ports.remote,
        host,
        "configuring iSCSI initiator",
        &configure_initiator_script(credential),
    )
    .await?;
    exec_checked(
        ports.remote,
        host,
        "iSCSI discovery and login",
        &discovery_login_script(&disk.target_address),
    )
    .await?;

    let remote = ports.remote;
    poll_until(
        &format!("iSCSI device of disk '{}'", disk.id),
        cfg.timeout(),
        cfg.poll_interval(),
        move || async move {
            let after = list_devices(remote, host, enumeration).await?;
            match resolve_new_device(before, &after)? {
                DeviceDiff::Resolved(name) => Ok(Some(name)),
                DeviceDiff::Pending => Ok(None),
            }
        },
    )
    .await
    .context("waiting for the volume's device")
}

/// Detaches `disk` from `vm`.
///
/// The iSCSI service is reset as a whole, which drops every session on the
/// host. When exactly one other persistent disk remains it is logged in and
/// remounted at the store; with more survivors nothing is re-attached.
///
/// # Errors
///
/// Fails when a remote step, the cloud API or the settings store fails.
pub async fn detach_disk<C, R, S>(
    ports: Ports<'_, C, R, S>,
    vm: &VmHandle,
    disk: &DiskHandle,
) -> Result<()>
where
    C: CloudApi,
    R: RemoteRunner,
    S: SettingsStore,
{
    tracing::info!(vm_id = vm.id, disk_id = disk.id, "detaching disk");
    let host = vm.remote_host(&ports.config.ssh.user);

    exec_checked(ports.remote, &host, "unmounting store", &unmount_store_script()).await?;
    exec_checked(ports.remote, &host, "resetting iSCSI", &reset_iscsi_script()).await?;

    ports
        .cloud
        .deauthorize_host(vm, disk)
        .await
        .context("revoking host access to volume")?;

    let mut env = ports
        .settings
        .fetch(vm)
        .await
        .context("fetching settings")?;
    if env.detach_persistent_disk(&disk.id.to_string()).is_none() {
        tracing::warn!(vm_id = vm.id, disk_id = disk.id, "disk was not recorded in settings");
    }
    ports
        .settings
        .update(vm, &env)
        .await
        .context("updating settings")?;

    let survivors: Vec<(String, String)> = env
        .disks
        .persistent
        .iter()
        .map(|(id, path)| (id.clone(), path.clone()))
        .collect();
    match survivors.as_slice() {
        [] => {}
        [(id, path)] => remount_survivor(ports, &host, id, path)
            .await
            .with_context(|| format!("re-attaching disk '{id}'"))?,
        many => tracing::warn!(
            vm_id = vm.id,
            remaining = many.len(),
            "iSCSI reset dropped sessions of the remaining disks, they are not re-attached"
        ),
    }

    tracing::info!(vm_id = vm.id, disk_id = disk.id, "disk detached");
    Ok(())
}

/// Orders a disk of `size_mb` (rounded up to whole GB) in `vm`'s datacenter.
///
/// # Errors
///
/// Propagates cloud API failures.
pub async fn create_disk(
    cloud: &impl CloudApi,
    size_mb: u64,
    props: &DiskCloudProperties,
    vm: &VmHandle,
) -> Result<DiskHandle> {
    let order = DiskOrder {
        size_gb: DiskOrder::size_gb_from_mb(size_mb),
        iops: props.iops,
        datacenter: vm.datacenter.clone(),
    };
    let disk = cloud.order_disk(&order).await.context("ordering volume")?;
    tracing::info!(
        disk_id = disk.id,
        size_gb = disk.size_gb,
        datacenter = %disk.datacenter,
        "disk created"
    );
    Ok(disk)
}

/// Cancels disk `id`; an already absent disk is not an error.
///
/// # Errors
///
/// Propagates cloud API failures.
pub async fn delete_disk(cloud: &impl CloudApi, id: u64) -> Result<()> {
    let Some(disk) = cloud.find_disk(id).await? else {
        tracing::info!(disk_id = id, "disk already gone");
        return Ok(());
    };
    cloud.cancel_disk(&disk).await.context("cancelling volume")?;
    tracing::info!(disk_id = id, "disk deleted");
    Ok(())
}

/// # Errors
///
/// Propagates cloud API failures.
pub async fn has_disk(cloud: &impl CloudApi, id: u64) -> Result<bool> {
    Ok(cloud.find_disk(id).await?.is_some())
}

/// Persistent disk ids recorded in `vm`'s settings.
///
/// # Errors
///
/// Propagates settings store failures.
pub async fn get_disks(settings: &impl SettingsStore, vm: &VmHandle) -> Result<Vec<String>> {
    let env = settings.fetch(vm).await.context("fetching settings")?;
    Ok(env.persistent_disk_ids())
}

async fn ensure_authorized<C, R, S>(
    ports: Ports<'_, C, R, S>,
    vm: &VmHandle,
    disk: &DiskHandle,
) -> Result<HostCredential>
where
    C: CloudApi,
    R: RemoteRunner,
    S: SettingsStore,
{
    let cloud = ports.cloud;
    if let Some(credential) = cloud.allowed_host_credential(vm, disk).await? {
        tracing::debug!(vm_id = vm.id, disk_id = disk.id, "host already authorized");
        return Ok(credential);
    }
    cloud.authorize_host(vm, disk).await?;

    let cfg = &ports.config.disk;
    poll_until(
        &format!("authorization of host '{}' on disk '{}'", vm.id, disk.id),
        cfg.timeout(),
        cfg.poll_interval(),
        move || async move { cloud.allowed_host_credential(vm, disk).await },
    )
    .await
}

async fn list_devices(
    remote: &impl RemoteRunner,
    host: &RemoteHost,
    enumeration: Enumeration,
) -> Result<BTreeSet<String>> {
    let out = exec_checked(remote, host, "listing block devices", enumeration.command()).await?;
    Ok(enumeration.parse(&out))
}

async fn remount_survivor<C, R, S>(
    ports: Ports<'_, C, R, S>,
    host: &RemoteHost,
    id: &str,
    device: &str,
) -> Result<()>
where
    C: CloudApi,
    R: RemoteRunner,
    S: SettingsStore,
{
    let disk_id: u64 = id
        .parse()
        .map_err(|_| CpiError::Configuration(format!("persistent disk id '{id}' is not numeric")))?;
    let disk = find_disk(ports.cloud, disk_id).await?;

    exec_checked(
        ports.remote,
        host,
        "iSCSI discovery and login",
        &discovery_login_script(&disk.target_address),
    )
    .await?;

    let partition = first_partition(device);
    let check = block_device_check(&partition);
    let remote = ports.remote;
    let check_ref = check.as_str();
    let cfg = &ports.config.disk;
    poll_until(
        &format!("block device {partition}"),
        cfg.timeout(),
        cfg.poll_interval(),
        move || async move {
            Ok(exec_succeeds(remote, host, check_ref).await?.then_some(()))
        },
    )
    .await?;

    exec_checked(ports.remote, host, "mounting store", &mount_store_script(&partition)).await?;
    tracing::info!(disk_id = disk.id, partition = %partition, "remaining disk remounted");
    Ok(())
}
