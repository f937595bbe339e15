//! Block device enumeration rules for iSCSI attach.
//!
//! The guest is inspected through shell commands; these functions turn the
//! captured text into device sets and decide which device a new volume
//! became. Nothing here touches a live host.

use std::collections::BTreeSet;

use crate::domain::error::DeviceError;

/// More iSCSI devices than this on one host is a fatal guard condition.
pub const MAX_ISCSI_DEVICES: usize = 2;

/// Exits 0 when the multipath tools are installed.
pub const DETECT_MULTIPATH: &str = "command -v multipath";

/// How iSCSI devices are listed on a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enumeration {
    /// Device-mapper multipath maps from `dmsetup ls`.
    Multipath,
    /// Raw SCSI disks from `/proc/partitions`.
    Partitions,
}

impl Enumeration {
    #[must_use]
    pub fn from_multipath_present(present: bool) -> Self {
        if present { Self::Multipath } else { Self::Partitions }
    }

    /// Shell command whose output [`Enumeration::parse`] understands.
    #[must_use]
    pub fn command(self) -> &'static str {
        match self {
            Self::Multipath => "dmsetup ls",
            Self::Partitions => "cat /proc/partitions",
        }
    }

    #[must_use]
    pub fn parse(self, output: &str) -> BTreeSet<String> {
        match self {
            Self::Multipath => parse_dmsetup_ls(output),
            Self::Partitions => parse_proc_partitions(output),
        }
    }

    /// Device path for a device name produced by this enumeration.
    #[must_use]
    pub fn device_path(self, name: &str) -> String {
        match self {
            Self::Multipath => format!("/dev/mapper/{name}"),
            Self::Partitions => format!("/dev/{name}"),
        }
    }
}

/// Parses `dmsetup ls`, skipping partition maps.
///
/// ```text
/// 3600a09803830344a583f497178583833	(253:0)
/// 3600a09803830344a583f497178583833-part1	(253:1)
/// ```
#[must_use]
pub fn parse_dmsetup_ls(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("No devices found"))
        .filter_map(|line| line.split_whitespace().next())
        .filter(|name| !is_partition_map(name))
        .map(String::from)
        .collect()
}

fn is_partition_map(name: &str) -> bool {
    name.rsplit_once("-part")
        .is_some_and(|(_, n)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// Parses `/proc/partitions`, keeping whole SCSI disks (`sdb`, `sdaa`).
///
/// Local Xen disks (`xvda`) and partitions (`sdb1`) are ignored.
#[must_use]
pub fn parse_proc_partitions(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            match cols.as_slice() {
                [major, _, _, name] if major.chars().all(|c| c.is_ascii_digit()) => Some(*name),
                _ => None,
            }
        })
        .filter(|name| is_scsi_disk(name))
        .map(String::from)
        .collect()
}

fn is_scsi_disk(name: &str) -> bool {
    name.strip_prefix("sd")
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_lowercase()))
}

/// SCSI disks behind live sessions to `portal`, parsed from
/// `iscsiadm -m session -P 3`.
///
/// ```text
/// Target: iqn.1992-08.com.netapp:sn.3c2a:vs.7
///     Current Portal: 10.2.3.4:3260,1031
///             Attached scsi disk sdb          State: running
/// ```
#[must_use]
pub fn parse_session_disks(output: &str, portal: &str) -> BTreeSet<String> {
    let mut disks = BTreeSet::new();
    let mut on_portal = false;
    for line in output.lines().map(str::trim) {
        if line.starts_with("Target:") {
            on_portal = false;
        } else if let Some(address) = line.strip_prefix("Current Portal:") {
            let host = address.trim().split([':', ',']).next().unwrap_or_default();
            on_portal = host == portal;
        } else if let Some(rest) = line.strip_prefix("Attached scsi disk") {
            let name = rest.split_whitespace().next().unwrap_or_default();
            if on_portal && is_scsi_disk(name) {
                disks.insert(name.to_string());
            }
        }
    }
    disks
}

/// Fails when more devices are present than a host may carry.
///
/// # Errors
///
/// Returns [`DeviceError::TooManyDevices`] above [`MAX_ISCSI_DEVICES`].
pub fn ensure_device_limit(devices: &BTreeSet<String>) -> Result<(), DeviceError> {
    if devices.len() > MAX_ISCSI_DEVICES {
        return Err(DeviceError::TooManyDevices {
            count: devices.len(),
            limit: MAX_ISCSI_DEVICES,
            devices: join(devices.iter()),
        });
    }
    Ok(())
}

/// Outcome of comparing a device snapshot against the pre-attach snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceDiff {
    Resolved(String),
    Pending,
}

/// Decides which device a freshly logged-in volume became.
///
/// With an empty `before` the first device seen is accepted; otherwise
/// exactly one device must be new.
///
/// # Errors
///
/// Returns [`DeviceError`] when `after` exceeds the device limit or more
/// than one device appeared at once.
pub fn resolve_new_device(
    before: &BTreeSet<String>,
    after: &BTreeSet<String>,
) -> Result<DeviceDiff, DeviceError> {
    ensure_device_limit(after)?;
    if before.is_empty() {
        return Ok(after
            .first()
            .map_or(DeviceDiff::Pending, |d| DeviceDiff::Resolved(d.clone())));
    }
    let new: Vec<&String> = after.difference(before).collect();
    match new.as_slice() {
        [] => Ok(DeviceDiff::Pending),
        [one] => Ok(DeviceDiff::Resolved((*one).clone())),
        many => Err(DeviceError::Ambiguous {
            count: many.len(),
            devices: join(many.iter().copied()),
        }),
    }
}

/// Path of the first partition on a whole-disk device path.
#[must_use]
pub fn first_partition(device_path: &str) -> String {
    if device_path.starts_with("/dev/mapper/") {
        format!("{device_path}-part1")
    } else {
        format!("{device_path}1")
    }
}

fn join<'a>(names: impl Iterator<Item = &'a String>) -> String {
    names.map(String::as_str).collect::<Vec<_>>().join(", ")
}
