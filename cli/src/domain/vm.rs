//! VM, stemcell and VLAN value types plus the creation-template builder.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::error::CpiError;

/// Device path of the system disk inside a guest.
pub const SYSTEM_DISK_PATH: &str = "/dev/xvda";

/// Device path the ephemeral disk appears at once attached.
pub const EPHEMERAL_DISK_PATH: &str = "/dev/xvdc";

/// Which of the two VM representations a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmKind {
    VirtualGuest,
    BareMetal,
}

impl fmt::Display for VmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VirtualGuest => f.write_str("virtual guest"),
            Self::BareMetal => f.write_str("bare-metal server"),
        }
    }
}

/// A provisioned host as reported by the cloud API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmHandle {
    pub id: u64,
    pub kind: VmKind,
    pub hostname: String,
    pub fqdn: String,
    pub datacenter: String,
    pub primary_ip: String,
    pub backend_ip: String,
    pub root_password: String,
}

impl VmHandle {
    /// Address the CPI reaches the host on: the private (backend) IP, falling
    /// back to the primary IP for hosts without a private NIC.
    #[must_use]
    pub fn reachable_address(&self) -> &str {
        if self.backend_ip.is_empty() {
            &self.primary_ip
        } else {
            &self.backend_ip
        }
    }

    /// SSH target for this host using its root credential.
    #[must_use]
    pub fn remote_host(&self, user: &str) -> RemoteHost {
        RemoteHost {
            address: self.reachable_address().to_string(),
            user: user.to_string(),
            password: self.root_password.clone(),
        }
    }
}

/// Credentials for reaching a host with the remote command runner.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteHost {
    pub address: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHost")
            .field("address", &self.address)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Provisioning transactions of a host as the cloud reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostActivity {
    pub active_transaction: Option<u64>,
    pub last_transaction: Option<u64>,
    /// Guest powered on, or bare-metal server active.
    pub running: bool,
}

impl HostActivity {
    /// No transaction in flight and the host reports itself up.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.active_transaction.is_none() && self.running
    }

    /// A transaction requested after `before` was taken is running or done.
    ///
    /// A transaction already in flight at `before` does not count, even once
    /// it completes.
    #[must_use]
    pub fn started_since(&self, before: &Self) -> bool {
        let known = |id: Option<u64>| {
            id.is_some_and(|id| {
                before.active_transaction == Some(id) || before.last_transaction == Some(id)
            })
        };
        match self.active_transaction {
            Some(_) => !known(self.active_transaction),
            None => self.last_transaction.is_some() && !known(self.last_transaction),
        }
    }
}

/// An image template a VM is provisioned from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stemcell {
    pub id: u64,
    pub global_identifier: String,
}

/// Network space of a VLAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VlanSpace {
    Private,
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vlan {
    pub id: u32,
    pub space: VlanSpace,
}

/// VM placement and sizing requested by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VmCloudProperties {
    pub hostname_prefix: String,
    pub domain: String,
    pub datacenter: String,
    pub cpu: u32,
    /// Memory in MB.
    pub memory: u32,
    /// Port speed in Mbps.
    pub max_network_speed: u32,
    /// Ephemeral disk size in GB; zero means no ephemeral disk.
    pub ephemeral_disk_size: u32,
    pub hourly_billing: bool,
    pub local_disk: bool,
    pub dedicated_host: bool,
    pub ssh_keys: Vec<u64>,
}

impl Default for VmCloudProperties {
    fn default() -> Self {
        Self {
            hostname_prefix: String::new(),
            domain: String::new(),
            datacenter: String::new(),
            cpu: 1,
            memory: 1024,
            max_network_speed: 100,
            ephemeral_disk_size: 0,
            hourly_billing: true,
            local_disk: false,
            dedicated_host: false,
            ssh_keys: Vec::new(),
        }
    }
}

/// Everything the cloud API needs to create an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceTemplate {
    pub hostname: String,
    pub domain: String,
    pub datacenter: String,
    pub start_cpus: u32,
    pub max_memory: u32,
    pub max_network_speed: u32,
    pub hourly_billing: bool,
    pub local_disk: bool,
    pub dedicated_host: bool,
    pub ssh_key_ids: Vec<u64>,
    pub image_global_identifier: String,
    pub primary_backend_vlan: Option<u32>,
    pub primary_vlan: Option<u32>,
}

/// Builds the creation template for a new instance.
///
/// `timestamp` makes the hostname unique; `max_hostname_length` bounds the
/// resulting hostname label.
///
/// # Errors
///
/// Returns [`CpiError::Configuration`] when required properties are missing,
/// the VLANs span more than one private or public VLAN, or the hostname is
/// too long.
pub fn build_template(
    props: &VmCloudProperties,
    stemcell: &Stemcell,
    vlans: &[Vlan],
    timestamp: &str,
    max_hostname_length: usize,
) -> Result<InstanceTemplate, CpiError> {
    for (key, value) in [
        ("hostname_prefix", &props.hostname_prefix),
        ("domain", &props.domain),
        ("datacenter", &props.datacenter),
    ] {
        if value.is_empty() {
            return Err(CpiError::Configuration(format!(
                "cloud property '{key}' must be set"
            )));
        }
    }

    let hostname = format!("{}-{timestamp}", props.hostname_prefix);
    if hostname.len() > max_hostname_length {
        return Err(CpiError::Configuration(format!(
            "hostname '{hostname}' is {} characters, the limit is {max_hostname_length}",
            hostname.len()
        )));
    }

    Ok(InstanceTemplate {
        hostname,
        domain: props.domain.clone(),
        datacenter: props.datacenter.clone(),
        start_cpus: props.cpu,
        max_memory: props.memory,
        max_network_speed: props.max_network_speed,
        hourly_billing: props.hourly_billing,
        local_disk: props.local_disk,
        dedicated_host: props.dedicated_host,
        ssh_key_ids: props.ssh_keys.clone(),
        image_global_identifier: stemcell.global_identifier.clone(),
        primary_backend_vlan: single_vlan(vlans, VlanSpace::Private)?,
        primary_vlan: single_vlan(vlans, VlanSpace::Public)?,
    })
}

fn single_vlan(vlans: &[Vlan], space: VlanSpace) -> Result<Option<u32>, CpiError> {
    let mut ids: Vec<u32> = vlans
        .iter()
        .filter(|v| v.space == space)
        .map(|v| v.id)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    match ids.as_slice() {
        [] => Ok(None),
        [id] => Ok(Some(*id)),
        many => Err(CpiError::Configuration(format!(
            "networks span {} {} VLANs ({many:?}), a VM has one NIC per space",
            many.len(),
            match space {
                VlanSpace::Private => "private",
                VlanSpace::Public => "public",
            }
        ))),
    }
}

/// Free-form metadata the fleet manager attaches to a VM.
pub type VmMetadata = BTreeMap<String, String>;

/// Renders metadata as `key: value` tags in key order.
#[must_use]
pub fn metadata_tags(metadata: &VmMetadata) -> Vec<String> {
    metadata
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect()
}
