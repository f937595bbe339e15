//! Persistent disk value types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An iSCSI block volume as reported by the cloud API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskHandle {
    pub id: u64,
    pub size_gb: u32,
    pub datacenter: String,
    /// Portal address the volume is served from.
    pub target_address: String,
    /// Billing item cancelled when the disk is deleted.
    pub billing_item_id: Option<u64>,
}

/// The iSCSI identity the cloud issued for one allowed host.
#[derive(Clone, PartialEq, Eq)]
pub struct HostCredential {
    pub initiator_name: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for HostCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCredential")
            .field("initiator_name", &self.initiator_name)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Disk options passed to `create_disk`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiskCloudProperties {
    pub iops: Option<u32>,
}

/// A volume order placed with the cloud API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskOrder {
    pub size_gb: u32,
    pub iops: Option<u32>,
    pub datacenter: String,
}

impl DiskOrder {
    /// Converts a size in MB to whole GB, rounding up.
    #[must_use]
    pub fn size_gb_from_mb(size_mb: u64) -> u32 {
        u32::try_from(size_mb.div_ceil(1024)).unwrap_or(u32::MAX)
    }
}
