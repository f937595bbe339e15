use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::network::Networks;

/// Bootstrap settings read by the guest agent on boot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AgentEnv {
    pub agent_id: String,
    pub vm: VmRef,
    pub mbus: String,
    pub ntp: Vec<String>,
    pub blobstore: Blobstore,
    pub networks: Networks,
    pub disks: Disks,
    pub env: Map<String, Value>,
}

/// Identity of the VM the settings belong to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct VmRef {
    pub name: String,
    pub id: String,
}

/// Blobstore the agent fetches packages and jobs from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Blobstore {
    pub provider: String,
    pub options: Map<String, Value>,
}

/// Disk layout as seen from inside the guest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Disks {
    pub system: String,
    /// Ephemeral device path, empty when no ephemeral disk is attached.
    pub ephemeral: String,
    /// Persistent disk id to device path.
    pub persistent: BTreeMap<String, String>,
}

impl AgentEnv {
    /// Records `path` as the device for persistent disk `disk_id`.
    pub fn attach_persistent_disk(&mut self, disk_id: &str, path: &str) {
        self.disks
            .persistent
            .insert(disk_id.to_string(), path.to_string());
    }

    /// Forgets persistent disk `disk_id`, returning its former device path.
    pub fn detach_persistent_disk(&mut self, disk_id: &str) -> Option<String> {
        self.disks.persistent.remove(disk_id)
    }

    /// Persistent disk ids in stable order.
    #[must_use]
    pub fn persistent_disk_ids(&self) -> Vec<String> {
        self.disks.persistent.keys().cloned().collect()
    }
}
