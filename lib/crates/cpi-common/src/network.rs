use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Networks keyed by name. A `BTreeMap` keeps every traversal name-ordered.
pub type Networks = BTreeMap<String, Network>;

/// How a network obtains its address.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Address assigned by the cloud and discovered after creation.
    #[default]
    Dynamic,
    /// Address chosen by the caller before creation.
    Manual,
    /// Floating address not bound to a NIC.
    Vip,
}

/// A static route pushed to the guest agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Route {
    pub destination: String,
    pub netmask: String,
    pub gateway: String,
}

/// Provider-specific network settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NetworkCloudProperties {
    /// VLAN the network must be bound to.
    #[serde(default, alias = "VlanId", skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<u32>,
    /// Ask the agent to install source-based policy routing for this network.
    #[serde(default, alias = "SourcePolicyRouting")]
    pub source_policy_routing: bool,
}

/// A single network definition, as declared by the caller or as produced by
/// normalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Network {
    #[serde(rename = "type")]
    pub kind: NetworkType,
    pub ip: String,
    pub netmask: String,
    pub gateway: String,
    pub dns: Vec<String>,
    /// Default-route flags, a subset of `dns` and `gateway`.
    pub default: Vec<String>,
    pub mac: String,
    pub alias: String,
    pub routes: Vec<Route>,
    pub preconfigured: bool,
    pub cloud_properties: NetworkCloudProperties,
}

impl Network {
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.kind == NetworkType::Dynamic
    }

    #[must_use]
    pub fn is_vip(&self) -> bool {
        self.kind == NetworkType::Vip
    }

    /// Returns `true` when the network is the default for `flag`
    /// (`"gateway"` or `"dns"`).
    #[must_use]
    pub fn is_default_for(&self, flag: &str) -> bool {
        self.default.iter().any(|d| d == flag)
    }
}
