//! Network normalization: binds declared networks to a VM's real NICs.
//!
//! The caller declares abstract networks (often without addresses); the VM
//! has a private NIC and optionally a public one, each on one VLAN with a set
//! of subnets. [`normalize`] produces concrete definitions the guest agent can
//! apply. Normalizing an already normalized set returns it unchanged.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use cpi_common::{Network, NetworkCloudProperties, NetworkType, Networks, Route};
use ipnetwork::Ipv4Network;

use crate::domain::error::NetworkError;

/// Name of the dynamic network synthesized for the private NIC.
pub const PRIVATE_DYNAMIC: &str = "private_dynamic";

/// Name of the dynamic network synthesized for the public NIC.
pub const PUBLIC_DYNAMIC: &str = "public_dynamic";

/// Ranges reachable only over the private NIC.
pub const PRIVATE_RANGES: [(Ipv4Addr, u8); 2] = [
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(161, 26, 0, 0), 16),
];

// ── NIC inventory ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub cidr: Ipv4Network,
    pub gateway: Ipv4Addr,
}

/// One physical NIC of a VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nic {
    pub vlan_id: u32,
    /// Interface index inside the guest (`eth<port>`).
    pub port: u32,
    pub primary_ip: Ipv4Addr,
    pub mac: String,
    pub subnets: Vec<Subnet>,
}

impl Nic {
    fn subnet_containing(&self, ip: Ipv4Addr) -> Option<&Subnet> {
        self.subnets.iter().find(|s| s.cidr.contains(ip))
    }
}

/// Which NIC a network is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NicSlot {
    Private,
    Public,
}

impl NicSlot {
    fn label(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
        }
    }
}

/// The NICs of one VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicInventory {
    pub private: Nic,
    pub public: Option<Nic>,
}

impl NicInventory {
    fn slot_for_vlan(&self, vlan: u32) -> Option<NicSlot> {
        if self.private.vlan_id == vlan {
            Some(NicSlot::Private)
        } else if self.public.as_ref().is_some_and(|n| n.vlan_id == vlan) {
            Some(NicSlot::Public)
        } else {
            None
        }
    }

    fn nic(&self, slot: NicSlot) -> &Nic {
        match (slot, &self.public) {
            (NicSlot::Public, Some(public)) => public,
            _ => &self.private,
        }
    }

    fn slots(&self) -> impl Iterator<Item = NicSlot> {
        [NicSlot::Private]
            .into_iter()
            .chain(self.public.as_ref().map(|_| NicSlot::Public))
    }
}

// ── Normalization ─────────────────────────────────────────────────────────────

/// Binds `declared` networks to the NICs in `nics`.
///
/// Dynamic networks take the NIC's address and MAC; every bound network gets
/// netmask and gateway from the NIC subnet containing its IP; networks on the
/// private VLAN get static routes to the private ranges; aliases are derived
/// from `iface_prefix` and the NIC port. When no dynamic network is declared,
/// one is synthesized per NIC.
///
/// # Errors
///
/// Returns a [`NetworkError`] for any input that cannot be bound; no partial
/// result is produced.
pub fn normalize(
    declared: &Networks,
    nics: &NicInventory,
    iface_prefix: &str,
) -> Result<Networks, NetworkError> {
    let vips = declared.values().filter(|n| n.is_vip()).count();
    if vips > 1 {
        return Err(NetworkError::MultipleVips(vips));
    }

    let mut out = Networks::new();
    let mut slots: BTreeMap<String, NicSlot> = BTreeMap::new();

    for (name, net) in declared {
        if net.is_vip() {
            out.insert(name.clone(), net.clone());
            continue;
        }
        let slot = net
            .cloud_properties
            .vlan_id
            .and_then(|vlan| nics.slot_for_vlan(vlan))
            .ok_or_else(|| NetworkError::UnmatchedVlan {
                network: name.clone(),
                vlan: net
                    .cloud_properties
                    .vlan_id
                    .map_or_else(|| "<none>".to_string(), |v| v.to_string()),
            })?;
        let mut net = net.clone();
        if net.is_dynamic() {
            let nic = nics.nic(slot);
            net.ip = nic.primary_ip.to_string();
            net.mac.clone_from(&nic.mac);
        }
        out.insert(name.clone(), net);
        slots.insert(name.clone(), slot);
    }

    bind_dynamic_networks(&mut out, &mut slots, nics)?;

    for (name, slot) in &slots {
        let nic = nics.nic(*slot);
        if let Some(net) = out.get_mut(name) {
            resolve_subnet(name, net, nic)?;
            if *slot == NicSlot::Private {
                add_private_routes(net);
            }
        }
    }

    ensure_public_default(&mut out, &slots);
    assign_aliases(&mut out, &slots, nics, iface_prefix);
    Ok(out)
}

/// Enforces one dynamic network per NIC, synthesizing them when none was
/// declared.
fn bind_dynamic_networks(
    out: &mut Networks,
    slots: &mut BTreeMap<String, NicSlot>,
    nics: &NicInventory,
) -> Result<(), NetworkError> {
    let count = |slot: NicSlot| {
        slots
            .iter()
            .filter(|(name, s)| **s == slot && out[*name].is_dynamic())
            .count()
    };
    let private = count(NicSlot::Private);
    let public = count(NicSlot::Public);
    if private > 1 {
        return Err(NetworkError::MultipleDynamic(NicSlot::Private.label()));
    }
    if public > 1 {
        return Err(NetworkError::MultipleDynamic(NicSlot::Public.label()));
    }
    if private == 1 {
        return Ok(());
    }
    if public == 1 {
        return Err(NetworkError::MissingPrivateDynamic);
    }

    for slot in nics.slots().collect::<Vec<_>>() {
        let name = match slot {
            NicSlot::Private => PRIVATE_DYNAMIC,
            NicSlot::Public => PUBLIC_DYNAMIC,
        };
        if out.contains_key(name) {
            return Err(NetworkError::ReservedName(name.to_string()));
        }
        let nic = nics.nic(slot);
        out.insert(
            name.to_string(),
            Network {
                kind: NetworkType::Dynamic,
                ip: nic.primary_ip.to_string(),
                mac: nic.mac.clone(),
                cloud_properties: NetworkCloudProperties {
                    vlan_id: Some(nic.vlan_id),
                    source_policy_routing: true,
                },
                ..Network::default()
            },
        );
        slots.insert(name.to_string(), slot);
    }
    Ok(())
}

fn resolve_subnet(name: &str, net: &mut Network, nic: &Nic) -> Result<(), NetworkError> {
    if net.ip.is_empty() {
        return Err(NetworkError::MissingIp(name.to_string()));
    }
    let ip: Ipv4Addr = net.ip.parse().map_err(|_| NetworkError::InvalidIp {
        network: name.to_string(),
        ip: net.ip.clone(),
    })?;
    let subnet = nic
        .subnet_containing(ip)
        .ok_or_else(|| NetworkError::NoContainingSubnet {
            network: name.to_string(),
            vlan: nic.vlan_id,
            ip: net.ip.clone(),
        })?;
    net.netmask = subnet.cidr.mask().to_string();
    net.gateway = subnet.gateway.to_string();
    Ok(())
}

fn add_private_routes(net: &mut Network) {
    for (addr, prefix) in PRIVATE_RANGES {
        let route = Route {
            destination: addr.to_string(),
            netmask: prefix_netmask(prefix).to_string(),
            gateway: net.gateway.clone(),
        };
        if !net.routes.contains(&route) {
            net.routes.push(route);
        }
    }
}

fn prefix_netmask(prefix: u8) -> Ipv4Addr {
    Ipv4Network::new(Ipv4Addr::UNSPECIFIED, prefix)
        .map_or(Ipv4Addr::BROADCAST, |n| n.mask())
}

/// Private networks never become the implicit default route; when nothing
/// is marked default the public dynamic network takes it.
fn ensure_public_default(out: &mut Networks, slots: &BTreeMap<String, NicSlot>) {
    if out.values().any(|n| n.is_default_for("gateway")) {
        return;
    }
    let public = slots
        .iter()
        .find(|(name, slot)| **slot == NicSlot::Public && out[*name].is_dynamic())
        .map(|(name, _)| name.clone());
    if let Some(net) = public.and_then(|name| out.get_mut(&name)) {
        for flag in ["dns", "gateway"] {
            if !net.is_default_for(flag) {
                net.default.push(flag.to_string());
            }
        }
    }
}

/// Dynamic networks alias the NIC itself; other networks get a sub-interface
/// index that, once assigned, is preserved on later normalizations.
fn assign_aliases(
    out: &mut Networks,
    slots: &BTreeMap<String, NicSlot>,
    nics: &NicInventory,
    iface_prefix: &str,
) {
    for slot in nics.slots().collect::<Vec<_>>() {
        let base = format!("{iface_prefix}{}", nics.nic(slot).port);
        let names: Vec<&String> = slots
            .iter()
            .filter(|(_, s)| **s == slot)
            .map(|(name, _)| name)
            .collect();

        let mut used = BTreeSet::new();
        let mut pending = Vec::new();
        for name in names {
            let Some(net) = out.get_mut(name) else {
                continue;
            };
            if net.is_dynamic() {
                net.alias.clone_from(&base);
                continue;
            }
            match existing_index(&net.alias, &base) {
                Some(index) if used.insert(index) => {}
                _ => pending.push(name),
            }
        }

        let mut next = 0u32;
        for name in pending {
            while used.contains(&next) {
                next += 1;
            }
            used.insert(next);
            if let Some(net) = out.get_mut(name) {
                net.alias = format!("{base}:{next}");
            }
        }
    }
}

fn existing_index(alias: &str, base: &str) -> Option<u32> {
    alias
        .strip_prefix(base)
        .and_then(|rest| rest.strip_prefix(':'))
        .and_then(|index| index.parse().ok())
}

/// The first IP declared on a dynamic network, which requests host reuse.
#[must_use]
pub fn declared_dynamic_ip(declared: &Networks) -> Option<&str> {
    declared
        .values()
        .find(|n| n.is_dynamic() && !n.ip.is_empty())
        .map(|n| n.ip.as_str())
}

/// Distinct VLAN ids declared by non-vip networks.
#[must_use]
pub fn declared_vlan_ids(declared: &Networks) -> BTreeSet<u32> {
    declared
        .values()
        .filter(|n| !n.is_vip())
        .filter_map(|n| n.cloud_properties.vlan_id)
        .collect()
}

// ── Unit tests ────────────────────────────────────────────────────────────────
