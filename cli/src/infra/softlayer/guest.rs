//! Virtual guest, bare-metal, image and VLAN calls.

use std::net::Ipv4Addr;

use anyhow::{Context, Result, anyhow};
use ipnetwork::Ipv4Network;
use serde::Deserialize;
use serde_json::{Value, json};

use super::SoftLayerClient;
use crate::domain::error::CpiError;
use crate::domain::network::{Nic, NicInventory, Subnet};
use crate::domain::vm::{
    HostActivity, InstanceTemplate, Stemcell, Vlan, VlanSpace, VmHandle, VmKind,
};

const HOST_MASK: &str = "mask[id,hostname,fullyQualifiedDomainName,primaryIpAddress,\
primaryBackendIpAddress,datacenter[name],operatingSystem[passwords[username,password]]]";

const NIC_MASK: &str = "mask[port,primaryIpAddress,macAddress,\
networkVlan[vlanNumber,id,networkSpace,subnets[networkIdentifier,cidr,gateway]]]";

/// Item category of a guest's second (ephemeral) disk.
const EPHEMERAL_CATEGORY: &str = "guest_disk1";

fn service(kind: VmKind) -> &'static str {
    match kind {
        VmKind::VirtualGuest => "SoftLayer_Virtual_Guest",
        VmKind::BareMetal => "SoftLayer_Hardware_Server",
    }
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Password {
    username: String,
    password: String,
}

#[derive(Debug, Default, Deserialize)]
struct OperatingSystem {
    #[serde(default)]
    passwords: Vec<Password>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HostRecord {
    id: u64,
    #[serde(default)]
    hostname: String,
    #[serde(default)]
    fully_qualified_domain_name: String,
    #[serde(default)]
    primary_ip_address: String,
    #[serde(default)]
    primary_backend_ip_address: String,
    datacenter: Option<Named>,
    operating_system: Option<OperatingSystem>,
}

impl HostRecord {
    fn into_handle(self, kind: VmKind) -> VmHandle {
        let root_password = self
            .operating_system
            .unwrap_or_default()
            .passwords
            .into_iter()
            .find(|p| p.username == "root")
            .map(|p| p.password)
            .unwrap_or_default();
        VmHandle {
            id: self.id,
            kind,
            hostname: self.hostname,
            fqdn: self.fully_qualified_domain_name,
            datacenter: self.datacenter.map(|d| d.name).unwrap_or_default(),
            primary_ip: self.primary_ip_address,
            backend_ip: self.primary_backend_ip_address,
            root_password,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageRecord {
    id: u64,
    global_identifier: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VlanRecord {
    id: u32,
    network_space: String,
}

#[derive(Debug, Deserialize)]
struct KeyName {
    #[serde(rename = "keyName")]
    key_name: String,
}

#[derive(Debug, Deserialize)]
struct HardwareStatus {
    status: String,
}

#[derive(Debug, Deserialize)]
struct TransactionRef {
    id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityRecord {
    active_transaction: Option<TransactionRef>,
    last_transaction: Option<TransactionRef>,
    power_state: Option<KeyName>,
    hardware_status: Option<HardwareStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubnetRecord {
    network_identifier: Ipv4Addr,
    cidr: u8,
    gateway: Option<Ipv4Addr>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComponentVlan {
    id: u32,
    network_space: String,
    #[serde(default)]
    subnets: Vec<SubnetRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComponentRecord {
    port: u32,
    primary_ip_address: Option<Ipv4Addr>,
    #[serde(default)]
    mac_address: String,
    network_vlan: Option<ComponentVlan>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Category {
    category_code: String,
}

#[derive(Debug, Deserialize)]
struct PriceItem {
    /// Sent as a number or a numeric string depending on the item.
    capacity: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ItemPrice {
    id: u64,
    #[serde(default)]
    categories: Vec<Category>,
    item: Option<PriceItem>,
}

impl ItemPrice {
    fn in_category(&self, code: &str) -> bool {
        self.categories.iter().any(|c| c.category_code == code)
    }

    fn capacity(&self) -> Option<u64> {
        match self.item.as_ref()?.capacity.as_ref()? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

fn space(raw: &str) -> Result<VlanSpace> {
    match raw {
        "PRIVATE" => Ok(VlanSpace::Private),
        "PUBLIC" => Ok(VlanSpace::Public),
        other => Err(anyhow!("unknown VLAN network space '{other}'")),
    }
}

fn nic(record: ComponentRecord) -> Result<Option<(VlanSpace, Nic)>> {
    let (Some(vlan), Some(ip)) = (record.network_vlan, record.primary_ip_address) else {
        return Ok(None);
    };
    let subnets = vlan
        .subnets
        .into_iter()
        .filter_map(|s| {
            let gateway = s.gateway?;
            Some(
                Ipv4Network::new(s.network_identifier, s.cidr)
                    .map(|cidr| Subnet { cidr, gateway })
                    .with_context(|| format!("subnet {}/{}", s.network_identifier, s.cidr)),
            )
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Some((
        space(&vlan.network_space)?,
        Nic {
            vlan_id: vlan.id,
            port: record.port,
            primary_ip: ip,
            mac: record.mac_address,
            subnets,
        },
    )))
}

// ── Calls ────────────────────────────────────────────────────────────────────

impl SoftLayerClient {
    pub(super) async fn stemcell(&self, id: u64) -> Result<Option<Stemcell>> {
        let image: Option<ImageRecord> = self
            .get(
                &format!("SoftLayer_Virtual_Guest_Block_Device_Template_Group/{id}"),
                "mask[id,globalIdentifier]",
                None,
            )
            .await?;
        Ok(image.map(|i| Stemcell {
            id: i.id,
            global_identifier: i.global_identifier,
        }))
    }

    pub(super) async fn vlan(&self, id: u32) -> Result<Option<Vlan>> {
        let vlan: Option<VlanRecord> = self
            .get(
                &format!("SoftLayer_Network_Vlan/{id}"),
                "mask[id,networkSpace]",
                None,
            )
            .await?;
        vlan.map(|v| {
            Ok(Vlan {
                id: v.id,
                space: space(&v.network_space)?,
            })
        })
        .transpose()
    }

    pub(super) async fn create_guest(&self, t: &InstanceTemplate) -> Result<VmHandle> {
        let mut template = json!({
            "hostname": t.hostname,
            "domain": t.domain,
            "startCpus": t.start_cpus,
            "maxMemory": t.max_memory,
            "datacenter": { "name": t.datacenter },
            "hourlyBillingFlag": t.hourly_billing,
            "localDiskFlag": t.local_disk,
            "dedicatedAccountHostOnlyFlag": t.dedicated_host,
            "networkComponents": [{ "maxSpeed": t.max_network_speed }],
            "blockDeviceTemplateGroup": { "globalIdentifier": t.image_global_identifier },
            "sshKeys": t.ssh_key_ids.iter().map(|id| json!({ "id": id })).collect::<Vec<_>>(),
        });
        if let Some(vlan) = t.primary_backend_vlan {
            template["primaryBackendNetworkComponent"] = json!({ "networkVlan": { "id": vlan } });
        }
        if let Some(vlan) = t.primary_vlan {
            template["primaryNetworkComponent"] = json!({ "networkVlan": { "id": vlan } });
        } else {
            template["privateNetworkOnlyFlag"] = json!(true);
        }

        let created: HostRecord = self
            .post("SoftLayer_Virtual_Guest", json!([template]))
            .await
            .context("creating virtual guest")?;
        tracing::info!(vm_id = created.id, hostname = %t.hostname, "virtual guest ordered");
        Ok(created.into_handle(VmKind::VirtualGuest))
    }

    /// Looks the id up as a virtual guest first, then as a bare-metal server.
    pub(super) async fn host(&self, id: u64) -> Result<Option<VmHandle>> {
        for kind in [VmKind::VirtualGuest, VmKind::BareMetal] {
            let record: Option<HostRecord> = self
                .get(&format!("{}/{id}", service(kind)), HOST_MASK, None)
                .await?;
            if let Some(record) = record {
                return Ok(Some(record.into_handle(kind)));
            }
        }
        Ok(None)
    }

    pub(super) async fn host_by_ip(&self, ip: &str) -> Result<Option<VmHandle>> {
        for (kind, method, property) in [
            (VmKind::VirtualGuest, "getVirtualGuests", "virtualGuests"),
            (VmKind::BareMetal, "getHardware", "hardware"),
        ] {
            for field in ["primaryBackendIpAddress", "primaryIpAddress"] {
                let filter = json!({ property: { field: { "operation": ip } } });
                let found: Vec<HostRecord> = self
                    .get(&format!("SoftLayer_Account/{method}"), HOST_MASK, Some(&filter))
                    .await?
                    .unwrap_or_default();
                if let Some(record) = found.into_iter().next() {
                    return Ok(Some(record.into_handle(kind)));
                }
            }
        }
        Ok(None)
    }

    pub(super) async fn activity(&self, vm: &VmHandle) -> Result<HostActivity> {
        let mask = match vm.kind {
            VmKind::VirtualGuest => {
                "mask[id,activeTransaction[id],lastTransaction[id],powerState[keyName]]"
            }
            VmKind::BareMetal => {
                "mask[id,activeTransaction[id],lastTransaction[id],hardwareStatus[status]]"
            }
        };
        let record: ActivityRecord = self
            .get(&format!("{}/{}", service(vm.kind), vm.id), mask, None)
            .await?
            .ok_or_else(|| CpiError::NotFound(format!("VM '{}'", vm.id)))?;
        let running = match vm.kind {
            VmKind::VirtualGuest => record.power_state.is_some_and(|p| p.key_name == "RUNNING"),
            VmKind::BareMetal => record.hardware_status.is_some_and(|s| s.status == "ACTIVE"),
        };
        Ok(HostActivity {
            active_transaction: record.active_transaction.map(|t| t.id),
            last_transaction: record.last_transaction.map(|t| t.id),
            running,
        })
    }

    pub(super) async fn reload(&self, vm: &VmHandle, stemcell: &Stemcell) -> Result<()> {
        let _: Value = self
            .post(
                &format!("{}/{}/reloadOperatingSystem", service(vm.kind), vm.id),
                json!(["FORCE", { "imageTemplateId": stemcell.id }]),
            )
            .await
            .context("requesting OS reload")?;
        Ok(())
    }

    /// Orders the guest's second disk as an in-place upgrade.
    pub(super) async fn upgrade_ephemeral(&self, vm: &VmHandle, size_gb: u32) -> Result<()> {
        let prices: Vec<ItemPrice> = self
            .get(
                &format!("SoftLayer_Virtual_Guest/{}/getUpgradeItemPrices", vm.id),
                "mask[id,categories[categoryCode],item[capacity]]",
                None,
            )
            .await?
            .unwrap_or_default();
        let price = prices
            .iter()
            .find(|p| p.in_category(EPHEMERAL_CATEGORY) && p.capacity() == Some(u64::from(size_gb)))
            .ok_or_else(|| {
                CpiError::Configuration(format!(
                    "no {size_gb}GB ephemeral disk is offered for VM '{}'",
                    vm.id
                ))
            })?;

        let order = json!({
            "complexType": "SoftLayer_Container_Product_Order_Virtual_Guest_Upgrade",
            "virtualGuests": [{ "id": vm.id }],
            "prices": [{
                "id": price.id,
                "categories": [{
                    "categoryCode": EPHEMERAL_CATEGORY,
                    "complexType": "SoftLayer_Product_Item_Category",
                }],
            }],
            "properties": [{
                "name": "MAINTENANCE_WINDOW",
                "value": chrono::Utc::now().to_rfc3339(),
            }],
        });
        let _: Value = self
            .post("SoftLayer_Product_Order/placeOrder", json!([order, true]))
            .await
            .context("ordering ephemeral disk upgrade")?;
        Ok(())
    }

    pub(super) async fn network_components(&self, vm: &VmHandle) -> Result<NicInventory> {
        let records: Vec<ComponentRecord> = self
            .get(
                &format!("{}/{}/getNetworkComponents", service(vm.kind), vm.id),
                NIC_MASK,
                None,
            )
            .await?
            .ok_or_else(|| CpiError::NotFound(format!("VM '{}'", vm.id)))?;

        let mut private = None;
        let mut public = None;
        for record in records {
            match nic(record)? {
                Some((VlanSpace::Private, n)) if private.is_none() => private = Some(n),
                Some((VlanSpace::Public, n)) if public.is_none() => public = Some(n),
                _ => {}
            }
        }
        let private = private.ok_or_else(|| anyhow!("VM '{}' has no private NIC", vm.id))?;
        Ok(NicInventory { private, public })
    }

    pub(super) async fn tag(&self, vm: &VmHandle, tags: &[String]) -> Result<()> {
        let _: Value = self
            .post(
                &format!("{}/{}/setTags", service(vm.kind), vm.id),
                json!([tags.join(", ")]),
            )
            .await
            .context("setting tags")?;
        Ok(())
    }

    pub(super) async fn soft_reboot(&self, vm: &VmHandle) -> Result<()> {
        let _: Value = self
            .post(&format!("{}/{}/rebootSoft", service(vm.kind), vm.id), json!([]))
            .await
            .context("rebooting")?;
        Ok(())
    }

    pub(super) async fn cancel_guest(&self, vm: &VmHandle) -> Result<()> {
        self.delete(&format!("SoftLayer_Virtual_Guest/{}", vm.id))
            .await
            .context("cancelling virtual guest")
    }
}
