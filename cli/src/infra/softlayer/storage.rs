//! Block storage (iSCSI volume) calls.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};

use super::SoftLayerClient;
use crate::domain::error::CpiError;
use crate::domain::storage::{DiskHandle, DiskOrder, HostCredential};
use crate::domain::vm::{VmHandle, VmKind};
use crate::poll::poll_until;

const VOLUME_MASK: &str = "mask[id,capacityGb,serviceResourceBackendIpAddress,\
billingItem[id],serviceResource[datacenter[name]]]";

const PRICE_MASK: &str = "mask[id,locationGroupId,categories[categoryCode],\
capacityRestrictionType,capacityRestrictionMinimum,capacityRestrictionMaximum,\
item[keyName,capacityMinimum,capacityMaximum]]";

/// Storage-as-a-service package block volumes are ordered from.
const STORAGE_PACKAGE: u64 = 759;

/// Endurance tier used when no IOPS figure is requested (2 IOPS per GB).
const DEFAULT_TIER: &str = "READHEAVY_TIER";
const DEFAULT_TIER_LEVEL: u64 = 200;

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct IdRecord {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct Datacenter {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ServiceResource {
    datacenter: Option<Datacenter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeRecord {
    id: u64,
    #[serde(default)]
    capacity_gb: u32,
    #[serde(default)]
    service_resource_backend_ip_address: String,
    billing_item: Option<IdRecord>,
    service_resource: Option<ServiceResource>,
}

impl VolumeRecord {
    fn into_handle(self) -> DiskHandle {
        DiskHandle {
            id: self.id,
            size_gb: self.capacity_gb,
            datacenter: self
                .service_resource
                .and_then(|r| r.datacenter)
                .map(|d| d.name)
                .unwrap_or_default(),
            target_address: self.service_resource_backend_ip_address,
            billing_item_id: self.billing_item.map(|b| b.id),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Credential {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct AllowedHost {
    name: String,
    credential: Option<Credential>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllowedRecord {
    id: u64,
    allowed_host: Option<AllowedHost>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderReceipt {
    order_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageCategory {
    category_code: String,
}

/// Numeric fields here arrive as strings.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageItem {
    #[serde(default)]
    key_name: String,
    capacity_minimum: Option<String>,
    capacity_maximum: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackagePrice {
    id: u64,
    location_group_id: Option<Value>,
    #[serde(default)]
    categories: Vec<PackageCategory>,
    capacity_restriction_type: Option<String>,
    capacity_restriction_minimum: Option<String>,
    capacity_restriction_maximum: Option<String>,
    #[serde(default)]
    item: PackageItem,
}

fn within(min: Option<&String>, max: Option<&String>, value: u64) -> bool {
    let parse = |v: Option<&String>| v.and_then(|s| s.trim().parse::<u64>().ok());
    match (parse(min), parse(max)) {
        (Some(min), Some(max)) => (min..=max).contains(&value),
        _ => false,
    }
}

impl PackagePrice {
    /// Standard prices carry no location group.
    fn is_standard(&self) -> bool {
        self.location_group_id.as_ref().is_none_or(Value::is_null)
    }

    fn in_category(&self, code: &str) -> bool {
        self.is_standard() && self.categories.iter().any(|c| c.category_code == code)
    }

    fn item_covers(&self, value: u64) -> bool {
        within(
            self.item.capacity_minimum.as_ref(),
            self.item.capacity_maximum.as_ref(),
            value,
        )
    }

    fn restriction_covers(&self, kind: &str, value: u64) -> bool {
        self.capacity_restriction_type.as_deref() == Some(kind)
            && within(
                self.capacity_restriction_minimum.as_ref(),
                self.capacity_restriction_maximum.as_ref(),
                value,
            )
    }
}

/// Picks the price ids for a volume of `order.size_gb`: performance pricing
/// when IOPS are given, the default endurance tier otherwise.
fn select_prices(prices: &[PackagePrice], order: &DiskOrder) -> Result<Vec<u64>> {
    let size = u64::from(order.size_gb);
    let pick = |what: &str, matches: &dyn Fn(&PackagePrice) -> bool| {
        prices
            .iter()
            .find(|p| matches(p))
            .map(|p| p.id)
            .ok_or_else(|| {
                CpiError::Configuration(format!("no {what} price for {}", describe(order)))
            })
    };

    let mut ids = vec![
        pick("storage service", &|p| p.in_category("storage_as_a_service"))?,
        pick("block storage", &|p| p.in_category("storage_block"))?,
    ];
    match order.iops {
        Some(iops) => {
            let iops = u64::from(iops);
            ids.push(pick("storage space", &|p| {
                p.in_category("performance_storage_space")
                    && p.item_covers(size)
                    && p.capacity_restriction_type.as_deref() != Some("STORAGE_TIER_LEVEL")
            })?);
            ids.push(pick("IOPS", &|p| {
                p.in_category("performance_storage_iops")
                    && p.item_covers(iops)
                    && p.restriction_covers("STORAGE_SPACE", size)
            })?);
        }
        None => {
            ids.push(pick("endurance tier", &|p| {
                p.in_category("storage_tier_level") && p.item.key_name == DEFAULT_TIER
            })?);
            ids.push(pick("storage space", &|p| {
                p.in_category("performance_storage_space")
                    && p.item_covers(size)
                    && p.restriction_covers("STORAGE_TIER_LEVEL", DEFAULT_TIER_LEVEL)
            })?);
        }
    }
    Ok(ids)
}

fn describe(order: &DiskOrder) -> String {
    match order.iops {
        Some(iops) => format!("a {}GB volume at {iops} IOPS", order.size_gb),
        None => format!("a {}GB volume", order.size_gb),
    }
}

fn allowed_method(kind: VmKind, allow: bool) -> &'static str {
    match (kind, allow) {
        (VmKind::VirtualGuest, true) => "allowAccessFromVirtualGuest",
        (VmKind::VirtualGuest, false) => "removeAccessFromVirtualGuest",
        (VmKind::BareMetal, true) => "allowAccessFromHardware",
        (VmKind::BareMetal, false) => "removeAccessFromHardware",
    }
}

// ── Calls ────────────────────────────────────────────────────────────────────

impl SoftLayerClient {
    pub(super) async fn volume(&self, id: u64) -> Result<Option<DiskHandle>> {
        let record: Option<VolumeRecord> = self
            .get(&format!("SoftLayer_Network_Storage/{id}"), VOLUME_MASK, None)
            .await?;
        Ok(record.map(VolumeRecord::into_handle))
    }

    /// Places the order, then waits for the volume to appear on the account
    /// with a target address.
    pub(super) async fn order_volume(&self, order: &DiskOrder) -> Result<DiskHandle> {
        let prices: Vec<PackagePrice> = self
            .get(
                &format!("SoftLayer_Product_Package/{STORAGE_PACKAGE}/getItemPrices"),
                PRICE_MASK,
                None,
            )
            .await?
            .unwrap_or_default();
        let price_ids = select_prices(&prices, order)?;

        let mut container = json!({
            "complexType": "SoftLayer_Container_Product_Order_Network_Storage_AsAService",
            "packageId": STORAGE_PACKAGE,
            "location": order.datacenter,
            "quantity": 1,
            "volumeSize": order.size_gb,
            "osFormatType": { "keyName": "LINUX" },
            "prices": price_ids.iter().map(|id| json!({ "id": id })).collect::<Vec<_>>(),
        });
        if let Some(iops) = order.iops {
            container["iops"] = json!(iops);
        }
        let receipt: OrderReceipt = self
            .post("SoftLayer_Product_Order/placeOrder", json!([container]))
            .await
            .with_context(|| format!("ordering {}", describe(order)))?;
        tracing::info!(order_id = receipt.order_id, size_gb = order.size_gb, "volume ordered");

        self.wait_for_order(receipt.order_id).await
    }

    async fn wait_for_order(&self, order_id: u64) -> Result<DiskHandle> {
        let filter = json!({
            "iscsiNetworkStorage": {
                "billingItem": { "orderItem": { "order": { "id": { "operation": order_id } } } }
            }
        });
        let filter = &filter;
        poll_until(
            &format!("volume of order {order_id}"),
            self.order_timeout,
            self.order_interval,
            move || async move {
                let found: Vec<VolumeRecord> = self
                    .get("SoftLayer_Account/getIscsiNetworkStorage", VOLUME_MASK, Some(filter))
                    .await?
                    .unwrap_or_default();
                let volume = found
                    .into_iter()
                    .find(|v| !v.service_resource_backend_ip_address.is_empty());
                if volume.is_none() {
                    tracing::debug!(order_id, "volume not provisioned yet");
                }
                Ok(volume.map(VolumeRecord::into_handle))
            },
        )
        .await
    }

    pub(super) async fn cancel_volume(&self, disk: &DiskHandle) -> Result<()> {
        let billing_item = disk.billing_item_id.ok_or_else(|| {
            CpiError::NotSupported(format!("cancelling disk '{}' without a billing item", disk.id))
        })?;
        let _: Value = self
            .post(
                &format!("SoftLayer_Billing_Item/{billing_item}/cancelItem"),
                json!([true, false, "No longer needed", ""]),
            )
            .await
            .context("cancelling volume billing item")?;
        Ok(())
    }

    pub(super) async fn allowed_credential(
        &self,
        vm: &VmHandle,
        disk: &DiskHandle,
    ) -> Result<Option<HostCredential>> {
        let method = match vm.kind {
            VmKind::VirtualGuest => "getAllowedVirtualGuests",
            VmKind::BareMetal => "getAllowedHardware",
        };
        let allowed: Vec<AllowedRecord> = self
            .get(
                &format!("SoftLayer_Network_Storage/{}/{method}", disk.id),
                "mask[id,allowedHost[name,credential[username,password]]]",
                None,
            )
            .await?
            .unwrap_or_default();
        Ok(allowed
            .into_iter()
            .find(|a| a.id == vm.id)
            .and_then(|a| a.allowed_host)
            .and_then(|host| {
                let cred = host.credential?;
                Some(HostCredential {
                    initiator_name: host.name,
                    username: cred.username,
                    password: cred.password,
                })
            }))
    }

    pub(super) async fn set_access(
        &self,
        vm: &VmHandle,
        disk: &DiskHandle,
        allow: bool,
    ) -> Result<()> {
        let method = allowed_method(vm.kind, allow);
        let _: Value = self
            .post(
                &format!("SoftLayer_Network_Storage/{}/{method}", disk.id),
                json!([{ "id": vm.id }]),
            )
            .await
            .with_context(|| format!("{method} for VM '{}'", vm.id))?;
        Ok(())
    }
}
