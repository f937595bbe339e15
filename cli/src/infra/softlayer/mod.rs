//! `CloudApi` over the SoftLayer REST API.
//!
//! Every call is `{endpoint}/{Service}/{id}/{method}.json` with basic auth.
//! Object masks limit responses to the fields mapped here. A 404 on a lookup
//! is `None`; connect and timeout failures are transient.

mod guest;
mod storage;

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::application::ports::CloudApi;
use crate::domain::config::{CloudConfig, DiskConfig};
use crate::domain::network::NicInventory;
use crate::domain::storage::{DiskHandle, DiskOrder, HostCredential};
use crate::domain::vm::{HostActivity, InstanceTemplate, Stemcell, Vlan, VmHandle};
use crate::infra::http::transport_error;

pub struct SoftLayerClient {
    http: reqwest::Client,
    endpoint: String,
    username: String,
    api_key: String,
    /// Bounds the wait for an ordered volume to show up on the account.
    order_timeout: Duration,
    order_interval: Duration,
}

/// Error document the API returns with non-2xx responses.
#[derive(Debug, Deserialize)]
struct ApiError {
    error: String,
    #[serde(default)]
    code: String,
}

impl SoftLayerClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(cloud: &CloudConfig, disk: &DiskConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cloud.request_timeout())
            .build()
            .context("building cloud API HTTP client")?;
        Ok(Self {
            http,
            endpoint: cloud.endpoint.trim_end_matches('/').to_string(),
            username: cloud.username.clone(),
            api_key: cloud.api_key.clone(),
            order_timeout: disk.timeout(),
            order_interval: disk.poll_interval(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}.json", self.endpoint)
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<Option<reqwest::Response>> {
        let resp = req
            .basic_auth(&self.username, Some(&self.api_key))
            .send()
            .await
            .map_err(|e| transport_error(&e, what))?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status.is_success() {
            return Ok(Some(resp));
        }
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiError>(&body)
            .map_or_else(|_| body.trim().to_string(), |e| format!("{} ({})", e.error, e.code));
        anyhow::bail!("{what} returned {status}: {message}")
    }

    /// GET `path`; `Ok(None)` on 404.
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        mask: &str,
        filter: Option<&Value>,
    ) -> Result<Option<T>> {
        let mut req = self.http.get(self.url(path));
        if !mask.is_empty() {
            req = req.query(&[("objectMask", mask)]);
        }
        if let Some(filter) = filter {
            req = req.query(&[("objectFilter", filter.to_string())]);
        }
        let what = format!("GET {path}");
        match self.send(req, &what).await? {
            Some(resp) => Ok(Some(
                resp.json().await.with_context(|| format!("decoding {what}"))?,
            )),
            None => Ok(None),
        }
    }

    /// POST `parameters` to `path`; a 404 is an error.
    async fn post<T: DeserializeOwned>(&self, path: &str, parameters: Value) -> Result<T> {
        let what = format!("POST {path}");
        let req = self
            .http
            .post(self.url(path))
            .json(&json!({ "parameters": parameters }));
        let resp = self
            .send(req, &what)
            .await?
            .with_context(|| format!("{what} returned 404 Not Found"))?;
        resp.json().await.with_context(|| format!("decoding {what}"))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let what = format!("DELETE {path}");
        self.send(self.http.delete(self.url(path)), &what)
            .await?
            .with_context(|| format!("{what} returned 404 Not Found"))?;
        Ok(())
    }
}

impl CloudApi for SoftLayerClient {
    async fn get_stemcell(&self, id: u64) -> Result<Option<Stemcell>> {
        self.stemcell(id).await
    }

    async fn get_vlan(&self, id: u32) -> Result<Option<Vlan>> {
        self.vlan(id).await
    }

    async fn create_instance(&self, template: &InstanceTemplate) -> Result<VmHandle> {
        self.create_guest(template).await
    }

    async fn find_vm(&self, id: u64) -> Result<Option<VmHandle>> {
        self.host(id).await
    }

    async fn find_vm_by_ip(&self, ip: &str) -> Result<Option<VmHandle>> {
        self.host_by_ip(ip).await
    }

    async fn host_activity(&self, vm: &VmHandle) -> Result<HostActivity> {
        self.activity(vm).await
    }

    async fn reload_os(&self, vm: &VmHandle, stemcell: &Stemcell) -> Result<()> {
        self.reload(vm, stemcell).await
    }

    async fn attach_ephemeral_disk(&self, vm: &VmHandle, size_gb: u32) -> Result<()> {
        self.upgrade_ephemeral(vm, size_gb).await
    }

    async fn nic_inventory(&self, vm: &VmHandle) -> Result<NicInventory> {
        self.network_components(vm).await
    }

    async fn set_tags(&self, vm: &VmHandle, tags: &[String]) -> Result<()> {
        self.tag(vm, tags).await
    }

    async fn reboot(&self, vm: &VmHandle) -> Result<()> {
        self.soft_reboot(vm).await
    }

    async fn cancel_instance(&self, vm: &VmHandle) -> Result<()> {
        self.cancel_guest(vm).await
    }

    async fn find_disk(&self, id: u64) -> Result<Option<DiskHandle>> {
        self.volume(id).await
    }

    async fn order_disk(&self, order: &DiskOrder) -> Result<DiskHandle> {
        self.order_volume(order).await
    }

    async fn cancel_disk(&self, disk: &DiskHandle) -> Result<()> {
        self.cancel_volume(disk).await
    }

    async fn allowed_host_credential(
        &self,
        vm: &VmHandle,
        disk: &DiskHandle,
    ) -> Result<Option<HostCredential>> {
        self.allowed_credential(vm, disk).await
    }

    async fn authorize_host(&self, vm: &VmHandle, disk: &DiskHandle) -> Result<()> {
        self.set_access(vm, disk, true).await
    }

    async fn deauthorize_host(&self, vm: &VmHandle, disk: &DiskHandle) -> Result<()> {
        self.set_access(vm, disk, false).await
    }
}
