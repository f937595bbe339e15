//! Registry settings store: agent settings kept by an HTTP service.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use cpi_common::AgentEnv;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::application::ports::SettingsStore;
use crate::domain::config::RegistryConfig;
use crate::domain::error::CpiError;
use crate::domain::vm::VmHandle;
use crate::infra::http::transport_error;

/// Body of registry GET responses. The registry wraps the stored document as
/// a JSON string; PUT sends the bare document.
#[derive(Debug, Deserialize)]
struct SettingsBody {
    settings: String,
}

pub struct RegistryStore {
    client: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
}

impl RegistryStore {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &RegistryConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building registry HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint().trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn url(&self, vm: &VmHandle) -> String {
        format!("{}/instances/{}/settings", self.endpoint, vm.id)
    }

    fn request(&self, method: reqwest::Method, vm: &VmHandle) -> reqwest::RequestBuilder {
        let req = self.client.request(method, self.url(vm));
        if self.username.is_empty() {
            req
        } else {
            req.basic_auth(&self.username, Some(&self.password))
        }
    }
}

async fn ensure_success(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    bail!("registry {what} returned {status}: {}", body.trim());
}

impl SettingsStore for RegistryStore {
    async fn fetch(&self, vm: &VmHandle) -> Result<AgentEnv> {
        let resp = self
            .request(reqwest::Method::GET, vm)
            .send()
            .await
            .map_err(|e| transport_error(&e, "registry GET"))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(CpiError::NotFound(format!("registry settings for VM '{}'", vm.id)).into());
        }
        let body: SettingsBody = ensure_success(resp, "GET")
            .await?
            .json()
            .await
            .context("decoding registry response")?;
        serde_json::from_str(&body.settings).context("decoding agent settings")
    }

    async fn update(&self, vm: &VmHandle, env: &AgentEnv) -> Result<()> {
        let body = serde_json::to_vec(env).context("encoding agent settings")?;
        let resp = self
            .request(reqwest::Method::PUT, vm)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error(&e, "registry PUT"))?;
        ensure_success(resp, "PUT").await?;
        tracing::debug!(vm_id = vm.id, "registry settings updated");
        Ok(())
    }

    async fn delete(&self, vm: &VmHandle) -> Result<()> {
        let resp = self
            .request(reqwest::Method::DELETE, vm)
            .send()
            .await
            .map_err(|e| transport_error(&e, "registry DELETE"))?;
        ensure_success(resp, "DELETE").await?;
        tracing::debug!(vm_id = vm.id, "registry settings deleted");
        Ok(())
    }
}
