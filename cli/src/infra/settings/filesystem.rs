//! Filesystem settings store: the settings file lives on the VM itself and is
//! transferred with the remote runner.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cpi_common::AgentEnv;

use crate::application::ports::{RemoteRunner, SettingsStore};
use crate::domain::config::SettingsConfig;
use crate::domain::error::CpiError;
use crate::domain::vm::VmHandle;

/// Where the agent reads its settings on the guest.
pub const USER_DATA_PATH: &str = "/var/vcap/bosh/user_data.json";

pub struct FilesystemStore<'a, R> {
    remote: &'a R,
    user: String,
    attempts: u32,
    delay: Duration,
}

impl<'a, R: RemoteRunner> FilesystemStore<'a, R> {
    pub fn new(remote: &'a R, user: &str, config: &SettingsConfig) -> Self {
        Self {
            remote,
            user: user.to_string(),
            attempts: config.retry_count.max(1),
            delay: config.retry_delay(),
        }
    }
}

impl<R: RemoteRunner> SettingsStore for FilesystemStore<'_, R> {
    async fn fetch(&self, vm: &VmHandle) -> Result<AgentEnv> {
        let host = vm.remote_host(&self.user);
        let raw = self
            .remote
            .download(&host, USER_DATA_PATH)
            .await
            .context("downloading settings")?;
        serde_json::from_slice(&raw).context("decoding agent settings")
    }

    /// The agent may not accept connections right after boot, so uploads are
    /// retried with a fixed delay between attempts.
    async fn update(&self, vm: &VmHandle, env: &AgentEnv) -> Result<()> {
        let host = vm.remote_host(&self.user);
        let body = serde_json::to_vec_pretty(env).context("encoding agent settings")?;

        let mut last_err = anyhow!("no upload attempted");
        for attempt in 1..=self.attempts {
            match self.remote.upload(&host, USER_DATA_PATH, &body).await {
                Ok(()) => {
                    tracing::debug!(vm_id = vm.id, attempt, "settings uploaded");
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(
                        vm_id = vm.id,
                        attempt,
                        attempts = self.attempts,
                        error = %format!("{err:#}"),
                        "settings upload failed"
                    );
                    last_err = err;
                }
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.delay).await;
            }
        }
        Err(last_err.context(format!(
            "uploading settings failed after {} attempts",
            self.attempts
        )))
    }

    async fn delete(&self, vm: &VmHandle) -> Result<()> {
        Err(CpiError::NotSupported(format!(
            "deleting filesystem settings of VM '{}'",
            vm.id
        ))
        .into())
    }
}
