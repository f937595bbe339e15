//! Settings store backends. The backend is chosen once per invocation: the
//! registry when it is configured, the VM's filesystem otherwise.

pub mod filesystem;
pub mod registry;

use anyhow::Result;
use cpi_common::AgentEnv;

use crate::application::ports::{RemoteRunner, SettingsStore};
use crate::domain::CpiConfig;
use crate::domain::vm::VmHandle;

pub use filesystem::{FilesystemStore, USER_DATA_PATH};
pub use registry::RegistryStore;

pub enum SettingsBackend<'a, R> {
    Registry(RegistryStore),
    Filesystem(FilesystemStore<'a, R>),
}

impl<'a, R: RemoteRunner> SettingsBackend<'a, R> {
    /// # Errors
    ///
    /// Returns an error if the registry HTTP client cannot be built.
    pub fn from_config(config: &CpiConfig, remote: &'a R) -> Result<Self> {
        match &config.registry {
            Some(registry) => {
                tracing::debug!(endpoint = %registry.endpoint(), "using registry settings store");
                Ok(Self::Registry(RegistryStore::new(
                    registry,
                    config.cloud.request_timeout(),
                )?))
            }
            None => {
                tracing::debug!("using filesystem settings store");
                Ok(Self::Filesystem(FilesystemStore::new(
                    remote,
                    &config.ssh.user,
                    &config.settings,
                )))
            }
        }
    }
}

impl<R: RemoteRunner> SettingsStore for SettingsBackend<'_, R> {
    async fn fetch(&self, vm: &VmHandle) -> Result<AgentEnv> {
        match self {
            Self::Registry(store) => store.fetch(vm).await,
            Self::Filesystem(store) => store.fetch(vm).await,
        }
    }

    async fn update(&self, vm: &VmHandle, env: &AgentEnv) -> Result<()> {
        match self {
            Self::Registry(store) => store.update(vm, env).await,
            Self::Filesystem(store) => store.update(vm, env).await,
        }
    }

    async fn delete(&self, vm: &VmHandle) -> Result<()> {
        match self {
            Self::Registry(store) => store.delete(vm).await,
            Self::Filesystem(store) => store.delete(vm).await,
        }
    }
}
