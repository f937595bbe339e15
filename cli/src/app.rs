//! Application context: the configuration and production adapters one
//! invocation runs against.

use anyhow::Result;

use crate::application::Ports;
use crate::domain::CpiConfig;
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::settings::SettingsBackend;
use crate::infra::softlayer::SoftLayerClient;
use crate::infra::ssh::SshRunner;

pub type Remote = SshRunner<TokioCommandRunner>;

pub struct AppContext {
    pub config: CpiConfig,
    pub cloud: SoftLayerClient,
    pub remote: Remote,
}

impl AppContext {
    /// Builds the adapters for a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the cloud API HTTP client cannot be built.
    pub fn new(config: CpiConfig) -> Result<Self> {
        let cloud = SoftLayerClient::new(&config.cloud, &config.disk)?;
        let remote = SshRunner::new(TokioCommandRunner, config.ssh.command_timeout());
        Ok(Self {
            config,
            cloud,
            remote,
        })
    }

    /// The settings store selected by the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry HTTP client cannot be built.
    pub fn settings(&self) -> Result<SettingsBackend<'_, Remote>> {
        SettingsBackend::from_config(&self.config, &self.remote)
    }

    pub fn ports<'a>(
        &'a self,
        settings: &'a SettingsBackend<'a, Remote>,
    ) -> Ports<'a, SoftLayerClient, Remote, SettingsBackend<'a, Remote>> {
        Ports::new(&self.cloud, &self.remote, settings, &self.config)
    }
}
