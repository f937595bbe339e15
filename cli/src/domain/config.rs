//! Domain types and validators for CPI configuration.
//!
//! Pure functions only: no I/O, no async, no filesystem access. Loading the
//! file and applying environment overrides lives in `crate::infra::config`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::error::CpiError;

// ── Config schema ────────────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CpiConfig {
    pub cloud: CloudConfig,
    pub agent: AgentConfig,
    /// Registry connection info. Presence selects the registry settings store.
    pub registry: Option<RegistryConfig>,
    pub disk: DiskConfig,
    pub settings: SettingsConfig,
    pub vm: VmConfig,
    pub network: NetworkConfig,
    pub ssh: SshConfig,
}

/// Cloud API endpoint and static credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub username: String,
    pub api_key: String,
    pub endpoint: String,
    pub request_timeout_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            api_key: String::new(),
            endpoint: "https://api.softlayer.com/rest/v3.1".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl CloudConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Settings copied into every VM's agent environment.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AgentConfig {
    /// Message bus URL. A `0.0.0.0` host is rewritten to the VM's address.
    pub mbus: String,
    pub ntp: Vec<String>,
    pub blobstore: BlobstoreConfig,
    /// Initial password for the privileged account, plain or crypt hash.
    pub initial_password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BlobstoreConfig {
    pub provider: String,
    pub options: Map<String, Value>,
}

/// Registry settings store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: String::new(),
            port: 25777,
            username: String::new(),
            password: String::new(),
        }
    }
}

impl RegistryConfig {
    /// Base URL, e.g. `http://registry.example:25777`.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// Bounds for iSCSI device discovery and authorization waits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    pub attach_timeout_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            attach_timeout_secs: 300,
            poll_interval_secs: 5,
        }
    }
}

impl DiskConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.attach_timeout_secs)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Retry policy for the filesystem settings store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Total number of update attempts.
    pub retry_count: u32,
    pub retry_delay_secs: u64,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            retry_count: 10,
            retry_delay_secs: 5,
        }
    }
}

impl SettingsConfig {
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// VM provisioning behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    pub ready_timeout_secs: u64,
    pub ready_interval_secs: u64,
    pub max_hostname_length: usize,
    /// Reload an existing host when the declared dynamic network carries an IP.
    pub reuse_hosts: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            ready_timeout_secs: 3600,
            ready_interval_secs: 10,
            max_hostname_length: 63,
            reuse_hosts: true,
        }
    }
}

impl VmConfig {
    #[must_use]
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    #[must_use]
    pub fn ready_interval(&self) -> Duration {
        Duration::from_secs(self.ready_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Interface name prefix used for aliases (`eth` → `eth0`, `eth0:1`).
    pub interface_prefix: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface_prefix: "eth".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub user: String,
    pub command_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            command_timeout_secs: 120,
        }
    }
}

impl SshConfig {
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

// ── Validators ───────────────────────────────────────────────────────────────

fn invalid(key: &str, reason: &str) -> CpiError {
    CpiError::Configuration(format!("{key}: {reason}"))
}

impl CpiConfig {
    /// Validates the configuration after overrides have been applied.
    ///
    /// # Errors
    ///
    /// Returns [`CpiError::Configuration`] naming the first invalid key.
    pub fn validate(&self) -> Result<(), CpiError> {
        if self.cloud.username.is_empty() {
            return Err(invalid("cloud.username", "must be set"));
        }
        if self.cloud.api_key.is_empty() {
            return Err(invalid("cloud.api_key", "must be set"));
        }
        let endpoint = &self.cloud.endpoint;
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(invalid("cloud.endpoint", "must be an http(s) URL"));
        }
        if self.agent.mbus.is_empty() {
            return Err(invalid("agent.mbus", "must be set"));
        }
        if self.agent.blobstore.provider.is_empty() {
            return Err(invalid("agent.blobstore.provider", "must be set"));
        }
        if let Some(registry) = &self.registry {
            if registry.host.is_empty() {
                return Err(invalid("registry.host", "must be set"));
            }
            if registry.protocol != "http" && registry.protocol != "https" {
                return Err(invalid("registry.protocol", "must be http or https"));
            }
        }
        if self.disk.poll_interval_secs == 0 {
            return Err(invalid("disk.poll_interval_secs", "must be positive"));
        }
        if self.disk.poll_interval_secs > self.disk.attach_timeout_secs {
            return Err(invalid(
                "disk.poll_interval_secs",
                "must not exceed disk.attach_timeout_secs",
            ));
        }
        if self.settings.retry_count == 0 {
            return Err(invalid("settings.retry_count", "must be at least 1"));
        }
        if self.vm.ready_interval_secs == 0 {
            return Err(invalid("vm.ready_interval_secs", "must be positive"));
        }
        if !(1..=253).contains(&self.vm.max_hostname_length) {
            return Err(invalid("vm.max_hostname_length", "must be between 1 and 253"));
        }
        let prefix = &self.network.interface_prefix;
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid(
                "network.interface_prefix",
                "must be a non-empty alphanumeric string",
            ));
        }
        if self.ssh.user.is_empty() {
            return Err(invalid("ssh.user", "must be set"));
        }
        Ok(())
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────
