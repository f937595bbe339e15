//! Loads the CPI configuration file and applies secret overrides from the
//! environment.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::domain::config::CpiConfig;
use crate::domain::error::CpiError;

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "SOFTLAYER_CPI_CONFIG";

/// Prefix of the secret override variables.
pub const ENV_PREFIX: &str = "SOFTLAYER_CPI_";

/// Secrets that may be supplied as `SOFTLAYER_CPI_<FIELD>` instead of living
/// in the file.
#[derive(Debug, Default, Deserialize)]
struct SecretOverrides {
    username: Option<String>,
    api_key: Option<String>,
    registry_password: Option<String>,
}

/// Reads `path`, applies overrides from the process environment and
/// validates the result.
///
/// # Errors
///
/// Returns [`CpiError::Configuration`] if the file cannot be read or parsed,
/// or fails validation.
pub fn load(path: &Path) -> Result<CpiConfig> {
    load_with_env(path, std::env::vars())
}

/// Same as [`load`] with an explicit environment.
///
/// # Errors
///
/// See [`load`].
pub fn load_with_env<I>(path: &Path, vars: I) -> Result<CpiConfig>
where
    I: IntoIterator<Item = (String, String)>,
{
    let content = std::fs::read_to_string(path).map_err(|e| {
        CpiError::Configuration(format!("cannot read {}: {e}", path.display()))
    })?;
    let mut config: CpiConfig = serde_yaml::from_str(&content).map_err(|e| {
        CpiError::Configuration(format!("cannot parse {}: {e}", path.display()))
    })?;

    let overrides: SecretOverrides = envy::prefixed(ENV_PREFIX)
        .from_iter(vars)
        .context("reading SOFTLAYER_CPI_* overrides")?;
    apply(&mut config, overrides);

    config.validate()?;
    tracing::debug!(
        path = %path.display(),
        registry = config.registry.is_some(),
        "configuration loaded"
    );
    Ok(config)
}

fn apply(config: &mut CpiConfig, overrides: SecretOverrides) {
    if let Some(username) = overrides.username {
        config.cloud.username = username;
    }
    if let Some(api_key) = overrides.api_key {
        config.cloud.api_key = api_key;
    }
    if let (Some(password), Some(registry)) =
        (overrides.registry_password, config.registry.as_mut())
    {
        registry.password = password;
    }
}
