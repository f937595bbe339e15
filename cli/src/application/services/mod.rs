//! Application services: use-case orchestration.
//!
//! Each service module implements a use-case by composing domain logic with
//! port trait calls. Services import only from `crate::domain` and
//! `crate::application::ports`, never from `crate::infra` or
//! `crate::commands`.

pub mod disk;
pub mod network;
pub mod remote;
pub mod vm;

#[cfg(test)]
pub(crate) mod test_support;

use crate::application::ports::{CloudApi, RemoteRunner, SettingsStore};
use crate::domain::CpiConfig;

/// The adapters and configuration one invocation runs against.
pub struct Ports<'a, C, R, S> {
    pub cloud: &'a C,
    pub remote: &'a R,
    pub settings: &'a S,
    pub config: &'a CpiConfig,
}

impl<'a, C, R, S> Ports<'a, C, R, S>
where
    C: CloudApi,
    R: RemoteRunner,
    S: SettingsStore,
{
    pub fn new(cloud: &'a C, remote: &'a R, settings: &'a S, config: &'a CpiConfig) -> Self {
        Self {
            cloud,
            remote,
            settings,
            config,
        }
    }
}

impl<C, R, S> Clone for Ports<'_, C, R, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C, R, S> Copy for Ports<'_, C, R, S> {}
