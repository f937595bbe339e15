//! Application layer: port trait definitions and use-case orchestration.
//!
//! This module depends only on `crate::domain` and `cpi_common`, never on
//! `crate::infra` or `crate::commands`.

pub mod ports;
pub mod services;

pub use ports::{CloudApi, CommandOutput, RemoteRunner, SettingsStore};
pub use services::Ports;
