//! Domain layer: pure business logic, types, and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, or `std::process`.
//! All functions are synchronous and take data in, returning data out.

pub mod agent_env;
pub mod config;
pub mod devices;
pub mod error;
pub mod iscsi;
pub mod network;
pub mod storage;
pub mod vm;

pub use config::CpiConfig;
pub use error::{CpiError, DeviceError, NetworkError};
