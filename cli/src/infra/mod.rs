//! Infrastructure layer: concrete implementations of application port traits.
//!
//! This module contains all I/O-performing code: process execution, SSH, the
//! cloud REST API, the settings stores, configuration loading and logging.
//!
//! Imports from `crate::domain` and `crate::application::ports` are allowed.
//! Imports from `crate::commands` are forbidden.

pub mod command_runner;
pub mod config;
pub mod http;
pub mod logging;
pub mod settings;
pub mod softlayer;
pub mod ssh;
