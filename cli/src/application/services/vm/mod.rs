//! Application services for the VM lifecycle.
//!
//! `lifecycle` drives creation, reload and deletion; `capabilities` decides
//! which operations a host supports based on its kind.

pub mod capabilities;
pub mod lifecycle;

pub use capabilities::{Vm, VmCapabilities};
pub use lifecycle::{CreateVmRequest, create_vm, delete_vm, find_stemcell, find_vm, has_vm};
