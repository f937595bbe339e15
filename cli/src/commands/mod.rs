//! Method dispatch: one request in, one result value out.

pub mod args;
pub mod disk;
pub mod response;
pub mod stemcell;
pub mod vm;

use anyhow::Result;
use cpi_common::Request;
use serde_json::{Value, json};

use crate::application::ports::{CloudApi, RemoteRunner, SettingsStore};
use crate::application::services::Ports;

pub use args::{Args, CommandError};
pub use response::into_response;

/// Stemcell formats this CPI accepts.
pub const STEMCELL_FORMATS: [&str; 1] = ["softlayer-light"];

/// Runs the method named by `request`.
///
/// # Errors
///
/// Returns [`CommandError::NotImplemented`] for unknown methods,
/// [`CommandError::BadArgument`] for malformed arguments, or the failing
/// operation's error.
pub async fn dispatch<C, R, S>(ports: Ports<'_, C, R, S>, request: &Request) -> Result<Value>
where
    C: CloudApi,
    R: RemoteRunner,
    S: SettingsStore,
{
    let method = request.method.as_str();
    let args = Args::new(method, &request.arguments);
    tracing::info!(method, "dispatching");
    match method {
        "info" => Ok(json!({ "stemcell_formats": STEMCELL_FORMATS })),
        "create_stemcell" => stemcell::create_stemcell(ports.cloud, &args).await,
        "delete_stemcell" => stemcell::delete_stemcell(&args),
        "create_vm" => vm::create_vm(ports, &args).await,
        "delete_vm" => vm::delete_vm(ports, &args).await,
        "has_vm" => vm::has_vm(ports.cloud, &args).await,
        "reboot_vm" => vm::reboot_vm(ports.cloud, &args).await,
        "set_vm_metadata" => vm::set_vm_metadata(ports.cloud, &args).await,
        "configure_networks" => vm::configure_networks(ports, &args).await,
        "create_disk" => disk::create_disk(ports.cloud, &args).await,
        "delete_disk" => disk::delete_disk(ports.cloud, &args).await,
        "has_disk" => disk::has_disk(ports.cloud, &args).await,
        "attach_disk" => disk::attach_disk(ports, &args).await,
        "detach_disk" => disk::detach_disk(ports, &args).await,
        "get_disks" => disk::get_disks(ports, &args).await,
        other => Err(CommandError::NotImplemented(other.to_string()).into()),
    }
}
