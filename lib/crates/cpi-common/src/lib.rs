//! Wire types shared by every layer of the SoftLayer CPI.
//!
//! Everything here is plain serde data: the guest agent's bootstrap settings
//! (`AgentEnv`), the network declarations the fleet manager sends, and the
//! request/response envelope of a single CPI invocation.

pub mod agent_env;
pub mod envelope;
pub mod network;

pub use agent_env::{AgentEnv, Blobstore, Disks, VmRef};
pub use envelope::{ErrorType, Request, Response, ResponseError};
pub use network::{Network, NetworkCloudProperties, NetworkType, Networks, Route};
