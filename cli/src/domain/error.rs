//! Typed domain error enums.
//!
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator. Stage names are attached by callers with
//! `anyhow::Context`; [`find_cpi_error`] recovers the typed error from any
//! depth of that context chain.

use thiserror::Error;

// ── CPI error taxonomy ────────────────────────────────────────────────────────

/// Error classes every CPI operation reports through.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CpiError {
    /// Ambiguous or invalid network or cloud-property input.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A VM, disk or stemcell does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Connectivity or timeout failure talking to SSH, HTTP or the cloud API.
    #[error("remote call failed: {0}")]
    TransientRemote(String),

    /// A bounded wait elapsed.
    #[error("timed out after {elapsed_secs}s waiting for {what}")]
    Timeout { what: String, elapsed_secs: u64 },

    /// The operation has no meaning for this kind of resource.
    #[error("{0} is not supported")]
    NotSupported(String),
}

impl CpiError {
    /// Only transient remote failures are worth retrying by re-invocation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientRemote(_))
    }
}

/// Finds the first [`CpiError`] in an error's context chain.
#[must_use]
pub fn find_cpi_error(err: &anyhow::Error) -> Option<&CpiError> {
    err.chain().find_map(|e| e.downcast_ref::<CpiError>())
}

/// Returns `true` when `err` wraps [`CpiError::NotFound`].
#[must_use]
pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(find_cpi_error(err), Some(CpiError::NotFound(_)))
}

/// Returns `true` when `err` wraps [`CpiError::NotSupported`].
#[must_use]
pub fn is_not_supported(err: &anyhow::Error) -> bool {
    matches!(find_cpi_error(err), Some(CpiError::NotSupported(_)))
}

// ── Network normalization errors ──────────────────────────────────────────────

/// Reasons a declared network set cannot be bound to a VM's NICs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("at most one vip network is allowed, found {0}")]
    MultipleVips(usize),

    #[error("network '{network}' declares VLAN {vlan} which matches no NIC of the VM")]
    UnmatchedVlan { network: String, vlan: String },

    #[error("multiple {0} dynamic networks are bound to the same NIC")]
    MultipleDynamic(&'static str),

    #[error("dynamic networks were declared but none is bound to the private VLAN")]
    MissingPrivateDynamic,

    #[error("manual network '{0}' has no IP address")]
    MissingIp(String),

    #[error("network '{network}' has an invalid IPv4 address '{ip}'")]
    InvalidIp { network: String, ip: String },

    #[error("network '{network}': no subnet of VLAN {vlan} contains {ip}")]
    NoContainingSubnet {
        network: String,
        vlan: u32,
        ip: String,
    },

    #[error("network name '{0}' is reserved for a synthesized dynamic network")]
    ReservedName(String),
}

impl From<NetworkError> for CpiError {
    fn from(err: NetworkError) -> Self {
        CpiError::Configuration(err.to_string())
    }
}

// ── Device discovery errors ───────────────────────────────────────────────────

/// Guard conditions hit while resolving a newly attached iSCSI device.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("found {count} iSCSI devices ({devices}), at most {limit} are supported")]
    TooManyDevices {
        count: usize,
        limit: usize,
        devices: String,
    },

    #[error(
        "{count} new devices appeared at once ({devices}), cannot tell which one is the volume"
    )]
    Ambiguous { count: usize, devices: String },
}
