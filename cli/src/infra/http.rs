//! Shared HTTP error classification.

use crate::domain::error::CpiError;

/// Maps a `reqwest` send error: connect and timeout failures are transient,
/// anything else is a plain error.
pub fn transport_error(err: &reqwest::Error, what: &str) -> anyhow::Error {
    if err.is_connect() || err.is_timeout() {
        CpiError::TransientRemote(format!("{what}: {err}")).into()
    } else {
        anyhow::anyhow!("{what}: {err}")
    }
}
