//! Helpers over the remote command runner.

use anyhow::{Result, bail};

use crate::application::ports::RemoteRunner;
use crate::domain::vm::RemoteHost;

/// Runs `script` on `host` and returns its stdout, failing on a non-zero exit.
///
/// # Errors
///
/// Returns an error naming `step` if the runner fails or the script exits
/// non-zero.
pub async fn exec_checked(
    remote: &impl RemoteRunner,
    host: &RemoteHost,
    step: &str,
    script: &str,
) -> Result<String> {
    tracing::debug!(host = %host.address, step, "running remote script");
    let output = remote.exec(host, script).await?;
    if !output.success() {
        bail!(
            "{step} failed on {} with exit status {}: {}",
            host.address,
            output.status,
            output.stderr.trim()
        );
    }
    Ok(output.stdout)
}

/// Runs `script` on `host` and reports whether it exited zero.
///
/// # Errors
///
/// Returns an error only if the runner itself fails.
pub async fn exec_succeeds(
    remote: &impl RemoteRunner,
    host: &RemoteHost,
    script: &str,
) -> Result<bool> {
    Ok(remote.exec(host, script).await?.success())
}
