//! `RemoteRunner` over the system `ssh` client.
//!
//! Password authentication goes through `sshpass -e`, which reads the
//! password from `SSHPASS` so it never appears on a command line.

use std::path::Path;
use std::process::Output;
use std::time::Duration;

use anyhow::{Result, bail};

use crate::application::ports::{CommandOutput, RemoteRunner};
use crate::domain::error::CpiError;
use crate::domain::iscsi::shell_quote;
use crate::domain::vm::RemoteHost;
use crate::infra::command_runner::{CommandRunner, Invocation};

/// Exit status `ssh` uses for its own failures (connection, auth).
const SSH_FAILURE: i32 = 255;

const SSH_OPTIONS: [&str; 5] = [
    "StrictHostKeyChecking=no",
    "UserKnownHostsFile=/dev/null",
    "LogLevel=ERROR",
    "ConnectTimeout=30",
    "NumberOfPasswordPrompts=1",
];

pub struct SshRunner<R> {
    runner: R,
    timeout: Duration,
}

impl<R: CommandRunner> SshRunner<R> {
    pub fn new(runner: R, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    fn invocation<'a>(&self, host: &RemoteHost, script: &str) -> Invocation<'a> {
        let mut inv = Invocation::new("sshpass", self.timeout)
            .env("SSHPASS", host.password.clone())
            .arg("-e")
            .arg("ssh");
        for option in SSH_OPTIONS {
            inv = inv.arg("-o").arg(option);
        }
        inv.arg(format!("{}@{}", host.user, host.address))
            .arg("--")
            .arg(script)
    }

    async fn run(&self, host: &RemoteHost, inv: &Invocation<'_>) -> Result<Output> {
        let output = self.runner.run(inv).await?;
        if output.status.code() == Some(SSH_FAILURE) {
            return Err(CpiError::TransientRemote(format!(
                "ssh to {} failed: {}",
                host.address,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
            .into());
        }
        Ok(output)
    }
}

impl<R: CommandRunner> RemoteRunner for SshRunner<R> {
    async fn exec(&self, host: &RemoteHost, script: &str) -> Result<CommandOutput> {
        let output = self.run(host, &self.invocation(host, script)).await?;
        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn upload(&self, host: &RemoteHost, path: &str, contents: &[u8]) -> Result<()> {
        let dir = Path::new(path)
            .parent()
            .map_or_else(|| "/".to_string(), |p| p.to_string_lossy().into_owned());
        let script = format!("mkdir -p {} && cat > {}", shell_quote(&dir), shell_quote(path));
        let inv = self.invocation(host, &script).stdin(contents);
        let output = self.run(host, &inv).await?;
        if !output.status.success() {
            bail!(
                "writing {path} on {} failed: {}",
                host.address,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        tracing::debug!(host = %host.address, path, bytes = contents.len(), "uploaded file");
        Ok(())
    }

    async fn download(&self, host: &RemoteHost, path: &str) -> Result<Vec<u8>> {
        let script = format!("cat {}", shell_quote(path));
        let output = self.run(host, &self.invocation(host, &script)).await?;
        if !output.status.success() {
            bail!(
                "reading {path} on {} failed: {}",
                host.address,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.stdout)
    }
}
