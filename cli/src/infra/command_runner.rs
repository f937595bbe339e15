//! Local process execution used by the SSH remote runner.
//!
//! `TokioCommandRunner` is the production implementation that uses tokio
//! for async process execution with guaranteed timeout and kill.

use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::domain::error::CpiError;

/// One process to run.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub program: &'a str,
    pub args: Vec<String>,
    /// Extra environment variables; values are never logged.
    pub env: Vec<(&'a str, String)>,
    pub stdin: Option<&'a [u8]>,
    pub timeout: Duration,
}

impl<'a> Invocation<'a> {
    #[must_use]
    pub fn new(program: &'a str, timeout: Duration) -> Self {
        Self {
            program,
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
            timeout,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: &'a str, value: impl Into<String>) -> Self {
        self.env.push((key, value.into()));
        self
    }

    #[must_use]
    pub fn stdin(mut self, input: &'a [u8]) -> Self {
        self.stdin = Some(input);
        self
    }
}

/// Abstracts process execution so the SSH runner can be tested without
/// spawning processes.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run a program to completion and capture its output.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned, and
    /// [`CpiError::TransientRemote`] if it exceeds its timeout. On timeout the
    /// child is killed.
    async fn run(&self, invocation: &Invocation<'_>) -> Result<Output>;
}

/// Production `CommandRunner`.
///
/// Uses `tokio::select!` with an explicit `child.kill()` so a timed-out
/// process is terminated rather than left running.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioCommandRunner;

impl CommandRunner for TokioCommandRunner {
    async fn run(&self, invocation: &Invocation<'_>) -> Result<Output> {
        let program = invocation.program;
        let mut child = tokio::process::Command::new(program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;

        let stdin_handle = child.stdin.take();
        let input = invocation.stdin.map(<[u8]>::to_vec).unwrap_or_default();
        let stdin_task = tokio::spawn(async move {
            if let Some(mut stdin) = stdin_handle {
                let _ = stdin.write_all(&input).await;
            }
        });

        let mut stdout_handle = child.stdout.take();
        let mut stderr_handle = child.stderr.take();

        tokio::select! {
            result = async {
                let (status, stdout, stderr) = tokio::join!(
                    child.wait(),
                    async {
                        let mut buf = Vec::new();
                        if let Some(ref mut h) = stdout_handle {
                            let _ = h.read_to_end(&mut buf).await;
                        }
                        buf
                    },
                    async {
                        let mut buf = Vec::new();
                        if let Some(ref mut h) = stderr_handle {
                            let _ = h.read_to_end(&mut buf).await;
                        }
                        buf
                    },
                );
                let _ = stdin_task.await;
                Ok(Output {
                    status: status.with_context(|| format!("waiting for {program}"))?,
                    stdout,
                    stderr,
                })
            } => result,
            () = tokio::time::sleep(invocation.timeout) => {
                let _ = child.kill().await;
                Err(CpiError::TransientRemote(format!(
                    "{program} timed out after {}s",
                    invocation.timeout.as_secs()
                ))
                .into())
            }
        }
    }
}
