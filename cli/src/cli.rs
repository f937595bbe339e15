//! CLI argument parsing with clap derive

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use cpi_common::{Request, Response};

use crate::app::AppContext;
use crate::commands::{self, response};
use crate::infra::config::{self, CONFIG_ENV};
use crate::infra::logging::LogBuffer;

/// SoftLayer CPI: reads one request envelope on stdin, writes one response
/// envelope on stdout
#[derive(Parser, Debug)]
#[command(name = "cpi", version)]
pub struct Cli {
    /// Path to the YAML or JSON configuration file
    #[arg(long, env = CONFIG_ENV)]
    pub config: PathBuf,
}

impl Cli {
    /// Handles one request. Every failure is reported inside the returned
    /// envelope; `log` supplies the captured log text.
    pub async fn run(self, input: &str, log: &LogBuffer) -> Response {
        let prepared = self.prepare(input);
        let (request, app) = match prepared {
            Ok(parts) => parts,
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "invalid invocation");
                return response::invalid_invocation(&err, log.contents());
            }
        };

        let result = match app.settings() {
            Ok(settings) => commands::dispatch(app.ports(&settings), &request).await,
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            tracing::error!(
                method = %request.method,
                error = %format!("{err:#}"),
                "request failed"
            );
        }
        response::into_response(result, log.contents())
    }

    fn prepare(&self, input: &str) -> Result<(Request, AppContext)> {
        let request: Request =
            serde_json::from_str(input).context("decoding request envelope")?;
        let config = config::load(&self.config)?;
        let app = AppContext::new(config)?;
        Ok((request, app))
    }
}
