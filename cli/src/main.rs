//! SoftLayer CPI entry point: one request envelope on stdin, one response
//! envelope on stdout.

use std::process::ExitCode;

use clap::Parser;
use softlayer_cpi::cli::Cli;
use softlayer_cpi::commands::response;
use softlayer_cpi::infra::logging::{self, LogBuffer};
use tokio::io::AsyncReadExt;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let log = LogBuffer::new();
    if let Err(e) = logging::init(&log) {
        eprintln!("Error: {e:#}");
    }
    let cli = Cli::parse();

    let mut input = String::new();
    let response = match tokio::io::stdin().read_to_string(&mut input).await {
        Ok(_) => cli.run(&input, &log).await,
        Err(e) => {
            let err = anyhow::Error::new(e).context("reading request from stdin");
            response::invalid_invocation(&err, log.contents())
        }
    };

    match serde_json::to_string(&response) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: cannot encode response: {e}");
            ExitCode::FAILURE
        }
    }
}
