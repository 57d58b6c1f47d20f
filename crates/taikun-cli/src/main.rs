//! Taikun reconcile CLI
//!
//! `taikun <create|read|update|delete> <kind> [--id ID] [--file desired.json]`
//!
//! Logs go to stderr; stdout carries only the observed-state record. The
//! process exits `1` for caller errors, `2` for platform errors, `3` for
//! authentication failures and `4` for timeouts.

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use taikun_cli::args::{Cli, usage_exit_code};
use taikun_cli::commands;
use taikun_core::config::load_config;
use taikun_core::tracing_init::init_tracing;
use taikun_reconcile::Platform;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(usage_exit_code(&err));
        }
    };
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err
                .downcast_ref::<taikun_core::Error>()
                .map_or(1, taikun_core::Error::exit_code);
            let _ = writeln!(io::stderr(), "error: {err:#}");
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_config(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    init_tracing(&config.logging.level, config.logging.json);
    info!(version = env!("CARGO_PKG_VERSION"), api = %config.api.base_url, "Starting taikun");

    let cancel = CancellationToken::new();
    let platform = Platform::from_config(&config)?.with_cancellation(cancel.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight work");
            cancel.cancel();
        }
    });

    let value = commands::run(&cli.command, platform).await?;
    let mut out = io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, &value)?;
    writeln!(out)?;
    Ok(())
}
