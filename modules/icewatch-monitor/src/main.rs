//! Minneapolis-area immigration enforcement activity monitor.
//!
//! Polls community and media sources, correlates reports that describe the
//! same incident, and dispatches corroborated NEW/UPDATE alerts to a chat
//! webhook.

mod app;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use icewatch_common::{apply_env_file, Config, IceWatchError};

use crate::app::ExitReason;

const EXIT_OK: u8 = 0;
const EXIT_CONFIG: u8 = 1;
const EXIT_STORE: u8 = 2;
const EXIT_SIGNAL: u8 = 130;

#[derive(Parser)]
#[command(name = "icewatch", about = "ICE activity monitor for the Minneapolis metro")]
struct Cli {
    /// Log alerts instead of dispatching them to the webhook.
    #[arg(long)]
    dry_run: bool,

    /// Override the log level.
    #[arg(long, value_parser = ["DEBUG", "INFO", "WARN", "ERROR"])]
    log_level: Option<String>,

    /// KEY=VALUE environment file applied before configuration loads.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        if let Err(e) = apply_env_file(path) {
            eprintln!("{e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    }
    if cli.dry_run {
        std::env::set_var("DRY_RUN", "true");
    }
    if let Some(level) = &cli.log_level {
        std::env::set_var("LOG_LEVEL", level);
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    init_logging(&config.log_level);
    info!("icewatch starting");
    config.log_summary();

    match app::run(config).await {
        Ok(ExitReason::Completed) => ExitCode::from(EXIT_OK),
        Ok(ExitReason::Signal) => ExitCode::from(EXIT_SIGNAL),
        Err(IceWatchError::Config(e)) => {
            error!(error = %e, "Fatal configuration error");
            ExitCode::from(EXIT_CONFIG)
        }
        Err(e) => {
            // Store failures and invariant violations are fail-fast; the
            // operator has to look before the process restarts.
            error!(error = %e, "Fatal error");
            ExitCode::from(EXIT_STORE)
        }
    }
}

fn init_logging(level: &str) {
    let directive = level.to_lowercase();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(directive.parse().unwrap_or_else(|_| "info".parse().unwrap())),
        )
        .init();
}
