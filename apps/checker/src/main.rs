#![warn(clippy::all, clippy::pedantic)]

mod config;
mod error;

use std::process;

use chainprobe::{Ledger, MatrixConnector, Severity, exit_with, run_probe};
use clap::{CommandFactory, Parser, error::ErrorKind};
use tracing::{debug, info};

use config::{Cli, Summary};

/// Exit code for unusable invocations, before any probing happened
const USAGE_EXIT_CODE: i32 = 1;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    logger::init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            let _ = err.print();
            process::exit(USAGE_EXIT_CODE);
        }
    };

    let probe = match config::resolve(cli) {
        Ok(probe) => probe,
        Err(err) => usage_error(&err),
    };
    debug!("{}", Summary(&probe));

    let connector = match MatrixConnector::new() {
        Ok(connector) => connector,
        Err(err) => {
            let mut ledger = Ledger::new();
            ledger.record(Severity::Unknown, format!("Could not set up HTTP client: {err:#}"));
            exit_with(ledger)
        }
    };

    let report = run_probe(&connector, &probe).await;
    info!("Probe finished: {:?} ({})", report.outcome, report.severity());

    exit_with(report.ledger)
}

fn usage_error(err: &error::ConfigError) -> ! {
    eprintln!("error: {err}\n");
    eprintln!("{}", Cli::command().render_help());
    process::exit(USAGE_EXIT_CODE)
}
