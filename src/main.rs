#![forbid(unsafe_code)]

mod cli;
mod config;
mod constants;
mod coordinates;
mod daemon;
mod engine;
mod ipc;
mod persistence;
mod platform;
mod rules;

use clap::Parser;
use tracing::{Level as TraceLevel, error};
use tracing_subscriber::FmtSubscriber;

use config::Settings;

fn parse_level(raw: &str) -> TraceLevel {
    match raw.trim().to_lowercase().as_str() {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::Cli::parse();

    // LOG_LEVEL env wins over the settings file
    let log_level = std::env::var("LOG_LEVEL")
        .ok()
        .or_else(Settings::peek_log_level)
        .map(|raw| parse_level(&raw))
        .unwrap_or(TraceLevel::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = Settings::load().inspect_err(|e| {
        error!(path = %Settings::config_path().display(), error = ?e, "Failed to load settings");
        error!("The file has been preserved - fix the syntax errors and try again.");
    })?;

    cli::run(args, settings)?;
    Ok(())
}
