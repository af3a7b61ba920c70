use std::env;
use std::str::FromStr;
use crate::app::run_application;
use crate::cli::Cli;
use crate::error::AppRunError;

pub mod app;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod transport;

fn log_level() -> log::LevelFilter {
    env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| log::LevelFilter::from_str(&level).ok())
        .unwrap_or(log::LevelFilter::Info)
}

pub fn init_logging() {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log_level())
        // stdout carries the JSON events
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

pub fn run(cli: Cli) -> Result<(), AppRunError> {
    run_application(cli)?;
    Ok(())
}
