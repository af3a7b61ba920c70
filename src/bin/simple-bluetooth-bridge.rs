use std::process::ExitCode;
use clap::Parser;
use log::{error, info};
use simple_bluetooth_bridge::{init_logging, run};
use simple_bluetooth_bridge::cli::Cli;
use simple_bluetooth_bridge::error::{AppRunError, ConfigError};

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging();
    info!(concat!("Simple Bluetooth Bridge ", env!("CARGO_PKG_VERSION")));

    match run(cli) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("This bridge has already been started with the same config file");
            ExitCode::FAILURE
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            ExitCode::FAILURE
        },
        Ok(_) => ExitCode::SUCCESS,
    }
}
