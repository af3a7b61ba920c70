use std::path::PathBuf;
use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use crate::device::id::DeviceId;

#[derive(Debug, Parser)]
#[command(name = "simple-bluetooth-bridge", version, about = "Bridges bluetooth low energy peripherals to JSON events")]
pub struct Cli {
    /// Path of the config file (defaults to a file next to the executable, or the user config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan for peripherals and print them as JSON lines
    Scan(ScanArgs),

    /// Connect to a peripheral and print its notifications as JSON lines until Ctrl-C
    Connect(ConnectArgs),

    /// Print the effective config (and write the defaults if the config file is empty)
    Config,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Scan duration in milliseconds
    #[arg(long)]
    pub millis: Option<u64>,

    /// Stop once this many devices have been found
    #[arg(long)]
    pub max_devices: Option<usize>,

    /// Only report devices advertising this service (can be repeated)
    #[arg(long = "service")]
    pub services: Vec<Uuid>,
}

#[derive(Debug, Args)]
pub struct ConnectArgs {
    #[arg(value_parser = parse_device_id)]
    pub address: DeviceId,

    /// Read a characteristic once services are discovered: SERVICE/CHARACTERISTIC
    #[arg(long = "read", value_parser = parse_read)]
    pub reads: Vec<CharacteristicOp>,

    /// Write a characteristic once services are discovered: SERVICE/CHARACTERISTIC=HEX
    #[arg(long = "write", value_parser = parse_write)]
    pub writes: Vec<CharacteristicOp>,

    /// Write without waiting for a response from the peripheral
    #[arg(long)]
    pub without_response: bool,

    /// Split written values into chunks of at most this many bytes
    #[arg(long, value_parser = parse_chunk_size)]
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicOp {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub value: Vec<u8>,
}

fn parse_device_id(s: &str) -> Result<DeviceId, String> {
    s.parse().map_err(|err| format!("{}", err))
}

fn parse_chunk_size(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("chunk size must be greater than zero".to_string()),
        Ok(size) => Ok(size),
        Err(err) => Err(format!("invalid chunk size: {}", err)),
    }
}

fn parse_target(s: &str) -> Result<(Uuid, Uuid), String> {
    let (service, characteristic) = s.split_once('/')
        .ok_or_else(|| format!("expected SERVICE/CHARACTERISTIC, got '{}'", s))?;

    let service = Uuid::parse_str(service).map_err(|err| format!("invalid service uuid: {}", err))?;
    let characteristic = Uuid::parse_str(characteristic).map_err(|err| format!("invalid characteristic uuid: {}", err))?;
    Ok((service, characteristic))
}

fn parse_read(s: &str) -> Result<CharacteristicOp, String> {
    let (service, characteristic) = parse_target(s)?;
    Ok(CharacteristicOp { service, characteristic, value: Vec::new() })
}

fn parse_write(s: &str) -> Result<CharacteristicOp, String> {
    let (target, value) = s.split_once('=')
        .ok_or_else(|| format!("expected SERVICE/CHARACTERISTIC=HEX, got '{}'", s))?;

    let (service, characteristic) = parse_target(target)?;
    let value = hex::decode(value).map_err(|err| format!("invalid hex value: {}", err))?;
    Ok(CharacteristicOp { service, characteristic, value })
}
