use std::io;
use std::str::Utf8Error;
use thiserror::Error;

use crate::device::state::ConnectionState;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Peripheral {0} was not found")]
    PeripheralNotFound(String),

    #[error("Characteristic {characteristic} of service {service} is not available")]
    MissingCharacteristic { service: uuid::Uuid, characteristic: uuid::Uuid },

    #[error("Operation {0} took too long")]
    DeadlineExceeded(&'static str),

    #[error("Transport event channel is closed")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Operation {operation} is not allowed while {state}")]
    InvalidState { operation: &'static str, state: ConnectionState },

    #[error("Transport failed: {source}")]
    Transport { #[from] source: TransportError },

    #[error("Device {0} is not tracked")]
    UnknownDevice(String),

    #[error("Invalid device id: '{0}'")]
    InvalidDeviceId(String),

    #[error("The bridge driver has stopped")]
    DriverStopped,

    #[error("Write chunk size must be greater than zero")]
    InvalidChunkSize,
}

impl ConnectionError {
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, ConnectionError::InvalidState { .. })
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start bridge (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start bridge (transport): {source}")]
    TransportError { #[from] source: TransportError },

    #[error("Bridge operation failed: {source}")]
    ConnectionError { #[from] source: ConnectionError },

    #[error("Failed to start async runtime: {source}")]
    Runtime { source: io::Error },
}
