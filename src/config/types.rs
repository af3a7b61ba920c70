use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::{CONNECT_DEADLINE, IO_DEADLINE, SCAN_MILLIS, SCAN_MIN_MILLIS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionOptions {
    pub auto_discover_services: bool,
    /// Connect again after the link drops without a disconnect being requested.
    pub auto_reconnect: bool,
    pub connect_deadline_ms: u64,
    pub io_deadline_ms: u64,
}

impl ConnectionOptions {
    pub fn connect_deadline(&self) -> Duration {
        Duration::from_millis(self.connect_deadline_ms)
    }

    pub fn io_deadline(&self) -> Duration {
        Duration::from_millis(self.io_deadline_ms)
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            auto_discover_services: true,
            auto_reconnect: false,
            connect_deadline_ms: CONNECT_DEADLINE,
            io_deadline_ms: IO_DEADLINE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanOptions {
    // None scans until cancelled (or until max_devices is reached)
    pub scan_millis: Option<u64>,
    pub scan_min_millis: u64,
    pub max_devices: Option<usize>,
    pub services: Vec<Uuid>,
}

impl ScanOptions {
    pub fn deadline(&self) -> Option<Duration> {
        self.scan_millis.map(|millis| Duration::from_millis(millis.max(self.scan_min_millis)))
    }

    pub fn is_complete(&self, elapsed: Duration, found: usize) -> bool {
        if let Some(deadline) = self.deadline() {
            if elapsed >= deadline {
                return true;
            }
        }

        match self.max_devices {
            Some(max) if max > 0 => {
                elapsed >= Duration::from_millis(self.scan_min_millis) && found >= max
            },
            _ => false,
        }
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            scan_millis: Some(SCAN_MILLIS),
            scan_min_millis: SCAN_MIN_MILLIS,
            max_devices: None,
            services: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub connection: ConnectionOptions,
    pub scan: ScanOptions,
}
