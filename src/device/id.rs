use std::fmt;
use std::str::FromStr;
use btleplug::api::BDAddr;
use serde::{Deserialize, Serialize};

use crate::error::ConnectionError;

/// Bluetooth address of a peripheral, normalized to `AA:BB:CC:DD:EE:FF`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for DeviceId {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // accepts both "aa:bb:cc:dd:ee:ff" and "aabbccddeeff"
        match s.trim().parse::<BDAddr>() {
            Ok(address) => Ok(DeviceId::from(address)),
            Err(_) => Err(ConnectionError::InvalidDeviceId(s.to_string())),
        }
    }
}

impl From<BDAddr> for DeviceId {
    fn from(address: BDAddr) -> Self {
        // BDAddr displays as upper case hex separated by colons
        DeviceId(address.to_string().to_uppercase())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
