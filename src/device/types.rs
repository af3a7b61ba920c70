use serde::Serialize;
use uuid::Uuid;

use crate::device::id::DeviceId;
use crate::error::TransportError;

/// GATT level results reported by the transport for a connected peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    ServicesDiscovered(Vec<Uuid>),
    CharacteristicRead {
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    CharacteristicWritten {
        service: Uuid,
        characteristic: Uuid,
    },
}

impl DeviceEvent {
    pub fn describe(&self) -> &'static str {
        match self {
            DeviceEvent::ServicesDiscovered(_) => "services discovered",
            DeviceEvent::CharacteristicRead { .. } => "characteristic read",
            DeviceEvent::CharacteristicWritten { .. } => "characteristic written",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportFailure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
    pub message: String,
}

impl TransportFailure {
    pub fn new(message: impl Into<String>) -> Self {
        TransportFailure { status: None, message: message.into() }
    }

    pub fn with_status(status: i32, message: impl Into<String>) -> Self {
        TransportFailure { status: Some(status), message: message.into() }
    }
}

impl From<&TransportError> for TransportFailure {
    fn from(error: &TransportError) -> Self {
        TransportFailure::new(error.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattOperation {
    Read,
    Write,
}

impl std::fmt::Display for GattOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GattOperation::Read => write!(f, "read"),
            GattOperation::Write => write!(f, "write"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    Connected,
    Disconnected,
    Failed(TransportFailure),
    Device(DeviceEvent),
    /// A read or write did not complete. The link itself is still up.
    RequestFailed {
        operation: GattOperation,
        failure: TransportFailure,
    },
}

/// A raw callback from the native stack, addressed to one peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub id: DeviceId,
    pub kind: TransportEventKind,
}

impl TransportEvent {
    pub fn new(id: DeviceId, kind: TransportEventKind) -> Self {
        TransportEvent { id, kind }
    }
}
