use serde::Serialize;
use uuid::Uuid;

use crate::device::id::DeviceId;
use crate::device::types::{DeviceEvent, TransportFailure};

/*
 * Event names as seen by the application layer. These strings are a stable contract, do not
 * rename them.
 */
pub const CONNECTED: &str = "CONNECTED";
pub const CONNECTING: &str = "CONNECTING";
pub const DISCONNECTED: &str = "DISCONNECTED";
pub const DISCONNECTING: &str = "DISCONNECTING";
pub const SERVICES_DISCOVERED: &str = "SERVICES_DISCOVERED";
pub const CHARACTERISTIC_READ: &str = "CHARACTERISTIC_READ";
pub const CHARACTERISTIC_WRITTEN: &str = "CHARACTERISTIC_WRITTEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventName {
    Connected,
    Connecting,
    Disconnected,
    Disconnecting,
    ServicesDiscovered,
    CharacteristicRead,
    CharacteristicWritten,
}

impl EventName {
    /**
     * Every event a bridge may emit, for emitters that need to declare their supported events
     * up front.
     */
    pub const ALL: [EventName; 7] = [
        EventName::Connected,
        EventName::Connecting,
        EventName::Disconnected,
        EventName::Disconnecting,
        EventName::ServicesDiscovered,
        EventName::CharacteristicRead,
        EventName::CharacteristicWritten,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::Connected => CONNECTED,
            EventName::Connecting => CONNECTING,
            EventName::Disconnected => DISCONNECTED,
            EventName::Disconnecting => DISCONNECTING,
            EventName::ServicesDiscovered => SERVICES_DISCOVERED,
            EventName::CharacteristicRead => CHARACTERISTIC_READ,
            EventName::CharacteristicWritten => CHARACTERISTIC_WRITTEN,
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Connection {
        id: DeviceId,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<TransportFailure>,
    },
    Services {
        id: DeviceId,
        services: Vec<Uuid>,
    },
    CharacteristicRead {
        id: DeviceId,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    CharacteristicWritten {
        id: DeviceId,
        service: Uuid,
        characteristic: Uuid,
    },
}

impl Payload {
    pub fn id(&self) -> &DeviceId {
        match self {
            Payload::Connection { id, .. } => id,
            Payload::Services { id, .. } => id,
            Payload::CharacteristicRead { id, .. } => id,
            Payload::CharacteristicWritten { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub event: EventName,
    pub payload: Payload,
}

impl Notification {
    pub fn connection(event: EventName, id: DeviceId) -> Self {
        Notification { event, payload: Payload::Connection { id, error: None } }
    }

    pub fn disconnected_with_error(id: DeviceId, failure: TransportFailure) -> Self {
        Notification {
            event: EventName::Disconnected,
            payload: Payload::Connection { id, error: Some(failure) },
        }
    }

    pub fn from_device_event(id: DeviceId, event: DeviceEvent) -> Self {
        match event {
            DeviceEvent::ServicesDiscovered(services) => Notification {
                event: EventName::ServicesDiscovered,
                payload: Payload::Services { id, services },
            },
            DeviceEvent::CharacteristicRead { service, characteristic, value } => Notification {
                event: EventName::CharacteristicRead,
                payload: Payload::CharacteristicRead { id, service, characteristic, value },
            },
            DeviceEvent::CharacteristicWritten { service, characteristic } => Notification {
                event: EventName::CharacteristicWritten,
                payload: Payload::CharacteristicWritten { id, service, characteristic },
            },
        }
    }

    pub fn id(&self) -> &DeviceId {
        self.payload.id()
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, Payload::Connection { error: Some(_), .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dev1() -> DeviceId {
        "00:11:22:33:44:55".parse().unwrap()
    }

    #[test]
    fn names_match_constants() {
        let names: Vec<&str> = EventName::ALL.iter().map(|name| name.as_str()).collect();
        assert_eq!(names, vec![
            "CONNECTED",
            "CONNECTING",
            "DISCONNECTED",
            "DISCONNECTING",
            "SERVICES_DISCOVERED",
            "CHARACTERISTIC_READ",
            "CHARACTERISTIC_WRITTEN",
        ]);

        for name in EventName::ALL {
            assert_eq!(serde_json::to_value(name).unwrap(), json!(name.as_str()));
        }
    }

    #[test]
    fn connection_payload_carries_device_id() {
        let notification = Notification::connection(EventName::Connected, dev1());
        assert_eq!(
            serde_json::to_value(&notification).unwrap(),
            json!({"event": "CONNECTED", "payload": {"id": "00:11:22:33:44:55"}})
        );
        assert!(!notification.is_error());
    }

    #[test]
    fn failure_is_reported_on_disconnected() {
        let notification = Notification::disconnected_with_error(dev1(), TransportFailure::with_status(133, "gatt error"));
        assert!(notification.is_error());
        assert_eq!(
            serde_json::to_value(&notification).unwrap(),
            json!({
                "event": "DISCONNECTED",
                "payload": {"id": "00:11:22:33:44:55", "error": {"status": 133, "message": "gatt error"}}
            })
        );
    }

    #[test]
    fn read_payload_carries_value() {
        let service = Uuid::from_u128(0x180a);
        let characteristic = Uuid::from_u128(0x2a25);
        let notification = Notification::from_device_event(dev1(), DeviceEvent::CharacteristicRead {
            service,
            characteristic,
            value: vec![1, 2, 255],
        });

        assert_eq!(notification.event, EventName::CharacteristicRead);
        assert_eq!(
            serde_json::to_value(&notification).unwrap()["payload"]["value"],
            json!([1, 2, 255])
        );
    }
}
