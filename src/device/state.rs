use serde::Serialize;

use crate::bridge::events::EventName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// The notification emitted when a machine enters this state.
    pub fn event_name(&self) -> EventName {
        match self {
            ConnectionState::Disconnected => EventName::Disconnected,
            ConnectionState::Connecting => EventName::Connecting,
            ConnectionState::Connected => EventName::Connected,
            ConnectionState::Disconnecting => EventName::Disconnecting,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnecting => "Disconnecting",
        };

        write!(f, "{}", result)
    }
}
