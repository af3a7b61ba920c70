use indexmap::IndexMap;
use log::debug;
use uuid::Uuid;

use crate::bridge::sink::EventSink;
use crate::device::id::DeviceId;
use crate::device::machine::ConnectionStateMachine;
use crate::device::state::ConnectionState;
use crate::device::types::TransportEvent;
use crate::error::ConnectionError;
use crate::transport::Transport;

/// Owns one [`ConnectionStateMachine`] per tracked peripheral.
pub struct DeviceRegistry<T: Transport + Clone, S: EventSink + Clone> {
    transport: T,
    sink: S,
    auto_reconnect: bool,
    machines: IndexMap<DeviceId, ConnectionStateMachine<T, S>>,
}

impl<T: Transport + Clone, S: EventSink + Clone> DeviceRegistry<T, S> {
    pub fn new(transport: T, sink: S) -> Self {
        DeviceRegistry {
            transport,
            sink,
            auto_reconnect: false,
            machines: IndexMap::new(),
        }
    }

    /// Applies to every machine created from now on.
    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    pub fn request_connect(&mut self, id: &DeviceId) -> Result<(), ConnectionError> {
        let transport = &self.transport;
        let sink = &self.sink;
        let auto_reconnect = self.auto_reconnect;
        let machine = self.machines.entry(id.clone()).or_insert_with(|| {
            debug!("Tracking new device {}", id);
            ConnectionStateMachine::new(id.clone(), transport.clone(), sink.clone()).with_auto_reconnect(auto_reconnect)
        });

        machine.request_connect()
    }

    pub fn request_disconnect(&mut self, id: &DeviceId) -> Result<(), ConnectionError> {
        self.machine_mut(id)?.request_disconnect()
    }

    pub fn read_characteristic(&mut self, id: &DeviceId, service: Uuid, characteristic: Uuid) -> Result<(), ConnectionError> {
        self.machine_mut(id)?.read_characteristic(service, characteristic)
    }

    pub fn write_characteristic(
        &mut self,
        id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        with_response: bool,
        chunk_size: Option<usize>,
    ) -> Result<(), ConnectionError> {
        let machine = self.machine_mut(id)?;
        match chunk_size {
            Some(chunk_size) => machine.write_characteristic_in_chunks(service, characteristic, value, with_response, chunk_size),
            None => machine.write_characteristic(service, characteristic, value, with_response),
        }
    }

    /// Stops tracking a device. Only allowed once it is fully disconnected.
    pub fn remove(&mut self, id: &DeviceId) -> Result<(), ConnectionError> {
        let state = self.machine_mut(id)?.state();
        if state != ConnectionState::Disconnected {
            return Err(ConnectionError::InvalidState { operation: "close", state });
        }

        self.machines.shift_remove(id);
        debug!("Stopped tracking device {}", id);
        Ok(())
    }

    pub fn dispatch(&mut self, event: TransportEvent) {
        match self.machines.get_mut(&event.id) {
            Some(machine) => machine.handle(event.kind),
            None => debug!("Ignoring {:?} for untracked device {}", event.kind, event.id),
        }
    }

    pub fn state(&self, id: &DeviceId) -> Option<ConnectionState> {
        self.machines.get(id).map(|machine| machine.state())
    }

    pub fn devices(&self) -> Vec<(DeviceId, ConnectionState)> {
        self.machines.iter().map(|(id, machine)| (id.clone(), machine.state())).collect()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn machine_mut(&mut self, id: &DeviceId) -> Result<&mut ConnectionStateMachine<T, S>, ConnectionError> {
        self.machines.get_mut(id).ok_or_else(|| ConnectionError::UnknownDevice(id.to_string()))
    }
}
