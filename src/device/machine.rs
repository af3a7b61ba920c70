use log::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::events::Notification;
use crate::bridge::sink::EventSink;
use crate::device::id::DeviceId;
use crate::device::queue::{ReadRequest, RequestQueue, WriteProgress, WriteRequest};
use crate::device::state::ConnectionState;
use crate::device::types::{DeviceEvent, GattOperation, TransportEventKind, TransportFailure};
use crate::error::ConnectionError;
use crate::transport::Transport;

/// Lifecycle of a single peripheral.
///
/// ```text
/// Disconnected --request_connect--> Connecting --transport connected--> Connected
///      ^                                |                                   |
///      |                                +--------request_disconnect---------+
///      |                                                 v
///      +-------------transport disconnected------- Disconnecting
/// ```
///
/// A transport disconnect or failure moves any state to Disconnected. GATT results are only
/// forwarded while Connected; anything else arriving late is dropped.
///
/// Reads and writes are queued per device, only one of each is in flight at a time. Leaving
/// Connected flushes both queues.
pub struct ConnectionStateMachine<T: Transport, S: EventSink> {
    device_id: DeviceId,
    state: ConnectionState,
    transport: T,
    sink: S,
    requests: RequestQueue,
    auto_reconnect: bool,
}

impl<T: Transport, S: EventSink> ConnectionStateMachine<T, S> {
    pub fn new(device_id: DeviceId, transport: T, sink: S) -> Self {
        ConnectionStateMachine {
            device_id,
            state: ConnectionState::Disconnected,
            transport,
            sink,
            requests: RequestQueue::default(),
            auto_reconnect: false,
        }
    }

    /// Connect again whenever the link drops without a disconnect being requested.
    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Number of reads and writes that are in flight or waiting.
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    pub fn request_connect(&mut self) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Disconnected {
            return Err(self.invalid_state("connect"));
        }

        self.transition(ConnectionState::Connecting);

        if let Err(source) = self.transport.connect(&self.device_id) {
            warn!("Failed to start connecting to {}: {:?}", self.device_id, source);
            self.fail(TransportFailure::from(&source));
            return Err(ConnectionError::Transport { source });
        }

        Ok(())
    }

    pub fn request_disconnect(&mut self) -> Result<(), ConnectionError> {
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => {},
            _ => return Err(self.invalid_state("disconnect")),
        }

        self.transition(ConnectionState::Disconnecting);

        if let Err(source) = self.transport.disconnect(&self.device_id) {
            warn!("Failed to start disconnecting from {}: {:?}", self.device_id, source);
            self.fail(TransportFailure::from(&source));
            return Err(ConnectionError::Transport { source });
        }

        Ok(())
    }

    pub fn read_characteristic(&mut self, service: Uuid, characteristic: Uuid) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Connected {
            return Err(self.invalid_state("read characteristic"));
        }

        if !self.requests.push_read(ReadRequest { service, characteristic }) {
            debug!("Queued read of {} on {} ({} pending)", characteristic, self.device_id, self.requests.len());
            return Ok(());
        }

        if let Err(source) = self.transport.read_characteristic(&self.device_id, service, characteristic) {
            self.requests.abort_read();
            return Err(ConnectionError::Transport { source });
        }

        Ok(())
    }

    pub fn write_characteristic(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        with_response: bool,
    ) -> Result<(), ConnectionError> {
        self.write_request(WriteRequest::new(service, characteristic, value.to_vec(), with_response, None)?)
    }

    /// Writes `value` as a sequence of writes of at most `chunk_size` bytes each.
    /// CHARACTERISTIC_WRITTEN is emitted once, after the last chunk.
    pub fn write_characteristic_in_chunks(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        with_response: bool,
        chunk_size: usize,
    ) -> Result<(), ConnectionError> {
        let request = WriteRequest::new(service, characteristic, value.to_vec(), with_response, Some(chunk_size))?;
        self.write_request(request)
    }

    fn write_request(&mut self, request: WriteRequest) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Connected {
            return Err(self.invalid_state("write characteristic"));
        }

        let characteristic = request.characteristic;
        if !self.requests.push_write(request) {
            debug!("Queued write of {} on {} ({} pending)", characteristic, self.device_id, self.requests.len());
            return Ok(());
        }

        if let Some(write) = self.requests.outstanding_write() {
            let result = self.transport.write_characteristic(
                &self.device_id,
                write.service,
                write.characteristic,
                write.current_chunk(),
                write.with_response,
            );

            if let Err(source) = result {
                self.requests.abort_write();
                return Err(ConnectionError::Transport { source });
            }
        }

        Ok(())
    }

    pub fn on_transport_connected(&mut self) {
        match self.state {
            ConnectionState::Connecting => self.transition(ConnectionState::Connected),
            ConnectionState::Disconnecting => {
                // disconnect was requested while the connect was still pending
                info!("Connected to {} after a disconnect was requested; disconnecting", self.device_id);
                if let Err(err) = self.transport.disconnect(&self.device_id) {
                    warn!("Failed to disconnect from {}: {:?}", self.device_id, err);
                    self.fail(TransportFailure::from(&err));
                }
            },
            ConnectionState::Disconnected => {
                // nobody wants this link anymore, the disconnect it raced with already completed
                info!("Link to {} came up while disconnected; tearing it down", self.device_id);
                if let Err(err) = self.transport.disconnect(&self.device_id) {
                    warn!("Failed to tear down link to {}: {:?}", self.device_id, err);
                }
            },
            ConnectionState::Connected => debug!("Ignoring repeated connected event for {}", self.device_id),
        }
    }

    pub fn on_transport_disconnected(&mut self) {
        if self.state == ConnectionState::Disconnected {
            debug!("Ignoring repeated disconnected event for {}", self.device_id);
            return;
        }

        let requested = self.state == ConnectionState::Disconnecting;
        self.transition(ConnectionState::Disconnected);

        if !requested {
            self.reconnect();
        }
    }

    pub fn on_transport_failed(&mut self, failure: TransportFailure) {
        if self.state == ConnectionState::Disconnected {
            debug!("Ignoring failure for {} while disconnected: {}", self.device_id, failure.message);
            return;
        }

        warn!("Transport failure for {} while {}: {}", self.device_id, self.state, failure.message);
        let requested = self.state == ConnectionState::Disconnecting;
        self.fail(failure);

        if !requested {
            self.reconnect();
        }
    }

    pub fn on_services_discovered(&mut self, services: Vec<Uuid>) {
        self.on_device_event(DeviceEvent::ServicesDiscovered(services));
    }

    pub fn on_characteristic_read(&mut self, service: Uuid, characteristic: Uuid, value: Vec<u8>) {
        self.on_device_event(DeviceEvent::CharacteristicRead { service, characteristic, value });
    }

    pub fn on_characteristic_written(&mut self, service: Uuid, characteristic: Uuid) {
        self.on_device_event(DeviceEvent::CharacteristicWritten { service, characteristic });
    }

    pub fn on_device_event(&mut self, event: DeviceEvent) {
        // discovery and reads routinely race with a disconnect
        if self.state != ConnectionState::Connected {
            debug!("Dropping stale {} event for {} while {}", event.describe(), self.device_id, self.state);
            return;
        }

        match event {
            DeviceEvent::ServicesDiscovered(_) => self.emit(event),
            DeviceEvent::CharacteristicRead { .. } => {
                self.requests.complete_read();
                self.emit(event);
                self.issue_next_read();
            },
            DeviceEvent::CharacteristicWritten { characteristic, .. } => {
                match self.requests.complete_write() {
                    WriteProgress::Partial => debug!("Wrote a chunk of {} to {}", characteristic, self.device_id),
                    WriteProgress::Complete | WriteProgress::Unsolicited => self.emit(event),
                }
                self.issue_next_write();
            },
        }
    }

    /// A read or write failed without taking the link down. The request is dropped and the next
    /// one in line is issued.
    pub fn on_request_failed(&mut self, operation: GattOperation, failure: TransportFailure) {
        if self.state != ConnectionState::Connected {
            debug!("Ignoring failed {} for {} while {}", operation, self.device_id, self.state);
            return;
        }

        warn!("Failed to {} on {}: {}", operation, self.device_id, failure.message);
        match operation {
            GattOperation::Read => {
                self.requests.abort_read();
                self.issue_next_read();
            },
            GattOperation::Write => {
                self.requests.abort_write();
                self.issue_next_write();
            },
        }
    }

    pub fn handle(&mut self, event: TransportEventKind) {
        match event {
            TransportEventKind::Connected => self.on_transport_connected(),
            TransportEventKind::Disconnected => self.on_transport_disconnected(),
            TransportEventKind::Failed(failure) => self.on_transport_failed(failure),
            TransportEventKind::Device(event) => self.on_device_event(event),
            TransportEventKind::RequestFailed { operation, failure } => self.on_request_failed(operation, failure),
        }
    }

    fn issue_next_read(&mut self) {
        while let Some(read) = self.requests.outstanding_read() {
            let characteristic = read.characteristic;
            match self.transport.read_characteristic(&self.device_id, read.service, characteristic) {
                Ok(()) => return,
                Err(err) => {
                    warn!("Failed to read {} from {}: {:?}", characteristic, self.device_id, err);
                    self.requests.abort_read();
                },
            }
        }
    }

    fn issue_next_write(&mut self) {
        while let Some(write) = self.requests.outstanding_write() {
            let characteristic = write.characteristic;
            let result = self.transport.write_characteristic(
                &self.device_id,
                write.service,
                characteristic,
                write.current_chunk(),
                write.with_response,
            );

            match result {
                Ok(()) => return,
                Err(err) => {
                    warn!("Failed to write {} to {}: {:?}", characteristic, self.device_id, err);
                    self.requests.abort_write();
                },
            }
        }
    }

    fn reconnect(&mut self) {
        if !self.auto_reconnect {
            return;
        }

        info!("Link to {} dropped, reconnecting", self.device_id);
        if let Err(err) = self.request_connect() {
            warn!("Failed to reconnect to {}: {}", self.device_id, err);
        }
    }

    fn emit(&mut self, event: DeviceEvent) {
        let notification = Notification::from_device_event(self.device_id.clone(), event);
        self.sink.emit(notification);
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!("{}: {} -> {}", self.device_id, self.state, next);
        self.state = next;
        self.flush_requests();
        self.sink.emit(Notification::connection(next.event_name(), self.device_id.clone()));
    }

    fn fail(&mut self, failure: TransportFailure) {
        debug!("{}: {} -> {} (failure)", self.device_id, self.state, ConnectionState::Disconnected);
        self.state = ConnectionState::Disconnected;
        self.flush_requests();
        self.sink.emit(Notification::disconnected_with_error(self.device_id.clone(), failure));
    }

    fn flush_requests(&mut self) {
        if self.state == ConnectionState::Connected {
            return;
        }

        let dropped = self.requests.flush();
        if dropped > 0 {
            debug!("Dropped {} pending request(s) for {}", dropped, self.device_id);
        }
    }

    fn invalid_state(&self, operation: &'static str) -> ConnectionError {
        ConnectionError::InvalidState { operation, state: self.state }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use super::*;
    use crate::bridge::events::{EventName, Payload};
    use crate::error::TransportError;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Connect,
        Disconnect,
        Read(Uuid),
        Write(Uuid, Vec<u8>),
    }

    #[derive(Default)]
    struct FakeTransport {
        calls: RefCell<Vec<Call>>,
        refuse: bool,
    }

    impl FakeTransport {
        fn result(&self, call: Call) -> Result<(), TransportError> {
            self.calls.borrow_mut().push(call);
            if self.refuse {
                return Err(TransportError::NoAdapter);
            }
            Ok(())
        }
    }

    impl Transport for FakeTransport {
        fn connect(&self, _id: &DeviceId) -> Result<(), TransportError> {
            self.result(Call::Connect)
        }

        fn disconnect(&self, _id: &DeviceId) -> Result<(), TransportError> {
            self.result(Call::Disconnect)
        }

        fn read_characteristic(&self, _id: &DeviceId, _service: Uuid, characteristic: Uuid) -> Result<(), TransportError> {
            self.result(Call::Read(characteristic))
        }

        fn write_characteristic(&self, _id: &DeviceId, _service: Uuid, characteristic: Uuid, value: &[u8], _with_response: bool) -> Result<(), TransportError> {
            self.result(Call::Write(characteristic, value.to_vec()))
        }
    }

    fn machine() -> ConnectionStateMachine<FakeTransport, Vec<Notification>> {
        let id: DeviceId = "00:00:00:00:00:01".parse().unwrap();
        ConnectionStateMachine::new(id, FakeTransport::default(), Vec::new())
    }

    fn connected() -> ConnectionStateMachine<FakeTransport, Vec<Notification>> {
        let mut machine = machine();
        machine.request_connect().unwrap();
        machine.on_transport_connected();
        machine
    }

    fn events(machine: &ConnectionStateMachine<FakeTransport, Vec<Notification>>) -> Vec<EventName> {
        machine.sink().iter().map(|notification| notification.event).collect()
    }

    #[test]
    fn starts_disconnected() {
        let machine = machine();
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert!(machine.sink().is_empty());
    }

    #[test]
    fn connect_invokes_transport_and_emits_connecting() {
        let mut machine = machine();
        machine.request_connect().unwrap();

        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert_eq!(*machine.transport().calls.borrow(), vec![Call::Connect]);
        assert_eq!(events(&machine), vec![EventName::Connecting]);
    }

    #[test]
    fn connect_twice_is_invalid() {
        let mut machine = machine();
        machine.request_connect().unwrap();

        let err = machine.request_connect().unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidState { operation: "connect", state: ConnectionState::Connecting }));
        assert_eq!(machine.transport().calls.borrow().len(), 1);
    }

    #[test]
    fn disconnect_while_disconnected_is_invalid() {
        let mut machine = machine();
        assert!(machine.request_disconnect().unwrap_err().is_invalid_state());
        assert!(machine.transport().calls.borrow().is_empty());
    }

    #[test]
    fn refused_connect_surfaces_as_disconnected_with_error() {
        let id: DeviceId = "00:00:00:00:00:01".parse().unwrap();
        let transport = FakeTransport { refuse: true, ..FakeTransport::default() };
        let mut machine = ConnectionStateMachine::new(id, transport, Vec::new());

        let err = machine.request_connect().unwrap_err();
        assert!(matches!(err, ConnectionError::Transport { .. }));
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert_eq!(events(&machine), vec![EventName::Connecting, EventName::Disconnected]);
        assert!(machine.sink()[1].is_error());
    }

    #[test]
    fn disconnect_during_connect_is_honoured_once_connected() {
        let mut machine = machine();
        machine.request_connect().unwrap();
        machine.request_disconnect().unwrap();
        assert_eq!(machine.state(), ConnectionState::Disconnecting);

        machine.on_transport_connected();
        assert_eq!(machine.state(), ConnectionState::Disconnecting);
        assert_eq!(*machine.transport().calls.borrow(), vec![Call::Connect, Call::Disconnect, Call::Disconnect]);

        machine.on_transport_disconnected();
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert_eq!(events(&machine), vec![EventName::Connecting, EventName::Disconnecting, EventName::Disconnected]);
    }

    #[test]
    fn failure_while_connecting_reports_error() {
        let mut machine = machine();
        machine.request_connect().unwrap();
        machine.on_transport_failed(TransportFailure::with_status(133, "GATT_ERROR"));

        assert_eq!(machine.state(), ConnectionState::Disconnected);
        let last = machine.sink().last().unwrap();
        assert_eq!(last.event, EventName::Disconnected);
        assert!(matches!(&last.payload, Payload::Connection { error: Some(failure), .. } if failure.status == Some(133)));

        machine.on_transport_failed(TransportFailure::new("late"));
        assert_eq!(machine.sink().len(), 2);
    }

    #[test]
    fn connected_event_while_disconnected_tears_link_down() {
        let mut machine = machine();
        machine.on_transport_connected();
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert!(machine.sink().is_empty());
        assert_eq!(*machine.transport().calls.borrow(), vec![Call::Disconnect]);
    }

    #[test]
    fn repeated_connected_event_is_ignored() {
        let mut machine = connected();
        machine.on_transport_connected();
        assert_eq!(events(&machine), vec![EventName::Connecting, EventName::Connected]);
        assert_eq!(*machine.transport().calls.borrow(), vec![Call::Connect]);
    }

    #[test]
    fn reads_wait_for_the_previous_read() {
        let mut machine = connected();
        let service = Uuid::from_u128(1);

        machine.read_characteristic(service, Uuid::from_u128(10)).unwrap();
        machine.read_characteristic(service, Uuid::from_u128(11)).unwrap();
        machine.read_characteristic(service, Uuid::from_u128(12)).unwrap();
        assert_eq!(*machine.transport().calls.borrow(), vec![Call::Connect, Call::Read(Uuid::from_u128(10))]);
        assert_eq!(machine.pending_requests(), 3);

        machine.on_characteristic_read(service, Uuid::from_u128(10), vec![1]);
        machine.on_request_failed(GattOperation::Read, TransportFailure::new("timeout"));
        machine.on_characteristic_read(service, Uuid::from_u128(12), vec![3]);

        assert_eq!(*machine.transport().calls.borrow(), vec![
            Call::Connect,
            Call::Read(Uuid::from_u128(10)),
            Call::Read(Uuid::from_u128(11)),
            Call::Read(Uuid::from_u128(12)),
        ]);
        assert_eq!(machine.pending_requests(), 0);
        assert_eq!(events(&machine), vec![
            EventName::Connecting,
            EventName::Connected,
            EventName::CharacteristicRead,
            EventName::CharacteristicRead,
        ]);
    }

    #[test]
    fn writes_keep_their_order() {
        let mut machine = connected();
        let service = Uuid::from_u128(1);
        let characteristic = Uuid::from_u128(2);

        machine.write_characteristic(service, characteristic, &[1], true).unwrap();
        machine.write_characteristic(service, characteristic, &[2], true).unwrap();
        machine.on_characteristic_written(service, characteristic);
        machine.on_characteristic_written(service, characteristic);

        assert_eq!(*machine.transport().calls.borrow(), vec![
            Call::Connect,
            Call::Write(characteristic, vec![1]),
            Call::Write(characteristic, vec![2]),
        ]);
        assert_eq!(events(&machine)[2..], [EventName::CharacteristicWritten, EventName::CharacteristicWritten]);
    }

    #[test]
    fn chunked_write_is_announced_once() {
        let mut machine = connected();
        let service = Uuid::from_u128(1);
        let characteristic = Uuid::from_u128(2);

        machine.write_characteristic_in_chunks(service, characteristic, &[1, 2, 3, 4, 5], true, 2).unwrap();
        for _ in 0..3 {
            machine.on_characteristic_written(service, characteristic);
        }

        assert_eq!(*machine.transport().calls.borrow(), vec![
            Call::Connect,
            Call::Write(characteristic, vec![1, 2]),
            Call::Write(characteristic, vec![3, 4]),
            Call::Write(characteristic, vec![5]),
        ]);
        assert_eq!(events(&machine), vec![EventName::Connecting, EventName::Connected, EventName::CharacteristicWritten]);

        let err = machine.write_characteristic_in_chunks(service, characteristic, &[1], true, 0).unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidChunkSize));
    }

    #[test]
    fn disconnect_flushes_pending_requests() {
        let mut machine = connected();
        let service = Uuid::from_u128(1);

        machine.read_characteristic(service, Uuid::from_u128(10)).unwrap();
        machine.read_characteristic(service, Uuid::from_u128(11)).unwrap();
        machine.write_characteristic(service, Uuid::from_u128(12), &[1], true).unwrap();
        machine.request_disconnect().unwrap();
        assert_eq!(machine.pending_requests(), 0);

        machine.on_transport_disconnected();
        machine.request_connect().unwrap();
        machine.on_transport_connected();
        machine.read_characteristic(service, Uuid::from_u128(13)).unwrap();

        assert_eq!(machine.transport().calls.borrow().last(), Some(&Call::Read(Uuid::from_u128(13))));
    }

    #[test]
    fn auto_reconnect_after_link_loss() {
        let id: DeviceId = "00:00:00:00:00:01".parse().unwrap();
        let mut machine = ConnectionStateMachine::new(id, FakeTransport::default(), Vec::new()).with_auto_reconnect(true);
        machine.request_connect().unwrap();
        machine.on_transport_connected();

        machine.on_transport_disconnected();
        assert_eq!(machine.state(), ConnectionState::Connecting);

        machine.on_transport_failed(TransportFailure::new("not found"));
        assert_eq!(machine.state(), ConnectionState::Connecting);

        machine.request_disconnect().unwrap();
        machine.on_transport_disconnected();
        assert_eq!(machine.state(), ConnectionState::Disconnected);

        assert_eq!(*machine.transport().calls.borrow(), vec![
            Call::Connect,
            Call::Connect,
            Call::Connect,
            Call::Disconnect,
        ]);
    }

    #[test]
    fn no_reconnect_by_default() {
        let mut machine = connected();
        machine.on_transport_disconnected();
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert_eq!(machine.transport().calls.borrow().len(), 1);
    }

    #[test]
    fn gatt_requests_need_a_connection() {
        let mut machine = machine();
        let service = Uuid::from_u128(1);
        let characteristic = Uuid::from_u128(2);

        assert!(machine.read_characteristic(service, characteristic).unwrap_err().is_invalid_state());
        assert!(machine.write_characteristic(service, characteristic, &[1], true).unwrap_err().is_invalid_state());

        machine.request_connect().unwrap();
        machine.on_transport_connected();
        machine.read_characteristic(service, characteristic).unwrap();
        machine.write_characteristic(service, characteristic, &[1, 2], false).unwrap();

        assert_eq!(*machine.transport().calls.borrow(), vec![
            Call::Connect,
            Call::Read(characteristic),
            Call::Write(characteristic, vec![1, 2]),
        ]);
    }

    #[test]
    fn handle_dispatches_device_events() {
        let mut machine = machine();
        machine.request_connect().unwrap();
        machine.handle(TransportEventKind::Connected);
        machine.handle(TransportEventKind::Device(DeviceEvent::CharacteristicWritten {
            service: Uuid::from_u128(1),
            characteristic: Uuid::from_u128(2),
        }));
        machine.handle(TransportEventKind::Disconnected);

        assert_eq!(events(&machine), vec![
            EventName::Connecting,
            EventName::Connected,
            EventName::CharacteristicWritten,
            EventName::Disconnected,
        ]);
    }
}
