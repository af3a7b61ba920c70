#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use simple_bluetooth_bridge::device::id::DeviceId;
use simple_bluetooth_bridge::error::TransportError;
use simple_bluetooth_bridge::transport::Transport;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect(DeviceId),
    Disconnect(DeviceId),
    Read(DeviceId, Uuid),
    Write(DeviceId, Uuid, Vec<u8>, bool),
}

/// Records every request and never completes anything on its own.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    calls: Arc<Mutex<Vec<TransportCall>>>,
}

impl RecordingTransport {
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: TransportCall) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

impl Transport for RecordingTransport {
    fn connect(&self, id: &DeviceId) -> Result<(), TransportError> {
        self.record(TransportCall::Connect(id.clone()))
    }

    fn disconnect(&self, id: &DeviceId) -> Result<(), TransportError> {
        self.record(TransportCall::Disconnect(id.clone()))
    }

    fn read_characteristic(&self, id: &DeviceId, _service: Uuid, characteristic: Uuid) -> Result<(), TransportError> {
        self.record(TransportCall::Read(id.clone(), characteristic))
    }

    fn write_characteristic(&self, id: &DeviceId, _service: Uuid, characteristic: Uuid, value: &[u8], with_response: bool) -> Result<(), TransportError> {
        self.record(TransportCall::Write(id.clone(), characteristic, value.to_vec(), with_response))
    }
}

pub fn dev1() -> DeviceId {
    "D0:00:00:00:00:01".parse().unwrap()
}

pub fn dev2() -> DeviceId {
    "D0:00:00:00:00:02".parse().unwrap()
}
