use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::channel::oneshot;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bridge::sink::EventSink;
use crate::device::constants::CHANNEL_CAPACITY;
use crate::device::id::DeviceId;
use crate::device::registry::DeviceRegistry;
use crate::device::state::ConnectionState;
use crate::device::types::TransportEvent;
use crate::error::ConnectionError;
use crate::transport::Transport;

type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
pub enum Command {
    Connect {
        id: DeviceId,
        reply: Reply<Result<(), ConnectionError>>,
    },
    Disconnect {
        id: DeviceId,
        reply: Reply<Result<(), ConnectionError>>,
    },
    Read {
        id: DeviceId,
        service: Uuid,
        characteristic: Uuid,
        reply: Reply<Result<(), ConnectionError>>,
    },
    Write {
        id: DeviceId,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
        with_response: bool,
        chunk_size: Option<usize>,
        reply: Reply<Result<(), ConnectionError>>,
    },
    Close {
        id: DeviceId,
        reply: Reply<Result<(), ConnectionError>>,
    },
    State {
        id: DeviceId,
        reply: Reply<Option<ConnectionState>>,
    },
}

fn send_reply<T>(reply: Reply<T>, value: T) {
    if reply.send(value).is_err() {
        debug!("Command reply receiver went away");
    }
}

fn apply_command<T, S>(registry: &mut DeviceRegistry<T, S>, command: Command)
where
    T: Transport + Clone,
    S: EventSink + Clone,
{
    match command {
        Command::Connect { id, reply } => send_reply(reply, registry.request_connect(&id)),
        Command::Disconnect { id, reply } => send_reply(reply, registry.request_disconnect(&id)),
        Command::Read { id, service, characteristic, reply } => {
            send_reply(reply, registry.read_characteristic(&id, service, characteristic))
        },
        Command::Write { id, service, characteristic, value, with_response, chunk_size, reply } => {
            let result = registry.write_characteristic(&id, service, characteristic, &value, with_response, chunk_size);
            send_reply(reply, result)
        },
        Command::Close { id, reply } => send_reply(reply, registry.remove(&id)),
        Command::State { id, reply } => send_reply(reply, registry.state(&id)),
    }
}

/// Single owner of the registry. Commands and transport callbacks are applied one at a time, so
/// a state change is never observed half way.
pub async fn run_driver<T, S>(
    cancel: CancellationToken,
    mut registry: DeviceRegistry<T, S>,
    mut commands: Receiver<Command>,
    mut transport_events: Receiver<TransportEvent>,
) -> DeviceRegistry<T, S>
where
    T: Transport + Clone,
    S: EventSink + Clone,
{
    info!("Bridge driver started");

    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            Some(command) = commands.next() => {
                apply_command(&mut registry, command);
            },
            Some(event) = transport_events.next() => {
                registry.dispatch(event);
            },
            else => {
                debug!("All driver channels closed");
                break 'mainloop;
            },
        }
    }

    info!("Bridge driver stopped");
    registry
}

#[derive(Clone)]
pub struct DriverHandle {
    commands: Sender<Command>,
}

impl DriverHandle {
    async fn request<R>(&self, command: Command, receiver: oneshot::Receiver<R>) -> Result<R, ConnectionError> {
        let mut commands = self.commands.clone();
        if let Err(err) = commands.send(command).await {
            warn!("Failed to send command to driver: {}", err);
            return Err(ConnectionError::DriverStopped);
        }

        receiver.await.map_err(|_| ConnectionError::DriverStopped)
    }

    pub async fn connect(&self, id: DeviceId) -> Result<(), ConnectionError> {
        let (reply, receiver) = oneshot::channel();
        self.request(Command::Connect { id, reply }, receiver).await?
    }

    pub async fn disconnect(&self, id: DeviceId) -> Result<(), ConnectionError> {
        let (reply, receiver) = oneshot::channel();
        self.request(Command::Disconnect { id, reply }, receiver).await?
    }

    pub async fn read(&self, id: DeviceId, service: Uuid, characteristic: Uuid) -> Result<(), ConnectionError> {
        let (reply, receiver) = oneshot::channel();
        self.request(Command::Read { id, service, characteristic, reply }, receiver).await?
    }

    pub async fn write(
        &self,
        id: DeviceId,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
        with_response: bool,
        chunk_size: Option<usize>,
    ) -> Result<(), ConnectionError> {
        let (reply, receiver) = oneshot::channel();
        let command = Command::Write { id, service, characteristic, value, with_response, chunk_size, reply };
        self.request(command, receiver).await?
    }

    pub async fn close(&self, id: DeviceId) -> Result<(), ConnectionError> {
        let (reply, receiver) = oneshot::channel();
        self.request(Command::Close { id, reply }, receiver).await?
    }

    pub async fn state(&self, id: DeviceId) -> Result<Option<ConnectionState>, ConnectionError> {
        let (reply, receiver) = oneshot::channel();
        self.request(Command::State { id, reply }, receiver).await
    }
}

fn command_channel() -> (Sender<Command>, Receiver<Command>) {
    channel::<Command>(CHANNEL_CAPACITY)
}

pub fn spawn_driver<T, S>(
    cancel: CancellationToken,
    registry: DeviceRegistry<T, S>,
    transport_events: Receiver<TransportEvent>,
) -> (DriverHandle, JoinHandle<DeviceRegistry<T, S>>)
where
    T: Transport + Clone + Send + 'static,
    S: EventSink + Clone + Send + 'static,
{
    let (commands, command_receiver) = command_channel();
    let handle = spawn(run_driver(cancel, registry, command_receiver, transport_events));

    (DriverHandle { commands }, handle)
}
