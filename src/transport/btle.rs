use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use btleplug::api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::channel::mpsc::Sender;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::types::ConnectionOptions;
use crate::device::constants::POLL_DELAY;
use crate::device::id::DeviceId;
use crate::device::types::{DeviceEvent, GattOperation, TransportEvent, TransportEventKind, TransportFailure};
use crate::error::TransportError;
use crate::transport::Transport;

pub async fn first_adapter(manager: &Manager) -> Result<Adapter, TransportError> {
    let adapters = manager.adapters().await?;
    let adapter = adapters.into_iter().next().ok_or(TransportError::NoAdapter)?;

    info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
    Ok(adapter)
}

async fn with_deadline<T, F>(deadline: Duration, operation: &'static str, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, btleplug::Error>>,
{
    tokio::select! {
        _ = sleep(deadline) => {
            warn!("{} took too long", operation);
            Err(TransportError::DeadlineExceeded(operation))
        }
        result = fut => Ok(result?),
    }
}

async fn report(events: &mut Sender<TransportEvent>, event: TransportEvent) {
    if let Err(err) = events.send(event).await {
        warn!("Failed to report transport event: {}", err);
    }
}

async fn find_peripheral(adapter: &Adapter, id: &DeviceId) -> Result<Option<Peripheral>, TransportError> {
    let peripherals = adapter.peripherals().await?;
    Ok(peripherals.into_iter().find(|peripheral| DeviceId::from(peripheral.address()) == *id))
}

async fn poll_for_peripheral(adapter: &Adapter, id: &DeviceId) -> Result<Peripheral, TransportError> {
    loop {
        if let Some(peripheral) = find_peripheral(adapter, id).await? {
            return Ok(peripheral);
        }

        debug!("Peripheral {} not seen yet", id);
        sleep(Duration::from_millis(POLL_DELAY)).await;
    }
}

async fn connect_peripheral(adapter: &Adapter, id: &DeviceId, deadline: Duration) -> Result<Peripheral, TransportError> {
    let peripheral = tokio::select! {
        _ = sleep(deadline) => Err(TransportError::PeripheralNotFound(id.to_string())),
        result = poll_for_peripheral(adapter, id) => result,
    }?;

    if peripheral.is_connected().await? {
        info!("Peripheral {} is already connected", id);
        return Ok(peripheral);
    }

    info!("Connecting to peripheral {}...", id);
    with_deadline(deadline, "connect", peripheral.connect()).await?;
    Ok(peripheral)
}

async fn discover_services(peripheral: &Peripheral, deadline: Duration) -> Result<Vec<Uuid>, TransportError> {
    with_deadline(deadline, "discover services", peripheral.discover_services()).await?;
    Ok(peripheral.services().iter().map(|service| service.uuid).collect())
}

async fn find_characteristic(
    peripheral: &Peripheral,
    service: Uuid,
    characteristic: Uuid,
    deadline: Duration,
) -> Result<Characteristic, TransportError> {
    if peripheral.services().is_empty() {
        discover_services(peripheral, deadline).await?;
    }

    peripheral.services()
        .iter()
        .filter(|candidate| candidate.uuid == service)
        .flat_map(|candidate| candidate.characteristics.iter())
        .find(|candidate| candidate.uuid == characteristic)
        .cloned()
        .ok_or(TransportError::MissingCharacteristic { service, characteristic })
}

async fn report_request_failed(events: &mut Sender<TransportEvent>, id: DeviceId, operation: GattOperation, err: &TransportError) {
    let kind = TransportEventKind::RequestFailed { operation, failure: TransportFailure::from(err) };
    report(events, TransportEvent::new(id, kind)).await;
}

async fn connected_peripheral(adapter: &Adapter, id: &DeviceId) -> Result<Peripheral, TransportError> {
    find_peripheral(adapter, id).await?.ok_or_else(|| TransportError::PeripheralNotFound(id.to_string()))
}

// connect attempts that are still running, so that a disconnect can abort them
#[derive(Clone, Default)]
struct PendingConnects {
    inner: Arc<Mutex<HashMap<DeviceId, CancellationToken>>>,
}

impl PendingConnects {
    fn start(&self, id: &DeviceId) -> CancellationToken {
        let token = CancellationToken::new();
        let mut inner = self.inner.lock().expect("Failed to lock pending connects");
        if let Some(previous) = inner.insert(id.clone(), token.clone()) {
            previous.cancel();
        }
        token
    }

    // a cancelled token has already been replaced or aborted, its entry is not ours to remove
    fn finish(&self, id: &DeviceId, token: &CancellationToken) {
        let mut inner = self.inner.lock().expect("Failed to lock pending connects");
        if !token.is_cancelled() {
            inner.remove(id);
        }
    }

    fn abort(&self, id: &DeviceId) -> bool {
        let token = self.inner.lock().expect("Failed to lock pending connects").remove(id);
        match token {
            Some(token) => {
                token.cancel();
                true
            },
            None => false,
        }
    }

    #[cfg(test)]
    fn contains(&self, id: &DeviceId) -> bool {
        self.inner.lock().expect("Failed to lock pending connects").contains_key(id)
    }
}

/// [`Transport`] backed by a btleplug adapter. Every request runs as its own tokio task and
/// reports back through the transport event channel. Ordering of reads and writes is up to the
/// caller, a disconnect aborts a connect that is still in progress.
#[derive(Clone)]
pub struct BtleTransport {
    adapter: Adapter,
    events: Sender<TransportEvent>,
    options: ConnectionOptions,
    runtime: Handle,
    connecting: PendingConnects,
}

impl BtleTransport {
    /// Must be called from within a tokio runtime. Starts scanning so that peripherals can be
    /// located by address.
    pub async fn new(adapter: Adapter, events: Sender<TransportEvent>, options: ConnectionOptions) -> Result<Self, TransportError> {
        adapter.start_scan(ScanFilter::default()).await?;

        Ok(BtleTransport {
            adapter,
            events,
            options,
            runtime: Handle::current(),
            connecting: PendingConnects::default(),
        })
    }

    pub async fn stop(&self) -> Result<(), TransportError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    /// Reports peripherals that drop their link on their own (out of range, powered off).
    pub fn watch_link_loss(&self, cancel: CancellationToken) -> JoinHandle<Result<(), TransportError>> {
        let adapter = self.adapter.clone();
        let mut events = self.events.clone();

        self.runtime.spawn(async move {
            let mut central_events = adapter.events().await?;

            'mainloop: loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break 'mainloop;
                    },
                    event = central_events.next() => match event {
                        Some(CentralEvent::DeviceDisconnected(peripheral_id)) => {
                            match adapter.peripheral(&peripheral_id).await {
                                Ok(peripheral) => {
                                    let id = DeviceId::from(peripheral.address());
                                    info!("Connection lost: {}", id);
                                    report(&mut events, TransportEvent::new(id, TransportEventKind::Disconnected)).await;
                                },
                                Err(err) => debug!("Disconnected peripheral {:?} is unknown: {:?}", peripheral_id, err),
                            }
                        },
                        Some(_) => {},
                        None => break 'mainloop,
                    },
                }
            }

            Ok(())
        })
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.events.is_closed() {
            return Err(TransportError::ChannelClosed);
        }
        Ok(())
    }
}

impl Transport for BtleTransport {
    fn connect(&self, id: &DeviceId) -> Result<(), TransportError> {
        self.ensure_open()?;

        let adapter = self.adapter.clone();
        let mut events = self.events.clone();
        let options = self.options.clone();
        let connecting = self.connecting.clone();
        let cancel = connecting.start(id);
        let id = id.clone();

        self.runtime.spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Connecting to peripheral {} was aborted", id);
                    return;
                },
                result = connect_peripheral(&adapter, &id, options.connect_deadline()) => result,
            };
            connecting.finish(&id, &cancel);

            match result {
                Ok(peripheral) => {
                    report(&mut events, TransportEvent::new(id.clone(), TransportEventKind::Connected)).await;

                    if options.auto_discover_services {
                        info!("Connected; Discovering services of {}...", id);
                        match discover_services(&peripheral, options.connect_deadline()).await {
                            Ok(services) => {
                                let event = TransportEventKind::Device(DeviceEvent::ServicesDiscovered(services));
                                report(&mut events, TransportEvent::new(id, event)).await;
                            },
                            Err(err) => warn!("Discovering services of {} failed: {:?}", id, err),
                        }
                    }
                },
                Err(err) => {
                    warn!("Connecting to peripheral {} failed: {:?}", id, err);
                    let failure = TransportFailure::from(&err);
                    report(&mut events, TransportEvent::new(id, TransportEventKind::Failed(failure))).await;
                },
            }
        });

        Ok(())
    }

    fn disconnect(&self, id: &DeviceId) -> Result<(), TransportError> {
        self.ensure_open()?;

        let adapter = self.adapter.clone();
        let mut events = self.events.clone();
        let deadline = self.options.io_deadline();
        if self.connecting.abort(id) {
            info!("Aborting connect to {}", id);
        }
        let id = id.clone();

        self.runtime.spawn(async move {
            let result = match find_peripheral(&adapter, &id).await {
                Ok(Some(peripheral)) => match peripheral.is_connected().await {
                    // an aborted connect may never have brought the link up
                    Ok(false) => Ok(()),
                    _ => with_deadline(deadline, "disconnect", peripheral.disconnect()).await,
                },
                Ok(None) => Ok(()),
                Err(err) => Err(err),
            };

            let kind = match result {
                Ok(()) => TransportEventKind::Disconnected,
                Err(err) => {
                    warn!("Disconnecting from {} failed: {:?}", id, err);
                    TransportEventKind::Failed(TransportFailure::from(&err))
                },
            };
            report(&mut events, TransportEvent::new(id, kind)).await;
        });

        Ok(())
    }

    fn read_characteristic(&self, id: &DeviceId, service: Uuid, characteristic: Uuid) -> Result<(), TransportError> {
        self.ensure_open()?;

        let adapter = self.adapter.clone();
        let mut events = self.events.clone();
        let deadline = self.options.io_deadline();
        let id = id.clone();

        self.runtime.spawn(async move {
            let result = async {
                let peripheral = connected_peripheral(&adapter, &id).await?;
                let target = find_characteristic(&peripheral, service, characteristic, deadline).await?;
                with_deadline(deadline, "read characteristic", peripheral.read(&target)).await
            }.await;

            match result {
                Ok(value) => {
                    let event = DeviceEvent::CharacteristicRead { service, characteristic, value };
                    report(&mut events, TransportEvent::new(id, TransportEventKind::Device(event))).await;
                },
                Err(err) => {
                    warn!("Reading {} from {} failed: {:?}", characteristic, id, err);
                    report_request_failed(&mut events, id, GattOperation::Read, &err).await;
                },
            }
        });

        Ok(())
    }

    fn write_characteristic(
        &self,
        id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        with_response: bool,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;

        let adapter = self.adapter.clone();
        let mut events = self.events.clone();
        let deadline = self.options.io_deadline();
        let id = id.clone();
        let value = value.to_vec();
        let write_type = if with_response { WriteType::WithResponse } else { WriteType::WithoutResponse };

        self.runtime.spawn(async move {
            let result = async {
                let peripheral = connected_peripheral(&adapter, &id).await?;
                let target = find_characteristic(&peripheral, service, characteristic, deadline).await?;
                with_deadline(deadline, "write characteristic", peripheral.write(&target, &value, write_type)).await
            }.await;

            match result {
                Ok(()) => {
                    let event = DeviceEvent::CharacteristicWritten { service, characteristic };
                    report(&mut events, TransportEvent::new(id, TransportEventKind::Device(event))).await;
                },
                Err(err) => {
                    warn!("Writing {} to {} failed: {:?}", characteristic, id, err);
                    report_request_failed(&mut events, id, GattOperation::Write, &err).await;
                },
            }
        });

        Ok(())
    }
}
