use std::io::{stdout, Write};
use std::time::Duration;
use btleplug::platform::Manager;
use futures::channel::mpsc::{channel, Receiver};
use futures::StreamExt;
use log::{error, info, warn};
use tokio::signal;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::bridge::events::{EventName, Notification};
use crate::bridge::sink::{EventSink, JsonLinesSink};
use crate::cli::{CharacteristicOp, Cli, Command, ConnectArgs, ScanArgs};
use crate::config::io::{get_config_path, ConfigIO};
use crate::config::types::Config;
use crate::device::constants::{CHANNEL_CAPACITY, SHUTDOWN_DEADLINE};
use crate::device::driver::{spawn_driver, DriverHandle};
use crate::device::id::DeviceId;
use crate::device::registry::DeviceRegistry;
use crate::device::state::ConnectionState;
use crate::device::types::TransportEvent;
use crate::error::{AppRunError, TransportError};
use crate::transport::btle::{first_adapter, BtleTransport};
use crate::transport::scan::scan;

pub fn run_application(cli: Cli) -> Result<(), AppRunError> {
    let path = get_config_path(cli.config.as_deref())?;
    let config_io = ConfigIO::open(&path)?;
    let mut locker = config_io.locker()?;
    let _guard = locker.lock()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|source| AppRunError::Runtime { source })?;

    runtime.block_on(async move {
        let config = match config_io.read().await {
            Ok(config) => config,
            Err(err) if err.is_file_not_found_error() => {
                info!("Config file not found, using defaults");
                Config::default()
            },
            Err(err) => return Err(err.into()),
        };

        match cli.command {
            Command::Scan(args) => scan_command(config, args).await,
            Command::Connect(args) => connect_command(config, args).await,
            Command::Config => config_command(&config_io, config).await,
        }
    })
}

async fn config_command(config_io: &ConfigIO, config: Config) -> Result<(), AppRunError> {
    if std::fs::metadata(config_io.path()).map(|attr| attr.len() == 0).unwrap_or(false) {
        config_io.save(&config).await?;
    }

    let content = serde_json::to_string_pretty(&config).map_err(crate::error::ConfigError::from)?;
    println!("{}", content);
    Ok(())
}

async fn scan_command(mut config: Config, args: ScanArgs) -> Result<(), AppRunError> {
    if args.millis.is_some() {
        config.scan.scan_millis = args.millis;
    }
    if args.max_devices.is_some() {
        config.scan.max_devices = args.max_devices;
    }
    if !args.services.is_empty() {
        config.scan.services = args.services;
    }

    let manager = Manager::new().await.map_err(TransportError::from)?;
    let adapter = first_adapter(&manager).await?;

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let devices = scan(&adapter, &config.scan, cancel).await?;

    let mut out = stdout().lock();
    for device in devices {
        match serde_json::to_string(&device) {
            Ok(line) => {
                if let Err(err) = writeln!(out, "{}", line) {
                    warn!("Failed to write scan result: {:?}", err);
                }
            },
            Err(err) => warn!("Failed to encode scan result: {:?}", err),
        }
    }

    Ok(())
}

struct PendingOps {
    reads: Vec<CharacteristicOp>,
    writes: Vec<CharacteristicOp>,
    with_response: bool,
    chunk_size: Option<usize>,
}

async fn run_ops(handle: &DriverHandle, id: &DeviceId, ops: PendingOps) {
    let PendingOps { reads, writes, with_response, chunk_size } = ops;

    for op in reads {
        if let Err(err) = handle.read(id.clone(), op.service, op.characteristic).await {
            error!("Failed to request read of {}: {}", op.characteristic, err);
        }
    }

    for op in writes {
        if let Err(err) = handle.write(id.clone(), op.service, op.characteristic, op.value, with_response, chunk_size).await {
            error!("Failed to request write of {}: {}", op.characteristic, err);
        }
    }
}

// forwards notifications until the peripheral disconnects, returns false if it did not
async fn drain_until_disconnected(notifications: &mut Receiver<Notification>, sink: &mut impl EventSink, deadline: Duration) -> bool {
    let wait = async {
        while let Some(notification) = notifications.next().await {
            let disconnected = notification.event == EventName::Disconnected;
            sink.emit(notification);
            if disconnected {
                return true;
            }
        }
        false
    };

    tokio::select! {
        _ = sleep(deadline) => false,
        disconnected = wait => disconnected,
    }
}

async fn connect_command(config: Config, args: ConnectArgs) -> Result<(), AppRunError> {
    let ConnectArgs { address: id, reads, writes, without_response, chunk_size } = args;

    let manager = Manager::new().await.map_err(TransportError::from)?;
    let adapter = first_adapter(&manager).await?;
    let cancel = CancellationToken::new();

    let (event_sender, event_receiver) = channel::<TransportEvent>(CHANNEL_CAPACITY);
    let (notification_sender, mut notifications) = channel::<Notification>(CHANNEL_CAPACITY);

    let transport = BtleTransport::new(adapter, event_sender, config.connection.clone()).await?;
    let watcher = transport.watch_link_loss(cancel.child_token());
    let registry = DeviceRegistry::new(transport.clone(), notification_sender)
        .with_auto_reconnect(config.connection.auto_reconnect);
    let (handle, driver) = spawn_driver(cancel.clone(), registry, event_receiver);

    let mut sink = JsonLinesSink::new(stdout());
    let ready_event = if config.connection.auto_discover_services { EventName::ServicesDiscovered } else { EventName::Connected };
    let mut pending_ops = Some(PendingOps { reads, writes, with_response: !without_response, chunk_size });

    handle.connect(id.clone()).await?;

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    'mainloop: loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, disconnecting from {}", id);
                break 'mainloop;
            },
            notification = notifications.next() => match notification {
                Some(notification) => {
                    let event = notification.event;
                    sink.emit(notification);

                    if event == ready_event {
                        if let Some(ops) = pending_ops.take() {
                            run_ops(&handle, &id, ops).await;
                        }
                    }

                    if event == EventName::Disconnected {
                        if !config.connection.auto_reconnect {
                            info!("Peripheral {} disconnected", id);
                            break 'mainloop;
                        }
                        info!("Peripheral {} disconnected, waiting for it to reconnect", id);
                    }
                },
                None => break 'mainloop,
            },
        }
    }

    let state = handle.state(id.clone()).await?;

    if let Some(ConnectionState::Connected | ConnectionState::Connecting) = state {
        if let Err(err) = handle.disconnect(id.clone()).await {
            warn!("Failed to disconnect from {}: {}", id, err);
        }
    }

    if let Some(ConnectionState::Connected | ConnectionState::Connecting | ConnectionState::Disconnecting) = state {
        if !drain_until_disconnected(&mut notifications, &mut sink, Duration::from_millis(SHUTDOWN_DEADLINE)).await {
            warn!("Peripheral {} did not confirm the disconnect in time", id);
        }
    }

    if let Err(err) = handle.close(id.clone()).await {
        warn!("Failed to close {}: {}", id, err);
    }

    cancel.cancel();
    if let Err(err) = transport.stop().await {
        warn!("Failed to stop scanning: {:?}", err);
    }

    match driver.await {
        Ok(registry) => info!("Driver stopped with {} tracked device(s)", registry.devices().len()),
        Err(err) => error!("Failed to join driver task: {:?}", err),
    }
    match watcher.await {
        Ok(Err(err)) => warn!("Link loss watcher failed: {:?}", err),
        Err(err) => error!("Failed to join link loss watcher: {:?}", err),
        Ok(Ok(())) => {},
    }

    Ok(())
}
