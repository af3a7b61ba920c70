use std::time::Duration;
use btleplug::api::{Central, Peripheral as _, ScanFilter};
use btleplug::platform::Adapter;
use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::types::ScanOptions;
use crate::device::constants::POLL_DELAY;
use crate::device::id::DeviceId;
use crate::error::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDevice {
    pub id: DeviceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
}

/// Devices seen during a scan, in discovery order and without duplicates. A device seen again
/// keeps its first position but its details are refreshed.
#[derive(Debug, Default)]
pub struct Discoveries {
    devices: IndexMap<DeviceId, DiscoveredDevice>,
}

impl Discoveries {
    pub fn record(&mut self, device: DiscoveredDevice) -> bool {
        let is_new = !self.devices.contains_key(&device.id);
        if is_new {
            debug!("Discovered {}", device.id);
        }
        self.devices.insert(device.id.clone(), device);
        is_new
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn into_vec(self) -> Vec<DiscoveredDevice> {
        self.devices.into_values().collect()
    }
}

async fn collect(adapter: &Adapter, discoveries: &mut Discoveries, services: &[uuid::Uuid]) -> Result<(), TransportError> {
    for peripheral in adapter.peripherals().await? {
        let properties = match peripheral.properties().await {
            Ok(Some(properties)) => properties,
            Ok(None) => continue,
            Err(err) => {
                warn!("Could not query peripheral for properties: {:?}", err);
                continue;
            },
        };

        // Some environments ignore the scan filter
        if !services.is_empty() && !services.iter().any(|uuid| properties.services.contains(uuid)) {
            continue;
        }

        discoveries.record(DiscoveredDevice {
            id: DeviceId::from(properties.address),
            local_name: properties.local_name,
            rssi: properties.rssi,
        });
    }

    Ok(())
}

pub async fn scan(adapter: &Adapter, options: &ScanOptions, cancel: CancellationToken) -> Result<Vec<DiscoveredDevice>, TransportError> {
    let filter = ScanFilter {
        services: options.services.clone(),
    };

    info!("Scanning (deadline {:?}, max devices {:?})...", options.deadline(), options.max_devices);
    adapter.start_scan(filter).await?;

    let started = Instant::now();
    let mut discoveries = Discoveries::default();

    let result = async {
        'mainloop: loop {
            collect(adapter, &mut discoveries, &options.services).await?;

            if options.is_complete(started.elapsed(), discoveries.len()) {
                break 'mainloop;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                _ = sleep(Duration::from_millis(POLL_DELAY)) => {},
            }
        }
        Ok::<(), TransportError>(())
    }.await;

    if let Err(err) = adapter.stop_scan().await {
        warn!("Failed to stop scanning: {:?}", err);
    }
    result?;

    info!("Scan finished, {} device(s) found", discoveries.len());
    Ok(discoveries.into_vec())
}
