use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future;
use futures::stream::BoxStream;
use futures::StreamExt;
use log::info;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Descriptor, Manager as _, Peripheral as _, ScanFilter, Service,
    ValueNotification,
};
use btleplug::platform::{Adapter, Manager, Peripheral};

use crate::error::SourceError;

/// Adapter side of a BLE link: scanning and picking a device.
#[async_trait]
pub trait BleCentral: Send + Sync {
    async fn start_scan(&self) -> Result<(), SourceError>;

    async fn stop_scan(&self) -> Result<(), SourceError>;

    /// Waits for the first device whose advertised name contains `name_filter`.
    async fn find_device(&self, name_filter: &str) -> Result<Arc<dyn BleDevice>, SourceError>;
}

/// A remote GATT server.
#[async_trait]
pub trait BleDevice: Send + Sync {
    async fn is_connected(&self) -> Result<bool, SourceError>;

    async fn connect(&self) -> Result<(), SourceError>;

    async fn disconnect(&self) -> Result<(), SourceError>;

    /// Runs discovery and returns every service found.
    async fn discover_services(&self) -> Result<BTreeSet<Service>, SourceError>;

    async fn notifications(&self) -> Result<BoxStream<'static, ValueNotification>, SourceError>;

    async fn subscribe(&self, characteristic: &Characteristic) -> Result<(), SourceError>;

    async fn unsubscribe(&self, characteristic: &Characteristic) -> Result<(), SourceError>;

    async fn write_descriptor(&self, descriptor: &Descriptor, value: &[u8]) -> Result<(), SourceError>;

    /// Yields once each time the link to this device drops.
    async fn disconnections(&self) -> Result<BoxStream<'static, ()>, SourceError>;
}

/// btleplug on the first adapter the platform reports.
pub struct PlatformCentral {
    _manager: Manager,
    adapter: Adapter,
}

impl PlatformCentral {
    pub async fn first_adapter() -> Result<Self, SourceError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(SourceError::AdapterNotFound)?;
        info!(
            "Using adapter {}",
            adapter.adapter_info().await.unwrap_or("No name adapter".to_string())
        );

        Ok(PlatformCentral {
            _manager: manager,
            adapter,
        })
    }

    fn device(&self, peripheral: Peripheral) -> Arc<dyn BleDevice> {
        Arc::new(PlatformDevice {
            adapter: self.adapter.clone(),
            peripheral,
        })
    }
}

#[async_trait]
impl BleCentral for PlatformCentral {
    async fn start_scan(&self) -> Result<(), SourceError> {
        Ok(self.adapter.start_scan(ScanFilter::default()).await?)
    }

    async fn stop_scan(&self) -> Result<(), SourceError> {
        Ok(self.adapter.stop_scan().await?)
    }

    async fn find_device(&self, name_filter: &str) -> Result<Arc<dyn BleDevice>, SourceError> {
        // Subscribe before listing, so a device found in between shows up in one or the other.
        let mut events = self.adapter.events().await?;

        for peripheral in self.adapter.peripherals().await? {
            if matches_name(&peripheral, name_filter).await {
                return Ok(self.device(peripheral));
            }
        }

        while let Some(event) = events.next().await {
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };
            let Ok(peripheral) = self.adapter.peripheral(&id).await else { continue; };
            if matches_name(&peripheral, name_filter).await {
                return Ok(self.device(peripheral));
            }
        }

        Err(SourceError::DeviceNotFound(name_filter.to_string()))
    }
}

struct PlatformDevice {
    adapter: Adapter,
    peripheral: Peripheral,
}

#[async_trait]
impl BleDevice for PlatformDevice {
    async fn is_connected(&self) -> Result<bool, SourceError> {
        Ok(self.peripheral.is_connected().await?)
    }

    async fn connect(&self) -> Result<(), SourceError> {
        Ok(self.peripheral.connect().await?)
    }

    async fn disconnect(&self) -> Result<(), SourceError> {
        Ok(self.peripheral.disconnect().await?)
    }

    async fn discover_services(&self) -> Result<BTreeSet<Service>, SourceError> {
        self.peripheral.discover_services().await?;
        Ok(self.peripheral.services())
    }

    async fn notifications(&self) -> Result<BoxStream<'static, ValueNotification>, SourceError> {
        Ok(self.peripheral.notifications().await?)
    }

    async fn subscribe(&self, characteristic: &Characteristic) -> Result<(), SourceError> {
        Ok(self.peripheral.subscribe(characteristic).await?)
    }

    async fn unsubscribe(&self, characteristic: &Characteristic) -> Result<(), SourceError> {
        Ok(self.peripheral.unsubscribe(characteristic).await?)
    }

    async fn write_descriptor(&self, descriptor: &Descriptor, value: &[u8]) -> Result<(), SourceError> {
        Ok(self.peripheral.write_descriptor(descriptor, value).await?)
    }

    async fn disconnections(&self) -> Result<BoxStream<'static, ()>, SourceError> {
        let id = self.peripheral.id();
        let events = self.adapter.events().await?;
        Ok(events
            .filter_map(move |event| {
                future::ready(match event {
                    CentralEvent::DeviceDisconnected(lost) if lost == id => Some(()),
                    _ => None,
                })
            })
            .boxed())
    }
}

async fn matches_name(peripheral: &Peripheral, name_filter: &str) -> bool {
    let Some(name) = get_peripheral_name(peripheral).await else { return false; };
    if !name.contains(name_filter) {
        return false;
    }
    info!("Found matching peripheral {name:?}");
    true
}

async fn get_peripheral_name(peripheral: &Peripheral) -> Option<String> {
    let Ok(Some(properties)) = peripheral.properties().await else { return None; };

    properties.local_name
}
