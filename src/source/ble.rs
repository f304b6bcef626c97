use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use btleplug::api::{CharPropFlags, Characteristic, Service, ValueNotification};

use super::state::{ConnectionMachine, ConnectionState};
use super::transport::{BleCentral, BleDevice, PlatformCentral};
use super::{HeartRateSource, SampleFeed, SourceExit};
use crate::error::SourceError;
use crate::measurement::{
    decode_heart_rate, CLIENT_CHARACTERISTIC_CONFIG_UUID, ENABLE_NOTIFICATION_VALUE, HEART_RATE_MEASUREMENT_UUID,
    HEART_RATE_SERVICE_UUID,
};

pub const DEFAULT_DEVICE_NAME: &str = "Polar H10";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

struct Link {
    notifications: BoxStream<'static, ValueNotification>,
    link_lost: BoxStream<'static, ()>,
}

/// One attempt: scan through subscribe is bounded by a single timeout and nothing retries.
pub struct BleSource {
    name_filter: String,
    connect_timeout: Duration,
    machine: ConnectionMachine,
    central: Option<Arc<dyn BleCentral>>,
    device: Option<Arc<dyn BleDevice>>,
    subscribed: Option<Characteristic>,
}

impl BleSource {
    /// Opens the platform's first adapter when started.
    pub fn new(name_filter: impl Into<String>, connect_timeout: Duration) -> Self {
        BleSource {
            name_filter: name_filter.into(),
            connect_timeout,
            machine: ConnectionMachine::new(),
            central: None,
            device: None,
            subscribed: None,
        }
    }

    pub fn with_central(
        central: Arc<dyn BleCentral>,
        name_filter: impl Into<String>,
        connect_timeout: Duration,
    ) -> Self {
        BleSource {
            central: Some(central),
            ..BleSource::new(name_filter, connect_timeout)
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    async fn establish(&mut self) -> Result<Link, SourceError> {
        self.machine.advance(ConnectionState::Scanning)?;

        let central = match &self.central {
            Some(central) => central.clone(),
            None => {
                let central: Arc<dyn BleCentral> = Arc::new(PlatformCentral::first_adapter().await?);
                self.central = Some(central.clone());
                central
            }
        };

        central.start_scan().await?;
        info!("Scanning for a device named like {:?}...", self.name_filter);

        let device = central.find_device(&self.name_filter).await?;
        central.stop_scan().await?;
        self.machine.advance(ConnectionState::Connecting)?;
        self.device = Some(device.clone());

        if !device.is_connected().await? {
            device.connect().await?;
        }
        self.machine.advance(ConnectionState::ServiceDiscovery)?;

        let services = device.discover_services().await?;
        let characteristic = find_measurement_characteristic(&services)?;
        self.machine.advance(ConnectionState::Subscribing)?;

        // Local delivery first, so no notification is missed once the peripheral starts sending.
        let link_lost = device.disconnections().await?;
        let notifications = device.notifications().await?;
        device.subscribe(&characteristic).await?;
        self.subscribed = Some(characteristic.clone());

        let cccd = characteristic
            .descriptors
            .iter()
            .find(|d| d.uuid == CLIENT_CHARACTERISTIC_CONFIG_UUID);
        match cccd {
            Some(descriptor) => {
                device.write_descriptor(descriptor, &ENABLE_NOTIFICATION_VALUE).await?;
                debug!("Wrote enable-notification to the client configuration descriptor");
            }
            None => debug!("Client configuration descriptor is managed by the platform"),
        }
        self.machine.advance(ConnectionState::Streaming)?;

        Ok(Link {
            notifications,
            link_lost,
        })
    }

    async fn stream(&self, link: &mut Link, feed: &SampleFeed, cancel: &CancellationToken) -> SourceExit {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return SourceExit::Cancelled,
                lost = link.link_lost.next() => {
                    match lost {
                        Some(()) => warn!("Peripheral disconnected"),
                        None => warn!("Adapter event stream ended"),
                    }
                    return SourceExit::LinkLost;
                },
                notification = link.notifications.next() => {
                    let Some(notification) = notification else {
                        warn!("Notification stream ended");
                        return SourceExit::LinkLost;
                    };
                    if notification.uuid != HEART_RATE_MEASUREMENT_UUID {
                        continue;
                    }
                    let accepted = match decode_heart_rate(&notification.value) {
                        Ok(heart_rate) => {
                            debug!("heartbeat: {heart_rate}");
                            feed.push_sample(heart_rate)
                        }
                        Err(err) => {
                            warn!("Skipping notification {:?}: {err}", notification.value);
                            feed.push_malformed(err)
                        }
                    };
                    if !accepted {
                        return SourceExit::Cancelled;
                    }
                }
            }
        }
    }

    /// Disable notifications and drop the link. Only the steps that were reached are undone,
    /// and a link that is already gone is left alone.
    async fn release(&mut self, link_alive: bool) {
        if self.machine.state() == ConnectionState::Scanning {
            if let Some(central) = &self.central {
                if let Err(err) = central.stop_scan().await {
                    warn!("Failed to stop scan: {err}");
                }
            }
        }

        let subscribed = self.subscribed.take();
        if let Some(device) = self.device.take().filter(|_| link_alive) {
            if let Some(characteristic) = subscribed {
                match device.unsubscribe(&characteristic).await {
                    Ok(()) => info!("Notifications disabled"),
                    Err(err) => warn!("Failed to disable notifications: {err}"),
                }
            }
            if let Err(err) = device.disconnect().await {
                warn!("Error disconnecting from peripheral: {err}");
            }
        }

        self.machine.disconnect();
    }
}

enum Setup {
    Ready(Result<Result<Link, SourceError>, tokio::time::error::Elapsed>),
    Cancelled,
}

#[async_trait]
impl HeartRateSource for BleSource {
    fn describe(&self) -> String {
        format!("BLE device matching {:?}", self.name_filter)
    }

    async fn run(&mut self, feed: SampleFeed, cancel: CancellationToken) -> Result<SourceExit, SourceError> {
        let timeout = self.connect_timeout;
        let setup = tokio::select! {
            biased;
            _ = cancel.cancelled() => Setup::Cancelled,
            result = tokio::time::timeout(timeout, self.establish()) => Setup::Ready(result),
        };

        let mut link = match setup {
            Setup::Cancelled => {
                self.release(true).await;
                return Ok(SourceExit::Cancelled);
            }
            Setup::Ready(Err(_)) => {
                self.release(true).await;
                return Err(SourceError::Timeout(timeout));
            }
            Setup::Ready(Ok(Err(err))) => {
                self.release(true).await;
                return Err(err);
            }
            Setup::Ready(Ok(Ok(link))) => link,
        };

        let exit = self.stream(&mut link, &feed, &cancel).await;
        self.release(exit != SourceExit::LinkLost).await;
        Ok(exit)
    }
}

/// Locate the Heart Rate Measurement characteristic inside the Heart Rate Service.
pub fn find_measurement_characteristic(services: &BTreeSet<Service>) -> Result<Characteristic, SourceError> {
    let service = services
        .iter()
        .find(|s| s.uuid == HEART_RATE_SERVICE_UUID)
        .ok_or_else(|| SourceError::Discovery("heart rate service not found".to_string()))?;

    let characteristic = service
        .characteristics
        .iter()
        .find(|c| c.uuid == HEART_RATE_MEASUREMENT_UUID)
        .ok_or_else(|| SourceError::Discovery("heart rate measurement characteristic not found".to_string()))?;

    if !characteristic.properties.contains(CharPropFlags::NOTIFY) {
        return Err(SourceError::Discovery(
            "heart rate measurement characteristic does not support notifications".to_string(),
        ));
    }

    Ok(characteristic.clone())
}
