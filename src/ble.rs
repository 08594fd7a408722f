use async_trait::async_trait;
use btleplug::{
    api::{
        Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, ValueNotification,
        WriteType,
    },
    platform::{Adapter, Manager, Peripheral},
};
use futures::stream::{Stream, StreamExt};
use std::{
    collections::HashMap,
    pin::Pin,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{HubError, Result},
    types::{DiscoveredDevice, HubIdentity},
    HUB_CHARACTERISTIC_UUID,
};

/// Receiving end of a hub's notification mailbox is owned by its session;
/// links push raw payloads into this sender.
pub type NotificationSink = mpsc::UnboundedSender<Vec<u8>>;

/// Device discovery and connection primitives of the platform BLE stack
#[async_trait]
pub trait Transport: Send + Sync {
    /// Scan for `timeout` and return every device seen
    async fn discover(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>>;

    /// Open a connection to the device with the given address
    async fn connect(&self, identity: &HubIdentity) -> Result<Box<dyn HubLink>>;
}

/// A live connection to one hub
#[async_trait]
pub trait HubLink: Send + Sync {
    /// Write a frame to the hub's command characteristic
    ///
    /// Returns [`HubError::Disconnected`] when the link itself is gone and
    /// [`HubError::CommandFailed`] for any other write failure.
    async fn write_command(&self, frame: &[u8]) -> Result<()>;

    /// Start pushing hub notifications into `sink`
    ///
    /// Returns [`HubError::AlreadySubscribed`] if notifications are already running.
    async fn subscribe_notifications(&self, sink: NotificationSink) -> Result<()>;

    /// Whether the underlying link is still up
    async fn is_connected(&self) -> bool;

    /// Tear down the link
    async fn disconnect(&self) -> Result<()>;
}

/// [`Transport`] backed by the first local Bluetooth adapter
pub struct BleTransport {
    // held so the adapter outlives the scan; never read
    #[allow(dead_code)]
    manager: Manager,
    adapter: Adapter,
    peripherals: Mutex<HashMap<HubIdentity, Peripheral>>,
}

impl BleTransport {
    /// Create a transport on the first available adapter
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Ble`] if the Bluetooth manager cannot be initialized,
    /// or [`HubError::DiscoveryFailed`] if no adapter is present.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| HubError::DiscoveryFailed("no Bluetooth adapter found".to_string()))?;

        Ok(Self {
            manager,
            adapter,
            peripherals: Mutex::new(HashMap::new()),
        })
    }

    async fn find_peripheral(&self, identity: &HubIdentity) -> Result<Peripheral> {
        if let Some(peripheral) = self.peripherals.lock().await.get(identity) {
            return Ok(peripheral.clone());
        }

        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.address().to_string() == identity.as_str())
            .ok_or_else(|| HubError::ConnectionFailed(format!("{identity} has not been seen in a scan")))
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn discover(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        info!("Scanning for hubs ({} ms)...", timeout.as_millis());

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| HubError::DiscoveryFailed(e.to_string()))?;

        tokio::time::sleep(timeout).await;

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| HubError::DiscoveryFailed(e.to_string()))?;

        let mut devices = Vec::with_capacity(peripherals.len());
        let mut cache = self.peripherals.lock().await;
        for peripheral in peripherals {
            let advertised_name = match peripheral.properties().await {
                Ok(Some(properties)) => properties.local_name,
                _ => None,
            };
            let identity = HubIdentity::new(peripheral.address().to_string());

            debug!("Saw {} ({:?})", identity, advertised_name);
            devices.push(DiscoveredDevice::new(identity.clone(), advertised_name));
            cache.insert(identity, peripheral);
        }

        info!("Scan completed. Saw {} device(s)", devices.len());
        Ok(devices)
    }

    async fn connect(&self, identity: &HubIdentity) -> Result<Box<dyn HubLink>> {
        let peripheral = self.find_peripheral(identity).await?;

        peripheral
            .connect()
            .await
            .map_err(|e| HubError::ConnectionFailed(format!("{identity}: {e}")))?;

        if let Err(e) = peripheral.discover_services().await {
            let _ = peripheral.disconnect().await;
            return Err(HubError::ConnectionFailed(format!("{identity}: {e}")));
        }

        let Some(characteristic) = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == HUB_CHARACTERISTIC_UUID)
        else {
            let _ = peripheral.disconnect().await;
            return Err(HubError::Protocol(format!(
                "{identity} has no Powered Up characteristic"
            )));
        };

        info!("Connected to {}", identity);
        Ok(Box::new(BleLink::new(peripheral, characteristic)))
    }
}

/// [`HubLink`] over a btleplug peripheral
///
/// The notification forwarder spawned by a subscription is aborted when the
/// link is disconnected or dropped.
pub struct BleLink {
    peripheral: Peripheral,
    characteristic: Characteristic,
    subscribed: AtomicBool,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl BleLink {
    fn new(peripheral: Peripheral, characteristic: Characteristic) -> Self {
        Self {
            peripheral,
            characteristic,
            subscribed: AtomicBool::new(false),
            forwarder: Mutex::new(None),
        }
    }

    async fn stop_forwarding(&self) {
        if let Some(handle) = self.forwarder.lock().await.take() {
            handle.abort();
        }
    }
}

impl Drop for BleLink {
    fn drop(&mut self) {
        if let Some(handle) = self.forwarder.get_mut().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl HubLink for BleLink {
    async fn write_command(&self, frame: &[u8]) -> Result<()> {
        debug!("Sending command: {:02X?}", frame);

        if let Err(e) = self
            .peripheral
            .write(&self.characteristic, frame, WriteType::WithoutResponse)
            .await
        {
            if !self.is_connected().await {
                return Err(HubError::Disconnected);
            }
            return Err(HubError::CommandFailed(e.to_string()));
        }

        Ok(())
    }

    async fn subscribe_notifications(&self, sink: NotificationSink) -> Result<()> {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Err(HubError::AlreadySubscribed);
        }

        let result = async {
            let stream = self.peripheral.notifications().await?;
            self.peripheral.subscribe(&self.characteristic).await?;
            Ok::<_, btleplug::Error>(stream)
        }
        .await;

        match result {
            Ok(stream) => {
                let handle =
                    tokio::spawn(forward_notifications(stream, self.characteristic.uuid, sink));
                if let Some(previous) = self.forwarder.lock().await.replace(handle) {
                    previous.abort();
                }
                Ok(())
            }
            Err(e) => {
                self.subscribed.store(false, Ordering::SeqCst);
                Err(HubError::SubscriptionFailed(e.to_string()))
            }
        }
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop_forwarding().await;
        self.subscribed.store(false, Ordering::SeqCst);
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

/// Forward notifications for `uuid` into the session mailbox until either side closes
async fn forward_notifications(
    mut stream: Pin<Box<dyn Stream<Item = ValueNotification> + Send>>,
    uuid: Uuid,
    sink: NotificationSink,
) {
    while let Some(data) = stream.next().await {
        if data.uuid == uuid && sink.send(data.value).is_err() {
            break;
        }
    }

    debug!("Notification stream ended");
}
