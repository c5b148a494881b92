//! BLE central abstraction and its btleplug implementation.
//!
//! A [`BleCentral`] owns the radio. It reports everything it observes as
//! [`RadioEvent`]s on the channel it is handed; it never touches the device
//! registry itself.

use crate::sensors::gatt::{
    CYCLING_POWER_MEASUREMENT_UUID, HEART_RATE_MEASUREMENT_UUID, SCAN_SERVICES,
};
use crate::sensors::types::SensorError;
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Observation reported by the radio.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    /// Advertisement seen during a scan
    Advertisement {
        address: String,
        name: Option<String>,
        services: Vec<Uuid>,
        rssi: Option<i16>,
    },
    /// Link established and notifications subscribed
    Connected { address: String },
    /// Link lost or closed
    Disconnected { address: String },
    /// Characteristic value notification
    Notification {
        address: String,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    /// Released by the consumer once every earlier event has been applied
    Barrier(RadioBarrier),
}

/// Ordering marker on the radio channel.
///
/// Centrals never send one; the stream queues it behind their events to
/// wait until those are applied.
#[derive(Debug, Clone, Default)]
pub struct RadioBarrier(Arc<Notify>);

impl RadioBarrier {
    /// Wake the waiter. A release before the wait is not lost.
    pub fn release(&self) {
        self.0.notify_one();
    }

    pub async fn wait(&self) {
        self.0.notified().await;
    }
}

impl PartialEq for RadioBarrier {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Channel a central reports into.
pub type RadioSender = UnboundedSender<RadioEvent>;

/// The radio side of the BLE stream.
#[async_trait]
pub trait BleCentral: Send + Sync {
    /// Whether Bluetooth access has been granted.
    fn permission_granted(&self) -> bool {
        true
    }

    /// Start scanning; advertisements are reported on `events`.
    async fn start_scan(&self, events: RadioSender) -> Result<(), SensorError>;

    /// Stop scanning.
    async fn stop_scan(&self) -> Result<(), SensorError>;

    /// Connect to `address` and subscribe to the measurement characteristics.
    async fn connect(&self, address: &str, events: RadioSender) -> Result<(), SensorError>;

    /// Close the link to `address`.
    async fn disconnect(&self, address: &str) -> Result<(), SensorError>;
}

/// Close a link whose setup failed after it was opened, then pass the
/// setup error on.
async fn close_if_failed<F, Fut, E>(
    setup: Result<(), SensorError>,
    address: &str,
    close: F,
) -> Result<(), SensorError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    if setup.is_err() {
        tracing::warn!("Setup of {} failed, closing link", address);
        if let Err(e) = close().await {
            tracing::warn!("Failed to close link to {}: {}", address, e);
        }
    }
    setup
}

/// [`BleCentral`] backed by the first btleplug adapter.
pub struct BtleplugCentral {
    adapter: Adapter,
    /// Connected peripherals (address -> Peripheral)
    peripherals: Arc<Mutex<HashMap<String, Peripheral>>>,
    /// Discovery event task, alive while scanning
    scan_task: Mutex<Option<JoinHandle<()>>>,
}

impl BtleplugCentral {
    /// Initialize the BLE adapter.
    pub async fn new() -> Result<Self, SensorError> {
        tracing::info!("Initializing BLE adapter");

        let manager = Manager::new()
            .await
            .map_err(|e| SensorError::HardwareUnavailable(e.to_string()))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| SensorError::HardwareUnavailable(e.to_string()))?;

        let adapter = adapters.into_iter().next().ok_or_else(|| {
            SensorError::HardwareUnavailable("Bluetooth adapter not found".to_string())
        })?;

        tracing::info!("BLE adapter initialized");

        Ok(Self {
            adapter,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
            scan_task: Mutex::new(None),
        })
    }

    /// Forward adapter events as radio events.
    async fn process_discovery_events(adapter: Adapter, events: RadioSender) {
        use futures::stream::StreamExt;

        let mut stream = match adapter.events().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Failed to get adapter events: {}", e);
                return;
            }
        };

        while let Some(event) = stream.next().await {
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };

            let Ok(peripheral) = adapter.peripheral(&id).await else {
                continue;
            };
            let Ok(Some(properties)) = peripheral.properties().await else {
                continue;
            };

            let advertisement = RadioEvent::Advertisement {
                address: properties.address.to_string(),
                name: properties.local_name,
                services: properties.services,
                rssi: properties.rssi,
            };
            if events.send(advertisement).is_err() {
                break;
            }
        }
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral, SensorError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        peripherals
            .into_iter()
            .find(|p| p.address().to_string() == address)
            .ok_or_else(|| SensorError::DeviceNotFound(address.to_string()))
    }

    /// Subscribe to the heart rate and power measurement characteristics.
    async fn subscribe_to_measurements(peripheral: &Peripheral) -> Result<(), SensorError> {
        for characteristic in peripheral.characteristics() {
            if characteristic.uuid == HEART_RATE_MEASUREMENT_UUID
                || characteristic.uuid == CYCLING_POWER_MEASUREMENT_UUID
            {
                peripheral
                    .subscribe(&characteristic)
                    .await
                    .map_err(|e| SensorError::SubscriptionFailed(e.to_string()))?;

                tracing::debug!("Subscribed to characteristic: {}", characteristic.uuid);
            }
        }
        Ok(())
    }

    /// Forward notifications until the stream ends.
    async fn handle_notifications(
        peripheral: Peripheral,
        address: String,
        events: RadioSender,
        peripherals: Arc<Mutex<HashMap<String, Peripheral>>>,
    ) {
        use futures::stream::StreamExt;

        let mut notifications = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Failed to get notification stream: {}", e);
                peripherals.lock().await.remove(&address);
                let _ = events.send(RadioEvent::Disconnected { address });
                return;
            }
        };

        while let Some(notification) = notifications.next().await {
            let event = RadioEvent::Notification {
                address: address.clone(),
                characteristic: notification.uuid,
                value: notification.value,
            };
            if events.send(event).is_err() {
                return;
            }
        }

        // Stream ended - peripheral disconnected
        peripherals.lock().await.remove(&address);
        let _ = events.send(RadioEvent::Disconnected { address });
    }
}

#[async_trait]
impl BleCentral for BtleplugCentral {
    async fn start_scan(&self, events: RadioSender) -> Result<(), SensorError> {
        let filter = ScanFilter {
            services: SCAN_SERVICES.to_vec(),
        };

        self.adapter
            .start_scan(filter)
            .await
            .map_err(|e| SensorError::ScanFailed(e.to_string()))?;

        let adapter = self.adapter.clone();
        let task = tokio::spawn(Self::process_discovery_events(adapter, events));
        if let Some(previous) = self.scan_task.lock().await.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), SensorError> {
        if let Some(task) = self.scan_task.lock().await.take() {
            task.abort();
        }

        self.adapter
            .stop_scan()
            .await
            .map_err(|e| SensorError::ScanFailed(e.to_string()))
    }

    async fn connect(&self, address: &str, events: RadioSender) -> Result<(), SensorError> {
        tracing::info!("Connecting to device: {}", address);

        let peripheral = self.find_peripheral(address).await?;

        peripheral
            .connect()
            .await
            .map_err(|e| SensorError::ConnectionFailed(e.to_string()))?;

        let setup = match peripheral.discover_services().await {
            Ok(()) => Self::subscribe_to_measurements(&peripheral).await,
            Err(e) => Err(SensorError::ConnectionFailed(e.to_string())),
        };
        close_if_failed(setup, address, || peripheral.disconnect()).await?;

        self.peripherals
            .lock()
            .await
            .insert(address.to_string(), peripheral.clone());

        let _ = events.send(RadioEvent::Connected {
            address: address.to_string(),
        });

        tokio::spawn(Self::handle_notifications(
            peripheral,
            address.to_string(),
            events,
            self.peripherals.clone(),
        ));

        tracing::info!("Connected to device: {}", address);
        Ok(())
    }

    async fn disconnect(&self, address: &str) -> Result<(), SensorError> {
        tracing::info!("Disconnecting from device: {}", address);

        let peripheral = self.peripherals.lock().await.remove(address);
        if let Some(peripheral) = peripheral {
            peripheral
                .disconnect()
                .await
                .map_err(|e| SensorError::BleError(e.to_string()))?;
        }
        Ok(())
    }
}
