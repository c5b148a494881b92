//! BLE heart-rate and power stream.
//!
//! [`BioStream`] manages the scan window, classifies advertisements, keeps
//! the per-address connection registry and turns measurement notifications
//! into samples. Every radio observation goes through one pump task, which
//! is the only writer of the discovered list and the connection registry.

use crate::sensors::ble::{BleCentral, RadioBarrier, RadioEvent, RadioSender};
use crate::sensors::gatt::{
    classify_services, heart_rate_or_zero, power_or_zero, CYCLING_POWER_MEASUREMENT_UUID,
    HEART_RATE_MEASUREMENT_UUID,
};
use crate::sensors::types::{BleDevice, SampleEvent, SampleSink, SensorConfig, SensorError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Device and measurement events for subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum BioEvent {
    /// Scan window opened
    ScanStarted,
    /// Scan window closed, by request or timeout
    ScanStopped,
    /// A new peripheral was seen in this scan
    Discovered(BleDevice),
    /// A peripheral was connected
    Connected(BleDevice),
    /// A peripheral was disconnected
    Disconnected(BleDevice),
    /// A connection attempt failed
    ConnectionError { address: String, reason: String },
    /// Heart rate notification
    HeartRate { address: String, bpm: u16 },
    /// Power notification
    Power { address: String, watts: u16 },
}

#[derive(Debug, Default)]
struct ScanState {
    active: bool,
    /// Bumped on every scan start so a stale timeout cannot stop a newer scan
    generation: u64,
}

struct BioShared {
    discovered: Mutex<HashMap<String, BleDevice>>,
    connected: Mutex<HashMap<String, BleDevice>>,
    scan: Mutex<ScanState>,
    sink: Mutex<Option<SampleSink>>,
    events: broadcast::Sender<BioEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl BioShared {
    fn emit(&self, event: BioEvent) {
        let _ = self.events.send(event);
    }

    fn forward(&self, sample: SampleEvent) {
        if let Some(sink) = lock(&self.sink).as_ref() {
            sink.send(sample);
        }
    }

    /// Apply one radio observation. Only the pump task calls this.
    fn apply(&self, event: RadioEvent) {
        match event {
            RadioEvent::Advertisement {
                address,
                name,
                services,
                rssi,
            } => {
                if !lock(&self.scan).active {
                    return;
                }
                let connected = lock(&self.connected).contains_key(&address);
                let device = BleDevice {
                    name,
                    address: address.clone(),
                    device_type: classify_services(&services),
                    connected,
                    rssi,
                };
                let is_new = lock(&self.discovered)
                    .insert(address, device.clone())
                    .is_none();
                if is_new {
                    tracing::info!(
                        "Discovered {} ({}) at {}",
                        device.display_name(),
                        device.device_type,
                        device.address
                    );
                    self.emit(BioEvent::Discovered(device));
                }
            }
            RadioEvent::Connected { address } => {
                let mut device = lock(&self.discovered)
                    .get(&address)
                    .cloned()
                    .unwrap_or_else(|| BleDevice {
                        name: None,
                        address: address.clone(),
                        device_type: Default::default(),
                        connected: false,
                        rssi: None,
                    });
                device.connected = true;
                if let Some(entry) = lock(&self.discovered).get_mut(&address) {
                    entry.connected = true;
                }
                lock(&self.connected).insert(address, device.clone());
                self.emit(BioEvent::Connected(device));
            }
            RadioEvent::Disconnected { address } => {
                let removed = lock(&self.connected).remove(&address);
                if let Some(mut device) = removed {
                    device.connected = false;
                    if let Some(entry) = lock(&self.discovered).get_mut(&address) {
                        entry.connected = false;
                    }
                    tracing::info!("Disconnected from {}", address);
                    self.emit(BioEvent::Disconnected(device));
                }
            }
            RadioEvent::Notification {
                address,
                characteristic,
                value,
            } => {
                if characteristic == HEART_RATE_MEASUREMENT_UUID {
                    let bpm = heart_rate_or_zero(&value);
                    self.forward(SampleEvent::HeartRate(bpm));
                    self.emit(BioEvent::HeartRate { address, bpm });
                } else if characteristic == CYCLING_POWER_MEASUREMENT_UUID {
                    let watts = power_or_zero(&value);
                    self.forward(SampleEvent::Power(watts));
                    self.emit(BioEvent::Power { address, watts });
                } else {
                    tracing::debug!("Ignoring notification from {}", characteristic);
                }
            }
            RadioEvent::Barrier(barrier) => barrier.release(),
        }
    }
}

/// BLE stream feeding heart rate and power into the session.
pub struct BioStream {
    central: Arc<dyn BleCentral>,
    shared: Arc<BioShared>,
    radio_tx: RadioSender,
    scan_window: Duration,
    pump: JoinHandle<()>,
}

impl BioStream {
    /// Create the stream and start its radio-event pump.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(central: Arc<dyn BleCentral>, config: SensorConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let shared = Arc::new(BioShared {
            discovered: Mutex::new(HashMap::new()),
            connected: Mutex::new(HashMap::new()),
            scan: Mutex::new(ScanState::default()),
            sink: Mutex::new(None),
            events,
        });

        let (radio_tx, mut radio_rx) = mpsc::unbounded_channel();
        let pump_shared = shared.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = radio_rx.recv().await {
                pump_shared.apply(event);
            }
        });

        Arc::new(Self {
            central,
            shared,
            radio_tx,
            scan_window: Duration::from_secs(config.scan_timeout_secs),
            pump,
        })
    }

    /// Wait until the pump has applied every radio event queued so far.
    async fn settle(&self) {
        let barrier = RadioBarrier::default();
        if self.radio_tx.send(RadioEvent::Barrier(barrier.clone())).is_ok() {
            barrier.wait().await;
        }
    }

    /// Subscribe to device and measurement events.
    pub fn subscribe(&self) -> broadcast::Receiver<BioEvent> {
        self.shared.events.subscribe()
    }

    /// Route heart rate and power samples into `sink`.
    pub fn attach_sink(&self, sink: SampleSink) {
        *lock(&self.shared.sink) = Some(sink);
    }

    /// Stop routing samples; later notifications reach subscribers only.
    pub fn detach_sink(&self) {
        lock(&self.shared.sink).take();
    }

    /// Start a scan that stops itself after the scan window.
    pub async fn start_scan(&self) -> Result<(), SensorError> {
        if !self.central.permission_granted() {
            return Err(SensorError::PermissionDenied);
        }

        let generation = {
            let mut scan = lock(&self.shared.scan);
            if scan.active {
                return Ok(());
            }
            scan.active = true;
            scan.generation += 1;
            scan.generation
        };

        tracing::info!("Starting device discovery");
        lock(&self.shared.discovered).clear();

        if let Err(e) = self.central.start_scan(self.radio_tx.clone()).await {
            lock(&self.shared.scan).active = false;
            return Err(e);
        }
        self.shared.emit(BioEvent::ScanStarted);

        let central = self.central.clone();
        let shared = self.shared.clone();
        let window = self.scan_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            match end_scan(central.as_ref(), &shared, Some(generation)).await {
                Ok(true) => tracing::info!("Scan window elapsed"),
                Ok(false) => {}
                Err(e) => tracing::warn!("Failed to stop scan after timeout: {}", e),
            }
        });

        Ok(())
    }

    /// Stop scanning. Idempotent.
    pub async fn stop_scan(&self) -> Result<(), SensorError> {
        end_scan(self.central.as_ref(), &self.shared, None)
            .await
            .map(|_| ())
    }

    /// Connect to a discovered device.
    ///
    /// On success the registry already lists the device when this returns.
    pub async fn connect(&self, address: &str) -> Result<(), SensorError> {
        if !self.central.permission_granted() {
            return Err(SensorError::PermissionDenied);
        }
        if lock(&self.shared.connected).contains_key(address) {
            return Ok(());
        }

        if let Err(e) = self.central.connect(address, self.radio_tx.clone()).await {
            tracing::warn!("Connection to {} failed: {}", address, e);
            self.shared.emit(BioEvent::ConnectionError {
                address: address.to_string(),
                reason: e.to_string(),
            });
            return Err(e);
        }
        self.settle().await;
        Ok(())
    }

    /// Disconnect a device. Idempotent.
    pub async fn disconnect(&self, address: &str) -> Result<(), SensorError> {
        self.settle().await;
        if !lock(&self.shared.connected).contains_key(address) {
            return Ok(());
        }

        self.central.disconnect(address).await?;
        // The registry is updated by the pump, not here
        let _ = self.radio_tx.send(RadioEvent::Disconnected {
            address: address.to_string(),
        });
        self.settle().await;
        Ok(())
    }

    /// Disconnect every connected device.
    pub async fn disconnect_all(&self) {
        self.settle().await;
        let addresses: Vec<String> = lock(&self.shared.connected).keys().cloned().collect();
        for address in addresses {
            if let Err(e) = self.disconnect(&address).await {
                tracing::warn!("Failed to disconnect {}: {}", address, e);
            }
        }
    }

    /// Stop scanning, drop the sink and disconnect everything.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down BLE stream");
        self.detach_sink();
        if let Err(e) = self.stop_scan().await {
            tracing::warn!("Failed to stop scan: {}", e);
        }
        self.disconnect_all().await;
    }

    /// Devices seen in the current or last scan, ordered by address.
    pub fn discovered_devices(&self) -> Vec<BleDevice> {
        let mut devices: Vec<BleDevice> =
            lock(&self.shared.discovered).values().cloned().collect();
        devices.sort_by(|a, b| a.address.cmp(&b.address));
        devices
    }

    /// Currently connected devices, ordered by address.
    pub fn connected_devices(&self) -> Vec<BleDevice> {
        let mut devices: Vec<BleDevice> =
            lock(&self.shared.connected).values().cloned().collect();
        devices.sort_by(|a, b| a.address.cmp(&b.address));
        devices
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.shared.scan).active
    }
}

impl Drop for BioStream {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Close the scan window. With a generation, only that scan is closed.
///
/// Returns whether a scan was actually stopped.
async fn end_scan(
    central: &dyn BleCentral,
    shared: &BioShared,
    generation: Option<u64>,
) -> Result<bool, SensorError> {
    {
        let mut scan = lock(&shared.scan);
        if !scan.active || generation.is_some_and(|g| g != scan.generation) {
            return Ok(false);
        }
        scan.active = false;
    }

    tracing::info!("Stopping device discovery");
    let result = central.stop_scan().await;
    shared.emit(BioEvent::ScanStopped);
    result.map(|_| true)
}
