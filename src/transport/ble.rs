//! Bluetooth Low Energy transport backed by `bluest`.
//!
//! `bluest` exposes scan results and notifications as streams borrowing the
//! adapter or characteristic they came from. Each stream is driven by its
//! own task that forwards items into a channel, so the state machine can
//! drain them without awaiting.
//!
//! Every request that waits on the peer is bounded by [`GATT_TIMEOUT`], and
//! connecting by [`CONNECT_TIMEOUT`], so a peer that vanished mid-exchange
//! surfaces as [`TransportError::Timeout`] instead of a hang.

use std::collections::HashSet;
use std::future::Future;

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device, Service, Uuid};
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, trace, warn};

use super::{Peer, Transport};
use crate::error::TransportError;

/// A device seen while scanning
#[derive(Clone)]
pub struct BlePeer {
    address: String,
    device: Device,
}

impl Peer for BlePeer {
    fn address(&self) -> &str {
        &self.address
    }
}

/// A resolved GATT characteristic together with the UUID it was resolved by
#[derive(Clone)]
pub struct BleCharacteristic {
    uuid: Uuid,
    inner: Characteristic,
}

/// Upper bound for establishing the link
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for a single GATT request
pub const GATT_TIMEOUT: Duration = Duration::from_secs(10);

/// Canonical form of a device address: BlueZ reports `A4:C1:...`, the
/// configured target is written `a4:c1:...`.
pub(crate) fn canonical_address(id: &str) -> String {
    id.to_ascii_lowercase()
}

async fn bounded<T, E>(
    operation: &'static str,
    limit: Duration,
    request: impl Future<Output = Result<T, E>>,
) -> Result<T, TransportError>
where
    TransportError: From<E>,
{
    match timeout(limit, request).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(TransportError::Timeout(operation)),
    }
}

pub struct BleTransport {
    adapter: Adapter,
    discovered_tx: mpsc::UnboundedSender<BlePeer>,
    discovered_rx: mpsc::UnboundedReceiver<BlePeer>,
    frames_tx: mpsc::UnboundedSender<Vec<u8>>,
    frames_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    scan_task: Option<JoinHandle<()>>,
    notify_task: Option<JoinHandle<()>>,
    device: Option<Device>,
    service: Option<Service>,
}

impl BleTransport {
    /// Open the default adapter and wait for it to become available.
    pub async fn new() -> Result<Self, TransportError> {
        let adapter = Adapter::default()
            .await
            .ok_or(TransportError::AdapterUnavailable)?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter available");

        let (discovered_tx, discovered_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        Ok(Self {
            adapter,
            discovered_tx,
            discovered_rx,
            frames_tx,
            frames_rx,
            scan_task: None,
            notify_task: None,
            device: None,
            service: None,
        })
    }

    fn drop_subscription(&mut self) {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        // Frames from the previous link must not be decoded after a reconnect
        while self.frames_rx.try_recv().is_ok() {}
    }
}

#[async_trait]
impl Transport for BleTransport {
    type Peer = BlePeer;
    type Characteristic = BleCharacteristic;

    async fn start_scan(&mut self) -> Result<(), TransportError> {
        self.stop_scan().await;

        let adapter = self.adapter.clone();
        let discovered = self.discovered_tx.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let services: [Uuid; 0] = [];
            let mut adapter_events = match adapter.scan(&services).await {
                Ok(events) => {
                    let _ = ready_tx.send(Ok(()));
                    events
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            // Advertisements repeat many times a second, report each device once per scan
            let mut seen = HashSet::new();
            while let Some(found) = adapter_events.next().await {
                let address = canonical_address(&found.device.id().to_string());
                if !seen.insert(address.clone()) {
                    continue;
                }
                trace!(%address, "Discovered");
                let peer = BlePeer {
                    address,
                    device: found.device,
                };
                if discovered.send(peer).is_err() {
                    break;
                }
            }
            debug!("BLE scan stream ended");
        });

        let started = match timeout(GATT_TIMEOUT, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(err))) => Err(err.into()),
            Ok(Err(_)) => Err(TransportError::ScanClosed),
            Err(_) => Err(TransportError::Timeout("scan start")),
        };
        match started {
            Ok(()) => {
                self.scan_task = Some(task);
                Ok(())
            }
            Err(err) => {
                task.abort();
                Err(err)
            }
        }
    }

    fn is_scanning(&self) -> bool {
        self.scan_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    async fn stop_scan(&mut self) {
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
        while self.discovered_rx.try_recv().is_ok() {}
    }

    fn next_discovered(&mut self) -> Option<BlePeer> {
        self.discovered_rx.try_recv().ok()
    }

    async fn connect(&mut self, peer: &BlePeer) -> Result<(), TransportError> {
        bounded("connect", CONNECT_TIMEOUT, self.adapter.connect_device(&peer.device)).await?;
        self.device = Some(peer.device.clone());
        Ok(())
    }

    async fn discover_service(&mut self, service: Uuid) -> Result<(), TransportError> {
        let device = self.device.as_ref().ok_or(TransportError::NotConnected)?;
        let found = bounded(
            "service discovery",
            GATT_TIMEOUT,
            device.discover_services_with_uuid(service),
        )
        .await?
        .into_iter()
        .next()
        .ok_or(TransportError::ServiceNotFound(service))?;
        self.service = Some(found);
        Ok(())
    }

    async fn resolve_characteristic(
        &mut self,
        characteristic: Uuid,
    ) -> Result<BleCharacteristic, TransportError> {
        let service = self.service.as_ref().ok_or(TransportError::NotConnected)?;
        let inner = bounded(
            "characteristic discovery",
            GATT_TIMEOUT,
            service.discover_characteristics_with_uuid(characteristic),
        )
        .await?
        .into_iter()
        .next()
        .ok_or(TransportError::CharacteristicNotFound(characteristic))?;
        Ok(BleCharacteristic {
            uuid: characteristic,
            inner,
        })
    }

    async fn subscribe(&mut self, characteristic: &BleCharacteristic) -> Result<(), TransportError> {
        let properties = bounded("properties", GATT_TIMEOUT, characteristic.inner.properties()).await?;
        if !(properties.notify || properties.indicate) {
            return Err(TransportError::NotSubscribable(characteristic.uuid));
        }

        self.drop_subscription();

        let notify = characteristic.inner.clone();
        let frames = self.frames_tx.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut notifications = match notify.notify().await {
                Ok(notifications) => {
                    let _ = ready_tx.send(Ok(()));
                    notifications
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            while let Some(notification) = notifications.next().await {
                match notification {
                    Ok(data) => {
                        if frames.send(data).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(%err, "Notification error");
                        break;
                    }
                }
            }
            debug!("End of notification stream");
        });

        match timeout(GATT_TIMEOUT, ready_rx).await {
            Ok(Ok(Ok(()))) => {
                self.notify_task = Some(task);
                Ok(())
            }
            Ok(Ok(Err(err))) => Err(err.into()),
            Ok(Err(_)) => Err(TransportError::SubscriptionClosed),
            Err(_) => {
                task.abort();
                Err(TransportError::Timeout("subscribe"))
            }
        }
    }

    fn is_subscribed(&self, _characteristic: &BleCharacteristic) -> bool {
        self.notify_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    async fn can_write(&mut self, characteristic: &BleCharacteristic) -> bool {
        let connected = match &self.device {
            Some(device) => device.is_connected().await,
            None => false,
        };
        connected
            && characteristic
                .inner
                .properties()
                .await
                .map(|p| p.write || p.write_without_response)
                .unwrap_or(false)
    }

    async fn write(
        &mut self,
        characteristic: &BleCharacteristic,
        data: &[u8],
    ) -> Result<(), TransportError> {
        bounded("write", GATT_TIMEOUT, characteristic.inner.write(data)).await
    }

    fn next_notification(&mut self) -> Option<Vec<u8>> {
        self.frames_rx.try_recv().ok()
    }

    async fn disconnect(&mut self) {
        self.drop_subscription();
        self.service = None;
        if let Some(device) = self.device.take() {
            if let Err(err) = self.adapter.disconnect_device(&device).await {
                debug!(%err, "Disconnect failed");
            }
        }
    }
}

#[test]
fn test_canonical_address() {
    // BlueZ formats a `DeviceId` as an uppercase MAC
    assert_eq!(
        canonical_address("A4:C1:37:33:43:51"),
        crate::config::DEFAULT_DEVICE_ADDRESS
    );
    assert_eq!(canonical_address("a4:c1:37:33:43:51"), "a4:c1:37:33:43:51");
}
