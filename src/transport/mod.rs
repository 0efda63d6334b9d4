//! The wireless collaborator the connection state machine drives.
//!
//! - [`ble`] talks to a real BMU through the platform Bluetooth stack.
//! - [`emulator`] simulates a charging BMU for running without hardware.

use async_trait::async_trait;
use bluest::Uuid;

use crate::error::TransportError;

pub mod ble;
pub mod emulator;
#[cfg(test)]
pub(crate) mod mock;

pub use ble::BleTransport;
pub use emulator::EmulatedTransport;

/// A device found while scanning
pub trait Peer: Send + Sync {
    /// Address of the device in lowercase `aa:bb:cc:dd:ee:ff` form, compared
    /// verbatim against the configured target.
    fn address(&self) -> &str;
}

impl Peer for String {
    fn address(&self) -> &str {
        self
    }
}

/// What the telemetry core needs from a Bluetooth Low Energy stack.
///
/// Every method returns within the stack's own bounded operations; frames
/// and discoveries that arrive in between are buffered by the transport
/// and drained with the non-blocking `next_*` methods.
#[async_trait]
pub trait Transport: Send {
    type Peer: Peer;
    type Characteristic: Clone + Send + Sync;

    /// Begin discovering devices. Returns once the stack is actually
    /// scanning, or with the reason it could not start.
    async fn start_scan(&mut self) -> Result<(), TransportError>;

    /// Whether the scan started by [`Transport::start_scan`] is still running.
    fn is_scanning(&self) -> bool;

    async fn stop_scan(&mut self);

    /// Take the next device discovered since the last call, if any.
    fn next_discovered(&mut self) -> Option<Self::Peer>;

    async fn connect(&mut self, peer: &Self::Peer) -> Result<(), TransportError>;

    /// Look up a service of the connected peer.
    async fn discover_service(&mut self, service: Uuid) -> Result<(), TransportError>;

    /// Look up a characteristic of the last discovered service.
    async fn resolve_characteristic(
        &mut self,
        characteristic: Uuid,
    ) -> Result<Self::Characteristic, TransportError>;

    /// Subscribe to notifications. Notified frames become available through
    /// [`Transport::next_notification`].
    async fn subscribe(
        &mut self,
        characteristic: &Self::Characteristic,
    ) -> Result<(), TransportError>;

    /// Whether the subscription made with [`Transport::subscribe`] is still live.
    fn is_subscribed(&self, characteristic: &Self::Characteristic) -> bool;

    async fn can_write(&mut self, characteristic: &Self::Characteristic) -> bool;

    async fn write(
        &mut self,
        characteristic: &Self::Characteristic,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// Take the next notified frame, if any.
    fn next_notification(&mut self) -> Option<Vec<u8>>;

    /// Drop the connection and any subscription. Best-effort.
    async fn disconnect(&mut self);
}

/// Parse a UUID string from configuration.
pub fn parse_uuid(uuid: &str) -> Result<Uuid, TransportError> {
    Uuid::parse_str(uuid).map_err(|_| TransportError::InvalidUuid(uuid.to_string()))
}

#[test]
fn test_parse_uuid() {
    let uuid = parse_uuid("0000ff00-0000-1000-8000-00805f9b34fb").unwrap();
    assert_eq!(uuid.as_u128() >> 96, 0x0000ff00);
    assert!(matches!(
        parse_uuid("not-a-uuid"),
        Err(TransportError::InvalidUuid(_))
    ));
}
