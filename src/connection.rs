//! Find, connect to, and keep polling the BMU.
//!
//! The BMU exposes a vendor service with one characteristic that notifies
//! response frames and one that accepts request frames. While connected the
//! state machine writes a basic info request every `request_interval`; the
//! BMU answers with a notification that is decoded and forwarded as a
//! [`BmsEvent::Reading`].
//!
//! ```text
//! Disconnected --initialize--> Connecting --target found, all steps ok--> Connected
//!                                  ^                                          |
//!                                  +----- step failed / subscription lost ----+
//! ```
//!
//! Nothing here is fatal once scanning has started. A failed connection
//! step disconnects, reports `Connecting` and scans again, forever.

use std::time::Duration;

use bluest::Uuid;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::codec::{FrameCodec, CMD_BASIC_INFO};
use crate::error::TransportError;
use crate::reading::{ConnectionState, Reading};
use crate::transport::{parse_uuid, Peer, Transport};

pub const SERVICE_UUID: &str = "0000ff00-0000-1000-8000-00805f9b34fb";
pub const NOTIFY_CHARACTERISTIC_UUID: &str = "0000ff01-0000-1000-8000-00805f9b34fb";
pub const WRITE_CHARACTERISTIC_UUID: &str = "0000ff02-0000-1000-8000-00805f9b34fb";

/// How often the basic info request is sent while connected
pub const DEFAULT_REQUEST_INTERVAL: Duration = Duration::from_millis(1000);

/// What the state machine reports to the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum BmsEvent {
    Reading(Reading),
    Status(ConnectionState),
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Address of the BMU, matched verbatim against discovered peers
    pub target_address: String,
    pub service_uuid: String,
    pub notify_uuid: String,
    pub write_uuid: String,
    pub request_interval: Duration,
    /// Reject frames whose checksum or trailer is wrong
    pub strict_checksum: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            target_address: String::new(),
            service_uuid: SERVICE_UUID.to_string(),
            notify_uuid: NOTIFY_CHARACTERISTIC_UUID.to_string(),
            write_uuid: WRITE_CHARACTERISTIC_UUID.to_string(),
            request_interval: DEFAULT_REQUEST_INTERVAL,
            strict_checksum: false,
        }
    }
}

pub struct ConnectionStateMachine<T: Transport> {
    transport: T,
    target_address: String,
    service_uuid: Uuid,
    notify_uuid: Uuid,
    write_uuid: Uuid,
    request_interval: Duration,
    codec: FrameCodec,
    events: mpsc::UnboundedSender<BmsEvent>,
    state: ConnectionState,
    scanning: bool,
    notify: Option<T::Characteristic>,
    write: Option<T::Characteristic>,
    last_request: Option<Instant>,
}

impl<T: Transport> ConnectionStateMachine<T> {
    /// Create a state machine reporting readings and status changes on `events`.
    ///
    /// Fails only if one of the configured UUIDs does not parse.
    pub fn new(
        transport: T,
        config: ConnectionConfig,
        events: mpsc::UnboundedSender<BmsEvent>,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            transport,
            service_uuid: parse_uuid(&config.service_uuid)?,
            notify_uuid: parse_uuid(&config.notify_uuid)?,
            write_uuid: parse_uuid(&config.write_uuid)?,
            target_address: config.target_address,
            request_interval: config.request_interval,
            codec: FrameCodec::with_strict_checksum(config.strict_checksum),
            events,
            state: ConnectionState::Disconnected,
            scanning: false,
            notify: None,
            write: None,
            last_request: None,
        })
    }

    /// Start scanning for the BMU.
    ///
    /// An error here means the transport could not be brought up at all;
    /// what to do about that is up to the caller.
    pub async fn initialize(&mut self) -> Result<(), TransportError> {
        info!(address = %self.target_address, "BLE scan...");
        self.transport.start_scan().await?;
        self.scanning = true;
        self.set_state(ConnectionState::Connecting);
        Ok(())
    }

    /// Run one iteration: deliver received frames, then either look through
    /// the peers discovered since the last poll or send a due request.
    pub async fn poll(&mut self) {
        self.poll_at(Instant::now()).await
    }

    /// [`ConnectionStateMachine::poll`] with an explicit clock reading.
    pub async fn poll_at(&mut self, now: Instant) {
        self.deliver_notifications();

        if self.is_connected() {
            let due = self
                .last_request
                .map_or(true, |at| now.saturating_duration_since(at) >= self.request_interval);
            if due {
                self.request_basic_info().await;
                self.last_request = Some(now);
            }
            return;
        }

        if self.state == ConnectionState::Connected {
            warn!("Subscription to the BMU dropped, scanning again");
            self.transport.disconnect().await;
            self.resume_scanning().await;
            return;
        }

        if self.scanning && !self.transport.is_scanning() {
            warn!("BLE scan ended, restarting");
            self.scanning = false;
        }

        if !self.scanning {
            if self.state == ConnectionState::Connecting {
                self.start_scanning().await;
            }
            return;
        }

        // Take everything discovered since the last poll so a crowded radio
        // environment cannot build up a backlog
        while let Some(peer) = self.transport.next_discovered() {
            if peer.address() == self.target_address {
                info!(address = peer.address(), "Found our device! Attempting to connect...");
                self.connect_to(peer).await;
                return;
            }
            trace!(address = peer.address(), "Ignoring peer");
        }
    }

    /// Connected means both characteristics are resolved and the
    /// notification subscription is still live.
    pub fn is_connected(&self) -> bool {
        match (&self.notify, &self.write) {
            (Some(notify), Some(_)) => self.transport.is_subscribed(notify),
            _ => false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    async fn connect_to(&mut self, peer: T::Peer) {
        self.transport.stop_scan().await;
        self.scanning = false;

        match self.establish(&peer).await {
            Ok((notify, write)) => {
                self.notify = Some(notify);
                self.write = Some(write);
                self.last_request = None;
                info!(address = peer.address(), "Connected to BMU");
                self.set_state(ConnectionState::Connected);
            }
            Err(err) => {
                warn!(address = peer.address(), %err, "Failed to connect");
                self.transport.disconnect().await;
                self.resume_scanning().await;
            }
        }
    }

    async fn establish(
        &mut self,
        peer: &T::Peer,
    ) -> Result<(T::Characteristic, T::Characteristic), TransportError> {
        self.transport.connect(peer).await?;
        self.transport.discover_service(self.service_uuid).await?;
        debug!("Found service");
        let notify = self.transport.resolve_characteristic(self.notify_uuid).await?;
        let write = self.transport.resolve_characteristic(self.write_uuid).await?;
        debug!("Found notify and write characteristics");
        self.transport.subscribe(&notify).await?;
        Ok((notify, write))
    }

    async fn resume_scanning(&mut self) {
        self.notify = None;
        self.write = None;
        self.last_request = None;
        self.set_state(ConnectionState::Connecting);
        self.start_scanning().await;
    }

    async fn start_scanning(&mut self) {
        match self.transport.start_scan().await {
            Ok(()) => self.scanning = true,
            Err(err) => warn!(%err, "Could not start scanning, retrying on next poll"),
        }
    }

    async fn request_basic_info(&mut self) {
        let Some(write) = self.write.as_ref() else {
            return;
        };
        if !self.transport.can_write(write).await {
            debug!("Write characteristic not writable, skipping request");
            return;
        }

        let request = FrameCodec::build_request(CMD_BASIC_INFO);
        trace!(frame = %hex::encode(request), "TX");
        if let Err(err) = self.transport.write(write, &request).await {
            warn!(%err, "Failed to send request");
        }
    }

    fn deliver_notifications(&mut self) {
        while let Some(frame) = self.transport.next_notification() {
            trace!(frame = %hex::encode(&frame), "RX notification");
            match self.codec.decode(&frame) {
                Ok(Some(reading)) => self.emit(BmsEvent::Reading(reading)),
                Ok(None) => trace!(command = frame[1], "Ignoring frame"),
                Err(err) => debug!(%err, "Dropping frame"),
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.emit(BmsEvent::Status(state));
    }

    fn emit(&self, event: BmsEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockTransport, Step};

    const TARGET: &str = "a4:c1:37:33:43:51";

    type Machine = ConnectionStateMachine<MockTransport>;

    fn machine(transport: MockTransport) -> (Machine, mpsc::UnboundedReceiver<BmsEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = ConnectionConfig {
            target_address: TARGET.to_string(),
            ..ConnectionConfig::default()
        };
        (ConnectionStateMachine::new(transport, config, tx).unwrap(), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<BmsEvent>) -> Vec<BmsEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn connected() -> (Machine, mpsc::UnboundedReceiver<BmsEvent>) {
        let mut transport = MockTransport::new();
        transport.discoveries.push_back(TARGET.to_string());
        let (mut machine, mut rx) = machine(transport);
        machine.initialize().await.unwrap();
        machine.poll().await;
        assert!(machine.is_connected());
        drain(&mut rx);
        (machine, rx)
    }

    #[tokio::test]
    async fn test_initialize_starts_scanning() {
        let (mut machine, mut rx) = machine(MockTransport::new());
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        machine.initialize().await.unwrap();
        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert_eq!(machine.transport().scans_started, 1);
        assert_eq!(
            drain(&mut rx),
            vec![BmsEvent::Status(ConnectionState::Connecting)]
        );
    }

    #[tokio::test]
    async fn test_initialize_failure_is_reported() {
        let mut transport = MockTransport::new();
        transport.fail_scan = true;
        let (mut machine, _rx) = machine(transport);
        assert!(machine.initialize().await.is_err());
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_invalid_uuid_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = ConnectionConfig {
            write_uuid: "ff02".to_string(),
            ..ConnectionConfig::default()
        };
        assert!(matches!(
            ConnectionStateMachine::new(MockTransport::new(), config, tx),
            Err(TransportError::InvalidUuid(_))
        ));
    }

    #[tokio::test]
    async fn test_other_peers_ignored() {
        let mut transport = MockTransport::new();
        transport.discoveries.push_back("11:22:33:44:55:66".to_string());
        transport.discoveries.push_back(TARGET.to_uppercase());
        let (mut machine, mut rx) = machine(transport);
        machine.initialize().await.unwrap();

        machine.poll().await;
        assert!(machine.transport().connects.is_empty());
        assert!(machine.transport().discoveries.is_empty());
        assert_eq!(machine.state(), ConnectionState::Connecting);

        machine.transport_mut().discoveries.push_back(TARGET.to_string());
        machine.poll().await;
        assert_eq!(machine.transport().connects, vec![TARGET.to_string()]);
        assert_eq!(machine.transport().scans_stopped, 1);
        assert_eq!(machine.state(), ConnectionState::Connected);
        assert!(machine.is_connected());
        assert_eq!(
            drain(&mut rx),
            vec![
                BmsEvent::Status(ConnectionState::Connecting),
                BmsEvent::Status(ConnectionState::Connected)
            ]
        );
    }

    #[tokio::test]
    async fn test_large_backlog_connects_in_one_poll() {
        let mut transport = MockTransport::new();
        for i in 0..200 {
            transport
                .discoveries
                .push_back(format!("10:00:00:00:{:02x}:{:02x}", i / 256, i % 256));
        }
        transport.discoveries.push_back(TARGET.to_string());
        transport.discoveries.push_back("20:00:00:00:00:01".to_string());
        let (mut machine, _rx) = machine(transport);
        machine.initialize().await.unwrap();

        machine.poll().await;
        assert!(machine.is_connected());
        assert_eq!(machine.transport().connects, vec![TARGET.to_string()]);
    }

    #[tokio::test]
    async fn test_default_target_matches_canonical_address() {
        let mut transport = MockTransport::new();
        transport
            .discoveries
            .push_back(crate::transport::ble::canonical_address("A4:C1:37:33:43:51"));
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = crate::config::Settings::default().connection_config();
        let mut machine = ConnectionStateMachine::new(transport, config, tx).unwrap();
        machine.initialize().await.unwrap();

        machine.poll().await;
        assert!(machine.is_connected());
    }

    #[tokio::test]
    async fn test_ended_scan_restarted() {
        let (mut machine, mut rx) = machine(MockTransport::new());
        machine.initialize().await.unwrap();
        drain(&mut rx);

        // The stack stopped scanning on its own
        machine.transport_mut().scanning = false;
        machine.poll().await;
        assert_eq!(machine.transport().scans_started, 2);
        assert!(machine.transport().scanning);
        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert!(drain(&mut rx).is_empty());

        machine.transport_mut().discoveries.push_back(TARGET.to_string());
        machine.poll().await;
        assert!(machine.is_connected());
    }

    #[tokio::test]
    async fn test_ended_scan_restart_retried() {
        let (mut machine, _rx) = machine(MockTransport::new());
        machine.initialize().await.unwrap();

        machine.transport_mut().scanning = false;
        machine.transport_mut().fail_scan = true;
        machine.poll().await;
        machine.poll().await;
        assert_eq!(machine.transport().scans_started, 1);

        machine.transport_mut().fail_scan = false;
        machine.poll().await;
        assert_eq!(machine.transport().scans_started, 2);
    }

    #[tokio::test]
    async fn test_failed_subscribe_rescans_once() {
        let mut transport = MockTransport::new();
        transport.discoveries.push_back(TARGET.to_string());
        transport.fail_at = Some(Step::Subscribe);
        let (mut machine, mut rx) = machine(transport);
        machine.initialize().await.unwrap();
        drain(&mut rx);

        machine.poll().await;
        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert!(!machine.is_connected());
        assert_eq!(machine.transport().scans_started, 2);
        assert_eq!(machine.transport().disconnects, 1);
        assert_eq!(
            drain(&mut rx),
            vec![BmsEvent::Status(ConnectionState::Connecting)]
        );

        machine.poll().await;
        assert_eq!(machine.transport().scans_started, 2);
    }

    #[tokio::test]
    async fn test_every_failed_step_rescans() {
        for step in [Step::Connect, Step::DiscoverService, Step::Resolve] {
            let mut transport = MockTransport::new();
            transport.discoveries.push_back(TARGET.to_string());
            transport.fail_at = Some(step);
            let (mut machine, _rx) = machine(transport);
            machine.initialize().await.unwrap();
            machine.poll().await;
            assert_eq!(machine.state(), ConnectionState::Connecting, "{step:?}");
            assert_eq!(machine.transport().scans_started, 2, "{step:?}");
            assert!(machine.transport().writes.is_empty());
        }
    }

    #[tokio::test]
    async fn test_scan_restart_retried() {
        let mut transport = MockTransport::new();
        transport.discoveries.push_back(TARGET.to_string());
        transport.fail_at = Some(Step::Connect);
        let (mut machine, _rx) = machine(transport);
        machine.initialize().await.unwrap();

        machine.transport_mut().fail_scan = true;
        machine.poll().await;
        assert_eq!(machine.transport().scans_started, 1);

        machine.transport_mut().fail_scan = false;
        machine.poll().await;
        assert_eq!(machine.transport().scans_started, 2);
    }

    #[tokio::test]
    async fn test_one_request_per_interval() {
        let (mut machine, _rx) = connected().await;
        let start = Instant::now();
        let request = FrameCodec::build_request(CMD_BASIC_INFO).to_vec();

        machine.poll_at(start).await;
        assert_eq!(machine.transport().writes, vec![request.clone()]);

        for ms in [1, 200, 500, 999] {
            machine.poll_at(start + Duration::from_millis(ms)).await;
        }
        assert_eq!(machine.transport().writes.len(), 1);

        machine.poll_at(start + Duration::from_millis(1000)).await;
        machine.poll_at(start + Duration::from_millis(1000)).await;
        machine.poll_at(start + Duration::from_millis(1500)).await;
        assert_eq!(machine.transport().writes.len(), 2);

        machine.poll_at(start + Duration::from_millis(2000)).await;
        assert_eq!(machine.transport().writes, vec![request; 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_cadence_with_clock() {
        let (mut machine, _rx) = connected().await;
        for _ in 0..50 {
            machine.poll().await;
            tokio::time::advance(Duration::from_millis(50)).await;
        }
        // 2.5 s of polling: requests at 0, 1000 and 2000 ms
        assert_eq!(machine.transport().writes.len(), 3);
    }

    #[tokio::test]
    async fn test_not_writable_skips_one_tick() {
        let (mut machine, _rx) = connected().await;
        let start = Instant::now();
        machine.transport_mut().writable = false;
        machine.poll_at(start).await;
        assert!(machine.transport().writes.is_empty());
        assert!(machine.is_connected());

        machine.transport_mut().writable = true;
        machine.poll_at(start + Duration::from_millis(500)).await;
        assert!(machine.transport().writes.is_empty());
        machine.poll_at(start + Duration::from_millis(1000)).await;
        assert_eq!(machine.transport().writes.len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_subscription_rescans() {
        let (mut machine, mut rx) = connected().await;
        machine.transport_mut().subscribed = false;
        assert!(!machine.is_connected());

        machine.poll().await;
        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert_eq!(machine.transport().scans_started, 2);
        assert_eq!(machine.transport().disconnects, 1);
        assert_eq!(
            drain(&mut rx),
            vec![BmsEvent::Status(ConnectionState::Connecting)]
        );

        machine.transport_mut().discoveries.push_back(TARGET.to_string());
        machine.poll().await;
        assert!(machine.is_connected());
    }

    #[tokio::test]
    async fn test_frames_forwarded() {
        let (mut machine, mut rx) = connected().await;
        let frames = [
            "dd0300060e7400960055fe8d77",
            "dd03",
            "aa0300060e7400960055fe8d77",
            "dd0400021234ffb877",
            "dd0300060e74",
        ];
        for frame in frames {
            machine
                .transport_mut()
                .notifications
                .push_back(hex::decode(frame).unwrap());
        }

        machine.poll().await;
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            BmsEvent::Reading(reading) => {
                assert_eq!(reading.soc(), 85);
                assert!((reading.voltage() - 37.0).abs() < 1e-9);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(machine.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_strict_checksum_drops_corrupt_frames() {
        let mut transport = MockTransport::new();
        transport.discoveries.push_back(TARGET.to_string());
        transport
            .notifications
            .push_back(hex::decode("dd0300060e7400960055000077").unwrap());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = ConnectionConfig {
            target_address: TARGET.to_string(),
            strict_checksum: true,
            ..ConnectionConfig::default()
        };
        let mut machine = ConnectionStateMachine::new(transport, config, tx).unwrap();
        machine.initialize().await.unwrap();
        machine.poll().await;

        assert!(drain(&mut rx)
            .iter()
            .all(|event| matches!(event, BmsEvent::Status(_))));
    }
}
