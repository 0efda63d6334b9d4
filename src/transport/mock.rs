use std::collections::VecDeque;

use async_trait::async_trait;
use bluest::Uuid;

use super::Transport;
use crate::error::TransportError;

/// Connection step a [`MockTransport`] can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Connect,
    DiscoverService,
    Resolve,
    Subscribe,
}

/// Scripted transport recording every call the state machine makes.
#[derive(Default)]
pub(crate) struct MockTransport {
    pub discoveries: VecDeque<String>,
    pub notifications: VecDeque<Vec<u8>>,
    pub fail_at: Option<Step>,
    pub fail_scan: bool,
    pub writable: bool,
    pub subscribed: bool,
    pub scanning: bool,
    pub scans_started: usize,
    pub scans_stopped: usize,
    pub connects: Vec<String>,
    pub disconnects: usize,
    pub writes: Vec<Vec<u8>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            writable: true,
            ..Self::default()
        }
    }

    fn step(&self, step: Step) -> Result<(), TransportError> {
        if self.fail_at == Some(step) {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Peer = String;
    type Characteristic = Uuid;

    async fn start_scan(&mut self) -> Result<(), TransportError> {
        if self.fail_scan {
            return Err(TransportError::AdapterUnavailable);
        }
        self.scans_started += 1;
        self.scanning = true;
        Ok(())
    }

    fn is_scanning(&self) -> bool {
        self.scanning
    }

    async fn stop_scan(&mut self) {
        self.scans_stopped += 1;
        self.scanning = false;
    }

    fn next_discovered(&mut self) -> Option<String> {
        self.discoveries.pop_front()
    }

    async fn connect(&mut self, peer: &String) -> Result<(), TransportError> {
        self.connects.push(peer.clone());
        self.step(Step::Connect)
    }

    async fn discover_service(&mut self, _service: Uuid) -> Result<(), TransportError> {
        self.step(Step::DiscoverService)
    }

    async fn resolve_characteristic(&mut self, characteristic: Uuid) -> Result<Uuid, TransportError> {
        self.step(Step::Resolve)?;
        Ok(characteristic)
    }

    async fn subscribe(&mut self, _characteristic: &Uuid) -> Result<(), TransportError> {
        self.step(Step::Subscribe)?;
        self.subscribed = true;
        Ok(())
    }

    fn is_subscribed(&self, _characteristic: &Uuid) -> bool {
        self.subscribed
    }

    async fn can_write(&mut self, _characteristic: &Uuid) -> bool {
        self.writable
    }

    async fn write(&mut self, _characteristic: &Uuid, data: &[u8]) -> Result<(), TransportError> {
        self.writes.push(data.to_vec());
        Ok(())
    }

    fn next_notification(&mut self) -> Option<Vec<u8>> {
        self.notifications.pop_front()
    }

    async fn disconnect(&mut self) {
        self.disconnects += 1;
        self.subscribed = false;
    }
}
