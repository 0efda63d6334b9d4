//! A simulated BMU for running the pipeline without hardware.
//!
//! The emulated device advertises a single address once scanning starts,
//! accepts every connection step and answers each basic info request with
//! a checksummed frame describing a battery charging at a constant rate.
//! Current tapers to zero once the pack is full.

use std::collections::VecDeque;

use async_trait::async_trait;
use bluest::Uuid;
use tracing::{debug, trace};

use super::Transport;
use crate::codec::{FrameCodec, CMD_BASIC_INFO};
use crate::error::TransportError;
use crate::message::basic_info;

/// Charging profile of the simulated pack
#[derive(Debug, Clone)]
struct SimulatedBattery {
    /// State of charge in 1/1000 %
    soc_milli: u32,
    /// SOC gained per answered request, in 1/1000 %
    step_milli: u32,
    charge_current_ca: i16,
}

impl SimulatedBattery {
    fn soc_pct(&self) -> u16 {
        (self.soc_milli / 1000).min(100) as u16
    }

    fn voltage_cv(&self) -> u16 {
        // 4S LiFePO4: ~12.8 V empty, ~14.4 V full
        1280 + self.soc_pct() * 16 / 10
    }

    fn current_ca(&self) -> i16 {
        if self.soc_pct() >= 100 {
            0
        } else {
            self.charge_current_ca
        }
    }

    fn advance(&mut self) {
        self.soc_milli = (self.soc_milli + self.step_milli).min(100_000);
    }

    fn frame(&self) -> Vec<u8> {
        basic_info::response_frame(self.voltage_cv(), self.current_ca(), self.soc_pct())
    }
}

pub struct EmulatedTransport {
    address: String,
    battery: SimulatedBattery,
    scanning: bool,
    advertised: bool,
    connected: bool,
    subscribed: bool,
    pending: VecDeque<Vec<u8>>,
}

impl EmulatedTransport {
    /// An emulated BMU at `address` starting from `initial_soc` % and gaining
    /// `soc_step` % per basic info request.
    pub fn new(address: impl Into<String>, initial_soc: f64, soc_step: f64) -> Self {
        Self {
            address: address.into(),
            battery: SimulatedBattery {
                soc_milli: (initial_soc.clamp(0.0, 100.0) * 1000.0) as u32,
                step_milli: (soc_step.max(0.0) * 1000.0) as u32,
                charge_current_ca: 500,
            },
            scanning: false,
            advertised: false,
            connected: false,
            subscribed: false,
            pending: VecDeque::new(),
        }
    }
}

#[async_trait]
impl Transport for EmulatedTransport {
    type Peer = String;
    type Characteristic = Uuid;

    async fn start_scan(&mut self) -> Result<(), TransportError> {
        self.scanning = true;
        self.advertised = false;
        Ok(())
    }

    fn is_scanning(&self) -> bool {
        self.scanning
    }

    async fn stop_scan(&mut self) {
        self.scanning = false;
    }

    fn next_discovered(&mut self) -> Option<String> {
        if self.scanning && !self.advertised {
            self.advertised = true;
            return Some(self.address.clone());
        }
        None
    }

    async fn connect(&mut self, peer: &String) -> Result<(), TransportError> {
        debug!(address = %peer, "Emulated BMU connected");
        self.connected = true;
        Ok(())
    }

    async fn discover_service(&mut self, _service: Uuid) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }

    async fn resolve_characteristic(&mut self, characteristic: Uuid) -> Result<Uuid, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(characteristic)
    }

    async fn subscribe(&mut self, _characteristic: &Uuid) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.subscribed = true;
        Ok(())
    }

    fn is_subscribed(&self, _characteristic: &Uuid) -> bool {
        self.connected && self.subscribed
    }

    async fn can_write(&mut self, _characteristic: &Uuid) -> bool {
        self.connected
    }

    async fn write(&mut self, _characteristic: &Uuid, data: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if data == &FrameCodec::build_request(CMD_BASIC_INFO)[..] {
            let frame = self.battery.frame();
            trace!(frame = %hex::encode(&frame), "Emulated BMU answering");
            self.pending.push_back(frame);
            self.battery.advance();
        }
        Ok(())
    }

    fn next_notification(&mut self) -> Option<Vec<u8>> {
        self.pending.pop_front()
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        self.subscribed = false;
        self.pending.clear();
    }
}
