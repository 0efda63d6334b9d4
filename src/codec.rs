//! Encode requests for, and decode responses from, the BMU binary protocol.
//!
//! Only the basic info command is consumed. Frames for any other command id
//! are accepted and ignored, since the BMU may push frames this crate has no
//! use for.

use crate::error::DecodeError;
use crate::message::basic_info::{self, BasicInfoMessage};
use crate::message::{checksum, END_BYTE, READ_MARKER, START_BYTE};
use crate::reading::Reading;

/// Command id of the basic info request
pub const CMD_BASIC_INFO: u8 = basic_info::COMMAND;

/// Bytes needed before the command id can be looked at
const MIN_HEADER_LEN: usize = 4;

/// Stateless codec for the BMU frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    strict_checksum: bool,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// A codec that also requires the declared payload to be present, the
    /// checksum to match and the frame to end with the 0x77 trailer.
    ///
    /// Each notification is decoded on its own, so the whole response must
    /// arrive in one notification. A basic info reply is larger than the 20
    /// bytes a default 23-byte ATT MTU carries; on such links the BMU splits
    /// it and strict mode rejects every fragment as truncated. Enable it
    /// only where the negotiated MTU fits the full frame.
    pub fn strict() -> Self {
        Self {
            strict_checksum: true,
        }
    }

    pub fn with_strict_checksum(strict_checksum: bool) -> Self {
        Self { strict_checksum }
    }

    /// Decode one frame.
    ///
    /// Returns `Ok(None)` for well-formed frames of commands other than basic info.
    pub fn decode(&self, frame: &[u8]) -> Result<Option<Reading>, DecodeError> {
        if frame.len() < MIN_HEADER_LEN || frame[0] != START_BYTE {
            return Err(DecodeError::MalformedFrame);
        }

        let command = frame[1];
        if command != CMD_BASIC_INFO {
            return Ok(None);
        }

        if frame.len() < basic_info::MIN_FRAME_LEN {
            return Err(DecodeError::TruncatedFrame {
                command,
                expected: basic_info::MIN_FRAME_LEN,
                actual: frame.len(),
            });
        }

        if self.strict_checksum {
            Self::verify(command, frame)?;
        }

        let message = BasicInfoMessage::new(frame);
        let soc = message.state_of_charge_pct();
        if soc > 100 {
            return Err(DecodeError::SocOutOfRange(soc));
        }

        let voltage = f64::from(message.battery_voltage_cv()) / 100.0;
        let current = f64::from(message.battery_current_ca()) / 100.0;
        Ok(Some(Reading::new(voltage, current, soc as u8)))
    }

    /// Check length, checksum and trailer of a frame against its declared payload length.
    fn verify(command: u8, frame: &[u8]) -> Result<(), DecodeError> {
        let payload_len = frame[3] as usize;
        let expected = MIN_HEADER_LEN + payload_len + 3;
        if frame.len() < expected {
            return Err(DecodeError::TruncatedFrame {
                command,
                expected,
                actual: frame.len(),
            });
        }

        let crc_at = MIN_HEADER_LEN + payload_len;
        let actual = u16::from_be_bytes([frame[crc_at], frame[crc_at + 1]]);
        let expected_crc = checksum(&frame[2..crc_at]);
        if actual != expected_crc {
            return Err(DecodeError::ChecksumMismatch {
                expected: expected_crc,
                actual,
            });
        }

        match frame[crc_at + 2] {
            END_BYTE => Ok(()),
            other => Err(DecodeError::BadTrailer(other)),
        }
    }

    /// Build the 7 byte read request for a zero-length command.
    ///
    /// For the basic info command this is `[DD A5 03 00 FF FD 77]`.
    pub fn build_request(command: u8) -> [u8; 7] {
        let [crc_hi, crc_lo] = checksum(&[command, 0x00]).to_be_bytes();
        [START_BYTE, READ_MARKER, command, 0x00, crc_hi, crc_lo, END_BYTE]
    }
}
