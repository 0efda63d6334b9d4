use super::{checksum, END_BYTE, START_BYTE};

/// Command id of the basic info register
pub(crate) const COMMAND: u8 = 0x03;

/// Shortest frame accepted for the basic info command
pub(crate) const MIN_FRAME_LEN: usize = 13;

/// A message type which contains pack voltage, current and state of charge.
///
/// Fields are big-endian words at fixed offsets from the start of the frame:
///
/// Offset | Meaning
/// 4      | Pack voltage in V/100
/// 6      | Pack current in A/100, signed, positive while charging
/// 8      | State of charge in %
pub(crate) struct BasicInfoMessage<'a>(&'a [u8]);

impl<'a> BasicInfoMessage<'a> {
    /// Wrap a frame already checked to be at least [`MIN_FRAME_LEN`] bytes long.
    pub fn new(frame: &'a [u8]) -> Self {
        debug_assert!(frame.len() >= MIN_FRAME_LEN);
        Self(frame)
    }

    fn word(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.0[offset], self.0[offset + 1]])
    }

    pub fn battery_voltage_cv(&self) -> u16 {
        self.word(4)
    }

    pub fn battery_current_ca(&self) -> i16 {
        self.word(6) as i16
    }

    pub fn state_of_charge_pct(&self) -> u16 {
        self.word(8)
    }
}

/// Build a complete basic info response frame with a valid checksum.
///
/// The payload holds exactly the three decoded words, which makes the frame
/// [`MIN_FRAME_LEN`] bytes long.
pub fn response_frame(voltage_cv: u16, current_ca: i16, soc_pct: u16) -> Vec<u8> {
    let mut frame = vec![START_BYTE, COMMAND, 0x00, 0x06];
    frame.extend_from_slice(&voltage_cv.to_be_bytes());
    frame.extend_from_slice(&current_ca.to_be_bytes());
    frame.extend_from_slice(&soc_pct.to_be_bytes());
    let crc = checksum(&frame[2..]);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame.push(END_BYTE);
    frame
}

#[test]
fn test_response_frame_layout() {
    let frame = response_frame(3700, 150, 85);
    assert_eq!(hex::encode(&frame), "dd0300060e7400960055fe8d77");
    assert_eq!(frame.len(), MIN_FRAME_LEN);
}

#[test]
fn test_fields() {
    let frame = hex::decode("dd0300060e74ff9c0055fe8d77").unwrap();
    let message = BasicInfoMessage::new(&frame);
    assert_eq!(message.battery_voltage_cv(), 3700);
    assert_eq!(message.battery_current_ca(), -100);
    assert_eq!(message.state_of_charge_pct(), 85);
}
