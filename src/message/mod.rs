//! Per-command wire types of the BMU protocol.
//!
//! Every frame is laid out as:
//!
//! Start Byte | End Byte     | Meaning
//! 0          | 0            | Start marker 0xDD
//! 1          | 1            | Command id (responses) or 0xA5 (read request)
//! 2          | 2            | Status (responses) or command id (requests)
//! 3          | 3            | Payload length
//! 4          | x            | The payload
//! x+1        | x+2          | Checksum over bytes 2-x, big-endian
//! x+3        | x+3          | Trailer 0x77

pub(crate) mod basic_info;

/// Start marker of every frame
pub const START_BYTE: u8 = 0xDD;
/// Final byte of every frame
pub const END_BYTE: u8 = 0x77;
/// Marker placed in byte 1 of a read request
pub const READ_MARKER: u8 = 0xA5;

/// Compute the checksum of the given bytes: the two's complement of their sum.
pub fn checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |acc, &byte| acc.wrapping_sub(u16::from(byte)))
}

#[test]
fn test_checksum_of_basic_info_request() {
    assert_eq!(checksum(&[0x03, 0x00]), 0xfffd);
}

#[test]
fn test_checksum_of_response() {
    let covered = hex::decode("00060e7400960055").unwrap();
    assert_eq!(checksum(&covered), 0xfe8d);
}
