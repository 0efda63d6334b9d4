use bluest::Uuid;
use thiserror::Error;

/// Why an incoming frame was dropped
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame too short or missing the 0xDD start marker")]
    MalformedFrame,
    #[error("frame for command {command:#04x} is {actual} bytes, expected at least {expected}")]
    TruncatedFrame {
        command: u8,
        expected: usize,
        actual: usize,
    },
    #[error("checksum mismatch: frame carries {actual:#06x}, computed {expected:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },
    #[error("unexpected trailer byte {0:#04x}")]
    BadTrailer(u8),
    #[error("state of charge {0} is outside 0-100")]
    SocOutOfRange(u16),
}

/// A failure of the wireless collaborator
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Default adapter not found")]
    AdapterUnavailable,
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] bluest::Error),
    #[error("no peer is connected")]
    NotConnected,
    #[error("the peer does not offer service {0}")]
    ServiceNotFound(Uuid),
    #[error("the service does not offer characteristic {0}")]
    CharacteristicNotFound(Uuid),
    #[error("characteristic {0} does not support notifications")]
    NotSubscribable(Uuid),
    #[error("the write characteristic is not writable")]
    NotWritable,
    #[error("the notification subscription closed")]
    SubscriptionClosed,
    #[error("the scan stopped before it started reporting devices")]
    ScanClosed,
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("invalid UUID {0:?}")]
    InvalidUuid(String),
}
