use std::fmt;
use std::time::Duration;

use crate::can::hex;

/// Transport layer failures. None of these are retried here; a failed send or receive leaves
/// the channel unusable and it has to be opened again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No frame for `address` arrived within the wait bound
    Timeout { address: u32, waited: Duration },
    /// Setup or parameter response violated the handshake
    ChannelSetup(String),
    /// Stop-and-wait acknowledgment did not carry the expected sequence
    AckMismatch { expected: u8, received: Vec<u8> },
    /// Reassembled payload disagrees with its length prefix
    LengthMismatch { declared: usize, actual: usize },
    /// Buffer rejected before anything was transmitted
    PayloadTooLong { len: usize, max: usize },
    /// A frame that has no place in the current exchange
    UnexpectedFrame { address: u32, data: Vec<u8> },
    /// Failure reported by the CAN interface itself
    Adapter(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { address, waited } => write!(
                f,
                "Timed out after {} ms waiting for frame on 0x{:03X}",
                waited.as_millis(),
                address
            ),
            Self::ChannelSetup(msg) => write!(f, "Channel setup failed: {}", msg),
            Self::AckMismatch { expected, received } => write!(
                f,
                "Wrong ack received: expected {:02X}, got [{}]",
                expected,
                hex(received)
            ),
            Self::LengthMismatch { declared, actual } => write!(
                f,
                "Length mismatch: prefix declares {} bytes, received {}",
                declared, actual
            ),
            Self::PayloadTooLong { len, max } => {
                write!(f, "Payload of {} bytes exceeds limit of {} bytes", len, max)
            }
            Self::UnexpectedFrame { address, data } => {
                write!(f, "Unexpected frame on 0x{:03X}: [{}]", address, hex(data))
            }
            Self::Adapter(msg) => write!(f, "CAN adapter error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}
