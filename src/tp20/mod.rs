//! VW Transport Protocol 2.0: channel setup, segmentation and stop-and-wait acknowledgment
//! over raw CAN frames.

pub mod channel;
pub mod error;
pub mod timing;

pub use channel::Tp20Channel;
pub use error::TransportError;
pub use timing::{decode_timing, TimingParameters, Tp20Config};

/// Channel setup requests go out here; module N answers on `BROADCAST_ADDR + N`
pub const BROADCAST_ADDR: u32 = 0x200;
/// Address we ask the module to transmit on
pub const REQUESTED_RX_ADDR: u32 = 0x300;
/// Setup field value flagging "no address yet" (validity bit set)
pub const INVALID_ADDR: u32 = 0x1000;
pub const APPLICATION_KWP: u8 = 0x01;

pub const OP_SETUP_REQUEST: u8 = 0xC0;
pub const OP_SETUP_POSITIVE: u8 = 0xD0;
pub const OP_PARAMS_REQUEST: u8 = 0xA0;
pub const OP_PARAMS_RESPONSE: u8 = 0xA1;
pub const OP_CHANNEL_TEST: u8 = 0xA3;
pub const OP_ACK: u8 = 0xB0;

/// Data frame types (high nibble of the header byte)
pub const TYPE_MORE_ACK: u8 = 0x0;
pub const TYPE_LAST_ACK: u8 = 0x1;
pub const TYPE_MORE: u8 = 0x2;
pub const TYPE_LAST: u8 = 0x3;

/// Payload bytes per data frame after the header byte
pub const FRAME_PAYLOAD: usize = 7;

/// 4-bit sequence counter increment
pub fn next_sequence(sequence: u8) -> u8 {
    (sequence + 1) & 0x0F
}

/// What the session layer needs from a transport: ship one buffer, get one buffer back
pub trait Transport {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;
    fn recv(&mut self) -> Result<Vec<u8>, TransportError>;
}
