#[cfg(test)]
pub mod mock;

use std::fmt;

/// Maximum payload of a classic CAN frame
pub const MAX_FRAME_LEN: usize = 8;

/// A single frame as seen on the bus
#[derive(Clone, PartialEq, Eq)]
pub struct CanFrame {
    pub address: u32,
    pub data: Vec<u8>,
    pub bus: u8,
}

impl CanFrame {
    pub fn new(address: u32, data: &[u8], bus: u8) -> Self {
        Self {
            address,
            data: data.to_vec(),
            bus,
        }
    }
}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:03X}@{} [{}]", self.address, self.bus, hex(&self.data))
    }
}

/// Raw frame access to a CAN interface. The transport only ever talks to the bus through this.
pub trait CanAdapter {
    /// Queue one frame (at most 8 bytes) for transmission on `bus`.
    fn send(&self, address: u32, data: &[u8], bus: u8, timeout_ms: u32) -> Result<(), String>;

    /// Frames received since the last call, oldest first. Never blocks.
    fn recv(&self) -> Result<Vec<CanFrame>, String>;

    /// Drop everything queued in the interface.
    fn clear(&self) -> Result<(), String>;

    /// Safety toggle; output must be enabled before anything can be transmitted.
    fn set_output_enabled(&self, enabled: bool) -> Result<(), String>;
}

/// Lets several channels (one at a time) borrow the same interface, e.g. across reconnects.
impl<A: CanAdapter + ?Sized> CanAdapter for &A {
    fn send(&self, address: u32, data: &[u8], bus: u8, timeout_ms: u32) -> Result<(), String> {
        (**self).send(address, data, bus, timeout_ms)
    }

    fn recv(&self) -> Result<Vec<CanFrame>, String> {
        (**self).recv()
    }

    fn clear(&self) -> Result<(), String> {
        (**self).clear()
    }

    fn set_output_enabled(&self, enabled: bool) -> Result<(), String> {
        (**self).set_output_enabled(enabled)
    }
}

/// Space separated upper-case hex, used by every log line in the crate
pub fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
