use std::time::Duration;

/// Channel parameters requested during setup and used for every wait and transmission
#[derive(Debug, Clone)]
pub struct Tp20Config {
    pub bus: u8,
    /// Bound on every single wait for a frame
    pub timeout: Duration,
    pub block_size: u8,
    /// Requested time to wait for an ack (timing byte encoding)
    pub t1: u8,
    /// Requested interval between packets (timing byte encoding)
    pub t3: u8,
    /// Minimum spacing between two transmitted frames
    pub inter_packet_delay: Duration,
    /// Use the peer's negotiated T3 instead of `inter_packet_delay`
    pub honor_negotiated_timing: bool,
    /// Largest buffer accepted by send(), capped by the 16-bit length prefix
    pub max_payload: usize,
    /// Sleep between adapter polls when nothing arrived
    pub poll_interval: Duration,
}

impl Default for Tp20Config {
    fn default() -> Self {
        Self {
            bus: 0,
            timeout: Duration::from_millis(100),
            block_size: 0x0F,
            t1: 0x8A,
            t3: 0x0A,
            inter_packet_delay: Duration::from_millis(10),
            honor_negotiated_timing: false,
            max_payload: 0xFF,
            poll_interval: Duration::from_millis(1),
        }
    }
}

impl Tp20Config {
    pub fn effective_max_payload(&self) -> usize {
        self.max_payload.min(u16::MAX as usize)
    }
}

/// Decode a TP2.0 timing byte: bits 7-6 select the unit, bits 5-0 are the multiplier.
/// 0x8A is 10 x 10 ms, 0x4A is 10 x 1 ms, 0x0A is 10 x 0.1 ms.
pub fn decode_timing(byte: u8) -> Duration {
    let unit_us: u64 = match byte >> 6 {
        0 => 100,
        1 => 1_000,
        2 => 10_000,
        _ => 100_000,
    };
    Duration::from_micros(unit_us * (byte & 0x3F) as u64)
}

/// Peer's answer to the parameter request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingParameters {
    pub block_size: u8,
    pub ack_timeout: Duration,
    pub packet_interval: Duration,
}

impl TimingParameters {
    /// Parse `A1 bs t1 t2 t3 t4`; None unless it is a six byte parameter response
    pub fn parse(data: &[u8]) -> Option<Self> {
        match data {
            [0xA1, block_size, t1, _, t3, _] => Some(Self {
                block_size: *block_size,
                ack_timeout: decode_timing(*t1),
                packet_interval: decode_timing(*t3),
            }),
            _ => None,
        }
    }
}
