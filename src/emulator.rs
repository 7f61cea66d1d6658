//! Simulated TP2.0 module living on the mock bus. It answers channel setup, acknowledges
//! data frames, reassembles requests and hands them to an [`EcuHandler`].

use std::cell::RefCell;
use std::rc::Rc;

use crate::can::mock::BusPeer;
use crate::can::CanFrame;
use crate::kwp2000::keygen::{KeyDerivation, LegacyKeyAlgorithm};
use crate::tp20::{
    next_sequence, BROADCAST_ADDR, FRAME_PAYLOAD, OP_ACK, OP_CHANNEL_TEST, OP_PARAMS_REQUEST,
    OP_PARAMS_RESPONSE, OP_SETUP_POSITIVE, OP_SETUP_REQUEST, REQUESTED_RX_ADDR, TYPE_LAST,
    TYPE_LAST_ACK, TYPE_MORE, TYPE_MORE_ACK,
};

// ─── ECU Handler Trait ───────────────────────────────────────────────

/// ECU-specific response logic behind the transport
pub trait EcuHandler {
    /// Build the response to one reassembled request. None stays silent.
    fn handle(&mut self, request: &[u8]) -> Option<Vec<u8>>;
}

/// Answers every request with the request itself
pub struct EchoHandler;

impl EcuHandler for EchoHandler {
    fn handle(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        Some(request.to_vec())
    }
}

/// Answers requests from a fixed script, in order
pub struct ScriptedHandler {
    responses: Vec<Vec<u8>>,
    pub requests: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl ScriptedHandler {
    pub fn new(responses: Vec<Vec<u8>>) -> Self {
        Self {
            responses,
            requests: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl EcuHandler for ScriptedHandler {
    fn handle(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        self.requests.borrow_mut().push(request.to_vec());
        if self.responses.is_empty() {
            None
        } else {
            Some(self.responses.remove(0))
        }
    }
}

// ─── Peer ────────────────────────────────────────────────────────────

/// Knobs for misbehaving peers
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub module: u8,
    pub bus: u8,
    /// Address the tester is told to transmit on
    pub tester_tx: u32,
    pub setup_status: u8,
    /// Address reported as the module's own transmit address
    pub advertised_rx: u32,
    /// Added to the sequence in every ack the peer sends
    pub ack_skew: u8,
    /// Never acknowledge the tester's last frame
    pub silent_ack: bool,
    /// Added to the length prefix of every response
    pub length_skew: u16,
    /// Request an ack after every N response frames
    pub ack_every: Option<usize>,
    /// Ignore this many setup requests before answering
    pub ignore_setups: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            module: 0x09,
            bus: 0,
            tester_tx: 0x740,
            setup_status: OP_SETUP_POSITIVE,
            advertised_rx: REQUESTED_RX_ADDR,
            ack_skew: 0,
            silent_ack: false,
            length_skew: 0,
            ack_every: None,
            ignore_setups: 0,
        }
    }
}

/// Peer-side counters visible to tests
#[derive(Debug, Default, Clone)]
pub struct PeerStats {
    pub setups: usize,
    pub acks_received: Vec<u8>,
    pub channel_tests: usize,
}

pub struct Tp20Peer<H: EcuHandler> {
    config: PeerConfig,
    handler: H,
    open: bool,
    rx_expected: u8,
    tx_sequence: u8,
    buffer: Vec<u8>,
    stats: Rc<RefCell<PeerStats>>,
}

impl<H: EcuHandler> Tp20Peer<H> {
    pub fn new(handler: H) -> Self {
        Self::with_config(handler, PeerConfig::default())
    }

    pub fn with_config(handler: H, config: PeerConfig) -> Self {
        Self {
            config,
            handler,
            open: false,
            rx_expected: 0,
            tx_sequence: 0,
            buffer: Vec::new(),
            stats: Rc::new(RefCell::new(PeerStats::default())),
        }
    }

    pub fn stats(&self) -> Rc<RefCell<PeerStats>> {
        self.stats.clone()
    }

    fn frame(&self, data: &[u8]) -> CanFrame {
        CanFrame::new(self.config.advertised_rx, data, self.config.bus)
    }

    fn params_response(&self) -> CanFrame {
        self.frame(&[OP_PARAMS_RESPONSE, 0x0F, 0x8A, 0xFF, 0x4A, 0xFF])
    }

    fn on_setup(&mut self, data: &[u8]) -> Vec<CanFrame> {
        if data.len() != 7 || data[0] != self.config.module || data[1] != OP_SETUP_REQUEST {
            return vec![];
        }
        let mut stats = self.stats.borrow_mut();
        stats.setups += 1;
        if stats.setups <= self.config.ignore_setups {
            return vec![];
        }
        drop(stats);

        self.open = true;
        self.rx_expected = 0;
        self.tx_sequence = 0;
        self.buffer.clear();

        let rx = (self.config.advertised_rx as u16).to_le_bytes();
        let tx = (self.config.tester_tx as u16).to_le_bytes();
        vec![CanFrame::new(
            BROADCAST_ADDR + self.config.module as u32,
            &[0x00, self.config.setup_status, rx[0], rx[1], tx[0], tx[1], 0x01],
            self.config.bus,
        )]
    }

    fn on_channel_frame(&mut self, data: &[u8]) -> Vec<CanFrame> {
        let Some(&header) = data.first() else {
            return vec![];
        };
        match header {
            OP_PARAMS_REQUEST => return vec![self.params_response()],
            OP_CHANNEL_TEST => {
                self.stats.borrow_mut().channel_tests += 1;
                return vec![self.params_response()];
            }
            _ => {}
        }
        if header & 0xF0 == OP_ACK {
            self.stats.borrow_mut().acks_received.push(header);
            return vec![];
        }

        let frame_type = header >> 4;
        let sequence = header & 0x0F;
        assert_eq!(
            sequence, self.rx_expected,
            "peer: tester sent sequence {} but {} was expected",
            sequence, self.rx_expected
        );
        self.rx_expected = next_sequence(sequence);
        self.buffer.extend_from_slice(&data[1..]);

        let mut out = Vec::new();
        let wants_ack = frame_type == TYPE_MORE_ACK || frame_type == TYPE_LAST_ACK;
        if wants_ack && !self.config.silent_ack {
            let ack = OP_ACK | ((self.rx_expected + self.config.ack_skew) & 0x0F);
            out.push(self.frame(&[ack]));
        }

        if frame_type == TYPE_LAST_ACK || frame_type == TYPE_LAST {
            let payload = std::mem::take(&mut self.buffer);
            let declared = u16::from_be_bytes([payload[0], payload[1]]) as usize;
            assert_eq!(declared, payload.len() - 2, "peer: bad length prefix");
            if let Some(response) = self.handler.handle(&payload[2..]) {
                out.extend(self.segment(&response));
            }
        }
        out
    }

    fn segment(&mut self, response: &[u8]) -> Vec<CanFrame> {
        let declared = (response.len() as u16).wrapping_add(self.config.length_skew);
        let mut payload = declared.to_be_bytes().to_vec();
        payload.extend_from_slice(response);

        let chunks: Vec<&[u8]> = payload.chunks(FRAME_PAYLOAD).collect();
        let count = chunks.len();
        let mut frames = Vec::with_capacity(count);
        for (i, chunk) in chunks.into_iter().enumerate() {
            let frame_type = if i + 1 == count {
                TYPE_LAST_ACK
            } else if matches!(self.config.ack_every, Some(n) if (i + 1) % n == 0) {
                TYPE_MORE_ACK
            } else {
                TYPE_MORE
            };
            let mut data = vec![(frame_type << 4) | self.tx_sequence];
            data.extend_from_slice(chunk);
            frames.push(self.frame(&data));
            self.tx_sequence = next_sequence(self.tx_sequence);
        }
        frames
    }
}

impl<H: EcuHandler> BusPeer for Tp20Peer<H> {
    fn on_frame(&mut self, frame: &CanFrame) -> Vec<CanFrame> {
        if frame.bus != self.config.bus {
            return vec![];
        }
        if frame.address == BROADCAST_ADDR {
            return self.on_setup(&frame.data);
        }
        if self.open && frame.address == self.config.tester_tx {
            return self.on_channel_frame(&frame.data);
        }
        vec![]
    }
}

// ─── Flash-capable ECU ───────────────────────────────────────────────

pub const ECU_IDENT: &[u8] = b"1K0909144E \x002501";
pub const FLASH_SEED: [u8; 4] = [0x12, 0x34, 0x56, 0x78];
pub const MAX_BLOCK: u16 = 0x00FE;

/// Memory and routine state of the simulated engine ECU
#[derive(Debug, Default, Clone)]
pub struct FlashMemory {
    pub session: Option<u8>,
    pub unlocked: bool,
    pub download: Option<(u32, u32)>,
    pub erased: Option<(u32, u32)>,
    pub written: Vec<u8>,
    pub transfer_exited: bool,
    pub checksum_ok: Option<bool>,
    pub stopped: bool,
}

/// KWP2000 programming flow as a VW engine ECU implements it
pub struct FlashEcu {
    memory: Rc<RefCell<FlashMemory>>,
}

impl FlashEcu {
    pub fn new() -> Self {
        Self {
            memory: Rc::new(RefCell::new(FlashMemory::default())),
        }
    }

    pub fn memory(&self) -> Rc<RefCell<FlashMemory>> {
        self.memory.clone()
    }
}

fn be24(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32
}

impl EcuHandler for FlashEcu {
    fn handle(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        let mut mem = self.memory.borrow_mut();
        let response = match request {
            [0x10, session] => {
                mem.session = Some(*session);
                vec![0x50, *session]
            }
            [0x1A, 0x9B] => {
                let mut resp = vec![0x5A, 0x9B];
                resp.extend_from_slice(ECU_IDENT);
                resp
            }
            [0x1A, 0x9C] => vec![0x5A, 0x9C, 0x00, 0x00, 0x00, 0x00],
            [0x27, access] if access % 2 == 1 => {
                let mut resp = vec![0x67, *access];
                resp.extend_from_slice(&FLASH_SEED);
                resp
            }
            [0x27, access, key @ ..] => {
                let expected = LegacyKeyAlgorithm.derive_key(&FLASH_SEED);
                if matches!(expected, Ok(ref k) if k.as_slice() == key) {
                    mem.unlocked = true;
                    vec![0x67, *access]
                } else {
                    vec![0x7F, 0x27, 0x35]
                }
            }
            [0x34, ..] if !mem.unlocked => vec![0x7F, 0x34, 0x33],
            [0x34, a0, a1, a2, _format, s0, s1, s2] => {
                mem.download = Some((be24(&[*a0, *a1, *a2]), be24(&[*s0, *s1, *s2])));
                let max = MAX_BLOCK.to_be_bytes();
                vec![0x74, max[0], max[1]]
            }
            [0x31, 0xC4, range @ ..] if range.len() == 6 => {
                mem.erased = Some((be24(&range[..3]), be24(&range[3..])));
                vec![0x71, 0xC4]
            }
            [0x31, 0xC5, args @ ..] if args.len() == 8 => {
                let expected = u16::from_be_bytes([args[6], args[7]]);
                let actual = mem
                    .written
                    .iter()
                    .fold(0u16, |acc, b| acc.wrapping_add(*b as u16));
                mem.checksum_ok = Some(expected == actual);
                vec![0x71, 0xC5]
            }
            [0x33, 0xC4] => vec![0x73, 0xC4, if mem.erased.is_some() { 0x00 } else { 0x01 }],
            [0x33, 0xC5] => vec![0x73, 0xC5, if mem.checksum_ok == Some(true) { 0x00 } else { 0x01 }],
            [0x36, data @ ..] if mem.download.is_some() => {
                mem.written.extend_from_slice(data);
                vec![0x76]
            }
            [0x36, ..] => vec![0x7F, 0x36, 0x22],
            [0x37] => {
                mem.transfer_exited = true;
                vec![0x77]
            }
            [0x82] => {
                mem.stopped = true;
                vec![0xC2]
            }
            [sid, ..] => vec![0x7F, *sid, 0x11],
            [] => return None,
        };
        Some(response)
    }
}
