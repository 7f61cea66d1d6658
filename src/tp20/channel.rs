use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::can::{hex, CanAdapter};
use crate::tp20::error::TransportError;
use crate::tp20::timing::{TimingParameters, Tp20Config};
use crate::tp20::*;

/// One open TP2.0 channel to a module.
///
/// The channel owns its sequence counters and, per address, a queue of frames that arrived
/// while it was waiting for something else; those are handed out first on later waits for
/// their address, in arrival order. A channel must only be used by one caller at a time, and any
/// transport error leaves it in an undefined state: open a new one.
pub struct Tp20Channel<A: CanAdapter> {
    adapter: A,
    config: Tp20Config,
    module: u8,
    rx_address: u32,
    tx_address: u32,
    tx_sequence: u8,
    /// Sequence expected on the next received data frame
    rx_sequence: u8,
    inter_packet_delay: Duration,
    pending: HashMap<u32, VecDeque<Vec<u8>>>,
    last_tx: Option<Instant>,
}

impl<A: CanAdapter> Tp20Channel<A> {
    /// Run the setup and parameter handshake against `module`. Nothing is usable unless
    /// both steps succeed.
    pub fn open(adapter: A, module: u8, config: Tp20Config) -> Result<Self, TransportError> {
        let mut channel = Self {
            adapter,
            inter_packet_delay: config.inter_packet_delay,
            config,
            module,
            rx_address: 0,
            tx_address: 0,
            tx_sequence: 0,
            rx_sequence: 0,
            pending: HashMap::new(),
            last_tx: None,
        };
        channel.setup()?;
        channel.negotiate_timing()?;
        log::info!(
            "TP2.0 channel open to module 0x{:02X}: tx 0x{:03X}, rx 0x{:03X}",
            module,
            channel.tx_address,
            channel.rx_address
        );
        Ok(channel)
    }

    /// We ask the module to transmit on REQUESTED_RX_ADDR and it tells us where to transmit.
    fn setup(&mut self) -> Result<(), TransportError> {
        let invalid = (INVALID_ADDR as u16).to_le_bytes();
        let requested = (REQUESTED_RX_ADDR as u16).to_le_bytes();
        let request = [
            self.module,
            OP_SETUP_REQUEST,
            invalid[0],
            invalid[1],
            requested[0],
            requested[1],
            APPLICATION_KWP,
        ];
        self.send_frame(BROADCAST_ADDR, &request)?;

        let response = self.wait_for(BROADCAST_ADDR + self.module as u32)?;
        log::debug!("Channel setup response [{}]", hex(&response));

        let (status, rx, tx) = match response.as_slice() {
            [_, status, rx_lo, rx_hi, tx_lo, tx_hi, _] => (
                *status,
                u16::from_le_bytes([*rx_lo, *rx_hi]) as u32,
                u16::from_le_bytes([*tx_lo, *tx_hi]) as u32,
            ),
            _ => {
                return Err(TransportError::ChannelSetup(format!(
                    "malformed setup response [{}]",
                    hex(&response)
                )))
            }
        };
        if status != OP_SETUP_POSITIVE {
            return Err(TransportError::ChannelSetup(format!(
                "status 0x{:02X} in [{}]",
                status,
                hex(&response)
            )));
        }
        if rx != REQUESTED_RX_ADDR {
            return Err(TransportError::ChannelSetup(format!(
                "module transmits on 0x{:03X}, requested 0x{:03X}",
                rx, REQUESTED_RX_ADDR
            )));
        }

        self.rx_address = rx;
        self.tx_address = tx;
        Ok(())
    }

    fn negotiate_timing(&mut self) -> Result<(), TransportError> {
        let request = [
            OP_PARAMS_REQUEST,
            self.config.block_size,
            self.config.t1,
            0xFF,
            self.config.t3,
            0xFF,
        ];
        self.send_frame(self.tx_address, &request)?;

        let response = self.wait_for(self.rx_address)?;
        if response.first() != Some(&OP_PARAMS_RESPONSE) {
            return Err(TransportError::ChannelSetup(format!(
                "expected parameter response, got [{}]",
                hex(&response)
            )));
        }

        match TimingParameters::parse(&response) {
            Some(params) => {
                log::debug!(
                    "Negotiated block size {}, ack timeout {:?}, packet interval {:?}",
                    params.block_size,
                    params.ack_timeout,
                    params.packet_interval
                );
                if self.config.honor_negotiated_timing {
                    self.inter_packet_delay = params.packet_interval;
                }
            }
            None => log::warn!(
                "Could not decode timing parameters [{}], keeping {:?}",
                hex(&response),
                self.inter_packet_delay
            ),
        }

        self.tx_sequence = 0;
        self.rx_sequence = 0;
        Ok(())
    }

    /// Segment `data` behind a 2-byte length prefix and wait for the ack of the last frame.
    pub fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let max = self.config.effective_max_payload();
        if data.len() > max {
            return Err(TransportError::PayloadTooLong {
                len: data.len(),
                max,
            });
        }

        let mut payload = Vec::with_capacity(data.len() + 2);
        payload.extend_from_slice(&(data.len() as u16).to_be_bytes());
        payload.extend_from_slice(data);

        let count = payload.len().div_ceil(FRAME_PAYLOAD);
        for (i, chunk) in payload.chunks(FRAME_PAYLOAD).enumerate() {
            let last = i + 1 == count;
            let frame_type = if last { TYPE_LAST_ACK } else { TYPE_MORE };

            let mut frame = Vec::with_capacity(FRAME_PAYLOAD + 1);
            frame.push((frame_type << 4) | self.tx_sequence);
            frame.extend_from_slice(chunk);
            self.send_frame(self.tx_address, &frame)?;

            if last {
                self.wait_for_ack()?;
            }
            self.tx_sequence = next_sequence(self.tx_sequence);
        }
        Ok(())
    }

    /// Reassemble one length-prefixed buffer, acknowledging wherever the module asks for it.
    pub fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut payload = Vec::new();
        loop {
            let frame = self.wait_for(self.rx_address)?;
            if frame.is_empty() {
                return Err(TransportError::UnexpectedFrame {
                    address: self.rx_address,
                    data: frame,
                });
            }

            let header = frame[0];
            let frame_type = header >> 4;
            let sequence = header & 0x0F;
            if !matches!(
                frame_type,
                TYPE_MORE_ACK | TYPE_LAST_ACK | TYPE_MORE | TYPE_LAST
            ) {
                return Err(TransportError::UnexpectedFrame {
                    address: self.rx_address,
                    data: frame,
                });
            }
            if sequence != self.rx_sequence {
                log::warn!(
                    "Sequence gap on 0x{:03X}: expected {:X}, got {:X}",
                    self.rx_address,
                    self.rx_sequence,
                    sequence
                );
            }
            self.rx_sequence = next_sequence(sequence);
            payload.extend_from_slice(&frame[1..]);

            match frame_type {
                TYPE_MORE_ACK => self.send_ack()?,
                TYPE_LAST_ACK => {
                    self.send_ack()?;
                    break;
                }
                TYPE_LAST => break,
                _ => {}
            }
        }

        if payload.len() < 2 {
            return Err(TransportError::LengthMismatch {
                declared: 2,
                actual: payload.len(),
            });
        }
        let declared = u16::from_be_bytes([payload[0], payload[1]]) as usize;
        let data = payload.split_off(2);
        if data.len() != declared {
            return Err(TransportError::LengthMismatch {
                declared,
                actual: data.len(),
            });
        }
        Ok(data)
    }

    /// Channel test: keeps the module from closing an idle channel
    pub fn keep_alive(&mut self) -> Result<(), TransportError> {
        self.send_frame(self.tx_address, &[OP_CHANNEL_TEST])?;
        let response = self.wait_for(self.rx_address)?;
        if response.first() != Some(&OP_PARAMS_RESPONSE) {
            return Err(TransportError::UnexpectedFrame {
                address: self.rx_address,
                data: response,
            });
        }
        Ok(())
    }

    /// Both sides count independently, but the ack carries our own sequence + 1
    fn wait_for_ack(&mut self) -> Result<(), TransportError> {
        let expected = OP_ACK | next_sequence(self.tx_sequence);
        let response = self.wait_for(self.rx_address)?;
        if response != [expected] {
            return Err(TransportError::AckMismatch {
                expected,
                received: response,
            });
        }
        Ok(())
    }

    /// Acknowledge with the module's sequence + 1, which is what we expect next
    fn send_ack(&mut self) -> Result<(), TransportError> {
        self.send_frame(self.tx_address, &[OP_ACK | self.rx_sequence])
    }

    fn send_frame(&mut self, address: u32, data: &[u8]) -> Result<(), TransportError> {
        if let Some(last) = self.last_tx {
            let elapsed = last.elapsed();
            if elapsed < self.inter_packet_delay {
                std::thread::sleep(self.inter_packet_delay - elapsed);
            }
        }

        log::trace!("TX: 0x{:03X} - {}", address, hex(data));
        let timeout_ms = u32::try_from(self.config.timeout.as_millis()).unwrap_or(u32::MAX);
        self.adapter
            .send(address, data, self.config.bus, timeout_ms)
            .map_err(TransportError::Adapter)?;
        self.last_tx = Some(Instant::now());
        Ok(())
    }

    /// Consume frames off the adapter until one for `address` shows up or the timeout
    /// expires. Frames for other addresses are queued, never dropped.
    fn wait_for(&mut self, address: u32) -> Result<Vec<u8>, TransportError> {
        let start = Instant::now();
        let mut polled = false;
        loop {
            if let Some(data) = self.take_pending(address) {
                return Ok(data);
            }
            let waited = start.elapsed();
            if polled && waited >= self.config.timeout {
                return Err(TransportError::Timeout { address, waited });
            }
            if self.poll()? == 0 {
                std::thread::sleep(self.config.poll_interval);
            }
            polled = true;
        }
    }

    fn take_pending(&mut self, address: u32) -> Option<Vec<u8>> {
        let queue = self.pending.get_mut(&address)?;
        let data = queue.pop_front();
        if queue.is_empty() {
            self.pending.remove(&address);
        }
        data
    }

    /// Move whatever the adapter has into the pending queue; returns frames taken
    fn poll(&mut self) -> Result<usize, TransportError> {
        let frames = self.adapter.recv().map_err(TransportError::Adapter)?;
        let mut taken = 0;
        for frame in frames {
            if frame.bus != self.config.bus {
                continue;
            }
            log::trace!("RX: 0x{:03X} - {}", frame.address, hex(&frame.data));
            self.pending
                .entry(frame.address)
                .or_default()
                .push_back(frame.data);
            taken += 1;
        }
        Ok(taken)
    }

    pub fn module(&self) -> u8 {
        self.module
    }

    pub fn rx_address(&self) -> u32 {
        self.rx_address
    }

    pub fn tx_address(&self) -> u32 {
        self.tx_address
    }

    pub fn tx_sequence(&self) -> u8 {
        self.tx_sequence
    }

    pub fn rx_sequence(&self) -> u8 {
        self.rx_sequence
    }

    pub fn inter_packet_delay(&self) -> Duration {
        self.inter_packet_delay
    }

    /// Frames received for other addresses and not yet claimed
    pub fn pending_frames(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn into_adapter(self) -> A {
        self.adapter
    }
}

impl<A: CanAdapter> Transport for Tp20Channel<A> {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        Tp20Channel::send(self, data)
    }

    fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        Tp20Channel::recv(self)
    }
}
