//! Raw CAN access through a SAE J2534 PassThru interface.

pub mod device;
pub mod dll;
pub mod types;

use std::cell::Cell;
use std::path::Path;
use std::sync::Arc;

use crate::can::{CanAdapter, CanFrame, MAX_FRAME_LEN};
use crate::tp20::{BROADCAST_ADDR, REQUESTED_RX_ADDR};
use device::{DeviceVersion, J2534Channel, J2534Device};
use dll::J2534Lib;
use types::{PassThruMsg, CAN_ID_LEN};

/// Messages drained from the driver per `recv` call
const READ_BATCH: usize = 32;

/// `(mask, pattern)` pairs for the ids a TP2.0 tester listens to: setup responses on
/// 0x200-0x2FF and the channel address modules are asked to transmit on.
/// Everything else on the powertrain bus is dropped by the interface.
pub const TP20_FILTERS: [(u32, u32); 2] = [(0x700, BROADCAST_ADDR), (0x7FF, REQUESTED_RX_ADDR)];

/// A J2534 device with one raw CAN channel open. PassThru interfaces expose a single bus.
pub struct J2534CanAdapter {
    // Field order matters: the channel must disconnect before the device closes
    channel: J2534Channel,
    device: J2534Device,
    bus: u8,
    output_enabled: Cell<bool>,
}

impl J2534CanAdapter {
    pub fn open(dll_path: &Path, baudrate: u32, bus: u8) -> Result<Self, String> {
        let lib = Arc::new(J2534Lib::load(dll_path)?);
        let device = J2534Device::open(lib)?;
        let channel = device.connect_can(baudrate, &TP20_FILTERS)?;
        let adapter = Self {
            channel,
            device,
            bus,
            output_enabled: Cell::new(false),
        };
        match adapter.version() {
            Ok(v) => log::info!(
                "J2534 device opened: firmware {}, dll {}, api {}",
                v.firmware,
                v.dll,
                v.api
            ),
            Err(e) => log::warn!("Could not read J2534 version: {}", e),
        }
        log::info!("CAN channel connected at {} bit/s on bus {}", baudrate, bus);
        Ok(adapter)
    }

    pub fn version(&self) -> Result<DeviceVersion, String> {
        self.device.read_version()
    }
}

impl CanAdapter for J2534CanAdapter {
    fn send(&self, address: u32, data: &[u8], bus: u8, timeout_ms: u32) -> Result<(), String> {
        if !self.output_enabled.get() {
            return Err("output disabled".into());
        }
        if bus != self.bus {
            return Err(format!("Bus {} not available (adapter is on bus {})", bus, self.bus));
        }
        if data.len() > MAX_FRAME_LEN {
            return Err(format!("CAN frame too long: {} bytes", data.len()));
        }
        let msg = PassThruMsg::new_can(address, data);
        self.channel.send(&msg, timeout_ms)
    }

    fn recv(&self) -> Result<Vec<CanFrame>, String> {
        let msgs = self.channel.read(READ_BATCH, 0)?;
        Ok(msgs
            .iter()
            .filter_map(|msg| frame_from_msg(msg, self.bus))
            .collect())
    }

    fn clear(&self) -> Result<(), String> {
        self.channel.clear_rx_buffer()?;
        self.channel.clear_tx_buffer()
    }

    fn set_output_enabled(&self, enabled: bool) -> Result<(), String> {
        log::debug!("CAN output {}", if enabled { "enabled" } else { "disabled" });
        self.output_enabled.set(enabled);
        Ok(())
    }
}

/// Convert a received PassThru message, skipping echoes of our own frames and runts
pub fn frame_from_msg(msg: &PassThruMsg, bus: u8) -> Option<CanFrame> {
    if msg.is_tx_echo() || (msg.data_size as usize) < CAN_ID_LEN {
        return None;
    }
    Some(CanFrame::new(msg.can_id(), msg.payload(), bus))
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::types::TX_MSG_TYPE;

    #[test]
    fn test_frame_from_msg() {
        let msg = PassThruMsg::new_can(0x300, &[0x10, 0x00, 0x02, 0x50, 0x89]);
        let frame = frame_from_msg(&msg, 0).unwrap();
        assert_eq!(frame, CanFrame::new(0x300, &[0x10, 0x00, 0x02, 0x50, 0x89], 0));
    }

    fn passes_filters(id: u32) -> bool {
        TP20_FILTERS
            .iter()
            .any(|&(mask, pattern)| id & mask == pattern)
    }

    #[test]
    fn test_filters_pass_tp20_ids_only() {
        for id in [0x200, 0x201, 0x209, 0x2FF, 0x300] {
            assert!(passes_filters(id), "0x{:03X} should pass", id);
        }
        for id in [0x100, 0x1FF, 0x280 | 0x400, 0x301, 0x3FF, 0x470, 0x5C0, 0x7E8] {
            assert!(!passes_filters(id), "0x{:03X} should be dropped", id);
        }
    }

    #[test]
    fn test_frame_from_msg_tags_bus() {
        let msg = PassThruMsg::new_can(0x201, &[0x00, 0xD0]);
        assert_eq!(frame_from_msg(&msg, 1).unwrap().bus, 1);
    }

    #[test]
    fn test_frame_from_msg_skips_echo() {
        let mut msg = PassThruMsg::new_can(0x740, &[0xB1]);
        msg.rx_status = TX_MSG_TYPE;
        assert!(frame_from_msg(&msg, 0).is_none());
    }

    #[test]
    fn test_frame_from_msg_skips_runt() {
        let mut msg = PassThruMsg::default();
        msg.data_size = 2;
        assert!(frame_from_msg(&msg, 0).is_none());
    }

    #[test]
    fn test_frame_from_msg_empty_payload() {
        let msg = PassThruMsg::new_filter(0x300);
        let frame = frame_from_msg(&msg, 0).unwrap();
        assert_eq!(frame.address, 0x300);
        assert!(frame.data.is_empty());
    }
}
