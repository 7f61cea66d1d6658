use std::fmt;

use crate::can::hex;

// J2534 Protocol IDs
pub const PROTOCOL_CAN: u32 = 5;

// J2534 Filter Types
pub const FILTER_PASS: u32 = 1;

// J2534 RxStatus bits
/// Set on the echo of a frame we transmitted ourselves
pub const TX_MSG_TYPE: u32 = 0x0001;

// J2534 IOCTL IDs
pub const CLEAR_TX_BUFFER: u32 = 0x07;
pub const CLEAR_RX_BUFFER: u32 = 0x08;

pub const MAX_DATA_SIZE: usize = 4128;

/// Arbitration id occupies the first four data bytes of every CAN message
pub const CAN_ID_LEN: usize = 4;

/// PASSTHRU_MSG structure matching the J2534 API spec
#[repr(C)]
#[derive(Clone)]
pub struct PassThruMsg {
    pub protocol_id: u32,
    pub rx_status: u32,
    pub tx_flags: u32,
    pub timestamp: u32,
    pub data_size: u32,
    pub extra_data_index: u32,
    pub data: [u8; MAX_DATA_SIZE],
}

impl Default for PassThruMsg {
    fn default() -> Self {
        Self {
            protocol_id: 0,
            rx_status: 0,
            tx_flags: 0,
            timestamp: 0,
            data_size: 0,
            extra_data_index: 0,
            data: [0u8; MAX_DATA_SIZE],
        }
    }
}

impl PassThruMsg {
    /// Raw CAN frame: 4-byte big-endian id followed by at most 8 data bytes
    pub fn new_can(can_id: u32, payload: &[u8]) -> Self {
        let len = payload.len().min(8);
        let mut msg = Self {
            protocol_id: PROTOCOL_CAN,
            data_size: (CAN_ID_LEN + len) as u32,
            ..Default::default()
        };
        msg.data[..CAN_ID_LEN].copy_from_slice(&can_id.to_be_bytes());
        msg.data[CAN_ID_LEN..CAN_ID_LEN + len].copy_from_slice(&payload[..len]);
        msg
    }

    /// Filter mask or pattern: just the id field
    pub fn new_filter(value: u32) -> Self {
        let mut msg = Self {
            protocol_id: PROTOCOL_CAN,
            data_size: CAN_ID_LEN as u32,
            ..Default::default()
        };
        msg.data[..CAN_ID_LEN].copy_from_slice(&value.to_be_bytes());
        msg
    }

    pub fn payload(&self) -> &[u8] {
        let size = (self.data_size as usize).min(MAX_DATA_SIZE);
        if size > CAN_ID_LEN {
            &self.data[CAN_ID_LEN..size]
        } else {
            &[]
        }
    }

    pub fn can_id(&self) -> u32 {
        u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]])
    }

    pub fn is_tx_echo(&self) -> bool {
        self.rx_status & TX_MSG_TYPE != 0
    }
}

impl fmt::Debug for PassThruMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = (self.data_size as usize).min(MAX_DATA_SIZE);
        f.debug_struct("PassThruMsg")
            .field("protocol_id", &self.protocol_id)
            .field("rx_status", &self.rx_status)
            .field("data_size", &self.data_size)
            .field("data", &format_args!("[{}]", hex(&self.data[..size])))
            .finish()
    }
}

/// J2534 error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum J2534Error {
    NoError = 0x00,
    NotSupported = 0x01,
    InvalidChannelId = 0x02,
    InvalidProtocolId = 0x03,
    NullParameter = 0x04,
    InvalidIoctlValue = 0x05,
    InvalidFlags = 0x06,
    Failed = 0x07,
    DeviceNotConnected = 0x08,
    Timeout = 0x09,
    InvalidMsg = 0x0A,
    InvalidTimeInterval = 0x0B,
    ExceededLimit = 0x0C,
    InvalidMsgId = 0x0D,
    DeviceInUse = 0x0E,
    InvalidIoctlId = 0x0F,
    BufferEmpty = 0x10,
    BufferFull = 0x11,
    BufferOverflow = 0x12,
    PinInvalid = 0x13,
    ChannelInUse = 0x14,
    MsgProtocolId = 0x15,
    InvalidFilterId = 0x16,
    NoFlowControl = 0x17,
    NotUnique = 0x18,
    InvalidBaudrate = 0x19,
    InvalidDeviceId = 0x1A,
}

impl J2534Error {
    pub fn from_code(code: u32) -> Self {
        match code {
            0x00 => Self::NoError,
            0x01 => Self::NotSupported,
            0x02 => Self::InvalidChannelId,
            0x03 => Self::InvalidProtocolId,
            0x04 => Self::NullParameter,
            0x05 => Self::InvalidIoctlValue,
            0x06 => Self::InvalidFlags,
            0x07 => Self::Failed,
            0x08 => Self::DeviceNotConnected,
            0x09 => Self::Timeout,
            0x0A => Self::InvalidMsg,
            0x0B => Self::InvalidTimeInterval,
            0x0C => Self::ExceededLimit,
            0x0D => Self::InvalidMsgId,
            0x0E => Self::DeviceInUse,
            0x0F => Self::InvalidIoctlId,
            0x10 => Self::BufferEmpty,
            0x11 => Self::BufferFull,
            0x12 => Self::BufferOverflow,
            0x13 => Self::PinInvalid,
            0x14 => Self::ChannelInUse,
            0x15 => Self::MsgProtocolId,
            0x16 => Self::InvalidFilterId,
            0x17 => Self::NoFlowControl,
            0x18 => Self::NotUnique,
            0x19 => Self::InvalidBaudrate,
            0x1A => Self::InvalidDeviceId,
            _ => Self::Failed,
        }
    }

    /// Read results that only mean "nothing arrived yet"
    pub fn is_empty_read(&self) -> bool {
        matches!(self, Self::BufferEmpty | Self::Timeout)
    }
}

impl fmt::Display for J2534Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoError => write!(f, "No error"),
            Self::NotSupported => write!(f, "Not supported"),
            Self::InvalidChannelId => write!(f, "Invalid channel ID"),
            Self::InvalidProtocolId => write!(f, "Invalid protocol ID"),
            Self::NullParameter => write!(f, "Null parameter"),
            Self::InvalidIoctlValue => write!(f, "Invalid IOCTL value"),
            Self::InvalidFlags => write!(f, "Invalid flags"),
            Self::Failed => write!(f, "Failed"),
            Self::DeviceNotConnected => write!(f, "Device not connected"),
            Self::Timeout => write!(f, "Timeout"),
            Self::InvalidMsg => write!(f, "Invalid message"),
            Self::InvalidTimeInterval => write!(f, "Invalid time interval"),
            Self::ExceededLimit => write!(f, "Exceeded limit"),
            Self::InvalidMsgId => write!(f, "Invalid message ID"),
            Self::DeviceInUse => write!(f, "Device in use"),
            Self::InvalidIoctlId => write!(f, "Invalid IOCTL ID"),
            Self::BufferEmpty => write!(f, "Buffer empty"),
            Self::BufferFull => write!(f, "Buffer full"),
            Self::BufferOverflow => write!(f, "Buffer overflow"),
            Self::PinInvalid => write!(f, "Pin invalid"),
            Self::ChannelInUse => write!(f, "Channel in use"),
            Self::MsgProtocolId => write!(f, "Message protocol ID mismatch"),
            Self::InvalidFilterId => write!(f, "Invalid filter ID"),
            Self::NoFlowControl => write!(f, "No flow control"),
            Self::NotUnique => write!(f, "Not unique"),
            Self::InvalidBaudrate => write!(f, "Invalid baudrate"),
            Self::InvalidDeviceId => write!(f, "Invalid device ID"),
        }
    }
}

impl std::error::Error for J2534Error {}

/// Turn a PassThru return code into the adapter's string error
pub fn check(call: &str, code: u32) -> Result<(), String> {
    if code == 0 {
        Ok(())
    } else {
        Err(format!("{} failed: {}", call, J2534Error::from_code(code)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn test_passthru_msg_layout() {
        // 6 u32 fields (24 bytes) + 4128 byte data array = 4152
        assert_eq!(mem::size_of::<PassThruMsg>(), 4152);
        assert_eq!(mem::offset_of!(PassThruMsg, data), 24);
    }

    #[test]
    fn test_new_can() {
        let msg = PassThruMsg::new_can(0x200, &[0x09, 0xC0, 0x00, 0x10, 0x00, 0x03, 0x01]);
        assert_eq!(msg.protocol_id, PROTOCOL_CAN);
        assert_eq!(msg.data_size, 11);
        assert_eq!(&msg.data[..4], &[0x00, 0x00, 0x02, 0x00]);
        assert_eq!(msg.can_id(), 0x200);
        assert_eq!(msg.payload(), &[0x09, 0xC0, 0x00, 0x10, 0x00, 0x03, 0x01]);
    }

    #[test]
    fn test_new_can_truncates_to_frame() {
        let msg = PassThruMsg::new_can(0x740, &[0xAA; 12]);
        assert_eq!(msg.payload().len(), 8);
    }

    #[test]
    fn test_filter_message() {
        let msg = PassThruMsg::new_filter(0);
        assert_eq!(msg.data_size, 4);
        assert_eq!(msg.payload(), &[] as &[u8]);
    }

    #[test]
    fn test_tx_echo_flag() {
        let mut msg = PassThruMsg::new_can(0x300, &[0xB1]);
        assert!(!msg.is_tx_echo());
        msg.rx_status = TX_MSG_TYPE;
        assert!(msg.is_tx_echo());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(J2534Error::from_code(0x09), J2534Error::Timeout);
        assert_eq!(J2534Error::from_code(0xFF), J2534Error::Failed);
        assert!(J2534Error::BufferEmpty.is_empty_read());
        assert!(!J2534Error::DeviceNotConnected.is_empty_read());
        assert_eq!(
            check("PassThruConnect", 0x19),
            Err("PassThruConnect failed: Invalid baudrate".to_string())
        );
        assert_eq!(check("PassThruConnect", 0), Ok(()));
    }
}
