use std::fmt;

use crate::can::hex;
use crate::kwp2000::types::ServiceId;
use crate::tp20::TransportError;

/// KWP2000 Negative Response Codes (ISO 14230-3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegativeResponseCode {
    GeneralReject,                                 // 0x10
    ServiceNotSupported,                           // 0x11
    SubFunctionNotSupportedInvalidFormat,          // 0x12
    BusyRepeatRequest,                             // 0x21
    ConditionsNotCorrectOrRequestSequenceError,    // 0x22
    RoutineNotComplete,                            // 0x23
    RequestOutOfRange,                             // 0x31
    SecurityAccessDenied,                          // 0x33
    InvalidKey,                                    // 0x35
    ExceedNumberOfAttempts,                        // 0x36
    RequiredTimeDelayNotExpired,                   // 0x37
    DownloadNotAccepted,                           // 0x40
    ImproperDownloadType,                          // 0x41
    CantDownloadToSpecifiedAddress,                // 0x42
    CantDownloadNumberOfBytesRequested,            // 0x43
    UploadNotAccepted,                             // 0x50
    ImproperUploadType,                            // 0x51
    CantUploadFromSpecifiedAddress,                // 0x52
    CantUploadNumberOfBytesRequested,              // 0x53
    TransferSuspended,                             // 0x71
    TransferAborted,                               // 0x72
    IllegalAddressInBlockTransfer,                 // 0x74
    IllegalByteCountInBlockTransfer,               // 0x75
    IllegalBlockTransferType,                      // 0x76
    BlockTransferDataChecksumError,                // 0x77
    RequestCorrectlyReceivedResponsePending,       // 0x78
    IncorrectByteCountDuringBlockTransfer,         // 0x79
    Unknown(u8),
}

impl NegativeResponseCode {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x10 => Self::GeneralReject,
            0x11 => Self::ServiceNotSupported,
            0x12 => Self::SubFunctionNotSupportedInvalidFormat,
            0x21 => Self::BusyRepeatRequest,
            0x22 => Self::ConditionsNotCorrectOrRequestSequenceError,
            0x23 => Self::RoutineNotComplete,
            0x31 => Self::RequestOutOfRange,
            0x33 => Self::SecurityAccessDenied,
            0x35 => Self::InvalidKey,
            0x36 => Self::ExceedNumberOfAttempts,
            0x37 => Self::RequiredTimeDelayNotExpired,
            0x40 => Self::DownloadNotAccepted,
            0x41 => Self::ImproperDownloadType,
            0x42 => Self::CantDownloadToSpecifiedAddress,
            0x43 => Self::CantDownloadNumberOfBytesRequested,
            0x50 => Self::UploadNotAccepted,
            0x51 => Self::ImproperUploadType,
            0x52 => Self::CantUploadFromSpecifiedAddress,
            0x53 => Self::CantUploadNumberOfBytesRequested,
            0x71 => Self::TransferSuspended,
            0x72 => Self::TransferAborted,
            0x74 => Self::IllegalAddressInBlockTransfer,
            0x75 => Self::IllegalByteCountInBlockTransfer,
            0x76 => Self::IllegalBlockTransferType,
            0x77 => Self::BlockTransferDataChecksumError,
            0x78 => Self::RequestCorrectlyReceivedResponsePending,
            0x79 => Self::IncorrectByteCountDuringBlockTransfer,
            other => Self::Unknown(other),
        }
    }

    pub fn to_byte(&self) -> u8 {
        match self {
            Self::GeneralReject => 0x10,
            Self::ServiceNotSupported => 0x11,
            Self::SubFunctionNotSupportedInvalidFormat => 0x12,
            Self::BusyRepeatRequest => 0x21,
            Self::ConditionsNotCorrectOrRequestSequenceError => 0x22,
            Self::RoutineNotComplete => 0x23,
            Self::RequestOutOfRange => 0x31,
            Self::SecurityAccessDenied => 0x33,
            Self::InvalidKey => 0x35,
            Self::ExceedNumberOfAttempts => 0x36,
            Self::RequiredTimeDelayNotExpired => 0x37,
            Self::DownloadNotAccepted => 0x40,
            Self::ImproperDownloadType => 0x41,
            Self::CantDownloadToSpecifiedAddress => 0x42,
            Self::CantDownloadNumberOfBytesRequested => 0x43,
            Self::UploadNotAccepted => 0x50,
            Self::ImproperUploadType => 0x51,
            Self::CantUploadFromSpecifiedAddress => 0x52,
            Self::CantUploadNumberOfBytesRequested => 0x53,
            Self::TransferSuspended => 0x71,
            Self::TransferAborted => 0x72,
            Self::IllegalAddressInBlockTransfer => 0x74,
            Self::IllegalByteCountInBlockTransfer => 0x75,
            Self::IllegalBlockTransferType => 0x76,
            Self::BlockTransferDataChecksumError => 0x77,
            Self::RequestCorrectlyReceivedResponsePending => 0x78,
            Self::IncorrectByteCountDuringBlockTransfer => 0x79,
            Self::Unknown(code) => *code,
        }
    }

    /// Standard name, None for codes outside the table
    pub fn name(&self) -> Option<&'static str> {
        let name = match self {
            Self::GeneralReject => "generalReject",
            Self::ServiceNotSupported => "serviceNotSupported",
            Self::SubFunctionNotSupportedInvalidFormat => "subFunctionNotSupported-invalidFormat",
            Self::BusyRepeatRequest => "busy-RepeatRequest",
            Self::ConditionsNotCorrectOrRequestSequenceError => {
                "conditionsNotCorrect or requestSequenceError"
            }
            Self::RoutineNotComplete => "routineNotComplete",
            Self::RequestOutOfRange => "requestOutOfRange",
            Self::SecurityAccessDenied => "securityAccessDenied",
            Self::InvalidKey => "invalidKey",
            Self::ExceedNumberOfAttempts => "exceedNumberOfAttempts",
            Self::RequiredTimeDelayNotExpired => "requiredTimeDelayNotExpired",
            Self::DownloadNotAccepted => "downloadNotAccepted",
            Self::ImproperDownloadType => "improperDownloadType",
            Self::CantDownloadToSpecifiedAddress => "cantDownloadToSpecifiedAddress",
            Self::CantDownloadNumberOfBytesRequested => "cantDownloadNumberOfBytesRequested",
            Self::UploadNotAccepted => "uploadNotAccepted",
            Self::ImproperUploadType => "improperUploadType",
            Self::CantUploadFromSpecifiedAddress => "cantUploadFromSpecifiedAddress",
            Self::CantUploadNumberOfBytesRequested => "cantUploadNumberOfBytesRequested",
            Self::TransferSuspended => "transferSuspended",
            Self::TransferAborted => "transferAborted",
            Self::IllegalAddressInBlockTransfer => "illegalAddressInBlockTransfer",
            Self::IllegalByteCountInBlockTransfer => "illegalByteCountInBlockTransfer",
            Self::IllegalBlockTransferType => "illegalBlockTransferType",
            Self::BlockTransferDataChecksumError => "blockTransferDataChecksumError",
            Self::RequestCorrectlyReceivedResponsePending => "reqCorrectlyRcvd-RspPending",
            Self::IncorrectByteCountDuringBlockTransfer => "incorrectByteCountDuringBlockTransfer",
            Self::Unknown(_) => return None,
        };
        Some(name)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::RequestCorrectlyReceivedResponsePending)
    }

    /// The ECU asks to simply repeat the request later
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::BusyRepeatRequest | Self::RoutineNotComplete)
    }
}

impl fmt::Display for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:02X})", name, self.to_byte()),
            None => write!(f, "Unknown NRC (0x{:02X})", self.to_byte()),
        }
    }
}

/// Session layer error type. Every kind stays distinguishable so callers can script recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KwpError {
    /// The ECU rejected the request. Either field is None when the response was truncated.
    NegativeResponse {
        service_id: Option<u8>,
        code: Option<NegativeResponseCode>,
        /// Bytes following the code
        trailing: Vec<u8>,
    },
    /// Response did not belong to the request (desynchronised exchange)
    UnexpectedServiceId { expected: u8, received: Option<u8> },
    /// Positive response echoed a different subfunction
    UnexpectedSubfunction { expected: u8, received: Option<u8> },
    /// Positive response with content that cannot be interpreted
    InvalidResponse(String),
    /// Rejected before anything was transmitted
    Validation(String),
    Transport(TransportError),
}

impl KwpError {
    /// Negative response code, if this is an ECU rejection carrying one
    pub fn negative_code(&self) -> Option<NegativeResponseCode> {
        match self {
            Self::NegativeResponse { code, .. } => *code,
            _ => None,
        }
    }

    pub fn is_negative_response(&self) -> bool {
        matches!(self, Self::NegativeResponse { .. })
    }
}

impl fmt::Display for KwpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegativeResponse {
                service_id,
                code,
                trailing,
            } => {
                let service = match service_id {
                    Some(sid) => ServiceId::from_byte(*sid).name(),
                    None => ServiceId::NonStandard(0).name(),
                };
                match code.and_then(|c| c.name()) {
                    Some(reason) => write!(f, "{} - {}", service, reason),
                    None => write!(f, "{} - {}", service, hex(trailing)),
                }
            }
            Self::UnexpectedServiceId { expected, received } => match received {
                Some(sid) => write!(
                    f,
                    "Invalid response service id: expected 0x{:02X}, got 0x{:02X}",
                    expected, sid
                ),
                None => write!(
                    f,
                    "Invalid response service id: expected 0x{:02X}, got empty response",
                    expected
                ),
            },
            Self::UnexpectedSubfunction { expected, received } => match received {
                Some(sfn) => write!(
                    f,
                    "Invalid response subfunction: expected 0x{:02X}, got 0x{:02X}",
                    expected, sfn
                ),
                None => write!(
                    f,
                    "Invalid response subfunction: expected 0x{:02X}, got none",
                    expected
                ),
            },
            Self::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            Self::Validation(msg) => write!(f, "Invalid request: {}", msg),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
        }
    }
}

impl std::error::Error for KwpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for KwpError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}
