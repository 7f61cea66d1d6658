use std::fmt;

/// KWP2000 service identifiers (ISO 14230-3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceId {
    DiagnosticSessionControl,               // 0x10
    EcuReset,                               // 0x11
    ReadFreezeFrameData,                    // 0x12
    ReadDiagnosticTroubleCodes,             // 0x13
    ClearDiagnosticInformation,             // 0x14
    ReadStatusOfDiagnosticTroubleCodes,     // 0x17
    ReadDiagnosticTroubleCodesByStatus,     // 0x18
    ReadEcuIdentification,                  // 0x1A
    StopDiagnosticSession,                  // 0x20
    ReadDataByLocalIdentifier,              // 0x21
    ReadDataByCommonIdentifier,             // 0x22
    ReadMemoryByAddress,                    // 0x23
    SetDataRates,                           // 0x26
    SecurityAccess,                         // 0x27
    DynamicallyDefineLocalIdentifier,       // 0x2C
    WriteDataByCommonIdentifier,            // 0x2E
    InputOutputControlByCommonIdentifier,   // 0x2F
    InputOutputControlByLocalIdentifier,    // 0x30
    StartRoutineByLocalIdentifier,          // 0x31
    StopRoutineByLocalIdentifier,           // 0x32
    RequestRoutineResultsByLocalIdentifier, // 0x33
    RequestDownload,                        // 0x34
    RequestUpload,                          // 0x35
    TransferData,                           // 0x36
    RequestTransferExit,                    // 0x37
    StartRoutineByAddress,                  // 0x38
    StopRoutineByAddress,                   // 0x39
    RequestRoutineResultsByAddress,         // 0x3A
    WriteDataByLocalIdentifier,             // 0x3B
    WriteMemoryByAddress,                   // 0x3D
    TesterPresent,                          // 0x3E
    EscCode,                                // 0x80
    StopCommunication,                      // 0x82
    NonStandard(u8),
}

impl ServiceId {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x10 => Self::DiagnosticSessionControl,
            0x11 => Self::EcuReset,
            0x12 => Self::ReadFreezeFrameData,
            0x13 => Self::ReadDiagnosticTroubleCodes,
            0x14 => Self::ClearDiagnosticInformation,
            0x17 => Self::ReadStatusOfDiagnosticTroubleCodes,
            0x18 => Self::ReadDiagnosticTroubleCodesByStatus,
            0x1A => Self::ReadEcuIdentification,
            0x20 => Self::StopDiagnosticSession,
            0x21 => Self::ReadDataByLocalIdentifier,
            0x22 => Self::ReadDataByCommonIdentifier,
            0x23 => Self::ReadMemoryByAddress,
            0x26 => Self::SetDataRates,
            0x27 => Self::SecurityAccess,
            0x2C => Self::DynamicallyDefineLocalIdentifier,
            0x2E => Self::WriteDataByCommonIdentifier,
            0x2F => Self::InputOutputControlByCommonIdentifier,
            0x30 => Self::InputOutputControlByLocalIdentifier,
            0x31 => Self::StartRoutineByLocalIdentifier,
            0x32 => Self::StopRoutineByLocalIdentifier,
            0x33 => Self::RequestRoutineResultsByLocalIdentifier,
            0x34 => Self::RequestDownload,
            0x35 => Self::RequestUpload,
            0x36 => Self::TransferData,
            0x37 => Self::RequestTransferExit,
            0x38 => Self::StartRoutineByAddress,
            0x39 => Self::StopRoutineByAddress,
            0x3A => Self::RequestRoutineResultsByAddress,
            0x3B => Self::WriteDataByLocalIdentifier,
            0x3D => Self::WriteMemoryByAddress,
            0x3E => Self::TesterPresent,
            0x80 => Self::EscCode,
            0x82 => Self::StopCommunication,
            other => Self::NonStandard(other),
        }
    }

    pub fn to_byte(&self) -> u8 {
        match self {
            Self::DiagnosticSessionControl => 0x10,
            Self::EcuReset => 0x11,
            Self::ReadFreezeFrameData => 0x12,
            Self::ReadDiagnosticTroubleCodes => 0x13,
            Self::ClearDiagnosticInformation => 0x14,
            Self::ReadStatusOfDiagnosticTroubleCodes => 0x17,
            Self::ReadDiagnosticTroubleCodesByStatus => 0x18,
            Self::ReadEcuIdentification => 0x1A,
            Self::StopDiagnosticSession => 0x20,
            Self::ReadDataByLocalIdentifier => 0x21,
            Self::ReadDataByCommonIdentifier => 0x22,
            Self::ReadMemoryByAddress => 0x23,
            Self::SetDataRates => 0x26,
            Self::SecurityAccess => 0x27,
            Self::DynamicallyDefineLocalIdentifier => 0x2C,
            Self::WriteDataByCommonIdentifier => 0x2E,
            Self::InputOutputControlByCommonIdentifier => 0x2F,
            Self::InputOutputControlByLocalIdentifier => 0x30,
            Self::StartRoutineByLocalIdentifier => 0x31,
            Self::StopRoutineByLocalIdentifier => 0x32,
            Self::RequestRoutineResultsByLocalIdentifier => 0x33,
            Self::RequestDownload => 0x34,
            Self::RequestUpload => 0x35,
            Self::TransferData => 0x36,
            Self::RequestTransferExit => 0x37,
            Self::StartRoutineByAddress => 0x38,
            Self::StopRoutineByAddress => 0x39,
            Self::RequestRoutineResultsByAddress => 0x3A,
            Self::WriteDataByLocalIdentifier => 0x3B,
            Self::WriteMemoryByAddress => 0x3D,
            Self::TesterPresent => 0x3E,
            Self::EscCode => 0x80,
            Self::StopCommunication => 0x82,
            Self::NonStandard(sid) => *sid,
        }
    }

    /// Identifier of a positive response to this service
    pub fn positive_response(&self) -> u8 {
        self.to_byte().wrapping_add(0x40)
    }

    /// Upper snake case name as it appears in error messages
    pub fn name(&self) -> &'static str {
        match self {
            Self::DiagnosticSessionControl => "DIAGNOSTIC_SESSION_CONTROL",
            Self::EcuReset => "ECU_RESET",
            Self::ReadFreezeFrameData => "READ_FREEZE_FRAME_DATA",
            Self::ReadDiagnosticTroubleCodes => "READ_DIAGNOSTIC_TROUBLE_CODES",
            Self::ClearDiagnosticInformation => "CLEAR_DIAGNOSTIC_INFORMATION",
            Self::ReadStatusOfDiagnosticTroubleCodes => "READ_STATUS_OF_DIAGNOSTIC_TROUBLE_CODES",
            Self::ReadDiagnosticTroubleCodesByStatus => "READ_DIAGNOSTIC_TROUBLE_CODES_BY_STATUS",
            Self::ReadEcuIdentification => "READ_ECU_IDENTIFICATION",
            Self::StopDiagnosticSession => "STOP_DIAGNOSTIC_SESSION",
            Self::ReadDataByLocalIdentifier => "READ_DATA_BY_LOCAL_IDENTIFIER",
            Self::ReadDataByCommonIdentifier => "READ_DATA_BY_COMMON_IDENTIFIER",
            Self::ReadMemoryByAddress => "READ_MEMORY_BY_ADDRESS",
            Self::SetDataRates => "SET_DATA_RATES",
            Self::SecurityAccess => "SECURITY_ACCESS",
            Self::DynamicallyDefineLocalIdentifier => "DYNAMICALLY_DEFINE_LOCAL_IDENTIFIER",
            Self::WriteDataByCommonIdentifier => "WRITE_DATA_BY_COMMON_IDENTIFIER",
            Self::InputOutputControlByCommonIdentifier => {
                "INPUT_OUTPUT_CONTROL_BY_COMMON_IDENTIFIER"
            }
            Self::InputOutputControlByLocalIdentifier => "INPUT_OUTPUT_CONTROL_BY_LOCAL_IDENTIFIER",
            Self::StartRoutineByLocalIdentifier => "START_ROUTINE_BY_LOCAL_IDENTIFIER",
            Self::StopRoutineByLocalIdentifier => "STOP_ROUTINE_BY_LOCAL_IDENTIFIER",
            Self::RequestRoutineResultsByLocalIdentifier => {
                "REQUEST_ROUTINE_RESULTS_BY_LOCAL_IDENTIFIER"
            }
            Self::RequestDownload => "REQUEST_DOWNLOAD",
            Self::RequestUpload => "REQUEST_UPLOAD",
            Self::TransferData => "TRANSFER_DATA",
            Self::RequestTransferExit => "REQUEST_TRANSFER_EXIT",
            Self::StartRoutineByAddress => "START_ROUTINE_BY_ADDRESS",
            Self::StopRoutineByAddress => "STOP_ROUTINE_BY_ADDRESS",
            Self::RequestRoutineResultsByAddress => "REQUEST_ROUTINE_RESULTS_BY_ADDRESS",
            Self::WriteDataByLocalIdentifier => "WRITE_DATA_BY_LOCAL_IDENTIFIER",
            Self::WriteMemoryByAddress => "WRITE_MEMORY_BY_ADDRESS",
            Self::TesterPresent => "TESTER_PRESENT",
            Self::EscCode => "ESC_CODE",
            Self::StopCommunication => "STOP_COMMUNICATION",
            Self::NonStandard(_) => "NON_STANDARD_SERVICE",
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonStandard(sid) => write!(f, "{} (0x{:02X})", self.name(), sid),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Diagnostic modes for service 0x10
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum SessionType {
    Programming,
    EngineeringMode,
    Diagnostic,
    Raw(u8),
}

impl SessionType {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x85 => Self::Programming,
            0x86 => Self::EngineeringMode,
            0x89 => Self::Diagnostic,
            other => Self::Raw(other),
        }
    }

    pub fn to_byte(&self) -> u8 {
        match self {
            Self::Programming => 0x85,
            Self::EngineeringMode => 0x86,
            Self::Diagnostic => 0x89,
            Self::Raw(b) => *b,
        }
    }
}

/// Security access levels. Odd values request a seed, the following even value sends the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum AccessType {
    ProgrammingRequestSeed,
    ProgrammingSendKey,
    RequestSeed,
    SendKey,
    Raw(u8),
}

impl AccessType {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::ProgrammingRequestSeed,
            2 => Self::ProgrammingSendKey,
            3 => Self::RequestSeed,
            4 => Self::SendKey,
            other => Self::Raw(other),
        }
    }

    pub fn to_byte(&self) -> u8 {
        match self {
            Self::ProgrammingRequestSeed => 1,
            Self::ProgrammingSendKey => 2,
            Self::RequestSeed => 3,
            Self::SendKey => 4,
            Self::Raw(b) => *b,
        }
    }

    pub fn is_seed_request(&self) -> bool {
        self.to_byte() % 2 == 1
    }

    /// Matching send-key level for a seed request
    pub fn key_access(&self) -> Self {
        Self::from_byte(self.to_byte().wrapping_add(1))
    }
}

/// Local routine identifiers used while programming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineId {
    EraseFlash,
    CalculateFlashChecksum,
    Raw(u8),
}

impl RoutineId {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0xC4 => Self::EraseFlash,
            0xC5 => Self::CalculateFlashChecksum,
            other => Self::Raw(other),
        }
    }

    pub fn to_byte(&self) -> u8 {
        match self {
            Self::EraseFlash => 0xC4,
            Self::CalculateFlashChecksum => 0xC5,
            Self::Raw(b) => *b,
        }
    }
}

/// Identification records readable through service 0x1A
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcuIdentification {
    EcuIdent,
    StatusFlash,
    Raw(u8),
}

impl EcuIdentification {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x9B => Self::EcuIdent,
            0x9C => Self::StatusFlash,
            other => Self::Raw(other),
        }
    }

    pub fn to_byte(&self) -> u8 {
        match self {
            Self::EcuIdent => 0x9B,
            Self::StatusFlash => 0x9C,
            Self::Raw(b) => *b,
        }
    }
}

/// High nibble of the requestDownload format byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    Uncompressed,
    Raw(u8),
}

impl Compression {
    pub fn to_nibble(&self) -> u8 {
        match self {
            Self::Uncompressed => 0x0,
            Self::Raw(n) => *n,
        }
    }
}

/// Low nibble of the requestDownload format byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encryption {
    #[default]
    Unencrypted,
    Raw(u8),
}

impl Encryption {
    pub fn to_nibble(&self) -> u8 {
        match self {
            Self::Unencrypted => 0x0,
            Self::Raw(n) => *n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_id_roundtrip() {
        for byte in 0u8..=0xFF {
            assert_eq!(ServiceId::from_byte(byte).to_byte(), byte);
        }
    }

    #[test]
    fn test_service_id_names() {
        assert_eq!(ServiceId::from_byte(0x10).name(), "DIAGNOSTIC_SESSION_CONTROL");
        assert_eq!(ServiceId::from_byte(0x82).name(), "STOP_COMMUNICATION");
        assert_eq!(ServiceId::from_byte(0x99), ServiceId::NonStandard(0x99));
        assert_eq!(ServiceId::NonStandard(0x99).name(), "NON_STANDARD_SERVICE");
        assert_eq!(
            ServiceId::NonStandard(0x99).to_string(),
            "NON_STANDARD_SERVICE (0x99)"
        );
    }

    #[test]
    fn test_positive_response_id() {
        assert_eq!(ServiceId::DiagnosticSessionControl.positive_response(), 0x50);
        assert_eq!(ServiceId::TransferData.positive_response(), 0x76);
        assert_eq!(ServiceId::StopCommunication.positive_response(), 0xC2);
    }

    #[test]
    fn test_session_types() {
        assert_eq!(SessionType::Programming.to_byte(), 0x85);
        assert_eq!(SessionType::from_byte(0x86), SessionType::EngineeringMode);
        assert_eq!(SessionType::from_byte(0x89), SessionType::Diagnostic);
        assert_eq!(SessionType::from_byte(0x81), SessionType::Raw(0x81));
    }

    #[test]
    fn test_access_type_parity() {
        assert!(AccessType::ProgrammingRequestSeed.is_seed_request());
        assert!(!AccessType::ProgrammingSendKey.is_seed_request());
        assert!(AccessType::RequestSeed.is_seed_request());
        assert!(!AccessType::SendKey.is_seed_request());
        assert!(AccessType::Raw(0x11).is_seed_request());
        assert!(!AccessType::Raw(0x12).is_seed_request());

        assert_eq!(
            AccessType::ProgrammingRequestSeed.key_access(),
            AccessType::ProgrammingSendKey
        );
        assert_eq!(AccessType::RequestSeed.key_access(), AccessType::SendKey);
    }

    #[test]
    fn test_routine_and_ident_ids() {
        assert_eq!(RoutineId::EraseFlash.to_byte(), 0xC4);
        assert_eq!(RoutineId::from_byte(0xC5), RoutineId::CalculateFlashChecksum);
        assert_eq!(EcuIdentification::EcuIdent.to_byte(), 0x9B);
        assert_eq!(EcuIdentification::from_byte(0x9C), EcuIdentification::StatusFlash);
        assert_eq!(EcuIdentification::from_byte(0x91), EcuIdentification::Raw(0x91));
    }
}
