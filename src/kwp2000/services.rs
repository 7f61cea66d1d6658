use crate::can::hex;
use crate::kwp2000::client::KwpClient;
use crate::kwp2000::error::KwpError;
use crate::kwp2000::keygen::KeyDerivation;
use crate::kwp2000::types::{
    AccessType, Compression, EcuIdentification, Encryption, RoutineId, ServiceId, SessionType,
};
use crate::tp20::Transport;

/// Largest value of a 3-byte address or size field
pub const MAX_ADDRESS: u32 = 0xFF_FFFF;

fn be24(name: &str, value: u32) -> Result<[u8; 3], KwpError> {
    if value > MAX_ADDRESS {
        return Err(KwpError::Validation(format!(
            "{} 0x{:X} does not fit 24 bits",
            name, value
        )));
    }
    let [_, hi, mid, lo] = value.to_be_bytes();
    Ok([hi, mid, lo])
}

impl<T: Transport> KwpClient<T> {
    // ─── Diagnostic Session Control (0x10) ──────────────────────────

    pub fn diagnostic_session_control(&mut self, session: SessionType) -> Result<(), KwpError> {
        self.request(
            ServiceId::DiagnosticSessionControl,
            Some(session.to_byte()),
            &[],
        )?;
        Ok(())
    }

    // ─── Security Access (0x27) ─────────────────────────────────────

    /// Odd access types request a seed and must not carry a key; even ones send the key and
    /// must carry one. Both are checked before anything is transmitted.
    pub fn security_access(&mut self, access: AccessType, key: &[u8]) -> Result<Vec<u8>, KwpError> {
        if access.is_seed_request() && !key.is_empty() {
            return Err(KwpError::Validation(format!(
                "key not allowed with seed request 0x{:02X}",
                access.to_byte()
            )));
        }
        if !access.is_seed_request() && key.is_empty() {
            return Err(KwpError::Validation(format!(
                "key missing for access type 0x{:02X}",
                access.to_byte()
            )));
        }
        self.request(ServiceId::SecurityAccess, Some(access.to_byte()), key)
    }

    /// Seed request, key derivation and key send in one go
    pub fn unlock(
        &mut self,
        seed_access: AccessType,
        derivation: &dyn KeyDerivation,
    ) -> Result<(), KwpError> {
        if !seed_access.is_seed_request() {
            return Err(KwpError::Validation(format!(
                "access type 0x{:02X} is not a seed request",
                seed_access.to_byte()
            )));
        }
        let seed = self.security_access(seed_access, &[])?;
        log::debug!("Seed: {}", hex(&seed));

        let key = derivation.derive_key(&seed)?;
        log::debug!("Key: {}", hex(&key));

        self.security_access(seed_access.key_access(), &key)?;
        log::info!("Security access 0x{:02X} granted", seed_access.to_byte());
        Ok(())
    }

    // ─── Read ECU Identification (0x1A) ─────────────────────────────

    pub fn read_ecu_identification(
        &mut self,
        identifier: EcuIdentification,
    ) -> Result<Vec<u8>, KwpError> {
        self.request(
            ServiceId::ReadEcuIdentification,
            Some(identifier.to_byte()),
            &[],
        )
    }

    // ─── Request Download (0x34) ────────────────────────────────────

    /// Returns the largest block the ECU accepts per transferData call
    pub fn request_download(
        &mut self,
        address: u32,
        size: u32,
        compression: Compression,
        encryption: Encryption,
    ) -> Result<u16, KwpError> {
        let address = be24("memory address", address)?;
        let size = be24("uncompressed size", size)?;
        let (c, e) = (compression.to_nibble(), encryption.to_nibble());
        if c > 0xF || e > 0xF {
            return Err(KwpError::Validation(format!(
                "compression 0x{:X} / encryption 0x{:X} must fit a nibble",
                c, e
            )));
        }

        let mut data = Vec::with_capacity(7);
        data.extend_from_slice(&address);
        data.push((c << 4) | e);
        data.extend_from_slice(&size);

        let response = self.request(ServiceId::RequestDownload, None, &data)?;
        match response.as_slice() {
            [max] => Ok(*max as u16),
            [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
            _ => Err(KwpError::InvalidResponse(format!(
                "request download answered with [{}]",
                hex(&response)
            ))),
        }
    }

    // ─── Routines (0x31 / 0x33) ─────────────────────────────────────

    pub fn start_routine_by_local_identifier(
        &mut self,
        routine: RoutineId,
        data: &[u8],
    ) -> Result<Vec<u8>, KwpError> {
        self.request(
            ServiceId::StartRoutineByLocalIdentifier,
            Some(routine.to_byte()),
            data,
        )
    }

    pub fn request_routine_results_by_local_identifier(
        &mut self,
        routine: RoutineId,
    ) -> Result<Vec<u8>, KwpError> {
        self.request(
            ServiceId::RequestRoutineResultsByLocalIdentifier,
            Some(routine.to_byte()),
            &[],
        )
    }

    /// `end` is inclusive
    pub fn erase_flash(&mut self, start: u32, end: u32) -> Result<Vec<u8>, KwpError> {
        let mut data = be24("start address", start)?.to_vec();
        data.extend_from_slice(&be24("end address", end)?);
        self.start_routine_by_local_identifier(RoutineId::EraseFlash, &data)
    }

    pub fn calculate_flash_checksum(
        &mut self,
        start: u32,
        end: u32,
        checksum: u32,
    ) -> Result<Vec<u8>, KwpError> {
        let mut data = be24("start address", start)?.to_vec();
        data.extend_from_slice(&be24("end address", end)?);
        let checksum = u16::try_from(checksum).map_err(|_| {
            KwpError::Validation(format!("checksum 0x{:X} does not fit 16 bits", checksum))
        })?;
        data.extend_from_slice(&checksum.to_be_bytes());
        self.start_routine_by_local_identifier(RoutineId::CalculateFlashChecksum, &data)
    }

    // ─── Transfer (0x36 / 0x37) ─────────────────────────────────────

    pub fn transfer_data(&mut self, data: &[u8]) -> Result<Vec<u8>, KwpError> {
        self.request(ServiceId::TransferData, None, data)
    }

    pub fn request_transfer_exit(&mut self) -> Result<Vec<u8>, KwpError> {
        self.request(ServiceId::RequestTransferExit, None, &[])
    }

    // ─── Stop Communication (0x82) ──────────────────────────────────

    pub fn stop_communication(&mut self) -> Result<Vec<u8>, KwpError> {
        self.request(ServiceId::StopCommunication, None, &[])
    }
}
