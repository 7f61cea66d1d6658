//! Seed to key strategies for security access. The session layer treats these as opaque;
//! different ECU variants need different derivations.

use crate::kwp2000::error::KwpError;

/// Turns the seed returned by a seed request into the key for the matching send-key request
pub trait KeyDerivation {
    fn derive_key(&self, seed: &[u8]) -> Result<Vec<u8>, KwpError>;
}

impl<F> KeyDerivation for F
where
    F: Fn(&[u8]) -> Vec<u8>,
{
    fn derive_key(&self, seed: &[u8]) -> Result<Vec<u8>, KwpError> {
        Ok(self(seed))
    }
}

fn seed_u32(seed: &[u8]) -> Result<u32, KwpError> {
    let bytes: [u8; 4] = seed.try_into().map_err(|_| {
        KwpError::InvalidResponse(format!("expected a 4 byte seed, got {} bytes", seed.len()))
    })?;
    Ok(u32::from_be_bytes(bytes))
}

/// Programming-level transform used by VW engine ECUs of this generation
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyKeyAlgorithm;

impl LegacyKeyAlgorithm {
    pub fn compute(seed: u32) -> u32 {
        let mut key = seed;
        for _ in 0..3 {
            let tmp = key ^ 0x003F_1735;
            key = tmp.wrapping_add(0xA3FF_7890);
            if key < 0xA3FF_7890 {
                key = (key >> 1) | (tmp << 31);
            }
        }
        key
    }
}

impl KeyDerivation for LegacyKeyAlgorithm {
    fn derive_key(&self, seed: &[u8]) -> Result<Vec<u8>, KwpError> {
        Ok(Self::compute(seed_u32(seed)?).to_be_bytes().to_vec())
    }
}

/// Login used by the engineering levels: key = seed + password (32-bit, big-endian)
#[derive(Debug, Clone, Copy)]
pub struct PasswordOffset(pub u32);

impl KeyDerivation for PasswordOffset {
    fn derive_key(&self, seed: &[u8]) -> Result<Vec<u8>, KwpError> {
        Ok(seed_u32(seed)?.wrapping_add(self.0).to_be_bytes().to_vec())
    }
}
