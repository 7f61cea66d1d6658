//! KWP2000 (ISO 14230) diagnostic services on top of a TP2.0 channel.

pub mod client;
pub mod error;
pub mod keygen;
pub mod services;
pub mod types;

pub use client::{KwpClient, LogCallback, LogDirection, LogEntry};
pub use error::{KwpError, NegativeResponseCode};
pub use keygen::{KeyDerivation, LegacyKeyAlgorithm, PasswordOffset};
pub use types::{
    AccessType, Compression, EcuIdentification, Encryption, RoutineId, ServiceId, SessionType,
};
