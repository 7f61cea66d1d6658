//! VW TP2.0 transport and KWP2000 diagnostic services for reading and flashing ECUs over CAN.

pub mod can;
pub mod config;
#[cfg(test)]
mod emulator;
pub mod flasher;
pub mod j2534;
pub mod kwp2000;
pub mod retry;
pub mod tp20;
