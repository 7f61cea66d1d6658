//! Configuration file handling

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::flasher::FlashOptions;
use crate::tp20::Tp20Config;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub adapter: AdapterConfig,
    pub channel: ChannelConfig,
    pub flash: FlashConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// PassThru DLL; discovered from the registry when unset
    pub dll_path: Option<PathBuf>,
    pub bus: u8,
    pub baudrate: u32,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            dll_path: None,
            bus: 0,
            baudrate: 500_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// TP2.0 logical address of the ECU (0x01 engine)
    pub module: u8,
    pub timeout_ms: u64,
    pub block_size: u8,
    pub t1: u8,
    pub t3: u8,
    pub inter_packet_delay_ms: u64,
    pub honor_negotiated_timing: bool,
    pub max_payload: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        let defaults = Tp20Config::default();
        Self {
            module: FlashOptions::default().module,
            timeout_ms: defaults.timeout.as_millis() as u64,
            block_size: defaults.block_size,
            t1: defaults.t1,
            t3: defaults.t3,
            inter_packet_delay_ms: defaults.inter_packet_delay.as_millis() as u64,
            honor_negotiated_timing: defaults.honor_negotiated_timing,
            max_payload: defaults.max_payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashConfig {
    pub chunk_size: usize,
    pub reconnect_attempts: usize,
    pub reconnect_delay_ms: u64,
}

impl Default for FlashConfig {
    fn default() -> Self {
        let defaults = FlashOptions::default();
        Self {
            chunk_size: defaults.chunk_size,
            reconnect_attempts: defaults.reconnect_attempts,
            reconnect_delay_ms: defaults.reconnect_delay.as_millis() as u64,
        }
    }
}

impl Config {
    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load `path` if given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => Ok(Self::default()),
        }
    }

    pub fn tp20(&self) -> Tp20Config {
        Tp20Config {
            bus: self.adapter.bus,
            timeout: Duration::from_millis(self.channel.timeout_ms),
            block_size: self.channel.block_size,
            t1: self.channel.t1,
            t3: self.channel.t3,
            inter_packet_delay: Duration::from_millis(self.channel.inter_packet_delay_ms),
            honor_negotiated_timing: self.channel.honor_negotiated_timing,
            max_payload: self.channel.max_payload,
            ..Default::default()
        }
    }

    pub fn flash_options(&self) -> FlashOptions {
        FlashOptions {
            module: self.channel.module,
            chunk_size: self.flash.chunk_size,
            reconnect_attempts: self.flash.reconnect_attempts,
            reconnect_delay: Duration::from_millis(self.flash.reconnect_delay_ms),
            ..Default::default()
        }
    }
}
