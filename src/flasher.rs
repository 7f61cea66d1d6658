//! Programming flow for a VW engine ECU as an explicit state machine. Each step is one method
//! and refuses to run unless the previous step completed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::can::{hex, CanAdapter};
use crate::kwp2000::services::MAX_ADDRESS;
use crate::kwp2000::{
    AccessType, Compression, EcuIdentification, Encryption, KeyDerivation, KwpClient, KwpError,
    LogEntry, RoutineId, SessionType,
};
use crate::retry::retry;
use crate::tp20::{Tp20Channel, Tp20Config, TransportError};

/// Routine result reported by the ECU when erase or checksum succeeded
const ROUTINE_OK: [u8; 1] = [0x00];

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum FlashStage {
    Closed,
    Connected,
    Programming,
    Unlocked,
    DownloadRequested,
    Erased,
    Transferred,
    Verified,
    Flashed,
}

impl fmt::Display for FlashStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug)]
pub enum FlashError {
    OutOfOrder {
        expected: FlashStage,
        actual: FlashStage,
    },
    Kwp(KwpError),
    Transport(TransportError),
    /// The ECU reported a failed erase or checksum routine
    Verification(String),
    /// Configured chunk does not fit what the ECU or the transport accepts
    ChunkTooLarge { requested: usize, accepted: usize },
    InvalidRange(String),
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfOrder { expected, actual } => write!(
                f,
                "Flash step out of order: requires {}, currently {}",
                expected, actual
            ),
            Self::Kwp(e) => write!(f, "{}", e),
            Self::Transport(e) => write!(f, "{}", e),
            Self::Verification(msg) => write!(f, "Verification failed: {}", msg),
            Self::ChunkTooLarge {
                requested,
                accepted,
            } => write!(
                f,
                "Chunk size {} too large, at most {} accepted",
                requested, accepted
            ),
            Self::InvalidRange(msg) => write!(f, "Invalid flash range: {}", msg),
        }
    }
}

impl std::error::Error for FlashError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Kwp(e) => Some(e),
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<KwpError> for FlashError {
    fn from(e: KwpError) -> Self {
        Self::Kwp(e)
    }
}

impl From<TransportError> for FlashError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

/// Inclusive address range to program
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct FlashRegion {
    pub start: u32,
    pub end: u32,
}

impl FlashRegion {
    pub fn new(start: u32, end: u32) -> Result<Self, FlashError> {
        if start >= end {
            return Err(FlashError::InvalidRange(format!(
                "start 0x{:X} must be below end 0x{:X}",
                start, end
            )));
        }
        if end > MAX_ADDRESS {
            return Err(FlashError::InvalidRange(format!(
                "end 0x{:X} beyond 24-bit address space",
                end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    /// Bytes of a full firmware image that fall in this region
    pub fn slice<'i>(&self, image: &'i [u8]) -> Result<&'i [u8], FlashError> {
        image
            .get(self.start as usize..=self.end as usize)
            .ok_or_else(|| {
                FlashError::InvalidRange(format!(
                    "end 0x{:X} beyond image of {} bytes",
                    self.end,
                    image.len()
                ))
            })
    }
}

/// 16-bit additive checksum the ECU verifies after the transfer
pub fn additive_checksum(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |acc, b| acc.wrapping_add(*b as u16))
}

#[derive(Debug, Clone)]
pub struct FlashOptions {
    pub module: u8,
    /// Payload bytes per transferData request
    pub chunk_size: usize,
    pub reconnect_attempts: usize,
    /// Wait before and between reconnect attempts while the ECU restarts
    pub reconnect_delay: Duration,
    pub seed_access: AccessType,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            module: 0x09,
            chunk_size: 240,
            reconnect_attempts: 10,
            reconnect_delay: Duration::from_secs(1),
            seed_access: AccessType::ProgrammingRequestSeed,
        }
    }
}

/// What the ECU reports about itself before programming
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Identification {
    pub ident: Vec<u8>,
    pub flash_status: Vec<u8>,
}

impl Identification {
    /// Part number: the first ten identification bytes
    pub fn part_number(&self) -> String {
        let end = self.ident.len().min(10);
        String::from_utf8_lossy(&self.ident[..end]).trim().to_string()
    }
}

/// Callback receiving `(bytes_done, bytes_total)` during the transfer
pub type ProgressCallback<'a> = Box<dyn FnMut(usize, usize) + 'a>;

/// Installed on every KWP client the flasher opens, reconnects included
pub type SharedLogCallback = Arc<dyn Fn(LogEntry) + Send + Sync>;

pub struct Flasher<'a, A: CanAdapter> {
    adapter: &'a A,
    channel_config: Tp20Config,
    options: FlashOptions,
    client: Option<KwpClient<Tp20Channel<&'a A>>>,
    stage: FlashStage,
    progress: Option<ProgressCallback<'a>>,
    log_callback: Option<SharedLogCallback>,
}

impl<'a, A: CanAdapter> Flasher<'a, A> {
    pub fn new(adapter: &'a A, channel_config: Tp20Config, options: FlashOptions) -> Self {
        Self {
            adapter,
            channel_config,
            options,
            client: None,
            stage: FlashStage::Closed,
            progress: None,
            log_callback: None,
        }
    }

    pub fn stage(&self) -> FlashStage {
        self.stage
    }

    pub fn set_progress_callback(&mut self, callback: ProgressCallback<'a>) {
        self.progress = Some(callback);
    }

    pub fn set_log_callback(&mut self, callback: SharedLogCallback) {
        self.log_callback = Some(callback);
    }

    fn expect_stage(&self, expected: FlashStage) -> Result<(), FlashError> {
        if self.stage != expected {
            return Err(FlashError::OutOfOrder {
                expected,
                actual: self.stage,
            });
        }
        Ok(())
    }

    fn client(&mut self) -> Result<&mut KwpClient<Tp20Channel<&'a A>>, FlashError> {
        let actual = self.stage;
        self.client.as_mut().ok_or(FlashError::OutOfOrder {
            expected: FlashStage::Connected,
            actual,
        })
    }

    /// Drop the current channel and open a fresh one, retrying while the ECU restarts
    fn open_channel(&mut self) -> Result<(), FlashError> {
        self.client = None;
        let adapter = self.adapter;
        let module = self.options.module;
        let config = &self.channel_config;

        let channel = retry(
            self.options.reconnect_attempts,
            self.options.reconnect_delay,
            |attempt| {
                log::info!("Connecting to module 0x{:02X} (attempt {})", module, attempt);
                adapter.clear().map_err(TransportError::Adapter)?;
                Tp20Channel::open(adapter, module, config.clone())
            },
        )?;
        let mut client = KwpClient::new(channel);
        if let Some(callback) = &self.log_callback {
            let callback = Arc::clone(callback);
            client.set_log_callback(Box::new(move |entry| callback(entry)));
        }
        self.client = Some(client);
        Ok(())
    }

    fn reconnect(&mut self) -> Result<(), FlashError> {
        log::info!("Waiting for ECU to reconnect");
        self.client = None;
        std::thread::sleep(self.options.reconnect_delay);
        self.open_channel()
    }

    // ─── Steps ──────────────────────────────────────────────────────

    pub fn connect(&mut self) -> Result<(), FlashError> {
        self.expect_stage(FlashStage::Closed)?;
        self.adapter
            .set_output_enabled(true)
            .map_err(TransportError::Adapter)?;
        self.open_channel()?;
        self.stage = FlashStage::Connected;
        Ok(())
    }

    /// The ECU drops the channel when switching to programming mode
    pub fn enter_programming(&mut self) -> Result<(), FlashError> {
        self.expect_stage(FlashStage::Connected)?;
        log::info!("Entering programming mode");
        self.client()?
            .diagnostic_session_control(SessionType::Programming)?;
        self.reconnect()?;
        self.stage = FlashStage::Programming;
        Ok(())
    }

    /// Valid on any open channel; does not change the stage
    pub fn read_identification(&mut self) -> Result<Identification, FlashError> {
        let client = self.client()?;
        let ident = client.read_ecu_identification(EcuIdentification::EcuIdent)?;
        let flash_status = client.read_ecu_identification(EcuIdentification::StatusFlash)?;
        log::info!("ECU identification: {}", String::from_utf8_lossy(&ident));
        log::info!("Flash status: [{}]", hex(&flash_status));
        Ok(Identification {
            ident,
            flash_status,
        })
    }

    pub fn unlock(&mut self, derivation: &dyn KeyDerivation) -> Result<(), FlashError> {
        self.expect_stage(FlashStage::Programming)?;
        let access = self.options.seed_access;
        self.client()?.unlock(access, derivation)?;
        self.stage = FlashStage::Unlocked;
        Ok(())
    }

    /// Fails unless the ECU accepts blocks of the configured chunk size
    pub fn request_download(&mut self, region: FlashRegion) -> Result<u16, FlashError> {
        self.expect_stage(FlashStage::Unlocked)?;
        let chunk_size = self.options.chunk_size;
        let transport_max = self.channel_config.effective_max_payload().saturating_sub(1);
        if chunk_size == 0 || chunk_size > transport_max {
            return Err(FlashError::ChunkTooLarge {
                requested: chunk_size,
                accepted: transport_max,
            });
        }

        let accepted = self.client()?.request_download(
            region.start,
            region.len() as u32,
            Compression::Uncompressed,
            Encryption::Unencrypted,
        )?;
        log::info!("ECU accepts blocks of {} bytes", accepted);
        if (accepted as usize) < chunk_size {
            return Err(FlashError::ChunkTooLarge {
                requested: chunk_size,
                accepted: accepted as usize,
            });
        }
        self.stage = FlashStage::DownloadRequested;
        Ok(accepted)
    }

    /// Erase restarts the ECU, so the result is collected on a new channel
    pub fn erase(&mut self, region: FlashRegion) -> Result<(), FlashError> {
        self.expect_stage(FlashStage::DownloadRequested)?;
        log::info!("Erasing 0x{:06X}..=0x{:06X}", region.start, region.end);
        let routine = self.client()?.erase_flash(region.start, region.end)?;
        log::debug!("Erase routine answered [{}]", hex(&routine));
        self.reconnect()?;

        let result = self
            .client()?
            .request_routine_results_by_local_identifier(RoutineId::EraseFlash)?;
        if result != ROUTINE_OK {
            return Err(FlashError::Verification(format!(
                "erase result [{}]",
                hex(&result)
            )));
        }
        self.stage = FlashStage::Erased;
        Ok(())
    }

    /// Transfer `data` in chunks with a channel test after each, then end the transfer
    pub fn transfer(&mut self, data: &[u8]) -> Result<(), FlashError> {
        self.expect_stage(FlashStage::Erased)?;
        let total = data.len();
        let mut done = 0;
        log::info!("Transferring {} bytes", total);

        for chunk in data.chunks(self.options.chunk_size) {
            let client = self.client()?;
            client.transfer_data(chunk)?;
            client.transport_mut().keep_alive()?;

            done += chunk.len();
            if let Some(progress) = self.progress.as_mut() {
                progress(done, total);
            }
        }

        self.client()?.request_transfer_exit()?;
        self.stage = FlashStage::Transferred;
        Ok(())
    }

    pub fn verify(&mut self, region: FlashRegion, data: &[u8]) -> Result<(), FlashError> {
        self.expect_stage(FlashStage::Transferred)?;
        let checksum = additive_checksum(data);
        log::info!("Verifying checksum 0x{:04X}", checksum);

        let client = self.client()?;
        client.calculate_flash_checksum(region.start, region.end, checksum as u32)?;
        let result =
            client.request_routine_results_by_local_identifier(RoutineId::CalculateFlashChecksum)?;
        if result != ROUTINE_OK {
            return Err(FlashError::Verification(format!(
                "checksum result [{}]",
                hex(&result)
            )));
        }
        self.stage = FlashStage::Verified;
        Ok(())
    }

    pub fn finish(&mut self) -> Result<(), FlashError> {
        self.expect_stage(FlashStage::Verified)?;
        self.client()?.stop_communication()?;
        self.client = None;
        self.stage = FlashStage::Flashed;
        log::info!("Flashing done");
        Ok(())
    }

    /// Every step in order, programming `region` from a full firmware `image`
    pub fn run(
        &mut self,
        image: &[u8],
        region: FlashRegion,
        derivation: &dyn KeyDerivation,
    ) -> Result<Identification, FlashError> {
        let data = region.slice(image)?;
        self.connect()?;
        self.enter_programming()?;
        let identification = self.read_identification()?;
        self.unlock(derivation)?;
        self.request_download(region)?;
        self.erase(region)?;
        self.transfer(data)?;
        self.verify(region, data)?;
        self.finish()?;
        Ok(identification)
    }
}
