//! kwpflash - read and program VW ECUs through a J2534 PassThru interface

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use kwpflash_lib::can::{hex, CanAdapter};
use kwpflash_lib::config::Config;
use kwpflash_lib::flasher::{additive_checksum, FlashRegion, Flasher, Identification};
use kwpflash_lib::j2534::dll::discover_j2534_dlls;
use kwpflash_lib::j2534::J2534CanAdapter;
use kwpflash_lib::kwp2000::{
    AccessType, EcuIdentification, KwpClient, LegacyKeyAlgorithm, LogEntry, PasswordOffset,
};
use kwpflash_lib::tp20::Tp20Channel;

#[derive(Parser)]
#[command(name = "kwpflash")]
#[command(author, version, about = "VW TP2.0 / KWP2000 ECU tool")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "KWPFLASH_CONFIG")]
    config: Option<PathBuf>,

    /// J2534 DLL, overrides the config file and registry discovery
    #[arg(long, env = "KWPFLASH_DLL")]
    dll: Option<PathBuf>,

    /// TP2.0 module address (e.g. 0x01)
    #[arg(short, long, value_parser = parse_u8)]
    module: Option<u8>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read ECU identification and flash status
    Ident {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Security access with a seed + password login
    Unlock {
        /// Seed request access type (odd)
        #[arg(long, value_parser = parse_u8)]
        access: u8,

        /// Login password added to the seed
        #[arg(long, value_parser = parse_u32)]
        password: u32,
    },

    /// Program a region of a firmware image
    Flash {
        /// Full firmware image
        #[arg(short, long)]
        input: PathBuf,

        /// First address to program
        #[arg(long, value_parser = parse_u32)]
        start: u32,

        /// Last address to program (inclusive)
        #[arg(long, value_parser = parse_u32)]
        end: u32,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(digits) => u32::from_str_radix(digits, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn parse_u8(s: &str) -> Result<u8, String> {
    let value = parse_u32(s)?;
    u8::try_from(value).map_err(|_| format!("'{}' does not fit in one byte", s))
}

#[derive(Serialize)]
struct IdentReport {
    part_number: String,
    ident: String,
    flash_status: String,
}

/// Every KWP request and response of a run, timestamped, for `--json` output
#[derive(Clone, Default)]
struct Transcript(Arc<Mutex<Vec<LogEntry>>>);

impl Transcript {
    fn record(&self, entry: LogEntry) {
        if let Ok(mut entries) = self.0.lock() {
            entries.push(entry);
        }
    }

    fn entries(&self) -> Vec<LogEntry> {
        self.0.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[derive(Serialize)]
struct IdentOutput {
    #[serde(flatten)]
    ecu: IdentReport,
    log: Vec<LogEntry>,
}

impl From<&Identification> for IdentReport {
    fn from(id: &Identification) -> Self {
        Self {
            part_number: id.part_number(),
            ident: String::from_utf8_lossy(&id.ident).to_string(),
            flash_status: hex(&id.flash_status),
        }
    }
}

#[derive(Serialize)]
struct FlashReport {
    ecu: IdentReport,
    region: FlashRegion,
    bytes: usize,
    checksum: String,
    log: Vec<LogEntry>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dll) = cli.dll {
        config.adapter.dll_path = Some(dll);
    }
    if let Some(module) = cli.module {
        config.channel.module = module;
    }

    match cli.command {
        Commands::Ident { json } => ident(&config, json),
        Commands::Unlock { access, password } => unlock(&config, access, password),
        Commands::Flash {
            input,
            start,
            end,
            yes,
            json,
        } => flash(&config, &input, start, end, yes, json),
    }
}

fn resolve_dll(config: &Config) -> Result<PathBuf> {
    if let Some(ref path) = config.adapter.dll_path {
        return Ok(path.clone());
    }
    let devices = discover_j2534_dlls();
    for (name, path) in &devices {
        log::debug!("Found J2534 device {} at {}", name, path.display());
    }
    match devices.into_iter().next() {
        Some((name, path)) => {
            log::info!("Using J2534 device {}", name);
            Ok(path)
        }
        None => bail!("No J2534 device found; pass --dll or set adapter.dll_path"),
    }
}

fn open_adapter(config: &Config) -> Result<J2534CanAdapter> {
    let dll = resolve_dll(config)?;
    let adapter = J2534CanAdapter::open(&dll, config.adapter.baudrate, config.adapter.bus)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("Failed to open J2534 adapter {}", dll.display()))?;
    adapter.set_output_enabled(true).map_err(anyhow::Error::msg)?;
    adapter.clear().map_err(anyhow::Error::msg)?;
    Ok(adapter)
}

fn open_client<'a>(
    adapter: &'a J2534CanAdapter,
    config: &Config,
) -> Result<KwpClient<Tp20Channel<&'a J2534CanAdapter>>> {
    let module = config.channel.module;
    let channel = Tp20Channel::open(adapter, module, config.tp20())
        .with_context(|| format!("Failed to open TP2.0 channel to module 0x{:02X}", module))?;
    Ok(KwpClient::new(channel))
}

fn ident(config: &Config, json: bool) -> Result<()> {
    let adapter = open_adapter(config)?;
    let mut client = open_client(&adapter, config)?;
    let transcript = Transcript::default();
    if json {
        let sink = transcript.clone();
        client.set_log_callback(Box::new(move |entry| sink.record(entry)));
    }

    let identification = Identification {
        ident: client
            .read_ecu_identification(EcuIdentification::EcuIdent)
            .context("Reading ECU identification failed")?,
        flash_status: client
            .read_ecu_identification(EcuIdentification::StatusFlash)
            .context("Reading flash status failed")?,
    };
    if let Err(e) = client.stop_communication() {
        log::warn!("stopCommunication failed: {}", e);
    }

    let report = IdentReport::from(&identification);
    if json {
        let output = IdentOutput {
            ecu: report,
            log: transcript.entries(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Part number:  {}", report.part_number);
        println!("Ident:        {}", report.ident);
        println!("Flash status: [{}]", report.flash_status);
    }
    Ok(())
}

fn unlock(config: &Config, access: u8, password: u32) -> Result<()> {
    let access = AccessType::from_byte(access);
    if !access.is_seed_request() {
        bail!("Access type 0x{:02X} is not a seed request", access.to_byte());
    }
    let adapter = open_adapter(config)?;
    let mut client = open_client(&adapter, config)?;
    client
        .unlock(access, &PasswordOffset(password))
        .context("Login failed")?;
    println!("Security access 0x{:02X} granted", access.to_byte());
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn flash(config: &Config, input: &Path, start: u32, end: u32, yes: bool, json: bool) -> Result<()> {
    let image = std::fs::read(input)
        .with_context(|| format!("Failed to read firmware image {}", input.display()))?;
    let region = FlashRegion::new(start, end)?;
    let data = region.slice(&image)?;
    let checksum = additive_checksum(data);
    log::info!(
        "Image {}: {} bytes, programming 0x{:06X}..=0x{:06X} ({} bytes, checksum 0x{:04X})",
        input.display(),
        image.len(),
        region.start,
        region.end,
        data.len(),
        checksum
    );

    if !yes && !confirm("Flash the ECU? An interrupted flash can leave it unusable.")? {
        bail!("Aborted");
    }

    let adapter = open_adapter(config)?;
    let mut flasher = Flasher::new(&adapter, config.tp20(), config.flash_options());
    let mut last_percent = None;
    flasher.set_progress_callback(Box::new(move |done, total| {
        let percent = done * 100 / total.max(1);
        if last_percent != Some(percent) {
            last_percent = Some(percent);
            log::info!("Transfer {}% ({}/{} bytes)", percent, done, total);
        }
    }));
    let transcript = Transcript::default();
    if json {
        let sink = transcript.clone();
        flasher.set_log_callback(Arc::new(move |entry| sink.record(entry)));
    }

    let identification = flasher
        .run(&image, region, &LegacyKeyAlgorithm)
        .with_context(|| format!("Flashing failed at stage {}", flasher.stage()))?;

    let report = FlashReport {
        ecu: IdentReport::from(&identification),
        region,
        bytes: data.len(),
        checksum: format!("0x{:04X}", checksum),
        log: transcript.entries(),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Flashed {} bytes to {} (checksum {})",
            report.bytes, report.ecu.part_number, report.checksum
        );
    }
    Ok(())
}
