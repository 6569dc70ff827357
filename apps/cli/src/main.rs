use std::path::PathBuf;

use anyhow::{Result, bail};
use axiom_core::report::{DecodedReport, HotspotSource, ReportEvent, TouchReport};
use axiom_core::protocol::BridgeMode;
use axiom_core::session::{inspect_firmware, switch_bridge_mode};
use axiom_core::{
    AxiomSession, AxiomTransport, CancellationToken, ExitStatus, FirmwareOutcome, Interface, SessionConfig,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "aXiom touch controller utility", long_about = None)]
struct Args {
    /// Interface the device is attached to
    #[arg(short, long, value_enum)]
    interface: Option<InterfaceArg>,

    /// I2C bus number
    #[arg(long)]
    i2c_bus: Option<u8>,

    /// I2C device address (0x66 or 0x67)
    #[arg(long, value_parser = parse_hex_u8)]
    i2c_address: Option<u8>,

    /// SPI bus number
    #[arg(long)]
    spi_bus: Option<u8>,

    /// SPI device (chip select) number
    #[arg(long)]
    spi_device: Option<u8>,

    /// Session settings file (TOML); flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum InterfaceArg {
    Usb,
    I2c,
    Spi,
}

impl From<InterfaceArg> for Interface {
    fn from(arg: InterfaceArg) -> Self {
        match arg {
            InterfaceArg::Usb => Interface::Usb,
            InterfaceArg::I2c => Interface::I2c,
            InterfaceArg::Spi => Interface::Spi,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BridgeModeArg {
    Tbp,
    Digi,
    Mouse,
}

impl From<BridgeModeArg> for BridgeMode {
    fn from(arg: BridgeModeArg) -> Self {
        match arg {
            BridgeModeArg::Tbp => BridgeMode::Basic,
            BridgeModeArg::Digi => BridgeMode::Digitizer,
            BridgeModeArg::Mouse => BridgeMode::AbsoluteMouse,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show device information and the usage table
    Info,
    /// Load a .th2cfgbin config file and save it to NVM
    LoadConfig {
        file: PathBuf,
        /// Write the file's u04 instead of keeping the device's
        #[arg(long)]
        overwrite_u04: bool,
    },
    /// Compare a .th2cfgbin config file with the device without writing
    CheckConfig { file: PathBuf },
    /// Download an .axfw or .alc firmware file
    UpdateFirmware {
        #[arg(required_unless_present = "info")]
        file: Option<PathBuf>,
        /// Download even if the variant differs or the version is unchanged
        #[arg(long)]
        force: bool,
        /// Show device and file information only
        #[arg(long)]
        info: bool,
    },
    /// Show or switch the USB protocol bridge mode
    BridgeMode {
        /// Mode to switch to; the current mode is shown when omitted
        #[arg(value_enum)]
        mode: Option<BridgeModeArg>,
    },
    /// Decode reports until Ctrl-C
    Reports {
        /// Report usages to decode, e.g. u01,u41,u45
        #[arg(long, value_delimiter = ',', value_parser = parse_usage)]
        reports: Vec<u8>,
        /// Join u41 touches with u46 pilot IDs
        #[arg(long)]
        pilot_id: bool,
        /// Device reports hotspots from force centres of mass only
        #[arg(long)]
        force_hotspots: bool,
        /// Wait on this GPIO line (active low nIRQ) instead of polling
        #[arg(long, value_name = "PIN")]
        gpioint: Option<u32>,
    },
    /// Read factory calibration data (u36)
    FactoryData {
        /// Write the raw bytes to a file instead of printing them
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid hex byte '{}': {}", s, e))
}

fn parse_usage(s: &str) -> Result<u8, String> {
    parse_hex_u8(s.trim_start_matches(['u', 'U']))
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {}", e);
    }

    let status = match run(args) {
        Ok(status) => status,
        Err(e) => {
            error!("Error: {:#}", e);
            ExitStatus::from_error(&e)
        }
    };
    std::process::exit(status.code());
}

fn session_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)?,
        None => SessionConfig::default(),
    };
    if let Some(interface) = args.interface {
        config.interface = interface.into();
    }
    config.i2c_bus = args.i2c_bus.or(config.i2c_bus);
    config.i2c_address = args.i2c_address.unwrap_or(config.i2c_address);
    config.spi_bus = args.spi_bus.or(config.spi_bus);
    config.spi_device = args.spi_device.or(config.spi_device);

    match &args.command {
        Command::LoadConfig { overwrite_u04, .. } => {
            config.overwrite_customer_data |= overwrite_u04;
        }
        Command::UpdateFirmware { force, .. } => config.force |= force,
        Command::Reports {
            reports,
            pilot_id,
            force_hotspots,
            gpioint,
        } => {
            if !reports.is_empty() {
                config.reports = reports.clone();
            }
            config.pilot_id |= pilot_id;
            config.force_hotspots |= force_hotspots;
            config.gpio_interrupt = gpioint.or(config.gpio_interrupt);
        }
        _ => {}
    }
    Ok(config)
}

fn run(args: Args) -> Result<ExitStatus> {
    let config = session_config(&args)?;

    if let Command::BridgeMode { mode } = &args.command {
        let mut transport = config.open_transport()?;
        match mode {
            Some(mode) => {
                let mode = BridgeMode::from(*mode);
                let previous = switch_bridge_mode(&mut transport, mode)?;
                println!("Bridge mode {} -> {}", previous, mode);
            }
            None => println!("Bridge mode {}", transport.bridge_mode()?),
        }
        transport.close()?;
        return Ok(ExitStatus::Success);
    }

    if let Command::UpdateFirmware {
        file: Some(file),
        info: true,
        ..
    } = &args.command
    {
        let firmware = inspect_firmware(file)?;
        match firmware.header() {
            Some(header) => println!("{}", header),
            None => println!("{}: {} chunk stream, no header", file.display(), firmware.format()),
        }
    }

    info!(interface = %config.interface, "Opening device");
    let mut session = AxiomSession::connect(config)?;

    let status = match &args.command {
        Command::Info => {
            println!("{}", session.info());
            println!("{}", session.usage_table());
            ExitStatus::Success
        }
        Command::LoadConfig { file, .. } => {
            let report = session.load_config(file)?;
            println!(
                "Config loaded: {} usages written ({} bytes), {} kept",
                report.written.len(),
                report.bytes_written,
                report.skipped.len()
            );
            ExitStatus::Success
        }
        Command::CheckConfig { file } => {
            let check = session.check_config(file)?;
            println!("Device: {}", check.device_crc);
            println!("File:   {}", check.file_crc);
            if !check.compatible {
                println!("Config was saved against different firmware");
                ExitStatus::IncompatibleFirmware
            } else if check.is_loaded() {
                println!("Device config matches file");
                ExitStatus::Success
            } else {
                println!("Config CRC words differ: {:?}", check.mismatched);
                ExitStatus::VerificationFailed
            }
        }
        Command::UpdateFirmware { info: true, .. } => {
            println!("{}", session.info());
            ExitStatus::Success
        }
        Command::UpdateFirmware { file: Some(file), .. } => {
            let outcome = session.update_firmware(file)?;
            match outcome {
                FirmwareOutcome::Updated {
                    chunks,
                    bytes,
                    crc_verified,
                } => {
                    println!("Firmware updated: {} chunks, {} bytes", chunks, bytes);
                    if !crc_verified {
                        warn!("Firmware CRC not verified for .alc download");
                    }
                    println!("{}", session.info());
                }
                FirmwareOutcome::AlreadyUpToDate => {
                    println!("Firmware already up to date, use --force to download anyway");
                }
            }
            ExitStatus::from(outcome)
        }
        Command::Reports { .. } => {
            let cancel = CancellationToken::new();
            let handler_token = cancel.clone();
            ctrlc::set_handler(move || handler_token.cancel())?;
            let wake = session.config().wake_source()?;
            if let Some(pin) = session.config().gpio_interrupt {
                info!(pin, "Waiting on GPIO interrupt");
            }
            let stats = session.dump_reports(&cancel, wake, print_event)?;
            println!(
                "{} reads, {} reports, {} overflows, {} skipped",
                stats.reads, stats.decoded, stats.dropped, stats.skipped
            );
            ExitStatus::Success
        }
        Command::FactoryData { output } => {
            let data = session.read_factory_data()?;
            match output {
                Some(path) => {
                    std::fs::write(path, &data)?;
                    println!("{} bytes written to {}", data.len(), path.display());
                }
                None => print_hex(&data),
            }
            ExitStatus::Success
        }
        Command::UpdateFirmware { file: None, .. } => bail!("no firmware file given"),
        Command::BridgeMode { .. } => bail!("bridge mode is switched without a device session"),
    };

    session.close()?;
    Ok(status)
}

fn print_hex(data: &[u8]) {
    for (row, line) in data.chunks(16).enumerate() {
        let bytes: Vec<String> = line.iter().map(|b| format!("{:02X}", b)).collect();
        println!("{:04X}: {}", row * 16, bytes.join(" "));
    }
}

fn print_touch(touch: &TouchReport) {
    if touch.targets.is_empty() {
        println!("u41 [{:5}] no touch (extra 0x{:02X})", touch.timestamp, touch.extra_info);
        return;
    }
    for target in &touch.targets {
        let pilot = touch
            .pilot_ids
            .map(|ids| format!(" pilot {}", ids[usize::from(target.index)]))
            .unwrap_or_default();
        println!(
            "u41 [{:5}] T{} x {:5} y {:5} z {:3}{}",
            touch.timestamp, target.index, target.x, target.y, target.z, pilot
        );
    }
}

fn print_event(event: ReportEvent) {
    match event {
        ReportEvent::Decoded { report, .. } => match report {
            DecodedReport::System(system) => println!(
                "u01 [{:5}] {} #{}",
                system.timestamp, system.kind, system.count
            ),
            DecodedReport::Touch(touch) => print_touch(&touch),
            DecodedReport::Hotspots(hotspots) => {
                for record in &hotspots.records {
                    let source = match record.source {
                        HotspotSource::Contact => "contact".to_string(),
                        HotspotSource::CenterOfMass(i) => format!("CoM {}", i),
                    };
                    println!(
                        "u45 [{:5}] {} hotspot {} ({}) x {:5} y {:5} qual {}",
                        hotspots.timestamp,
                        source,
                        record.hotspot,
                        record.reason,
                        record.x,
                        record.y,
                        record.qualification
                    );
                }
            }
            DecodedReport::Pilot(pilot) => {
                println!("u46 [{:5}] pilot IDs {:?}", pilot.timestamp, pilot.pilot_ids)
            }
        },
        ReportEvent::FramesDropped { usage } => {
            warn!(usage = %format!("u{:02X}", usage), "Reports dropped, FIFO overflowed");
        }
        ReportEvent::DecodeSkipped { usage, reason } => {
            warn!(usage = %format!("u{:02X}", usage), reason = %reason, "Report skipped");
        }
    }
}
