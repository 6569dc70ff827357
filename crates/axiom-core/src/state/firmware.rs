//! Firmware download sequence.
//!
//! Streams an `.axfw` or `.alc` chunk stream to the bootloader, restarts
//! the device and, for `.axfw`, confirms the new firmware CRC in u33.

use std::thread;
use std::time::Duration;

use tracing::{info, instrument, warn};

use super::machine::{FirmwareStage, SequenceContext, SequenceError, at};
use crate::device::{AxiomDevice, DeviceError};
use crate::events::{AxiomEvent, AxiomObserver, Operation};
use crate::payload::{FirmwareError, FirmwareFile};
use crate::protocol::device_name;
use crate::transport::{AxiomTransport, TransportError};

/// Tunables for a firmware download.
#[derive(Debug, Clone)]
pub struct FirmwareOptions {
    /// Download even when the variant differs or the version is unchanged.
    pub force: bool,
    /// Wait after the bootloader entry sequence.
    pub bootloader_settle: Duration,
    /// Wait after the bootloader reset before re-reading the usage table.
    pub reset_settle: Duration,
}

impl Default for FirmwareOptions {
    fn default() -> Self {
        Self {
            force: false,
            bootloader_settle: Duration::from_millis(500),
            reset_settle: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareOutcome {
    Updated {
        chunks: usize,
        bytes: usize,
        /// `false` for `.alc`, which carries no firmware CRC.
        crc_verified: bool,
    },
    /// Device already runs this firmware; nothing was written.
    AlreadyUpToDate,
}

fn invalid(stage: FirmwareStage) -> impl FnOnce(FirmwareError) -> SequenceError {
    move |source| SequenceError::InvalidFirmware {
        stage: stage.into(),
        source,
    }
}

/// Download a firmware file to the device.
#[instrument(level = "info", skip_all, fields(format = %file.format()))]
pub fn update_firmware<T: AxiomTransport>(
    device: &mut AxiomDevice<T>,
    file: &FirmwareFile,
    options: &FirmwareOptions,
    observer: &dyn AxiomObserver,
) -> Result<FirmwareOutcome, SequenceError> {
    let mut ctx = SequenceContext::<FirmwareStage>::new(observer);

    // FileValidated
    let step = FirmwareStage::FileValidated;
    let chunk_count = file.validate().map_err(invalid(step))?;
    ctx.goto_stage(step);

    // DeviceCompatible
    let step = FirmwareStage::DeviceCompatible;
    match file.header() {
        Some(header) => {
            let info = device.info();
            if info.device_id != header.device_id {
                return Err(SequenceError::WrongDevice {
                    stage: step.into(),
                    device: info.device_name(),
                    file: device_name(header.device_id),
                });
            }
            if info.is_bootloader() {
                warn!("Device already in bootloader mode, skipping version checks");
                ctx.emit(AxiomEvent::warn(
                    "device is in bootloader mode; version and variant not checked",
                ));
            } else {
                if info.fw_variant != header.variant && !options.force {
                    return Err(SequenceError::VariantMismatch {
                        stage: step.into(),
                        device: info.fw_variant,
                        file: header.variant,
                    });
                }
                if info.fw_variant == header.variant
                    && info.version() == header.version()
                    && !options.force
                {
                    info!(
                        version = %format!("{}.{}.{}", header.fw_major, header.fw_minor, header.fw_patch),
                        "Firmware already up to date"
                    );
                    return Ok(FirmwareOutcome::AlreadyUpToDate);
                }
            }
            ctx.goto_stage(step);
        }
        None => {
            warn!("No header in .alc file, device compatibility not checked");
            ctx.emit(AxiomEvent::warn(
                ".alc file carries no header; device compatibility not checked",
            ));
        }
    }

    // BootloaderEntered
    let step = FirmwareStage::BootloaderEntered;
    device.begin_programming();
    if !device.is_bootloader() {
        device.enter_bootloader().map_err(at(step))?;
        thread::sleep(options.bootloader_settle);
        device.refresh().map_err(at(step))?;
        if !device.is_bootloader() {
            return Err(SequenceError::BootloaderEntryFailed { stage: step.into() });
        }
    }
    ctx.goto_stage(step);

    // Streaming
    let step = FirmwareStage::Streaming;
    let total = file.stream_len() as u64;
    let mut sent = 0usize;
    for chunk in file.chunks() {
        let chunk = chunk.map_err(invalid(step))?;
        device
            .write_chunk(&chunk.header, chunk.payload)
            .map_err(at(step))?;
        sent += chunk.wire_len();
        ctx.emit(AxiomEvent::Progress {
            operation: Operation::FirmwareDownload,
            current: sent as u64,
            total,
        });
    }
    info!(chunks = chunk_count, bytes = sent, "Chunk stream sent");
    ctx.goto_stage(step);

    // Reset
    let step = FirmwareStage::Reset;
    match device.bootloader_reset() {
        Ok(()) => {}
        // The device may drop off the bus before the write completes.
        Err(DeviceError::Transport(
            e @ (TransportError::Disconnected | TransportError::Timeout { .. }),
        )) => {
            warn!(error = %e, "Bootloader reset write not acknowledged, continuing");
        }
        Err(e) => return Err(at(step)(e)),
    }
    thread::sleep(options.reset_settle);
    device.refresh().map_err(at(step))?;
    if device.is_bootloader() {
        return Err(SequenceError::StillInBootloader { stage: step.into() });
    }
    ctx.goto_stage(step);

    // CrcVerified
    let crc_verified = match file.header() {
        Some(header) => {
            let step = FirmwareStage::CrcVerified;
            let crc = device.read_crc_data().map_err(at(step))?;
            if crc.runtime_nvm_crc != Some(header.embedded_fw_crc32) {
                return Err(SequenceError::PostDownloadCrcMismatch {
                    stage: step.into(),
                    expected: header.embedded_fw_crc32,
                    actual: crc.runtime_nvm_crc,
                });
            }
            ctx.goto_stage(step);
            true
        }
        None => false,
    };

    ctx.emit(AxiomEvent::Complete {
        operation: Operation::FirmwareDownload,
    });
    Ok(FirmwareOutcome::Updated {
        chunks: chunk_count,
        bytes: sent,
        crc_verified,
    })
}
