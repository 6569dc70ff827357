//! Stages, errors and transition bookkeeping shared by the programming
//! sequencers.

use std::fmt;

use thiserror::Error;

use crate::device::DeviceError;
use crate::events::{AxiomEvent, AxiomObserver};
use crate::payload::{ConfigError, FirmwareError};

/// Config load stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigLoadStage {
    #[default]
    Idle,
    Validated,
    Stopped,
    Cleared,
    Written,
    Saved,
    Reset,
    Verified,
}

impl fmt::Display for ConfigLoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigLoadStage::Idle => write!(f, "IDLE"),
            ConfigLoadStage::Validated => write!(f, "VALIDATED"),
            ConfigLoadStage::Stopped => write!(f, "STOPPED"),
            ConfigLoadStage::Cleared => write!(f, "CLEARED"),
            ConfigLoadStage::Written => write!(f, "WRITTEN"),
            ConfigLoadStage::Saved => write!(f, "SAVED"),
            ConfigLoadStage::Reset => write!(f, "RESET"),
            ConfigLoadStage::Verified => write!(f, "VERIFIED"),
        }
    }
}

/// Firmware download stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirmwareStage {
    #[default]
    Idle,
    FileValidated,
    DeviceCompatible,
    BootloaderEntered,
    Streaming,
    Reset,
    CrcVerified,
}

impl fmt::Display for FirmwareStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirmwareStage::Idle => write!(f, "IDLE"),
            FirmwareStage::FileValidated => write!(f, "FILE_VALIDATED"),
            FirmwareStage::DeviceCompatible => write!(f, "DEVICE_COMPATIBLE"),
            FirmwareStage::BootloaderEntered => write!(f, "BOOTLOADER_ENTERED"),
            FirmwareStage::Streaming => write!(f, "STREAMING"),
            FirmwareStage::Reset => write!(f, "RESET"),
            FirmwareStage::CrcVerified => write!(f, "CRC_VERIFIED"),
        }
    }
}

/// A stage of either sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ConfigLoad(ConfigLoadStage),
    Firmware(FirmwareStage),
    /// Read-only checks outside a programming sequence.
    Check,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::ConfigLoad(s) => write!(f, "config/{}", s),
            Stage::Firmware(s) => write!(f, "firmware/{}", s),
            Stage::Check => write!(f, "check"),
        }
    }
}

impl From<ConfigLoadStage> for Stage {
    fn from(s: ConfigLoadStage) -> Self {
        Stage::ConfigLoad(s)
    }
}

impl From<FirmwareStage> for Stage {
    fn from(s: FirmwareStage) -> Self {
        Stage::Firmware(s)
    }
}

/// Failure of a programming sequence. Every variant records the stage that
/// was being attempted.
#[derive(Error, Debug)]
pub enum SequenceError {
    #[error("[{stage}] invalid config file: {source}")]
    InvalidConfig { stage: Stage, source: ConfigError },

    #[error("[{stage}] invalid firmware file: {source}")]
    InvalidFirmware { stage: Stage, source: FirmwareError },

    #[error(
        "[{stage}] config was saved against firmware CRC 0x{file_crc:08X}{}, device runs 0x{device_crc:08X}",
        .file_device.as_deref().map(|d| format!(" ({})", d)).unwrap_or_default()
    )]
    IncompatibleFirmware {
        stage: Stage,
        device_crc: u32,
        file_crc: u32,
        file_device: Option<String>,
    },

    #[error("[{stage}] verification failed: config CRC words {mismatched:?} differ")]
    VerificationFailed {
        stage: Stage,
        runtime_match: bool,
        mismatched: Vec<usize>,
    },

    #[error("[{stage}] firmware is for {file}, device is {device}")]
    WrongDevice {
        stage: Stage,
        device: String,
        file: String,
    },

    #[error("[{stage}] firmware variant {file} does not match device variant {device}")]
    VariantMismatch { stage: Stage, device: u8, file: u8 },

    #[error("[{stage}] device is in bootloader mode")]
    BootloaderMode { stage: Stage },

    #[error("[{stage}] device did not enter bootloader mode")]
    BootloaderEntryFailed { stage: Stage },

    #[error("[{stage}] device is still in bootloader mode after reset")]
    StillInBootloader { stage: Stage },

    #[error(
        "[{stage}] firmware CRC after download is {}, expected 0x{expected:08X}",
        .actual.map(|c| format!("0x{:08X}", c)).unwrap_or_else(|| "missing".into())
    )]
    PostDownloadCrcMismatch {
        stage: Stage,
        expected: u32,
        actual: Option<u32>,
    },

    #[error("[{stage}] {source}")]
    Device { stage: Stage, source: DeviceError },
}

impl SequenceError {
    /// Stage at which the sequence failed.
    pub fn stage(&self) -> Stage {
        match self {
            SequenceError::InvalidConfig { stage, .. }
            | SequenceError::InvalidFirmware { stage, .. }
            | SequenceError::IncompatibleFirmware { stage, .. }
            | SequenceError::VerificationFailed { stage, .. }
            | SequenceError::WrongDevice { stage, .. }
            | SequenceError::VariantMismatch { stage, .. }
            | SequenceError::BootloaderMode { stage }
            | SequenceError::BootloaderEntryFailed { stage }
            | SequenceError::StillInBootloader { stage }
            | SequenceError::PostDownloadCrcMismatch { stage, .. }
            | SequenceError::Device { stage, .. } => *stage,
        }
    }
}

/// Wrap a device error with the stage being attempted.
pub fn at(stage: impl Into<Stage>) -> impl FnOnce(DeviceError) -> SequenceError {
    let stage = stage.into();
    move |source| SequenceError::Device { stage, source }
}

/// Current stage of one sequence run.
pub struct SequenceContext<'o, S> {
    stage: S,
    observer: &'o dyn AxiomObserver,
}

impl<'o, S> SequenceContext<'o, S>
where
    S: Copy + Default + PartialEq + fmt::Display + Into<Stage>,
{
    pub fn new(observer: &'o dyn AxiomObserver) -> Self {
        Self {
            stage: S::default(),
            observer,
        }
    }

    pub fn stage(&self) -> S {
        self.stage
    }

    pub fn observer(&self) -> &'o dyn AxiomObserver {
        self.observer
    }

    /// Transition to a new stage.
    pub fn goto_stage(&mut self, new_stage: S) {
        tracing::info!(from = %self.stage, to = %new_stage, "Stage transition");
        self.observer.on_event(&AxiomEvent::StageChanged {
            from: self.stage.into(),
            to: new_stage.into(),
        });
        self.stage = new_stage;
    }

    pub fn emit(&self, event: AxiomEvent) {
        self.observer.on_event(&event);
    }
}
