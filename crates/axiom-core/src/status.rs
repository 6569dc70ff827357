//! Process exit codes.

use std::fmt;

use crate::device::DeviceError;
use crate::payload::{ConfigError, FirmwareError};
use crate::report::ReportLoopError;
use crate::state::{FirmwareOutcome, SequenceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    General,
    Usage,
    IncompatibleFirmware,
    VerificationFailed,
    InvalidFile,
    WrongDevice,
    AlreadyUpToDate,
    VariantMismatch,
    PostDownloadCrc,
    BootloaderMode,
    BootloaderEntryFailed,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::General => 1,
            ExitStatus::Usage => 2,
            ExitStatus::IncompatibleFirmware => 3,
            ExitStatus::VerificationFailed => 4,
            ExitStatus::InvalidFile => 5,
            ExitStatus::WrongDevice => 6,
            ExitStatus::AlreadyUpToDate => 7,
            ExitStatus::VariantMismatch => 8,
            ExitStatus::PostDownloadCrc => 9,
            ExitStatus::BootloaderMode => 10,
            ExitStatus::BootloaderEntryFailed => 11,
        }
    }

    /// Best status for an application-level error.
    pub fn from_error(err: &anyhow::Error) -> Self {
        if let Some(e) = err.downcast_ref::<SequenceError>() {
            return e.into();
        }
        if let Some(e) = err.downcast_ref::<ReportLoopError>() {
            return match e {
                ReportLoopError::BootloaderMode => ExitStatus::BootloaderMode,
                ReportLoopError::Device(d) => d.into(),
            };
        }
        if let Some(e) = err.downcast_ref::<DeviceError>() {
            return e.into();
        }
        match (
            err.downcast_ref::<ConfigError>(),
            err.downcast_ref::<FirmwareError>(),
        ) {
            (Some(ConfigError::Io(_)), _) | (_, Some(FirmwareError::Io(_))) => ExitStatus::General,
            (Some(_), _) | (_, Some(_)) => ExitStatus::InvalidFile,
            (None, None) => ExitStatus::General,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

impl From<&DeviceError> for ExitStatus {
    fn from(err: &DeviceError) -> Self {
        match err {
            DeviceError::BootloaderMode | DeviceError::NotInBootloader => {
                ExitStatus::BootloaderMode
            }
            _ => ExitStatus::General,
        }
    }
}

impl From<&SequenceError> for ExitStatus {
    fn from(err: &SequenceError) -> Self {
        match err {
            SequenceError::InvalidConfig { .. } | SequenceError::InvalidFirmware { .. } => {
                ExitStatus::InvalidFile
            }
            SequenceError::IncompatibleFirmware { .. } => ExitStatus::IncompatibleFirmware,
            SequenceError::VerificationFailed { .. } => ExitStatus::VerificationFailed,
            SequenceError::WrongDevice { .. } => ExitStatus::WrongDevice,
            SequenceError::VariantMismatch { .. } => ExitStatus::VariantMismatch,
            SequenceError::BootloaderMode { .. } | SequenceError::StillInBootloader { .. } => {
                ExitStatus::BootloaderMode
            }
            SequenceError::BootloaderEntryFailed { .. } => ExitStatus::BootloaderEntryFailed,
            SequenceError::PostDownloadCrcMismatch { .. } => ExitStatus::PostDownloadCrc,
            SequenceError::Device { source, .. } => source.into(),
        }
    }
}

impl From<FirmwareOutcome> for ExitStatus {
    fn from(outcome: FirmwareOutcome) -> Self {
        match outcome {
            FirmwareOutcome::Updated { .. } => ExitStatus::Success,
            FirmwareOutcome::AlreadyUpToDate => ExitStatus::AlreadyUpToDate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{FirmwareStage, Stage};

    #[test]
    fn test_codes_are_distinct() {
        let all = [
            ExitStatus::Success,
            ExitStatus::General,
            ExitStatus::Usage,
            ExitStatus::IncompatibleFirmware,
            ExitStatus::VerificationFailed,
            ExitStatus::InvalidFile,
            ExitStatus::WrongDevice,
            ExitStatus::AlreadyUpToDate,
            ExitStatus::VariantMismatch,
            ExitStatus::PostDownloadCrc,
            ExitStatus::BootloaderMode,
            ExitStatus::BootloaderEntryFailed,
        ];
        let codes: Vec<i32> = all.iter().map(|s| s.code()).collect();
        assert_eq!(codes, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_sequence_mapping() {
        let err = SequenceError::WrongDevice {
            stage: Stage::Firmware(FirmwareStage::DeviceCompatible),
            device: "AX80A".into(),
            file: "AX112A".into(),
        };
        assert_eq!(ExitStatus::from(&err), ExitStatus::WrongDevice);

        let err = SequenceError::Device {
            stage: Stage::Check,
            source: DeviceError::BootloaderMode,
        };
        assert_eq!(ExitStatus::from(&err), ExitStatus::BootloaderMode);
    }

    #[test]
    fn test_from_anyhow() {
        let err = anyhow::Error::new(SequenceError::BootloaderEntryFailed {
            stage: Stage::Firmware(FirmwareStage::BootloaderEntered),
        });
        assert_eq!(ExitStatus::from_error(&err).code(), 11);
        assert_eq!(
            ExitStatus::from_error(&anyhow::anyhow!("no device")),
            ExitStatus::General
        );
        assert_eq!(
            ExitStatus::from(FirmwareOutcome::AlreadyUpToDate).code(),
            7
        );
    }
}
