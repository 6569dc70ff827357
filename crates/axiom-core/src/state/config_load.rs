//! Config load sequence.
//!
//! Writes a `.th2cfgbin` container to a running device and commits it to
//! NVM. The device's u04 (customer data) survives the load unless the
//! caller asks to overwrite it.

use std::thread;
use std::time::Duration;

use tracing::{info, instrument, warn};

use super::machine::{ConfigLoadStage, SequenceContext, SequenceError, Stage, at};
use crate::device::AxiomDevice;
use crate::events::{AxiomEvent, AxiomObserver, Operation};
use crate::payload::{ConfigError, ConfigFile};
use crate::protocol::constants::USAGE_CUSTOMER_DATA;
use crate::protocol::{CrcData, SystemCommand};
use crate::transport::AxiomTransport;

/// Tunables for a config load.
#[derive(Debug, Clone)]
pub struct ConfigLoadOptions {
    /// Write the file's u04 instead of keeping the device's.
    pub overwrite_customer_data: bool,
    /// Wait after save-config before resetting.
    pub save_settle: Duration,
    /// Wait after soft reset before re-reading the usage table.
    pub reset_settle: Duration,
}

impl Default for ConfigLoadOptions {
    fn default() -> Self {
        Self {
            overwrite_customer_data: false,
            save_settle: Duration::from_secs(2),
            reset_settle: Duration::from_secs(1),
        }
    }
}

/// What a successful load did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLoadReport {
    /// Usages written, in file order.
    pub written: Vec<u8>,
    /// Usages present in the file but not written.
    pub skipped: Vec<u8>,
    pub bytes_written: usize,
}

/// Result of comparing a config file with a device without writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigCheck {
    pub device_crc: CrcData,
    pub file_crc: CrcData,
    /// Firmware CRCs agree, so the file could be loaded.
    pub compatible: bool,
    /// Config CRC words that differ between file and device.
    pub mismatched: Vec<usize>,
}

impl ConfigCheck {
    /// Device already holds exactly this config.
    pub fn is_loaded(&self) -> bool {
        self.compatible && self.mismatched.is_empty()
    }
}

fn invalid(stage: ConfigLoadStage) -> impl FnOnce(ConfigError) -> SequenceError {
    move |source| SequenceError::InvalidConfig {
        stage: stage.into(),
        source,
    }
}

/// Compare a config file's u33 with the device's.
#[instrument(level = "info", skip_all)]
pub fn check_config<T: AxiomTransport>(
    device: &mut AxiomDevice<T>,
    config: &ConfigFile,
) -> Result<ConfigCheck, SequenceError> {
    if device.is_bootloader() {
        return Err(SequenceError::BootloaderMode { stage: Stage::Check });
    }
    let file_crc = config.crc_data().map_err(|source| SequenceError::InvalidConfig {
        stage: Stage::Check,
        source,
    })?;
    let device_crc = device.read_crc_data().map_err(at(Stage::Check))?;

    let compatible = device_crc.is_compatible_with(&file_crc);
    let mismatched = file_crc.config_mismatches(&device_crc);
    info!(compatible, mismatched = mismatched.len(), "Config checked");
    Ok(ConfigCheck {
        device_crc,
        file_crc,
        compatible,
        mismatched,
    })
}

/// Load a config file into the device and verify it.
#[instrument(level = "info", skip_all, fields(entries = config.entries().len()))]
pub fn load_config<T: AxiomTransport>(
    device: &mut AxiomDevice<T>,
    config: &ConfigFile,
    options: &ConfigLoadOptions,
    observer: &dyn AxiomObserver,
) -> Result<ConfigLoadReport, SequenceError> {
    let mut ctx = SequenceContext::<ConfigLoadStage>::new(observer);

    // Validated
    let step = ConfigLoadStage::Validated;
    if device.is_bootloader() {
        return Err(SequenceError::BootloaderMode { stage: step.into() });
    }
    let file_crc = config.crc_data().map_err(invalid(step))?;
    let device_crc = device.read_crc_data().map_err(at(step))?;
    if !device_crc.is_compatible_with(&file_crc) {
        return Err(SequenceError::IncompatibleFirmware {
            stage: step.into(),
            device_crc: device_crc.runtime_crc,
            file_crc: file_crc.runtime_crc,
            file_device: config.device_info().map(|i| i.short_description()),
        });
    }
    ctx.goto_stage(step);

    // Stopped
    let step = ConfigLoadStage::Stopped;
    device.begin_programming();
    device.send_command(SystemCommand::Stop).map_err(at(step))?;
    ctx.goto_stage(step);

    // Cleared: fill-config wipes u04 too, so put the device's copy back.
    let step = ConfigLoadStage::Cleared;
    let customer_data = if device.table().contains(USAGE_CUSTOMER_DATA) {
        Some(device.read_usage(USAGE_CUSTOMER_DATA).map_err(at(step))?)
    } else {
        None
    };
    device
        .send_command(SystemCommand::FillConfig)
        .map_err(at(step))?;
    if let Some(data) = &customer_data {
        device
            .write_usage(USAGE_CUSTOMER_DATA, data)
            .map_err(at(step))?;
    }
    ctx.goto_stage(step);

    // Written
    let step = ConfigLoadStage::Written;
    let total = config.total_payload_len() as u64;
    let mut processed = 0u64;
    let mut report = ConfigLoadReport {
        written: Vec::new(),
        skipped: Vec::new(),
        bytes_written: 0,
    };
    for entry in config.entries() {
        if entry.usage_id == USAGE_CUSTOMER_DATA && !options.overwrite_customer_data {
            info!("Keeping device u04");
            report.skipped.push(entry.usage_id);
        } else {
            device
                .write_usage(entry.usage_id, &entry.payload)
                .map_err(at(step))?;
            report.written.push(entry.usage_id);
            report.bytes_written += entry.payload.len();
        }
        processed += entry.payload.len() as u64;
        ctx.emit(AxiomEvent::Progress {
            operation: Operation::ConfigLoad,
            current: processed,
            total,
        });
    }
    ctx.goto_stage(step);

    // Saved
    let step = ConfigLoadStage::Saved;
    device
        .send_command(SystemCommand::SaveConfig)
        .map_err(at(step))?;
    thread::sleep(options.save_settle);
    ctx.goto_stage(step);

    // Reset
    let step = ConfigLoadStage::Reset;
    device
        .send_command(SystemCommand::SoftReset)
        .map_err(at(step))?;
    thread::sleep(options.reset_settle);
    device.refresh().map_err(at(step))?;
    ctx.goto_stage(step);

    // Verified
    let step = ConfigLoadStage::Verified;
    let after = device.read_crc_data().map_err(at(step))?;
    if !file_crc.config_matches(&after) {
        let mismatched = file_crc.config_mismatches(&after);
        warn!(mismatched = ?mismatched, "Config CRCs differ after load");
        return Err(SequenceError::VerificationFailed {
            stage: step.into(),
            runtime_match: file_crc.runtime_crc == after.runtime_crc,
            mismatched,
        });
    }
    ctx.goto_stage(step);
    ctx.emit(AxiomEvent::Complete {
        operation: Operation::ConfigLoad,
    });

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::payload::ConfigUsageEntry;
    use crate::protocol::constants::*;
    use crate::transport::MockTransport;

    fn quick() -> ConfigLoadOptions {
        ConfigLoadOptions {
            save_settle: Duration::ZERO,
            reset_settle: Duration::ZERO,
            ..Default::default()
        }
    }

    fn config_for(mock: &MockTransport) -> ConfigFile {
        ConfigFile::from_entries([
            ConfigUsageEntry {
                usage_id: USAGE_CRC_DATA,
                revision: 2,
                payload: mock.usage_bytes(USAGE_CRC_DATA),
            },
            ConfigUsageEntry {
                usage_id: 0x42,
                revision: 1,
                payload: vec![0x5A; 32],
            },
        ])
    }

    #[test]
    fn test_load_writes_and_verifies() {
        let mock = MockTransport::new();
        let config = config_for(&mock);
        let mut device = AxiomDevice::open(mock.clone()).unwrap();

        let report = load_config(&mut device, &config, &quick(), &NullObserver).unwrap();
        assert_eq!(report.written, vec![USAGE_CRC_DATA, 0x42]);
        assert_eq!(mock.usage_bytes(0x42), vec![0x5A; 32]);
        assert_eq!(
            mock.commands(),
            vec![
                SystemCommand::Stop,
                SystemCommand::FillConfig,
                SystemCommand::SaveConfig,
                SystemCommand::SoftReset,
            ]
        );
    }

    #[test]
    fn test_oversized_payload_fails_at_written() {
        let mock = MockTransport::new();
        let mut config = config_for(&mock);
        config = ConfigFile::from_entries(
            config
                .entries()
                .iter()
                .cloned()
                .chain([ConfigUsageEntry {
                    usage_id: 0x42,
                    revision: 1,
                    payload: vec![0; 40],
                }]),
        );
        let mut device = AxiomDevice::open(mock).unwrap();
        let err = load_config(&mut device, &config, &quick(), &NullObserver).unwrap_err();
        assert_eq!(err.stage(), Stage::ConfigLoad(ConfigLoadStage::Written));
    }

    #[test]
    fn test_check_config_reports_differences() {
        let mock = MockTransport::new();
        let mut u33 = mock.usage_bytes(USAGE_CRC_DATA);
        u33[16] ^= 0xFF;
        let config = ConfigFile::from_entries([ConfigUsageEntry {
            usage_id: USAGE_CRC_DATA,
            revision: 2,
            payload: u33,
        }]);
        let mut device = AxiomDevice::open(mock.clone()).unwrap();
        let check = check_config(&mut device, &config).unwrap();
        assert!(check.compatible);
        assert_eq!(check.mismatched, vec![1]);
        assert!(!check.is_loaded());
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn test_refuses_bootloader_device() {
        let mock = MockTransport::new();
        let config = config_for(&mock);
        mock.enter_bootloader();
        let mut device = AxiomDevice::open(mock.clone()).unwrap();
        let err = load_config(&mut device, &config, &quick(), &NullObserver).unwrap_err();
        assert!(matches!(err, SequenceError::BootloaderMode { .. }));
        assert!(mock.writes().is_empty());
    }
}
