//! Config load sequence against the mock device.

mod common;

use axiom_core::device::AxiomDevice;
use axiom_core::events::{AxiomEvent, NullObserver, Operation};
use axiom_core::payload::{ConfigFile, ConfigUsageEntry};
use axiom_core::protocol::SystemCommand;
use axiom_core::protocol::constants::{USAGE_CRC_DATA, USAGE_CUSTOMER_DATA, USAGE_DEVICE_INFO};
use axiom_core::state::{ConfigLoadStage, SequenceError, Stage, load_config};
use axiom_core::transport::MockTransport;
use axiom_core::transport::mock::{MOCK_BOOTLOADER_CRC, MOCK_CONFIG_CRCS, MOCK_RUNTIME_CRC};

use common::{RecordingObserver, quick_config, u33, u33_short};

fn entry(usage_id: u8, payload: Vec<u8>) -> ConfigUsageEntry {
    ConfigUsageEntry {
        usage_id,
        revision: 1,
        payload,
    }
}

/// The three-usage file: u31 (4 bytes), u33 (8 bytes), u04 (16 bytes).
fn three_usage_config() -> ConfigFile {
    ConfigFile::from_entries([
        entry(USAGE_DEVICE_INFO, vec![0x50, 0x80, 0x08, 0x04]),
        entry(USAGE_CRC_DATA, u33_short(MOCK_RUNTIME_CRC, MOCK_RUNTIME_CRC)),
        entry(USAGE_CUSTOMER_DATA, vec![0xC5; 16]),
    ])
}

#[test]
fn matching_crc_reaches_verified() {
    let mock = MockTransport::new();
    let config = ConfigFile::from_entries([
        entry(USAGE_CRC_DATA, mock.usage_bytes(USAGE_CRC_DATA)),
        entry(0x42, vec![0x11; 32]),
    ]);
    let observer = RecordingObserver::default();
    let mut device = AxiomDevice::open(mock.clone()).unwrap();

    load_config(&mut device, &config, &quick_config(false), &observer).unwrap();

    let stages = observer.stages();
    assert_eq!(
        stages,
        [
            ConfigLoadStage::Validated,
            ConfigLoadStage::Stopped,
            ConfigLoadStage::Cleared,
            ConfigLoadStage::Written,
            ConfigLoadStage::Saved,
            ConfigLoadStage::Reset,
            ConfigLoadStage::Verified,
        ]
        .map(Stage::from)
    );
    assert!(matches!(
        observer.events().last(),
        Some(AxiomEvent::Complete {
            operation: Operation::ConfigLoad
        })
    ));
    assert_eq!(mock.usage_bytes(0x42), vec![0x11; 32]);
}

#[test]
fn runtime_crc_mismatch_aborts_before_any_write() {
    let mock = MockTransport::new();
    let config = ConfigFile::from_entries([
        entry(USAGE_DEVICE_INFO, vec![0x50, 0x80, 0x08, 0x04, 0x03, 0x07, 0, 0, 0, 0, 0, 0]),
        entry(
            USAGE_CRC_DATA,
            u33(0xDEAD_BEEF, 0xDEAD_BEEF, MOCK_BOOTLOADER_CRC, &MOCK_CONFIG_CRCS),
        ),
        entry(0x42, vec![0; 32]),
    ]);
    let mut device = AxiomDevice::open(mock.clone()).unwrap();

    let err = load_config(&mut device, &config, &quick_config(false), &NullObserver).unwrap_err();

    match &err {
        SequenceError::IncompatibleFirmware {
            device_crc,
            file_crc,
            file_device,
            ..
        } => {
            assert_eq!(*device_crc, MOCK_RUNTIME_CRC);
            assert_eq!(*file_crc, 0xDEAD_BEEF);
            assert!(file_device.as_deref().unwrap().contains("AX80A"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.stage(), Stage::ConfigLoad(ConfigLoadStage::Validated));
    assert!(mock.writes().is_empty());
}

#[test]
fn customer_data_kept_without_overwrite() {
    let mock = MockTransport::new();
    let device_u04: Vec<u8> = (0..=255).collect();
    mock.set_usage(USAGE_CUSTOMER_DATA, &device_u04);
    let u31 = mock.usage_address(USAGE_DEVICE_INFO).unwrap();
    let u33_addr = mock.usage_address(USAGE_CRC_DATA).unwrap();
    let u04 = mock.usage_address(USAGE_CUSTOMER_DATA).unwrap();
    let mut device = AxiomDevice::open(mock.clone()).unwrap();

    let report =
        load_config(&mut device, &three_usage_config(), &quick_config(false), &NullObserver)
            .unwrap();

    assert_eq!(report.written, vec![USAGE_DEVICE_INFO, USAGE_CRC_DATA]);
    assert_eq!(report.skipped, vec![USAGE_CUSTOMER_DATA]);
    assert_eq!(mock.writes_to(u31), vec![vec![0x50, 0x80, 0x08, 0x04]]);
    assert_eq!(mock.writes_to(u33_addr).len(), 1);
    assert!(!mock.writes_to(u04).contains(&vec![0xC5; 16]));
    assert_eq!(mock.usage_bytes(USAGE_CUSTOMER_DATA), device_u04);
}

#[test]
fn customer_data_written_with_overwrite() {
    let mock = MockTransport::new();
    let u31 = mock.usage_address(USAGE_DEVICE_INFO).unwrap();
    let u33_addr = mock.usage_address(USAGE_CRC_DATA).unwrap();
    let u04 = mock.usage_address(USAGE_CUSTOMER_DATA).unwrap();
    let mut device = AxiomDevice::open(mock.clone()).unwrap();

    let report =
        load_config(&mut device, &three_usage_config(), &quick_config(true), &NullObserver)
            .unwrap();

    assert_eq!(
        report.written,
        vec![USAGE_DEVICE_INFO, USAGE_CRC_DATA, USAGE_CUSTOMER_DATA]
    );
    assert_eq!(report.bytes_written, 28);
    assert_eq!(mock.writes_to(u31).len(), 1);
    assert_eq!(mock.writes_to(u33_addr).len(), 1);
    assert!(mock.writes_to(u04).contains(&vec![0xC5; 16]));
    assert_eq!(mock.usage_bytes(USAGE_CUSTOMER_DATA)[..16], [0xC5; 16]);
}

#[test]
fn progress_counts_skipped_bytes() {
    let mock = MockTransport::new();
    let observer = RecordingObserver::default();
    let mut device = AxiomDevice::open(mock).unwrap();

    load_config(&mut device, &three_usage_config(), &quick_config(false), &observer).unwrap();

    let progress: Vec<(u64, u64)> = observer
        .events()
        .into_iter()
        .filter_map(|e| match e {
            AxiomEvent::Progress { current, total, .. } => Some((current, total)),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![(4, 28), (12, 28), (28, 28)]);
}

#[test]
fn config_changed_by_reset_fails_verification() {
    let mock = MockTransport::new();
    let file_u33 = mock.usage_bytes(USAGE_CRC_DATA);
    let mut after = MOCK_CONFIG_CRCS;
    after[2] ^= 1;
    mock.set_post_reset_u33(&u33(
        MOCK_RUNTIME_CRC,
        MOCK_RUNTIME_CRC,
        MOCK_BOOTLOADER_CRC,
        &after,
    ));
    let config = ConfigFile::from_entries([entry(USAGE_CRC_DATA, file_u33)]);
    let mut device = AxiomDevice::open(mock.clone()).unwrap();

    let err = load_config(&mut device, &config, &quick_config(false), &NullObserver).unwrap_err();

    match &err {
        SequenceError::VerificationFailed {
            runtime_match,
            mismatched,
            ..
        } => {
            assert!(*runtime_match);
            assert_eq!(mismatched, &vec![2]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.stage(), Stage::ConfigLoad(ConfigLoadStage::Verified));
    assert!(mock.commands().contains(&SystemCommand::SaveConfig));
}

#[test]
fn transport_failure_reports_stage() {
    let mock = MockTransport::new();
    let mut device = AxiomDevice::open(mock.clone()).unwrap();
    // Allow the stop command, fail fill-config.
    mock.fail_writes_after(1);

    let err = load_config(&mut device, &three_usage_config(), &quick_config(false), &NullObserver)
        .unwrap_err();

    assert!(matches!(err, SequenceError::Device { .. }));
    assert_eq!(err.stage(), Stage::ConfigLoad(ConfigLoadStage::Cleared));
    assert!(err.to_string().starts_with("[config/CLEARED]"));
    assert_eq!(mock.commands(), vec![SystemCommand::Stop]);
}

#[test]
fn missing_crc_usage_is_invalid_file() {
    let mock = MockTransport::new();
    let config = ConfigFile::from_entries([entry(0x42, vec![1; 8])]);
    let mut device = AxiomDevice::open(mock.clone()).unwrap();

    let err = load_config(&mut device, &config, &quick_config(false), &NullObserver).unwrap_err();

    assert!(matches!(err, SequenceError::InvalidConfig { .. }));
    assert!(mock.writes().is_empty());
}
