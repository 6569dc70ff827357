//! Builders shared by the integration tests.

#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use axiom_core::events::{AxiomEvent, AxiomObserver};
use axiom_core::payload::{FirmwareFile, FirmwareFormat};
use axiom_core::protocol::constants::CONFIG_SIGNATURE;
use axiom_core::state::{ConfigLoadOptions, FirmwareOptions, Stage};

pub fn quick_config(overwrite_customer_data: bool) -> ConfigLoadOptions {
    ConfigLoadOptions {
        overwrite_customer_data,
        save_settle: Duration::ZERO,
        reset_settle: Duration::ZERO,
    }
}

pub fn quick_firmware(force: bool) -> FirmwareOptions {
    FirmwareOptions {
        force,
        bootloader_settle: Duration::ZERO,
        reset_settle: Duration::ZERO,
    }
}

/// Two-word u33 body as older revisions carry it.
pub fn u33_short(runtime: u32, nvm: u32) -> Vec<u8> {
    [runtime, nvm].iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// Full u33 body: firmware CRCs, bootloader CRC, then config CRCs.
pub fn u33(runtime: u32, nvm: u32, bootloader: u32, config: &[u32]) -> Vec<u8> {
    [runtime, nvm, bootloader]
        .iter()
        .chain(config)
        .flat_map(|w| w.to_le_bytes())
        .collect()
}

/// Raw `.th2cfgbin` bytes.
pub fn config_bytes(header: &[u8; 9], records: &[(u8, u8, Vec<u8>)]) -> Vec<u8> {
    let mut out = CONFIG_SIGNATURE.to_be_bytes().to_vec();
    out.extend_from_slice(header);
    for (usage, revision, payload) in records {
        out.extend_from_slice(&[*usage, *revision, 0]);
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(payload);
    }
    out
}

/// One chunk: tag byte, five zero bytes, big-endian payload length.
pub fn chunk(tag: u8, payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() as u16).to_be_bytes();
    let mut out = vec![tag, 0, 0, 0, 0, 0, len[0], len[1]];
    out.extend_from_slice(payload);
    out
}

/// Target identity for an `.axfw` header.
#[derive(Debug, Clone, Copy)]
pub struct AxfwTarget {
    pub device_id: u16,
    pub variant: u8,
    pub version: (u8, u8, u8),
    pub embedded_crc: u32,
}

impl Default for AxfwTarget {
    /// Matches the default mock device.
    fn default() -> Self {
        Self {
            device_id: 0x0050,
            variant: 3,
            version: (4, 8, 7),
            embedded_crc: 0x5EED_F00D,
        }
    }
}

pub fn axfw_bytes(target: AxfwTarget, stream: &[u8]) -> Vec<u8> {
    let (major, minor, patch) = target.version;
    let mut out = b"AXFW".to_vec();
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&0x0200u16.to_le_bytes());
    out.extend_from_slice(&target.device_id.to_le_bytes());
    out.extend_from_slice(&[target.variant, minor, major, patch, 0x80]);
    out.extend_from_slice(&0x0001u16.to_le_bytes());
    out.push(2);
    out.extend_from_slice(&target.embedded_crc.to_le_bytes());
    out.extend_from_slice(stream);
    let crc = crc32fast::hash(&out[8..]);
    out[4..8].copy_from_slice(&crc.to_le_bytes());
    out
}

pub fn axfw(target: AxfwTarget, stream: &[u8]) -> FirmwareFile {
    FirmwareFile::from_bytes(FirmwareFormat::Axfw, axfw_bytes(target, stream)).unwrap()
}

pub fn alc(stream: &[u8]) -> FirmwareFile {
    FirmwareFile::from_bytes(FirmwareFormat::Alc, stream.to_vec()).unwrap()
}

/// Report FIFO frame around `body`.
pub fn frame(usage: u8, body: &[u8]) -> Vec<u8> {
    let mut raw = vec![((body.len() + 2) / 2) as u8, usage];
    raw.extend_from_slice(body);
    raw
}

pub fn system_frame(kind: u8, count: u16) -> Vec<u8> {
    let mut body = vec![0u8; 44];
    body[0] = kind;
    body[2..4].copy_from_slice(&count.to_le_bytes());
    frame(0x01, &body)
}

/// u41 frame with target 0 at (x, y) and the given timestamp.
pub fn touch_frame(x: u16, y: u16, timestamp: u16) -> Vec<u8> {
    let mut body = vec![0u8; 56];
    body[0] = 0x01;
    body[2..4].copy_from_slice(&x.to_le_bytes());
    body[4..6].copy_from_slice(&y.to_le_bytes());
    body[42] = 30;
    body[52..54].copy_from_slice(&timestamp.to_le_bytes());
    frame(0x41, &body)
}

pub fn pilot_frame(ids: [u8; 10], timestamp: u16) -> Vec<u8> {
    let mut body = ids.to_vec();
    body.extend_from_slice(&timestamp.to_le_bytes());
    frame(0x46, &body)
}

/// Observer that keeps every event.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<AxiomEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<AxiomEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Stages entered, in order.
    pub fn stages(&self) -> Vec<Stage> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AxiomEvent::StageChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }
}

impl AxiomObserver for RecordingObserver {
    fn on_event(&self, event: &AxiomEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
