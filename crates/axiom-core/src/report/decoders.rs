//! Fixed-layout report decoders.
//!
//! Each decoder takes the frame body (everything after the length and
//! usage bytes) and is a pure function of it. All multi-byte fields are
//! little-endian.

use std::fmt;

use thiserror::Error;

use crate::protocol::constants::{
    USAGE_HOTSPOT_REPORT, USAGE_PILOT_REPORT, USAGE_SYSTEM_REPORT, USAGE_TOUCH_REPORT,
};

/// Number of target slots in a u41 report.
pub const TOUCH_TARGETS: usize = 10;

const U01_LEN: usize = 44;
const U41_LEN: usize = 56;
const U45_FORCE_ONLY_LEN: usize = 34;
const U45_CONTACT_LEN: usize = 20;
const U46_LEN: usize = 12;
const HOTSPOT_RECORD_LEN: usize = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("u{usage:02X} report too short: need {needed} bytes, got {actual}")]
    TooShort {
        usage: u8,
        needed: usize,
        actual: usize,
    },
}

fn require(usage: u8, body: &[u8], needed: usize) -> Result<(), DecodeError> {
    if body.len() < needed {
        return Err(DecodeError::TooShort {
            usage,
            needed,
            actual: body.len(),
        });
    }
    Ok(())
}

fn u16_at(body: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([body[offset], body[offset + 1]])
}

// ============================================================================
// u01 System Manager Report
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemReportKind {
    Hello,
    Heartbeat,
    Alert,
    OpComplete,
    Other(u8),
}

impl From<u8> for SystemReportKind {
    fn from(b: u8) -> Self {
        match b {
            0 => SystemReportKind::Hello,
            1 => SystemReportKind::Heartbeat,
            2 => SystemReportKind::Alert,
            3 => SystemReportKind::OpComplete,
            other => SystemReportKind::Other(other),
        }
    }
}

impl fmt::Display for SystemReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemReportKind::Hello => write!(f, "Hello"),
            SystemReportKind::Heartbeat => write!(f, "Heartbeat"),
            SystemReportKind::Alert => write!(f, "Alert"),
            SystemReportKind::OpComplete => write!(f, "Op complete"),
            SystemReportKind::Other(b) => write!(f, "Type {}", b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemReport {
    pub kind: SystemReportKind,
    pub count: u16,
    pub timestamp: u16,
}

pub fn decode_system(body: &[u8]) -> Result<SystemReport, DecodeError> {
    require(USAGE_SYSTEM_REPORT, body, U01_LEN)?;
    Ok(SystemReport {
        kind: body[0].into(),
        count: u16_at(body, 2),
        timestamp: u16_at(body, 42),
    })
}

// ============================================================================
// u41 2D Touch Report
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchTarget {
    pub index: u8,
    pub x: u16,
    pub y: u16,
    pub z: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchReport {
    /// Bit `t` set when target `t` is reporting.
    pub target_status: u16,
    pub extra_info: u8,
    /// Active targets only.
    pub targets: Vec<TouchTarget>,
    pub timestamp: u16,
    pub checksum: u16,
    /// Per-target pilot IDs, once joined with a u46 report.
    pub pilot_ids: Option<[u8; TOUCH_TARGETS]>,
}

impl TouchReport {
    /// Nothing touching and no status to report.
    pub fn is_idle(&self) -> bool {
        self.target_status == 0 && self.extra_info == 0
    }
}

pub fn decode_touch(body: &[u8]) -> Result<TouchReport, DecodeError> {
    require(USAGE_TOUCH_REPORT, body, U41_LEN)?;
    let target_status = u16::from(body[0]) | (u16::from(body[1] & 0x03) << 8);
    let extra_info = (body[1] & 0xFC) >> 2;

    let targets = (0..TOUCH_TARGETS)
        .filter(|t| target_status & (1 << t) != 0)
        .map(|t| {
            let xy = t * 4 + 2;
            TouchTarget {
                index: t as u8,
                x: u16_at(body, xy),
                y: u16_at(body, xy + 2),
                z: body[42 + t],
            }
        })
        .collect();

    Ok(TouchReport {
        target_status,
        extra_info,
        targets,
        timestamp: u16_at(body, 52),
        checksum: u16_at(body, 54),
        pilot_ids: None,
    })
}

// ============================================================================
// u45 Hotspots Report
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotspotReason {
    Entered,
    Exited,
    Press,
    Release,
    Move,
    EnteredAndPress,
    ExitedAndRelease,
    Other(u8),
}

impl From<u8> for HotspotReason {
    fn from(b: u8) -> Self {
        match b {
            0 => HotspotReason::Entered,
            1 => HotspotReason::Exited,
            2 => HotspotReason::Press,
            3 => HotspotReason::Release,
            4 => HotspotReason::Move,
            5 => HotspotReason::EnteredAndPress,
            6 => HotspotReason::ExitedAndRelease,
            other => HotspotReason::Other(other),
        }
    }
}

impl fmt::Display for HotspotReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HotspotReason::Entered => write!(f, "Entered hotspot"),
            HotspotReason::Exited => write!(f, "Exited hotspot"),
            HotspotReason::Press => write!(f, "Press threshold exceeded"),
            HotspotReason::Release => write!(f, "Release threshold exceeded"),
            HotspotReason::Move => write!(f, "Move"),
            HotspotReason::EnteredAndPress => write!(f, "Entered and press threshold exceeded"),
            HotspotReason::ExitedAndRelease => write!(f, "Exited and release threshold exceeded"),
            HotspotReason::Other(b) => write!(f, "Reason {}", b),
        }
    }
}

/// What produced a hotspot record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotspotSource {
    Contact,
    CenterOfMass(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotspotRecord {
    pub source: HotspotSource,
    pub hotspot: u8,
    pub qualification: u8,
    pub reason: HotspotReason,
    pub x: u16,
    pub y: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotspotReport {
    /// Valid records only.
    pub records: Vec<HotspotRecord>,
    pub timestamp: u16,
}

fn hotspot_record(body: &[u8], offset: usize, source: HotspotSource) -> Option<HotspotRecord> {
    let raw = &body[offset..offset + HOTSPOT_RECORD_LEN];
    if raw[1] & 0x01 == 0 {
        return None;
    }
    Some(HotspotRecord {
        source,
        hotspot: raw[0],
        qualification: raw[2],
        reason: raw[3].into(),
        x: u16_at(raw, 4),
        y: u16_at(raw, 6),
    })
}

/// Force-only parts: four centre-of-mass records.
pub fn decode_hotspots_force_only(body: &[u8]) -> Result<HotspotReport, DecodeError> {
    require(USAGE_HOTSPOT_REPORT, body, U45_FORCE_ONLY_LEN)?;
    let records = (0..4u8)
        .filter_map(|i| {
            hotspot_record(
                body,
                usize::from(i) * HOTSPOT_RECORD_LEN,
                HotspotSource::CenterOfMass(i),
            )
        })
        .collect();
    Ok(HotspotReport {
        records,
        timestamp: u16_at(body, 32),
    })
}

/// Other parts: one contact record then one centre-of-mass record.
pub fn decode_hotspots_contact(body: &[u8]) -> Result<HotspotReport, DecodeError> {
    require(USAGE_HOTSPOT_REPORT, body, U45_CONTACT_LEN)?;
    let records = [
        hotspot_record(body, 0, HotspotSource::Contact),
        hotspot_record(body, HOTSPOT_RECORD_LEN, HotspotSource::CenterOfMass(0)),
    ]
    .into_iter()
    .flatten()
    .collect();
    Ok(HotspotReport {
        records,
        timestamp: u16_at(body, 18),
    })
}

// ============================================================================
// u46 Pilot Metadata
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PilotReport {
    pub pilot_ids: [u8; TOUCH_TARGETS],
    pub timestamp: u16,
}

pub fn decode_pilot(body: &[u8]) -> Result<PilotReport, DecodeError> {
    require(USAGE_PILOT_REPORT, body, U46_LEN)?;
    let mut pilot_ids = [0u8; TOUCH_TARGETS];
    pilot_ids.copy_from_slice(&body[..TOUCH_TARGETS]);
    Ok(PilotReport {
        pilot_ids,
        timestamp: u16_at(body, 10),
    })
}
