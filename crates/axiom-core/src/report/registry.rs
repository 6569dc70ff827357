//! Usage → decoder registry.

use std::collections::BTreeMap;

use super::decoders::{
    DecodeError, HotspotReport, PilotReport, SystemReport, TouchReport, decode_hotspots_contact,
    decode_hotspots_force_only, decode_pilot, decode_system, decode_touch,
};
use crate::protocol::constants::{
    USAGE_HOTSPOT_REPORT, USAGE_PILOT_REPORT, USAGE_SYSTEM_REPORT, USAGE_TOUCH_REPORT,
};

/// Usages decoded when no filter is given.
pub const DEFAULT_REPORTS: &[u8] = &[USAGE_SYSTEM_REPORT, USAGE_TOUCH_REPORT];

/// Device features that change how reports are laid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportFeatures {
    /// Device emits u46 after each u41.
    pub pilot_id: bool,
    /// Part reports hotspots from force centres of mass only.
    pub hotspot_force_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    System,
    Touch,
    HotspotForceOnly,
    HotspotContact,
    Pilot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedReport {
    System(SystemReport),
    Touch(TouchReport),
    Hotspots(HotspotReport),
    Pilot(PilotReport),
}

impl DecoderKind {
    pub fn decode(self, body: &[u8]) -> Result<DecodedReport, DecodeError> {
        Ok(match self {
            DecoderKind::System => DecodedReport::System(decode_system(body)?),
            DecoderKind::Touch => DecodedReport::Touch(decode_touch(body)?),
            DecoderKind::HotspotForceOnly => {
                DecodedReport::Hotspots(decode_hotspots_force_only(body)?)
            }
            DecoderKind::HotspotContact => DecodedReport::Hotspots(decode_hotspots_contact(body)?),
            DecoderKind::Pilot => DecodedReport::Pilot(decode_pilot(body)?),
        })
    }

    fn for_usage(usage: u8, features: ReportFeatures) -> Option<Self> {
        match usage {
            USAGE_SYSTEM_REPORT => Some(DecoderKind::System),
            USAGE_TOUCH_REPORT => Some(DecoderKind::Touch),
            USAGE_HOTSPOT_REPORT if features.hotspot_force_only => {
                Some(DecoderKind::HotspotForceOnly)
            }
            USAGE_HOTSPOT_REPORT => Some(DecoderKind::HotspotContact),
            USAGE_PILOT_REPORT if features.pilot_id => Some(DecoderKind::Pilot),
            _ => None,
        }
    }
}

/// Decoders for the usages the caller asked for.
#[derive(Debug, Clone, Default)]
pub struct DecoderRegistry {
    features: ReportFeatures,
    decoders: BTreeMap<u8, DecoderKind>,
}

impl DecoderRegistry {
    /// Register a decoder for each enabled usage that has one.
    ///
    /// With the pilot-ID feature on, u46 is registered alongside u41 so the
    /// two can be joined.
    pub fn new(features: ReportFeatures, enabled: &[u8]) -> Self {
        let mut decoders = BTreeMap::new();
        for &usage in enabled {
            match DecoderKind::for_usage(usage, features) {
                Some(kind) => {
                    decoders.insert(usage, kind);
                }
                None => tracing::warn!(usage = %format!("u{:02X}", usage), "No decoder for usage"),
            }
        }
        if features.pilot_id && decoders.contains_key(&USAGE_TOUCH_REPORT) {
            decoders.insert(USAGE_PILOT_REPORT, DecoderKind::Pilot);
        }
        Self { features, decoders }
    }

    pub fn features(&self) -> ReportFeatures {
        self.features
    }

    pub fn lookup(&self, usage: u8) -> Option<DecoderKind> {
        self.decoders.get(&usage).copied()
    }

    pub fn usages(&self) -> impl Iterator<Item = u8> + '_ {
        self.decoders.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_reports() {
        let registry = DecoderRegistry::new(ReportFeatures::default(), DEFAULT_REPORTS);
        assert_eq!(registry.lookup(0x01), Some(DecoderKind::System));
        assert_eq!(registry.lookup(0x41), Some(DecoderKind::Touch));
        assert_eq!(registry.lookup(0x45), None);
        assert_eq!(registry.lookup(0x46), None);
    }

    #[test]
    fn test_hotspot_variant_follows_feature() {
        let force_only = ReportFeatures {
            hotspot_force_only: true,
            ..Default::default()
        };
        let registry = DecoderRegistry::new(force_only, &[0x45]);
        assert_eq!(registry.lookup(0x45), Some(DecoderKind::HotspotForceOnly));

        let registry = DecoderRegistry::new(ReportFeatures::default(), &[0x45]);
        assert_eq!(registry.lookup(0x45), Some(DecoderKind::HotspotContact));
    }

    #[test]
    fn test_pilot_registered_with_touch() {
        let features = ReportFeatures {
            pilot_id: true,
            ..Default::default()
        };
        let registry = DecoderRegistry::new(features, &[0x41]);
        assert_eq!(registry.lookup(0x46), Some(DecoderKind::Pilot));
        assert_eq!(registry.usages().collect::<Vec<_>>(), vec![0x41, 0x46]);

        let registry = DecoderRegistry::new(ReportFeatures::default(), &[0x46]);
        assert_eq!(registry.lookup(0x46), None);
    }

    #[test]
    fn test_decode_dispatches_by_kind() {
        let body = [0u8; 44];
        assert!(matches!(
            DecoderKind::System.decode(&body),
            Ok(DecodedReport::System(_))
        ));
        assert!(DecoderKind::Touch.decode(&body).is_err());
    }
}
