//! Property tests for the codecs and the frame dispatcher.

mod common;

use axiom_core::payload::{
    ConfigFile, FirmwareError, FirmwareFormat, FirmwareHeader, iterate_chunks,
};
use axiom_core::report::{
    DecodeError, DecoderKind, DecoderRegistry, ReportDispatcher, ReportEvent, ReportFeatures,
};
use proptest::prelude::*;

use common::{AxfwTarget, axfw_bytes, chunk, config_bytes};

fn arb_records() -> impl Strategy<Value = Vec<(u8, u8, Vec<u8>)>> {
    proptest::collection::vec(
        (
            0u8..0x50,
            any::<u8>(),
            proptest::collection::vec(any::<u8>(), 0..48),
        ),
        0..8,
    )
}

fn arb_stream() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(
        (any::<u8>(), proptest::collection::vec(any::<u8>(), 0..80)),
        1..6,
    )
    .prop_map(|chunks| {
        chunks
            .iter()
            .flat_map(|(tag, payload)| chunk(*tag, payload))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Re-encoding a decoded container decodes to the same container.
    #[test]
    fn prop_config_reencode_is_stable(
        header in proptest::array::uniform9(any::<u8>()),
        records in arb_records(),
    ) {
        let bytes = config_bytes(&header, &records);
        let decoded = ConfigFile::decode(&bytes)
            .map_err(|e| TestCaseError::fail(format!("{e}")))?;
        let encoded = decoded.encode()
            .map_err(|e| TestCaseError::fail(format!("{e}")))?;
        let again = ConfigFile::decode(&encoded)
            .map_err(|e| TestCaseError::fail(format!("{e}")))?;
        prop_assert_eq!(&again, &decoded);
        prop_assert_eq!(again.header(), &header);
    }

    /// Usage IDs stay unique and each keeps its last payload.
    #[test]
    fn prop_config_duplicates_take_last(records in arb_records()) {
        let bytes = config_bytes(&[0; 9], &records);
        let decoded = ConfigFile::decode(&bytes)
            .map_err(|e| TestCaseError::fail(format!("{e}")))?;
        for (usage, _, _) in &records {
            let last = records.iter().rev().find(|(u, _, _)| u == usage);
            let entry = decoded.get(*usage);
            prop_assert_eq!(
                entry.map(|e| &e.payload),
                last.map(|(_, _, p)| p)
            );
        }
        let mut ids: Vec<u8> = decoded.entries().iter().map(|e| e.usage_id).collect();
        let count = ids.len();
        ids.sort_unstable();
        ids.dedup();
        prop_assert_eq!(ids.len(), count);
    }

    /// Any single changed byte after the CRC field is caught.
    #[test]
    fn prop_axfw_corruption_detected(
        stream in arb_stream(),
        pick in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let mut bytes = axfw_bytes(AxfwTarget::default(), &stream);
        let index = 8 + pick.index(bytes.len() - 8);
        bytes[index] ^= flip;
        let is_crc_mismatch = matches!(
            FirmwareHeader::decode(&bytes),
            Err(FirmwareError::CrcMismatch { .. })
        );
        prop_assert!(is_crc_mismatch, "byte {} not covered by the file CRC", index);
    }

    /// A stream cut short never yields a short chunk; the cut surfaces as
    /// `Truncated` and nothing follows it.
    #[test]
    fn prop_cut_stream_reports_truncation(
        stream in arb_stream(),
        pick in any::<prop::sample::Index>(),
    ) {
        let cut = pick.index(stream.len());
        let data = &stream[..cut];

        let mut whole = 0;
        let mut results = iterate_chunks(data, 0).peekable();
        while let Some(item) = results.next() {
            match item {
                Ok(chunk) => {
                    let declared = u16::from_be_bytes([chunk.header[6], chunk.header[7]]);
                    prop_assert_eq!(chunk.payload.len(), usize::from(declared));
                    whole += chunk.wire_len();
                }
                Err(FirmwareError::Truncated { .. }) => {
                    prop_assert!(results.peek().is_none());
                    prop_assert!(whole < cut);
                }
                Err(e) => return Err(TestCaseError::fail(format!("unexpected error: {e}"))),
            }
        }
        prop_assert!(whole <= cut);
    }

    /// `.alc` files start streaming at byte 0.
    #[test]
    fn prop_alc_stream_is_whole_file(stream in arb_stream()) {
        prop_assert_eq!(FirmwareFormat::Alc.stream_offset(), 0);
        let chunks: usize = iterate_chunks(&stream, 0)
            .map(|c| c.map(|c| c.wire_len()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TestCaseError::fail(format!("{e}")))?
            .into_iter()
            .sum();
        prop_assert_eq!(chunks, stream.len());
    }

    /// Decoders reject short bodies and never index past the end.
    #[test]
    fn prop_decoders_bounds_checked(body in proptest::collection::vec(any::<u8>(), 0..64)) {
        for kind in [
            DecoderKind::System,
            DecoderKind::Touch,
            DecoderKind::HotspotForceOnly,
            DecoderKind::HotspotContact,
            DecoderKind::Pilot,
        ] {
            match kind.decode(&body) {
                Ok(_) => {}
                Err(DecodeError::TooShort { needed, actual, .. }) => {
                    prop_assert_eq!(actual, body.len());
                    prop_assert!(needed > actual);
                }
            }
        }
    }

    /// Arbitrary FIFO reads never panic the dispatcher and produce at most
    /// an overflow notice plus one report.
    #[test]
    fn prop_dispatch_tolerates_garbage(raw in proptest::collection::vec(any::<u8>(), 0..64)) {
        let features = ReportFeatures {
            pilot_id: true,
            hotspot_force_only: false,
        };
        let registry = DecoderRegistry::new(features, &[0x01, 0x41, 0x45]);
        let mut dispatcher = ReportDispatcher::new(registry);
        let mut events = Vec::new();
        dispatcher.process_frame(&raw, &mut |e| events.push(e));
        prop_assert!(events.len() <= 2);
        if events.len() == 2 {
            prop_assert!(
                matches!(events[0], ReportEvent::FramesDropped { .. }),
                "{:?}",
                events
            );
        }
    }
}
