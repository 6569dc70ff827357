//! Report FIFO frames.
//!
//! Byte 0 of a frame holds the report length in 16-bit words (bits 0-6,
//! header included) and the overflow flag (bit 7). Byte 1 is the usage
//! that produced the report and the body follows. A zero length means the
//! FIFO was empty.

use thiserror::Error;

const FRAME_HEADER_LEN: usize = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame claims {claimed} bytes but only {read} were read")]
    LengthExceedsRead { usage: u8, claimed: usize, read: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportFrame<'a> {
    pub length_words: u8,
    /// Set when the device dropped reports before this one.
    pub overflow: bool,
    pub usage_id: u8,
    pub body: &'a [u8],
}

impl<'a> ReportFrame<'a> {
    /// Parse one FIFO read. `Ok(None)` means no report was pending.
    ///
    /// An empty frame with the overflow flag set is still returned so the
    /// loss is not hidden.
    pub fn parse(raw: &'a [u8]) -> Result<Option<Self>, FrameError> {
        let Some((&first, rest)) = raw.split_first() else {
            return Ok(None);
        };
        let length_words = first & 0x7F;
        let overflow = first & 0x80 != 0;
        if length_words == 0 && !overflow {
            return Ok(None);
        }
        let usage_id = rest.first().copied().unwrap_or(0);

        let claimed = usize::from(length_words) * 2;
        if claimed > raw.len() {
            return Err(FrameError::LengthExceedsRead {
                usage: usage_id,
                claimed,
                read: raw.len(),
            });
        }
        let body = raw.get(FRAME_HEADER_LEN..claimed).unwrap_or_default();

        Ok(Some(Self {
            length_words,
            overflow,
            usage_id,
            body,
        }))
    }

    /// Frame carries no report, only the overflow signal.
    pub fn is_empty(&self) -> bool {
        self.length_words == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_fifo() {
        assert_eq!(ReportFrame::parse(&[0, 0, 0, 0]).unwrap(), None);
        assert_eq!(ReportFrame::parse(&[]).unwrap(), None);
    }

    #[test]
    fn test_body_bounded_by_length() {
        let raw = [3, 0x41, 0xAA, 0xBB, 0xCC, 0xDD];
        let frame = ReportFrame::parse(&raw).unwrap().unwrap();
        assert_eq!(frame.usage_id, 0x41);
        assert!(!frame.overflow);
        assert_eq!(frame.body, &[0xAA, 0xBB, 0xCC, 0xDD]);

        let padded = [2, 0x01, 0x11, 0x22, 0, 0, 0, 0];
        let frame = ReportFrame::parse(&padded).unwrap().unwrap();
        assert_eq!(frame.body, &[0x11, 0x22]);
    }

    #[test]
    fn test_overflow_flag() {
        let raw = [0x80 | 2, 0x41, 1, 2];
        let frame = ReportFrame::parse(&raw).unwrap().unwrap();
        assert!(frame.overflow);
        assert_eq!(frame.length_words, 2);
    }

    #[test]
    fn test_overflow_without_report() {
        let frame = ReportFrame::parse(&[0x80, 0x41, 0, 0]).unwrap().unwrap();
        assert!(frame.overflow);
        assert!(frame.is_empty());
    }

    #[test]
    fn test_length_past_read() {
        assert!(matches!(
            ReportFrame::parse(&[10, 0x41, 0, 0]),
            Err(FrameError::LengthExceedsRead { usage: 0x41, claimed: 20, read: 4 })
        ));
    }
}
