//! Firmware containers.
//!
//! Handles the two firmware file formats:
//! - `.alc`: a bare stream of length-prefixed chunks
//! - `.axfw`: a 24-byte header followed by the same chunk stream
//!
//! Every chunk has an 8-byte header whose last two bytes are the big-endian
//! payload length. The stream must end exactly at EOF.

use std::fmt;
use std::io::Cursor;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

use crate::protocol::constants::{
    AXFW_CRC_START, AXFW_FORMAT_VERSION, AXFW_HEADER_LEN, AXFW_SIGNATURE, CHUNK_HEADER_LEN,
};
use crate::protocol::device_name;

#[derive(Error, Debug)]
pub enum FirmwareError {
    #[error("Invalid .axfw signature")]
    BadSignature,
    #[error("Unsupported .axfw format version 0x{0:04X}")]
    BadVersion(u16),
    #[error("File CRC mismatch: header 0x{expected:08X}, computed 0x{actual:08X}")]
    CrcMismatch { expected: u32, actual: u32 },
    #[error("Firmware data truncated at offset {offset}: need {needed} more bytes")]
    Truncated { offset: usize, needed: usize },
    #[error("Unsupported firmware file type: {0}")]
    UnsupportedFormat(String),
    #[error("Firmware file contains no chunks")]
    EmptyStream,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoded `.axfw` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareHeader {
    /// Always `AXFW` once decoded.
    pub signature: [u8; 4],
    pub file_crc32: u32,
    pub format_version: u16,
    pub device_id: u16,
    pub variant: u8,
    pub fw_minor: u8,
    pub fw_major: u8,
    pub fw_patch: u8,
    pub fw_status: u8,
    pub silicon_version: u16,
    pub silicon_revision: u8,
    /// CRC of the runtime firmware image, as the device reports it in u33
    /// once the download has completed.
    pub embedded_fw_crc32: u32,
}

impl FirmwareHeader {
    pub const SIZE: usize = AXFW_HEADER_LEN;

    /// Decode and validate an `.axfw` header against the whole file.
    ///
    /// The file CRC covers everything from byte 8 and is checked before
    /// the format version or any later field is read.
    pub fn decode(data: &[u8]) -> Result<Self, FirmwareError> {
        let signature: [u8; 4] = match data.get(..AXFW_SIGNATURE.len()) {
            Some(&[a, b, c, d]) if [a, b, c, d] == AXFW_SIGNATURE => [a, b, c, d],
            _ => return Err(FirmwareError::BadSignature),
        };
        if data.len() < Self::SIZE {
            return Err(FirmwareError::Truncated {
                offset: data.len(),
                needed: Self::SIZE - data.len(),
            });
        }

        let mut cursor = Cursor::new(&data[4..]);
        let file_crc32 = cursor.read_u32::<LittleEndian>()?;
        let actual = crc32fast::hash(&data[AXFW_CRC_START..]);
        if actual != file_crc32 {
            return Err(FirmwareError::CrcMismatch {
                expected: file_crc32,
                actual,
            });
        }

        let format_version = cursor.read_u16::<LittleEndian>()?;
        if format_version != AXFW_FORMAT_VERSION {
            return Err(FirmwareError::BadVersion(format_version));
        }

        Ok(Self {
            signature,
            file_crc32,
            format_version,
            device_id: cursor.read_u16::<LittleEndian>()?,
            variant: cursor.read_u8()?,
            fw_minor: cursor.read_u8()?,
            fw_major: cursor.read_u8()?,
            fw_patch: cursor.read_u8()?,
            fw_status: cursor.read_u8()?,
            silicon_version: cursor.read_u16::<LittleEndian>()?,
            silicon_revision: cursor.read_u8()?,
            embedded_fw_crc32: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn version(&self) -> (u8, u8, u8) {
        (self.fw_major, self.fw_minor, self.fw_patch)
    }

    /// Name of the device this firmware targets, e.g. `AX80A`.
    pub fn device_name(&self) -> String {
        device_name(self.device_id)
    }
}

impl fmt::Display for FirmwareHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Target:      {} (ID 0x{:04X})", self.device_name(), self.device_id)?;
        writeln!(
            f,
            "Firmware:    {}.{}.{} variant {} ({})",
            self.fw_major,
            self.fw_minor,
            self.fw_patch,
            self.variant,
            if self.fw_status & 0x80 != 0 {
                "production"
            } else {
                "engineering"
            }
        )?;
        writeln!(
            f,
            "Silicon:     0x{:04X} rev {}",
            self.silicon_version, self.silicon_revision
        )?;
        write!(f, "FW CRC:      0x{:08X}", self.embedded_fw_crc32)
    }
}

/// One chunk of the download stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareChunk<'a> {
    /// File offset of the chunk header.
    pub offset: usize,
    pub header: [u8; CHUNK_HEADER_LEN],
    pub payload: &'a [u8],
}

impl FirmwareChunk<'_> {
    /// Header plus payload length.
    pub fn wire_len(&self) -> usize {
        CHUNK_HEADER_LEN + self.payload.len()
    }
}

/// Lazy single-pass iterator over a chunk stream.
///
/// Yields `Truncated` once and then ends if a chunk crosses EOF.
pub struct ChunkIter<'a> {
    data: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> ChunkIter<'a> {
    pub fn new(data: &'a [u8], start_offset: usize) -> Self {
        Self {
            data,
            pos: start_offset,
            done: false,
        }
    }

    fn fail(&mut self, needed: usize) -> Option<Result<FirmwareChunk<'a>, FirmwareError>> {
        self.done = true;
        Some(Err(FirmwareError::Truncated {
            offset: self.pos,
            needed,
        }))
    }
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = Result<FirmwareChunk<'a>, FirmwareError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.data.len() {
            self.done = true;
            return None;
        }

        let remaining = self.data.len() - self.pos;
        if remaining < CHUNK_HEADER_LEN {
            return self.fail(CHUNK_HEADER_LEN - remaining);
        }
        let mut header = [0u8; CHUNK_HEADER_LEN];
        header.copy_from_slice(&self.data[self.pos..self.pos + CHUNK_HEADER_LEN]);
        let len = usize::from(u16::from_be_bytes([header[6], header[7]]));

        let body_start = self.pos + CHUNK_HEADER_LEN;
        let available = self.data.len() - body_start;
        if len > available {
            return self.fail(len - available);
        }

        let chunk = FirmwareChunk {
            offset: self.pos,
            header,
            payload: &self.data[body_start..body_start + len],
        };
        self.pos = body_start + len;
        Some(Ok(chunk))
    }
}

/// Iterate the chunks of a stream starting at `start_offset`.
pub fn iterate_chunks(data: &[u8], start_offset: usize) -> ChunkIter<'_> {
    ChunkIter::new(data, start_offset)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareFormat {
    Axfw,
    Alc,
}

impl FirmwareFormat {
    /// Detect the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self, FirmwareError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("axfw") => Ok(FirmwareFormat::Axfw),
            Some("alc") => Ok(FirmwareFormat::Alc),
            _ => Err(FirmwareError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Offset of the first chunk.
    pub fn stream_offset(&self) -> usize {
        match self {
            FirmwareFormat::Axfw => AXFW_HEADER_LEN,
            FirmwareFormat::Alc => 0,
        }
    }
}

impl fmt::Display for FirmwareFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirmwareFormat::Axfw => write!(f, ".axfw"),
            FirmwareFormat::Alc => write!(f, ".alc"),
        }
    }
}

/// A firmware file held in memory.
#[derive(Debug, Clone)]
pub struct FirmwareFile {
    format: FirmwareFormat,
    header: Option<FirmwareHeader>,
    data: Vec<u8>,
}

impl FirmwareFile {
    /// Wrap raw bytes, decoding the header for `.axfw`.
    pub fn from_bytes(format: FirmwareFormat, data: Vec<u8>) -> Result<Self, FirmwareError> {
        let header = match format {
            FirmwareFormat::Axfw => Some(FirmwareHeader::decode(&data)?),
            FirmwareFormat::Alc => None,
        };
        Ok(Self {
            format,
            header,
            data,
        })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, FirmwareError> {
        let path = path.as_ref();
        let format = FirmwareFormat::from_path(path)?;
        let data = std::fs::read(path)?;
        Self::from_bytes(format, data)
    }

    pub fn format(&self) -> FirmwareFormat {
        self.format
    }

    pub fn header(&self) -> Option<&FirmwareHeader> {
        self.header.as_ref()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn chunks(&self) -> ChunkIter<'_> {
        iterate_chunks(&self.data, self.format.stream_offset())
    }

    /// Bytes of chunk stream (headers included).
    pub fn stream_len(&self) -> usize {
        self.data.len().saturating_sub(self.format.stream_offset())
    }

    /// Pre-scan the whole chunk stream. Returns the chunk count.
    pub fn validate(&self) -> Result<usize, FirmwareError> {
        let mut count = 0;
        for chunk in self.chunks() {
            chunk?;
            count += 1;
        }
        if count == 0 {
            return Err(FirmwareError::EmptyStream);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tag: u8, payload: &[u8]) -> Vec<u8> {
        let len = (payload.len() as u16).to_be_bytes();
        let mut out = vec![tag, 0, 0, 0, 0, 0, len[0], len[1]];
        out.extend_from_slice(payload);
        out
    }

    fn axfw(stream: &[u8]) -> Vec<u8> {
        let mut out = b"AXFW".to_vec();
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&0x0200u16.to_le_bytes());
        out.extend_from_slice(&0x0050u16.to_le_bytes());
        out.extend_from_slice(&[3, 8, 4, 7, 0x80]);
        out.extend_from_slice(&0x0102u16.to_le_bytes());
        out.push(3);
        out.extend_from_slice(&0xCAFEF00Du32.to_le_bytes());
        out.extend_from_slice(stream);
        let crc = crc32fast::hash(&out[8..]);
        out[4..8].copy_from_slice(&crc.to_le_bytes());
        out
    }

    #[test]
    fn test_decode_header() {
        let data = axfw(&chunk(1, &[0xAA; 4]));
        let header = FirmwareHeader::decode(&data).unwrap();
        assert_eq!(header.device_name(), "AX80A");
        assert_eq!(header.version(), (4, 8, 7));
        assert_eq!(header.variant, 3);
        assert_eq!(header.silicon_version, 0x0102);
        assert_eq!(header.embedded_fw_crc32, 0xCAFEF00D);
        assert_eq!(&header.signature, b"AXFW");
    }

    #[test]
    fn test_bad_signature() {
        let mut data = axfw(&[]);
        data[0] = b'X';
        assert!(matches!(
            FirmwareHeader::decode(&data),
            Err(FirmwareError::BadSignature)
        ));
    }

    #[test]
    fn test_crc_checked_before_version() {
        let mut data = axfw(&[]);
        data[8] = 0x01;
        assert!(matches!(
            FirmwareHeader::decode(&data),
            Err(FirmwareError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_bad_version_with_valid_crc() {
        let mut data = axfw(&[]);
        data[8..10].copy_from_slice(&0x0100u16.to_le_bytes());
        let crc = crc32fast::hash(&data[8..]);
        data[4..8].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(
            FirmwareHeader::decode(&data),
            Err(FirmwareError::BadVersion(0x0100))
        ));
    }

    #[test]
    fn test_short_header() {
        assert!(matches!(
            FirmwareHeader::decode(b"AXFW\x00\x00"),
            Err(FirmwareError::Truncated { .. })
        ));
    }

    #[test]
    fn test_chunks_stop_at_eof() {
        let mut stream = chunk(1, &[1, 2, 3]);
        stream.extend(chunk(2, &[]));
        stream.extend(chunk(3, &[9; 10]));
        let chunks: Vec<_> = iterate_chunks(&stream, 0).collect::<Result<_, _>>().unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].payload, &[1, 2, 3]);
        assert!(chunks[1].payload.is_empty());
        assert_eq!(chunks[2].offset, 11 + 8);
    }

    #[test]
    fn test_chunk_past_eof_is_truncated_once() {
        let mut stream = chunk(1, &[1, 2, 3]);
        stream.extend(chunk(2, &[5; 6]));
        stream.truncate(stream.len() - 2);
        let mut iter = iterate_chunks(&stream, 0);
        assert!(iter.next().unwrap().is_ok());
        assert!(matches!(
            iter.next(),
            Some(Err(FirmwareError::Truncated { needed: 2, .. }))
        ));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_partial_chunk_header() {
        let stream = [0u8; 5];
        let results: Vec<_> = iterate_chunks(&stream, 0).collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            FirmwareFormat::from_path(Path::new("fw.AXFW")).unwrap(),
            FirmwareFormat::Axfw
        );
        assert_eq!(
            FirmwareFormat::from_path(Path::new("dir/fw.alc")).unwrap(),
            FirmwareFormat::Alc
        );
        assert!(FirmwareFormat::from_path(Path::new("fw.bin")).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_stream() {
        let file = FirmwareFile::from_bytes(FirmwareFormat::Axfw, axfw(&[])).unwrap();
        assert!(matches!(file.validate(), Err(FirmwareError::EmptyStream)));

        let file = FirmwareFile::from_bytes(FirmwareFormat::Alc, chunk(1, &[0; 4])).unwrap();
        assert_eq!(file.validate().unwrap(), 1);
    }
}
