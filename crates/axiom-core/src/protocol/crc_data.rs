//! u33 CRC data.
//!
//! u33 is a packed array of little-endian CRC-32 words:
//!
//! | Offset | Field                              |
//! |--------|------------------------------------|
//! | 0      | runtime firmware CRC               |
//! | 4      | runtime firmware CRC held in NVM   |
//! | 8      | bootloader CRC                     |
//! | 12..   | config CRCs (one per config block) |
//!
//! Older revisions stop after the first two words.

use std::fmt;

use super::HeaderError;

const RUNTIME_CRC_OFFSET: usize = 0;
const RUNTIME_NVM_CRC_OFFSET: usize = 4;
const BOOTLOADER_CRC_OFFSET: usize = 8;
const CONFIG_CRC_OFFSET: usize = 12;

/// Decoded u33 contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrcData {
    pub revision: u8,
    pub runtime_crc: u32,
    pub runtime_nvm_crc: Option<u32>,
    pub bootloader_crc: Option<u32>,
    pub config_crcs: Vec<u32>,
}

impl CrcData {
    /// Smallest u33 payload that carries the runtime CRC.
    pub const MIN_SIZE: usize = 4;

    pub fn from_bytes(revision: u8, data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < Self::MIN_SIZE {
            return Err(HeaderError::BufferTooSmall {
                expected: Self::MIN_SIZE,
                actual: data.len(),
            });
        }

        let config_crcs = data
            .get(CONFIG_CRC_OFFSET..)
            .unwrap_or_default()
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();

        Ok(Self {
            revision,
            runtime_crc: read_u32(data, RUNTIME_CRC_OFFSET).unwrap_or_default(),
            runtime_nvm_crc: read_u32(data, RUNTIME_NVM_CRC_OFFSET),
            bootloader_crc: read_u32(data, BOOTLOADER_CRC_OFFSET),
            config_crcs,
        })
    }

    /// Whether a config saved against `other`'s firmware can be loaded here.
    pub fn is_compatible_with(&self, other: &CrcData) -> bool {
        self.runtime_crc == other.runtime_crc
    }

    /// Compare the runtime CRC and every config CRC both sides carry.
    pub fn config_matches(&self, other: &CrcData) -> bool {
        self.runtime_crc == other.runtime_crc
            && self
                .config_crcs
                .iter()
                .zip(other.config_crcs.iter())
                .all(|(a, b)| a == b)
    }

    /// Indices of config CRC words that differ.
    pub fn config_mismatches(&self, other: &CrcData) -> Vec<usize> {
        self.config_crcs
            .iter()
            .zip(other.config_crcs.iter())
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(i, _)| i)
            .collect()
    }
}

impl fmt::Display for CrcData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runtime 0x{:08X}", self.runtime_crc)?;
        if let Some(nvm) = self.runtime_nvm_crc {
            write!(f, ", nvm 0x{:08X}", nvm)?;
        }
        if !self.config_crcs.is_empty() {
            write!(f, ", {} config CRCs", self.config_crcs.len())?;
        }
        Ok(())
    }
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
