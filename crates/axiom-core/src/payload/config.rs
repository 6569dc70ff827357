//! `.th2cfgbin` config container.
//!
//! Layout: a big-endian signature, nine opaque header bytes, then usage
//! records running to the exact end of the file. Each record is
//! `{usage, revision, reserved, length (u16 LE), payload}`.

use std::io::{Cursor, Read};
use std::path::Path;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use thiserror::Error;

use crate::protocol::constants::{
    CONFIG_HEADER_LEN, CONFIG_RECORD_HEADER_LEN, CONFIG_SIGNATURE, USAGE_CRC_DATA,
    USAGE_DEVICE_INFO,
};
use crate::protocol::{CrcData, DeviceInfo};

/// Header bytes between the signature and the first record.
pub const CONFIG_EXTRA_HEADER_LEN: usize = CONFIG_HEADER_LEN - 4;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Bad config signature: 0x{0:08X}")]
    BadSignature(u32),
    #[error("Config file truncated at offset {offset}: need {needed} more bytes")]
    Truncated { offset: usize, needed: usize },
    #[error("Config file has no u{0:02X} entry")]
    MissingUsage(u8),
    #[error("Config u{usage:02X} entry is malformed: {message}")]
    BadEntry { usage: u8, message: String },
    #[error("Config u{usage:02X} payload of {len} bytes does not fit a 16-bit length")]
    PayloadTooLarge { usage: u8, len: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One usage's contents as stored in a config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigUsageEntry {
    pub usage_id: u8,
    pub revision: u8,
    pub payload: Vec<u8>,
}

/// Decoded config container. Entries keep file order; usage IDs are unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    header: [u8; CONFIG_EXTRA_HEADER_LEN],
    entries: Vec<ConfigUsageEntry>,
}

impl ConfigFile {
    /// Build a container from entries, with a zeroed header.
    pub fn from_entries(entries: impl IntoIterator<Item = ConfigUsageEntry>) -> Self {
        let mut file = Self {
            header: [0; CONFIG_EXTRA_HEADER_LEN],
            entries: Vec::new(),
        };
        for entry in entries {
            file.insert(entry);
        }
        file
    }

    /// Insert keeping the first position of an existing usage.
    fn insert(&mut self, entry: ConfigUsageEntry) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.usage_id == entry.usage_id)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, ConfigError> {
        if data.len() < 4 {
            return Err(ConfigError::Truncated {
                offset: 0,
                needed: 4 - data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        let signature = cursor.read_u32::<BigEndian>()?;
        if signature != CONFIG_SIGNATURE {
            return Err(ConfigError::BadSignature(signature));
        }
        if data.len() < CONFIG_HEADER_LEN {
            return Err(ConfigError::Truncated {
                offset: data.len(),
                needed: CONFIG_HEADER_LEN - data.len(),
            });
        }
        let mut header = [0u8; CONFIG_EXTRA_HEADER_LEN];
        cursor.read_exact(&mut header)?;

        let mut file = Self {
            header,
            entries: Vec::new(),
        };
        while (cursor.position() as usize) < data.len() {
            let offset = cursor.position() as usize;
            let remaining = data.len() - offset;
            if remaining < CONFIG_RECORD_HEADER_LEN {
                return Err(ConfigError::Truncated {
                    offset,
                    needed: CONFIG_RECORD_HEADER_LEN - remaining,
                });
            }
            let usage_id = cursor.read_u8()?;
            let revision = cursor.read_u8()?;
            let _reserved = cursor.read_u8()?;
            let len = usize::from(cursor.read_u16::<LittleEndian>()?);

            let body_start = offset + CONFIG_RECORD_HEADER_LEN;
            let available = data.len() - body_start;
            if len > available {
                return Err(ConfigError::Truncated {
                    offset: body_start,
                    needed: len - available,
                });
            }
            let mut payload = vec![0u8; len];
            cursor.read_exact(&mut payload)?;
            file.insert(ConfigUsageEntry {
                usage_id,
                revision,
                payload,
            });
        }
        Ok(file)
    }

    /// Serialize to the `.th2cfgbin` layout.
    pub fn encode(&self) -> Result<Vec<u8>, ConfigError> {
        let mut out = Vec::with_capacity(
            CONFIG_HEADER_LEN + self.total_payload_len() + self.entries.len() * CONFIG_RECORD_HEADER_LEN,
        );
        out.extend_from_slice(&CONFIG_SIGNATURE.to_be_bytes());
        out.extend_from_slice(&self.header);
        for entry in &self.entries {
            out.push(entry.usage_id);
            out.push(entry.revision);
            out.push(0);
            let len = u16::try_from(entry.payload.len()).map_err(|_| {
                ConfigError::PayloadTooLarge {
                    usage: entry.usage_id,
                    len: entry.payload.len(),
                }
            })?;
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(&entry.payload);
        }
        Ok(out)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let data = std::fs::read(path)?;
        Self::decode(&data)
    }

    pub fn header(&self) -> &[u8; CONFIG_EXTRA_HEADER_LEN] {
        &self.header
    }

    pub fn entries(&self) -> &[ConfigUsageEntry] {
        &self.entries
    }

    pub fn get(&self, usage_id: u8) -> Option<&ConfigUsageEntry> {
        self.entries.iter().find(|e| e.usage_id == usage_id)
    }

    /// Copy of this container without one usage.
    pub fn without(&self, usage_id: u8) -> Self {
        Self {
            header: self.header,
            entries: self
                .entries
                .iter()
                .filter(|e| e.usage_id != usage_id)
                .cloned()
                .collect(),
        }
    }

    /// Sum of all payload lengths.
    pub fn total_payload_len(&self) -> usize {
        self.entries.iter().map(|e| e.payload.len()).sum()
    }

    /// The u33 snapshot the config was saved against.
    pub fn crc_data(&self) -> Result<CrcData, ConfigError> {
        let entry = self
            .get(USAGE_CRC_DATA)
            .ok_or(ConfigError::MissingUsage(USAGE_CRC_DATA))?;
        CrcData::from_bytes(entry.revision, &entry.payload).map_err(|e| ConfigError::BadEntry {
            usage: USAGE_CRC_DATA,
            message: e.to_string(),
        })
    }

    /// Identity of the device the config was saved from, when recorded.
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.get(USAGE_DEVICE_INFO)
            .and_then(|e| DeviceInfo::from_bytes(&e.payload).ok())
    }
}
