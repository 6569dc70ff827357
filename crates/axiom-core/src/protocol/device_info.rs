//! u31 device information header.
//!
//! The first 12 bytes of u31 identify the device and say how many usage
//! table entries follow.

use std::fmt;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use super::HeaderError;
use super::constants::DEVICE_INFO_HEADER_LEN;

/// Operating mode reported in bit 15 of the device ID word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    /// Runtime firmware is executing.
    Runtime,
    /// Bootloader is executing; only chunk writes are accepted.
    Bootloader,
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceMode::Runtime => write!(f, "runtime"),
            DeviceMode::Bootloader => write!(f, "bootloader"),
        }
    }
}

/// Decoded u31 header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// 15-bit device ID (channel count and variant).
    pub device_id: u16,
    pub mode: DeviceMode,
    pub fw_major: u8,
    pub fw_minor: u8,
    pub fw_patch: u8,
    pub fw_variant: u8,
    /// `true` for production firmware, `false` for engineering builds.
    pub fw_production: bool,
    pub bootloader_major: u8,
    pub bootloader_minor: u8,
    pub jedec_id: u16,
    pub num_usages: u8,
    pub silicon_revision: u8,
}

impl DeviceInfo {
    pub const SIZE: usize = DEVICE_INFO_HEADER_LEN;

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeaderError> {
        if data.len() < Self::SIZE {
            return Err(HeaderError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        let id_word = cursor.read_u16::<LittleEndian>()?;
        let fw_minor = cursor.read_u8()?;
        let fw_major = cursor.read_u8()?;
        let variant_byte = cursor.read_u8()?;
        let fw_patch = cursor.read_u8()?;
        let bootloader_minor = cursor.read_u8()?;
        let bootloader_major = cursor.read_u8()?;
        let jedec_id = cursor.read_u16::<LittleEndian>()?;
        let num_usages = cursor.read_u8()?;
        let silicon_byte = cursor.read_u8()?;

        Ok(Self {
            device_id: id_word & 0x7FFF,
            mode: if id_word & 0x8000 != 0 {
                DeviceMode::Runtime
            } else {
                DeviceMode::Bootloader
            },
            fw_major,
            fw_minor,
            fw_patch,
            fw_variant: variant_byte & 0x3F,
            fw_production: variant_byte & 0x80 != 0,
            bootloader_major,
            bootloader_minor,
            jedec_id,
            num_usages,
            silicon_revision: silicon_byte & 0x0F,
        })
    }

    /// Firmware version as `(major, minor, patch)`.
    pub fn version(&self) -> (u8, u8, u8) {
        (self.fw_major, self.fw_minor, self.fw_patch)
    }

    pub fn is_bootloader(&self) -> bool {
        self.mode == DeviceMode::Bootloader
    }

    /// Device identity string, e.g. `AX80A`.
    pub fn device_name(&self) -> String {
        device_name(self.device_id)
    }

    /// One-line summary used in error messages.
    pub fn short_description(&self) -> String {
        format!(
            "{} fw {}.{}.{} variant {} ({})",
            self.device_name(),
            self.fw_major,
            self.fw_minor,
            self.fw_patch,
            self.fw_variant,
            if self.fw_production {
                "production"
            } else {
                "engineering"
            }
        )
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device:      {} (ID 0x{:04X})", self.device_name(), self.device_id)?;
        writeln!(f, "Mode:        {}", self.mode)?;
        writeln!(
            f,
            "Firmware:    {}.{}.{} variant {} ({})",
            self.fw_major,
            self.fw_minor,
            self.fw_patch,
            self.fw_variant,
            if self.fw_production {
                "production"
            } else {
                "engineering"
            }
        )?;
        writeln!(
            f,
            "Bootloader:  {}.{}",
            self.bootloader_major, self.bootloader_minor
        )?;
        writeln!(f, "JEDEC ID:    0x{:04X}", self.jedec_id)?;
        write!(f, "Silicon rev: {}", self.silicon_revision)
    }
}

/// Convert a packed device ID to its name.
///
/// Bits 0-9 hold the channel count and bits 10-14 the variant, which is
/// rendered as a letter starting at `A`.
pub fn device_name(device_id: u16) -> String {
    let channels = device_id & 0x03FF;
    let variant = ((device_id & 0x7C00) >> 10) as u8;
    format!("AX{}{}", channels, char::from(b'A' + variant))
}
