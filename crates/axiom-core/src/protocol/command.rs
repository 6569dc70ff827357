//! System manager (u02) commands.
//!
//! A command write is a little-endian command word followed by its
//! little-endian parameter words.

use std::fmt;

use super::constants::{
    CMD_ENTER_BOOTLOADER, CMD_FILL_CONFIG, CMD_SAVE_CONFIG, CMD_SOFT_RESET, CMD_STOP,
    SAVE_CONFIG_KEYS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemCommand {
    /// Restart the runtime firmware.
    SoftReset,
    /// Stop acquisition so config usages can be rewritten.
    Stop,
    /// Commit the RAM config to NVM.
    SaveConfig,
    /// Fill the RAM config with defaults.
    FillConfig,
    /// One step of the three-key bootloader entry sequence.
    EnterBootloader(u16),
}

impl SystemCommand {
    pub fn code(&self) -> u16 {
        match self {
            SystemCommand::SoftReset => CMD_SOFT_RESET,
            SystemCommand::Stop => CMD_STOP,
            SystemCommand::SaveConfig => CMD_SAVE_CONFIG,
            SystemCommand::FillConfig => CMD_FILL_CONFIG,
            SystemCommand::EnterBootloader(_) => CMD_ENTER_BOOTLOADER,
        }
    }

    pub fn params(&self) -> Vec<u16> {
        match self {
            SystemCommand::SaveConfig => SAVE_CONFIG_KEYS.to_vec(),
            SystemCommand::EnterBootloader(key) => vec![*key],
            _ => Vec::new(),
        }
    }

    /// Encode as the bytes written to u02.
    pub fn to_bytes(&self) -> Vec<u8> {
        std::iter::once(self.code())
            .chain(self.params())
            .flat_map(u16::to_le_bytes)
            .collect()
    }

    /// Decode a u02 write. Unknown command words yield `None`.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let word = |i: usize| {
            data.get(i * 2..i * 2 + 2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
        };
        match word(0)? {
            CMD_SOFT_RESET => Some(SystemCommand::SoftReset),
            CMD_STOP => Some(SystemCommand::Stop),
            CMD_SAVE_CONFIG => Some(SystemCommand::SaveConfig),
            CMD_FILL_CONFIG => Some(SystemCommand::FillConfig),
            CMD_ENTER_BOOTLOADER => word(1).map(SystemCommand::EnterBootloader),
            _ => None,
        }
    }
}

impl fmt::Display for SystemCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemCommand::SoftReset => write!(f, "SOFT_RESET"),
            SystemCommand::Stop => write!(f, "STOP"),
            SystemCommand::SaveConfig => write!(f, "SAVE_CONFIG"),
            SystemCommand::FillConfig => write!(f, "FILL_CONFIG"),
            SystemCommand::EnterBootloader(key) => write!(f, "ENTER_BOOTLOADER(0x{:04X})", key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_config_carries_keys() {
        assert_eq!(
            SystemCommand::SaveConfig.to_bytes(),
            vec![0x07, 0x00, 0x0C, 0xB1, 0xDE, 0xC0]
        );
    }

    #[test]
    fn test_plain_commands() {
        assert_eq!(SystemCommand::Stop.to_bytes(), vec![0x05, 0x00]);
        assert_eq!(SystemCommand::SoftReset.to_bytes(), vec![0x01, 0x00]);
    }

    #[test]
    fn test_decode_bootloader_key() {
        let bytes = SystemCommand::EnterBootloader(0xA55A).to_bytes();
        assert_eq!(
            SystemCommand::from_bytes(&bytes),
            Some(SystemCommand::EnterBootloader(0xA55A))
        );
        assert_eq!(SystemCommand::from_bytes(&[0x0B, 0x00]), None);
        assert_eq!(SystemCommand::from_bytes(&[0xFF, 0xFF]), None);
    }
}
