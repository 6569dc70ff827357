//! Protocol module - aXiom register and command definitions.

pub mod bridge;
pub mod command;
pub mod constants;
pub mod crc_data;
pub mod device_info;

pub use bridge::BridgeMode;
pub use command::SystemCommand;
pub use constants::*;
pub use crc_data::CrcData;
pub use device_info::{DeviceInfo, DeviceMode, device_name};

use thiserror::Error;

/// Error decoding a fixed-layout register block.
#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
