//! Payload handling module.
//!
//! Decoders for the config and firmware containers that get written to a
//! device.

pub mod config;
pub mod firmware;

pub use config::{ConfigError, ConfigFile, ConfigUsageEntry};
pub use firmware::{
    ChunkIter, FirmwareChunk, FirmwareError, FirmwareFile, FirmwareFormat, FirmwareHeader,
    iterate_chunks,
};
