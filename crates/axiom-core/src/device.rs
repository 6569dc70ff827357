//! Device handle.
//!
//! `AxiomDevice` owns the transport and the current usage table snapshot.
//! Every operation borrows it mutably, so at most one sequencer or report
//! loop talks to the device at a time.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::protocol::constants::{
    BOOTLOADER_CMD_RESET, BOOTLOADER_COMMAND_ADDRESS, BOOTLOADER_ENTRY_KEYS, CHUNK_HEADER_LEN,
    USAGE_CRC_DATA, USAGE_REPORT_FIFO, USAGE_SYSTEM_MANAGER,
};
use crate::protocol::{CrcData, DeviceInfo, HeaderError, SystemCommand};
use crate::transport::{AxiomTransport, TransportError};
use crate::usage_table::{UsageRecord, UsageTable, UsageTableError, resolve};

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error(transparent)]
    UsageTable(#[from] UsageTableError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Usage u{0:02X} is not present on this device")]
    UsageNotFound(u8),
    #[error("Payload for u{usage:02X} is {len} bytes, usage holds {max}")]
    PayloadTooLong { usage: u8, len: usize, max: usize },
    #[error("Device is in bootloader mode")]
    BootloaderMode,
    #[error("Device is not in bootloader mode")]
    NotInBootloader,
    #[error("Decode error: {0}")]
    Decode(#[from] HeaderError),
}

/// What the host currently believes about the device.
///
/// Only a fresh read of u31 moves the device between `Connected` and
/// `BootloaderMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSessionState {
    Connected,
    BootloaderMode,
    Programming,
    Unreachable,
}

impl fmt::Display for DeviceSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSessionState::Connected => write!(f, "CONNECTED"),
            DeviceSessionState::BootloaderMode => write!(f, "BOOTLOADER"),
            DeviceSessionState::Programming => write!(f, "PROGRAMMING"),
            DeviceSessionState::Unreachable => write!(f, "UNREACHABLE"),
        }
    }
}

/// Exclusive handle to one aXiom device.
pub struct AxiomDevice<T: AxiomTransport> {
    transport: T,
    table: UsageTable,
    state: DeviceSessionState,
}

impl<T: AxiomTransport> AxiomDevice<T> {
    /// Take ownership of a transport and resolve the usage table.
    #[instrument(level = "info", skip(transport))]
    pub fn open(mut transport: T) -> Result<Self, DeviceError> {
        let table = resolve(&mut transport)?;
        let state = state_for(table.info());
        info!(
            device = %table.info().device_name(),
            fw = %format!("{}.{}.{}", table.info().fw_major, table.info().fw_minor, table.info().fw_patch),
            state = %state,
            "Device opened"
        );
        Ok(Self {
            transport,
            table,
            state,
        })
    }

    pub fn table(&self) -> &UsageTable {
        &self.table
    }

    pub fn info(&self) -> &DeviceInfo {
        self.table.info()
    }

    pub fn state(&self) -> DeviceSessionState {
        self.state
    }

    pub fn is_bootloader(&self) -> bool {
        self.table.info().is_bootloader()
    }

    /// Mark the device as being programmed until the next refresh.
    pub fn begin_programming(&mut self) {
        self.goto_state(DeviceSessionState::Programming);
    }

    fn goto_state(&mut self, new_state: DeviceSessionState) {
        if self.state != new_state {
            debug!(from = %self.state, to = %new_state, "Device state");
            self.state = new_state;
        }
    }

    /// Re-read u31 and replace the usage table.
    ///
    /// Needed after anything that may change firmware or reset the device.
    pub fn refresh(&mut self) -> Result<&UsageTable, DeviceError> {
        match resolve(&mut self.transport) {
            Ok(table) => {
                let state = state_for(table.info());
                self.table = table;
                self.goto_state(state);
                Ok(&self.table)
            }
            Err(e) => {
                warn!(error = %e, "Usage table refresh failed");
                self.goto_state(DeviceSessionState::Unreachable);
                Err(e.into())
            }
        }
    }

    pub fn record(&self, usage: u8) -> Result<UsageRecord, DeviceError> {
        self.table
            .get(usage)
            .copied()
            .ok_or(DeviceError::UsageNotFound(usage))
    }

    /// Read a whole usage.
    pub fn read_usage(&mut self, usage: u8) -> Result<Vec<u8>, DeviceError> {
        let record = self.record(usage)?;
        self.read_usage_len(usage, usize::from(record.max_length))
    }

    /// Read the first `len` bytes of a usage.
    pub fn read_usage_len(&mut self, usage: u8, len: usize) -> Result<Vec<u8>, DeviceError> {
        let record = self.record(usage)?;
        let data = self.transport.read_page(record.target_address, len)?;
        debug!(usage = %format!("u{:02X}", usage), len = data.len(), "Usage read");
        Ok(data)
    }

    /// Write a usage from its first byte.
    pub fn write_usage(&mut self, usage: u8, data: &[u8]) -> Result<(), DeviceError> {
        let record = self.record(usage)?;
        let max = usize::from(record.max_length);
        if data.len() > max {
            return Err(DeviceError::PayloadTooLong {
                usage,
                len: data.len(),
                max,
            });
        }
        self.transport.write_page(record.target_address, data)?;
        debug!(usage = %format!("u{:02X}", usage), len = data.len(), "Usage written");
        Ok(())
    }

    /// Send a system manager command through u02.
    pub fn send_command(&mut self, command: SystemCommand) -> Result<(), DeviceError> {
        if self.is_bootloader() {
            return Err(DeviceError::BootloaderMode);
        }
        let record = self.record(USAGE_SYSTEM_MANAGER)?;
        self.transport
            .write_page(record.target_address, &command.to_bytes())?;
        debug!(command = %command, "Command sent");
        Ok(())
    }

    /// Read and decode u33.
    pub fn read_crc_data(&mut self) -> Result<CrcData, DeviceError> {
        let record = self.record(USAGE_CRC_DATA)?;
        let data = self.read_usage(USAGE_CRC_DATA)?;
        Ok(CrcData::from_bytes(record.revision, &data)?)
    }

    /// Send the three-key bootloader entry sequence.
    ///
    /// The device only reports the new mode after a refresh.
    pub fn enter_bootloader(&mut self) -> Result<(), DeviceError> {
        for key in BOOTLOADER_ENTRY_KEYS {
            self.send_command(SystemCommand::EnterBootloader(key))?;
        }
        info!("Bootloader entry sequence sent");
        Ok(())
    }

    /// Send one firmware chunk. The device must be in bootloader mode.
    pub fn write_chunk(
        &mut self,
        header: &[u8; CHUNK_HEADER_LEN],
        payload: &[u8],
    ) -> Result<(), DeviceError> {
        if !self.is_bootloader() {
            return Err(DeviceError::NotInBootloader);
        }
        self.transport.write_chunk(header, payload)?;
        Ok(())
    }

    /// Ask the bootloader to restart into runtime firmware.
    pub fn bootloader_reset(&mut self) -> Result<(), DeviceError> {
        self.transport
            .write_page(BOOTLOADER_COMMAND_ADDRESS, &BOOTLOADER_CMD_RESET)?;
        info!("Bootloader reset sent");
        Ok(())
    }

    /// Read one frame's worth of bytes from the report FIFO.
    pub fn read_report_fifo(&mut self) -> Result<Vec<u8>, DeviceError> {
        let len = usize::from(self.table.max_report_len());
        self.read_usage_len(USAGE_REPORT_FIFO, len)
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Release the device and hand back its transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn close(mut self) -> Result<(), DeviceError> {
        self.transport.close()?;
        Ok(())
    }
}

fn state_for(info: &DeviceInfo) -> DeviceSessionState {
    if info.is_bootloader() {
        DeviceSessionState::BootloaderMode
    } else {
        DeviceSessionState::Connected
    }
}
