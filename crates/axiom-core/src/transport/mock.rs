//! Mock transport that simulates an aXiom device in memory.
//!
//! The mock keeps a 64 KiB target address space, lays out a usage table at
//! page 0 and reacts to system-manager and bootloader commands the way a
//! device does, closely enough to drive the sequencers in tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::traits::{AxiomTransport, TransportError, fragment_chunk};
use crate::protocol::bridge::{self, BridgeMode};
use crate::protocol::SystemCommand;
use crate::protocol::constants::*;

const MEMORY_SIZE: usize = 0x1_0000;

/// Default runtime CRC of the simulated firmware.
pub const MOCK_RUNTIME_CRC: u32 = 0x1122_3344;
/// Default bootloader CRC.
pub const MOCK_BOOTLOADER_CRC: u32 = 0xB007_B007;
/// Default config CRC words in u33.
pub const MOCK_CONFIG_CRCS: [u32; 5] = [0xC0F1_0001, 0xC0F1_0002, 0xC0F1_0003, 0xC0F1_0004, 0xC0F1_0005];

/// One usage table entry of the simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockUsage {
    pub id: u8,
    pub start_page: u8,
    pub num_pages: u8,
    pub max_offset: u8,
    pub revision: u8,
    pub is_report: bool,
}

impl MockUsage {
    /// Register usage of `len` bytes (even, non-zero) starting at `start_page`.
    pub fn register(id: u8, start_page: u8, len: usize) -> Self {
        let num_pages = len.div_ceil(PAGE_SIZE).max(1);
        let tail = len - (num_pages - 1) * PAGE_SIZE;
        Self {
            id,
            start_page,
            num_pages: num_pages as u8,
            max_offset: (tail / 2).saturating_sub(1) as u8,
            revision: 1,
            is_report: false,
        }
    }

    /// Report usage; `len` includes the two-byte frame header.
    pub fn report(id: u8, start_page: u8, len: usize) -> Self {
        Self {
            is_report: true,
            ..Self::register(id, start_page, len)
        }
    }

    pub fn with_revision(self, revision: u8) -> Self {
        Self { revision, ..self }
    }

    pub fn address(&self) -> u16 {
        u16::from(self.start_page) << 8
    }

    pub fn len(&self) -> usize {
        let words = usize::from(self.max_offset) + 1;
        if self.num_pages <= 1 {
            words * 2
        } else {
            (usize::from(self.num_pages) - 1) * PAGE_SIZE + words * 2
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_bytes(self) -> [u8; USAGE_ENTRY_LEN] {
        [
            self.id,
            self.start_page,
            self.num_pages,
            self.max_offset | if self.is_report { 0x80 } else { 0 },
            self.revision,
            0,
        ]
    }
}

/// The usage layout every fresh mock starts from.
pub fn default_usages() -> Vec<MockUsage> {
    vec![
        MockUsage::register(USAGE_DEVICE_INFO, 0, DEVICE_INFO_HEADER_LEN + 11 * USAGE_ENTRY_LEN),
        MockUsage::register(USAGE_SYSTEM_MANAGER, 1, 64),
        MockUsage::register(USAGE_CUSTOMER_DATA, 2, 256),
        MockUsage::register(USAGE_CRC_DATA, 3, 32).with_revision(2),
        MockUsage::register(USAGE_REPORT_FIFO, 4, 64),
        MockUsage::register(USAGE_FACTORY_CALIBRATION, 5, 512),
        MockUsage::register(0x42, 7, 32),
        MockUsage::report(USAGE_SYSTEM_REPORT, 8, 48),
        MockUsage::report(USAGE_TOUCH_REPORT, 9, 58).with_revision(4),
        MockUsage::report(USAGE_HOTSPOT_REPORT, 10, 36),
        MockUsage::report(USAGE_PILOT_REPORT, 11, 14),
    ]
}

/// Identity written into the simulated u31 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockIdentity {
    pub device_id: u16,
    pub version: (u8, u8, u8),
    pub variant: u8,
    pub production: bool,
}

impl Default for MockIdentity {
    fn default() -> Self {
        Self {
            device_id: 0x0050,
            version: (4, 8, 7),
            variant: 3,
            production: true,
        }
    }
}

#[derive(Debug)]
struct MockDevice {
    memory: Vec<u8>,
    usages: Vec<MockUsage>,
    identity: MockIdentity,
    bootloader: bool,
    boot_keys: Vec<u16>,
    refuse_bootloader: bool,
    stay_in_bootloader: bool,
    drop_link_on_reset: bool,
    unresponsive: bool,
    connected: bool,
    post_reset_u33: Option<Vec<u8>>,
    post_update: Option<((u8, u8, u8), u32)>,
    reports: VecDeque<Vec<u8>>,
    fifo_reads: usize,
    write_log: Vec<(u16, Vec<u8>)>,
    command_log: Vec<SystemCommand>,
    chunk_log: Vec<([u8; CHUNK_HEADER_LEN], Vec<u8>)>,
    chunk_stream: Vec<u8>,
    fail_writes_after: Option<usize>,
    writes_ok: usize,
    bridge_mode: BridgeMode,
    bridge_packets: Vec<[u8; BRIDGE_PACKET_SIZE]>,
}

impl MockDevice {
    fn new(identity: MockIdentity, usages: Vec<MockUsage>) -> Self {
        let mut dev = Self {
            memory: vec![0; MEMORY_SIZE],
            usages,
            identity,
            bootloader: false,
            boot_keys: Vec::new(),
            refuse_bootloader: false,
            stay_in_bootloader: false,
            drop_link_on_reset: false,
            unresponsive: false,
            connected: true,
            post_reset_u33: None,
            post_update: None,
            reports: VecDeque::new(),
            fifo_reads: 0,
            write_log: Vec::new(),
            command_log: Vec::new(),
            chunk_log: Vec::new(),
            chunk_stream: Vec::new(),
            fail_writes_after: None,
            writes_ok: 0,
            bridge_mode: BridgeMode::Basic,
            bridge_packets: Vec::new(),
        };
        dev.write_table();

        let mut u33 = Vec::new();
        for word in [MOCK_RUNTIME_CRC, MOCK_RUNTIME_CRC, MOCK_BOOTLOADER_CRC]
            .into_iter()
            .chain(MOCK_CONFIG_CRCS)
        {
            u33.extend_from_slice(&word.to_le_bytes());
        }
        dev.store(USAGE_CRC_DATA, &u33);
        dev
    }

    fn usage(&self, id: u8) -> Option<MockUsage> {
        self.usages.iter().copied().find(|u| u.id == id)
    }

    fn write_table(&mut self) {
        let id = &self.identity;
        let mode = if self.bootloader { 0 } else { 0x8000 };
        let id_word = (id.device_id & 0x7FFF) | mode;
        let (major, minor, patch) = id.version;
        let mut header = vec![
            id_word.to_le_bytes()[0],
            id_word.to_le_bytes()[1],
            minor,
            major,
            (id.variant & 0x3F) | if id.production { 0x80 } else { 0 },
            patch,
            2,
            1,
            0x34,
            0x12,
            self.usages.len() as u8,
            0x03,
        ];
        for usage in &self.usages {
            header.extend_from_slice(&usage.to_bytes());
        }
        self.memory[..header.len()].copy_from_slice(&header);
    }

    fn store(&mut self, id: u8, data: &[u8]) {
        if let Some(u) = self.usage(id) {
            let start = usize::from(u.address());
            let len = data.len().min(u.len());
            self.memory[start..start + len].copy_from_slice(&data[..len]);
        }
    }

    fn region(&self, id: u8) -> Option<std::ops::Range<usize>> {
        self.usage(id).map(|u| {
            let start = usize::from(u.address());
            start..start + u.len()
        })
    }

    fn read(&mut self, address: u16, len: usize) -> Result<Vec<u8>, TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        if self.unresponsive {
            return Ok(vec![0xFF; len]);
        }
        let start = usize::from(address);
        if start + len > MEMORY_SIZE {
            return Err(TransportError::ReadFailed {
                address,
                message: format!("{} bytes past end of address space", len),
            });
        }
        let fifo = self.region(USAGE_REPORT_FIFO).map(|r| r.start);
        if !self.bootloader && fifo == Some(start) {
            self.fifo_reads += 1;
            let mut frame = self.reports.pop_front().unwrap_or_default();
            frame.resize(len, 0);
            return Ok(frame);
        }
        Ok(self.memory[start..start + len].to_vec())
    }

    fn write(&mut self, address: u16, data: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        if let Some(limit) = self.fail_writes_after
            && self.writes_ok >= limit
        {
            return Err(TransportError::WriteFailed {
                address,
                message: "injected failure".into(),
            });
        }
        let start = usize::from(address);
        if start + data.len() > MEMORY_SIZE {
            return Err(TransportError::WriteFailed {
                address,
                message: format!("{} bytes past end of address space", data.len()),
            });
        }
        self.writes_ok += 1;
        self.write_log.push((address, data.to_vec()));

        if self.bootloader {
            self.bootloader_write(address, data);
            let is_reset = address == BOOTLOADER_COMMAND_ADDRESS && data == BOOTLOADER_CMD_RESET;
            if is_reset && self.drop_link_on_reset {
                return Err(TransportError::Disconnected);
            }
            return Ok(());
        }

        if self.region(USAGE_SYSTEM_MANAGER).map(|r| r.start) == Some(start) {
            if let Some(cmd) = SystemCommand::from_bytes(data) {
                self.command(cmd);
            }
            return Ok(());
        }

        let read_only = [USAGE_DEVICE_INFO, USAGE_CRC_DATA]
            .iter()
            .filter_map(|id| self.region(*id))
            .any(|r| r.contains(&start));
        if !read_only {
            self.memory[start..start + data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    fn command(&mut self, cmd: SystemCommand) {
        self.command_log.push(cmd);
        match cmd {
            SystemCommand::FillConfig => {
                if let Some(r) = self.region(USAGE_CUSTOMER_DATA) {
                    self.memory[r].fill(0);
                }
            }
            SystemCommand::SoftReset => {
                if let Some(u33) = self.post_reset_u33.clone() {
                    self.store(USAGE_CRC_DATA, &u33);
                }
            }
            SystemCommand::EnterBootloader(key) => {
                let expected = BOOTLOADER_ENTRY_KEYS.get(self.boot_keys.len()).copied();
                if expected == Some(key) {
                    self.boot_keys.push(key);
                } else {
                    self.boot_keys.clear();
                }
                if self.boot_keys.len() == BOOTLOADER_ENTRY_KEYS.len() {
                    self.boot_keys.clear();
                    if !self.refuse_bootloader {
                        self.bootloader = true;
                        self.write_table();
                    }
                }
            }
            SystemCommand::Stop | SystemCommand::SaveConfig => {}
        }
    }

    fn bootloader_write(&mut self, address: u16, data: &[u8]) {
        if address == BOOTLOADER_DATA_ADDRESS {
            self.chunk_stream.extend_from_slice(data);
        } else if address == BOOTLOADER_COMMAND_ADDRESS && data == BOOTLOADER_CMD_RESET {
            if self.stay_in_bootloader {
                return;
            }
            self.bootloader = false;
            if let Some((version, nvm_crc)) = self.post_update {
                self.identity.version = version;
                if let Some(r) = self.region(USAGE_CRC_DATA) {
                    self.memory[r.start..r.start + 4].copy_from_slice(&nvm_crc.to_le_bytes());
                    self.memory[r.start + 4..r.start + 8].copy_from_slice(&nvm_crc.to_le_bytes());
                }
            }
            self.write_table();
        }
    }
}

/// Mock transport for driving sequencers and the report loop in tests.
///
/// Clones share the same simulated device, so a test keeps one handle for
/// inspection while the device owns another.
#[derive(Clone)]
pub struct MockTransport {
    device: Arc<Mutex<MockDevice>>,
}

impl MockTransport {
    /// Runtime-mode device with the default identity and usage table.
    pub fn new() -> Self {
        Self::with_layout(MockIdentity::default(), default_usages())
    }

    pub fn with_identity(identity: MockIdentity) -> Self {
        Self::with_layout(identity, default_usages())
    }

    pub fn with_layout(identity: MockIdentity, usages: Vec<MockUsage>) -> Self {
        Self {
            device: Arc::new(Mutex::new(MockDevice::new(identity, usages))),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockDevice> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Target address of a usage in the simulated table.
    pub fn usage_address(&self, id: u8) -> Option<u16> {
        self.state().usage(id).map(|u| u.address())
    }

    /// Overwrite a usage's contents directly, bypassing write rules.
    pub fn set_usage(&self, id: u8, data: &[u8]) {
        self.state().store(id, data);
    }

    /// Current contents of a usage.
    pub fn usage_bytes(&self, id: u8) -> Vec<u8> {
        let state = self.state();
        state
            .region(id)
            .map(|r| state.memory[r].to_vec())
            .unwrap_or_default()
    }

    /// Raw bytes at a target address.
    pub fn peek(&self, address: u16, len: usize) -> Vec<u8> {
        let start = usize::from(address);
        self.state().memory[start..start + len].to_vec()
    }

    /// Overwrite raw bytes, bypassing write rules.
    pub fn poke(&self, address: u16, data: &[u8]) {
        let start = usize::from(address);
        self.state().memory[start..start + data.len()].copy_from_slice(data);
    }

    /// u33 contents loaded after the next soft reset.
    pub fn set_post_reset_u33(&self, u33: &[u8]) {
        self.state().post_reset_u33 = Some(u33.to_vec());
    }

    /// Version and NVM CRC the device reports after a bootloader reset.
    pub fn set_post_update(&self, version: (u8, u8, u8), nvm_crc: u32) {
        self.state().post_update = Some((version, nvm_crc));
    }

    /// Ignore the bootloader entry sequence.
    pub fn set_refuse_bootloader(&self, refuse: bool) {
        self.state().refuse_bootloader = refuse;
    }

    /// Ignore the bootloader reset command.
    pub fn set_stay_in_bootloader(&self, stay: bool) {
        self.state().stay_in_bootloader = stay;
    }

    /// Act on the bootloader reset command but fail the write with
    /// `Disconnected`, as a bridge does when the device drops off the bus
    /// before acknowledging.
    pub fn set_drop_link_on_reset(&self, drop: bool) {
        self.state().drop_link_on_reset = drop;
    }

    /// Put the device in bootloader mode immediately.
    pub fn enter_bootloader(&self) {
        let mut state = self.state();
        state.bootloader = true;
        state.write_table();
    }

    pub fn is_bootloader(&self) -> bool {
        self.state().bootloader
    }

    /// Reads return all 0xFF, as from a floating bus.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.state().unresponsive = unresponsive;
    }

    /// Fail every write after `count` successful ones.
    pub fn fail_writes_after(&self, count: usize) {
        let mut state = self.state();
        state.fail_writes_after = Some(state.writes_ok + count);
    }

    /// Queue a report frame for the u34 FIFO.
    pub fn queue_report(&self, frame: &[u8]) {
        self.state().reports.push_back(frame.to_vec());
    }

    pub fn pending_reports(&self) -> usize {
        self.state().reports.len()
    }

    /// Number of reads issued against the FIFO address.
    pub fn fifo_reads(&self) -> usize {
        self.state().fifo_reads
    }

    /// Every successful write as `(address, data)`.
    pub fn writes(&self) -> Vec<(u16, Vec<u8>)> {
        self.state().write_log.clone()
    }

    /// Writes that landed on a given address.
    pub fn writes_to(&self, address: u16) -> Vec<Vec<u8>> {
        self.state()
            .write_log
            .iter()
            .filter(|(a, _)| *a == address)
            .map(|(_, d)| d.clone())
            .collect()
    }

    /// System manager commands in the order received.
    pub fn commands(&self) -> Vec<SystemCommand> {
        self.state().command_log.clone()
    }

    /// Firmware chunks in the order received.
    pub fn chunks(&self) -> Vec<([u8; CHUNK_HEADER_LEN], Vec<u8>)> {
        self.state().chunk_log.clone()
    }

    /// Bytes received at the bootloader data address.
    pub fn chunk_stream(&self) -> Vec<u8> {
        self.state().chunk_stream.clone()
    }

    /// Raw packets sent to the simulated protocol bridge.
    pub fn bridge_packets(&self) -> Vec<[u8; BRIDGE_PACKET_SIZE]> {
        self.state().bridge_packets.clone()
    }

    pub fn clear_logs(&self) {
        let mut state = self.state();
        state.write_log.clear();
        state.command_log.clear();
        state.chunk_log.clear();
        state.chunk_stream.clear();
        state.bridge_packets.clear();
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        self.state().connected = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        self.state().connected = true;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl AxiomTransport for MockTransport {
    fn read_page(&mut self, address: u16, len: usize) -> Result<Vec<u8>, TransportError> {
        self.state().read(address, len)
    }

    fn write_page(&mut self, address: u16, data: &[u8]) -> Result<(), TransportError> {
        self.state().write(address, data)
    }

    fn write_chunk(
        &mut self,
        header: &[u8; CHUNK_HEADER_LEN],
        payload: &[u8],
    ) -> Result<(), TransportError> {
        self.state().chunk_log.push((*header, payload.to_vec()));
        for fragment in fragment_chunk(header, payload, self.max_write_len()) {
            self.write_page(BOOTLOADER_DATA_ADDRESS, &fragment)?;
        }
        Ok(())
    }

    fn bridge_mode(&self) -> Result<BridgeMode, TransportError> {
        Ok(self.state().bridge_mode)
    }

    fn set_bridge_mode(&mut self, mode: BridgeMode) -> Result<(), TransportError> {
        let mut state = self.state();
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        if state.bridge_mode != mode {
            state.bridge_packets.push(bridge::stop_packet());
            state.bridge_packets.push(mode.packet());
            state.bridge_mode = mode;
        }
        Ok(())
    }
}
