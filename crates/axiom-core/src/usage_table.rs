//! Usage table resolver.
//!
//! u31 sits at target address 0 and describes every other usage: where it
//! lives, how long it is and whether it is a report. The resolver reads the
//! header, then the whole directory, and builds an immutable lookup table.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::protocol::constants::{DEVICE_INFO_ADDRESS, PAGE_SIZE, USAGE_ENTRY_LEN};
use crate::protocol::{DeviceInfo, HeaderError};
use crate::transport::{AxiomTransport, TransportError};

#[derive(Error, Debug)]
pub enum UsageTableError {
    #[error("Device not responding: {0}")]
    NotResponding(String),
    #[error("Malformed usage table: {0}")]
    MalformedTable(String),
    #[error("Transport error: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for UsageTableError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout { .. } | TransportError::Disconnected => {
                UsageTableError::NotResponding(e.to_string())
            }
            other => UsageTableError::Transport(other),
        }
    }
}

impl From<HeaderError> for UsageTableError {
    fn from(e: HeaderError) -> Self {
        UsageTableError::MalformedTable(e.to_string())
    }
}

/// Location and size of one usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageRecord {
    pub usage_id: u8,
    pub revision: u8,
    pub target_address: u16,
    pub max_length: u16,
    pub num_pages: u8,
    pub is_report: bool,
}

impl UsageRecord {
    /// Decode one 6-byte directory entry.
    pub fn from_entry(entry: &[u8; USAGE_ENTRY_LEN]) -> Result<Self, UsageTableError> {
        let [usage_id, start_page, num_pages, offset_byte, revision, _] = *entry;
        let max_offset = u16::from(offset_byte & 0x7F);

        let last_page = u16::from(start_page) + u16::from(num_pages.saturating_sub(1));
        if last_page > 0xFF {
            return Err(UsageTableError::MalformedTable(format!(
                "u{:02X} spans pages 0x{:02X}..=0x{:X}",
                usage_id, start_page, last_page
            )));
        }

        let tail = (max_offset + 1) * 2;
        let max_length = if num_pages <= 1 {
            tail
        } else {
            (u16::from(num_pages) - 1) * PAGE_SIZE as u16 + tail
        };

        Ok(Self {
            usage_id,
            revision,
            target_address: u16::from(start_page) << 8,
            max_length,
            num_pages,
            is_report: offset_byte & 0x80 != 0,
        })
    }
}

impl fmt::Display for UsageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "u{:02X}  rev {:<3} 0x{:04X}  {:>5} bytes  {}",
            self.usage_id,
            self.revision,
            self.target_address,
            self.max_length,
            if self.is_report { "report" } else { "register" }
        )
    }
}

/// Snapshot of the device's usage directory.
#[derive(Debug, Clone)]
pub struct UsageTable {
    info: DeviceInfo,
    records: BTreeMap<u8, UsageRecord>,
    max_report_len: u16,
}

impl UsageTable {
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn get(&self, usage_id: u8) -> Option<&UsageRecord> {
        self.records.get(&usage_id)
    }

    pub fn contains(&self, usage_id: u8) -> bool {
        self.records.contains_key(&usage_id)
    }

    /// Records in usage ID order.
    pub fn records(&self) -> impl Iterator<Item = &UsageRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Longest report any report usage can produce.
    pub fn max_report_len(&self) -> u16 {
        self.max_report_len
    }

    /// Decode the full u31 directory (header plus entries).
    pub fn from_bytes(data: &[u8]) -> Result<Self, UsageTableError> {
        let info = DeviceInfo::from_bytes(data)?;
        let needed = DeviceInfo::SIZE + usize::from(info.num_usages) * USAGE_ENTRY_LEN;
        if data.len() < needed {
            return Err(UsageTableError::MalformedTable(format!(
                "directory truncated: expected {} bytes, got {}",
                needed,
                data.len()
            )));
        }
        if info.num_usages == 0 && !info.is_bootloader() {
            return Err(UsageTableError::MalformedTable(
                "runtime device reports zero usages".into(),
            ));
        }

        let mut records = BTreeMap::new();
        for raw in data[DeviceInfo::SIZE..needed].chunks_exact(USAGE_ENTRY_LEN) {
            let mut entry = [0u8; USAGE_ENTRY_LEN];
            entry.copy_from_slice(raw);
            let record = UsageRecord::from_entry(&entry)?;
            if records.insert(record.usage_id, record).is_some() {
                return Err(UsageTableError::MalformedTable(format!(
                    "duplicate entry for u{:02X}",
                    record.usage_id
                )));
            }
        }

        let max_report_len = records
            .values()
            .filter(|r| r.is_report)
            .map(|r| r.max_length)
            .max()
            .unwrap_or(0);

        Ok(Self {
            info,
            records,
            max_report_len,
        })
    }
}

impl fmt::Display for UsageTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Usage  Rev Address   Length  Kind")?;
        for record in self.records.values() {
            writeln!(f, "{}", record)?;
        }
        write!(f, "Max report length: {} bytes", self.max_report_len)
    }
}

/// Read u31 from the device and build its usage table.
#[instrument(level = "debug", skip(transport))]
pub fn resolve<T: AxiomTransport + ?Sized>(transport: &mut T) -> Result<UsageTable, UsageTableError> {
    let header = transport.read_page(DEVICE_INFO_ADDRESS, DeviceInfo::SIZE)?;
    if header.len() < DeviceInfo::SIZE {
        return Err(UsageTableError::MalformedTable(format!(
            "short header read: {} bytes",
            header.len()
        )));
    }
    if header.iter().all(|b| *b == 0x00) || header.iter().all(|b| *b == 0xFF) {
        return Err(UsageTableError::NotResponding(format!(
            "u31 header reads as 0x{:02X}",
            header[0]
        )));
    }

    let info = DeviceInfo::from_bytes(&header)?;
    let total = DeviceInfo::SIZE + usize::from(info.num_usages) * USAGE_ENTRY_LEN;
    let directory = transport.read_page(DEVICE_INFO_ADDRESS, total)?;
    let table = UsageTable::from_bytes(&directory)?;

    debug!(
        device = %table.info.device_name(),
        mode = %table.info.mode,
        usages = table.len(),
        max_report_len = table.max_report_len,
        "Usage table resolved"
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::*;
    use crate::transport::{MockIdentity, MockTransport, MockUsage};

    #[test]
    fn test_entry_lengths() {
        let single = UsageRecord::from_entry(&[0x42, 7, 1, 15, 1, 0]).unwrap();
        assert_eq!(single.target_address, 0x0700);
        assert_eq!(single.max_length, 32);
        assert!(!single.is_report);

        let multi = UsageRecord::from_entry(&[0x36, 5, 3, 0x80 | 9, 2, 0]).unwrap();
        assert_eq!(multi.max_length, 2 * 256 + 20);
        assert!(multi.is_report);

        let zero_pages = UsageRecord::from_entry(&[0x50, 9, 0, 3, 1, 0]).unwrap();
        assert_eq!(zero_pages.max_length, 8);
    }

    #[test]
    fn test_page_overflow() {
        assert!(matches!(
            UsageRecord::from_entry(&[0x50, 0xFF, 2, 0, 1, 0]),
            Err(UsageTableError::MalformedTable(_))
        ));
    }

    #[test]
    fn test_resolve_default_mock() {
        let mut mock = MockTransport::new();
        let table = resolve(&mut mock).unwrap();
        assert_eq!(table.info().device_name(), "AX80A");
        assert_eq!(table.len(), 11);
        assert_eq!(table.get(USAGE_CRC_DATA).unwrap().target_address, 0x0300);
        assert_eq!(table.get(USAGE_FACTORY_CALIBRATION).unwrap().max_length, 512);
        assert_eq!(table.max_report_len(), 58);
    }

    #[test]
    fn test_unresponsive_bus() {
        let mut mock = MockTransport::new();
        mock.set_unresponsive(true);
        assert!(matches!(
            resolve(&mut mock),
            Err(UsageTableError::NotResponding(_))
        ));
    }

    #[test]
    fn test_disconnect_is_not_responding() {
        let mut mock = MockTransport::new();
        mock.disconnect();
        assert!(matches!(
            resolve(&mut mock),
            Err(UsageTableError::NotResponding(_))
        ));
    }

    #[test]
    fn test_duplicate_usage() {
        let usages = vec![
            MockUsage::register(USAGE_DEVICE_INFO, 0, 64),
            MockUsage::register(USAGE_SYSTEM_MANAGER, 1, 64),
            MockUsage::register(USAGE_SYSTEM_MANAGER, 2, 64),
        ];
        let mut mock = MockTransport::with_layout(MockIdentity::default(), usages);
        assert!(matches!(
            resolve(&mut mock),
            Err(UsageTableError::MalformedTable(_))
        ));
    }

    #[test]
    fn test_runtime_without_usages() {
        let mut mock = MockTransport::with_layout(MockIdentity::default(), Vec::new());
        assert!(matches!(
            resolve(&mut mock),
            Err(UsageTableError::MalformedTable(_))
        ));
    }

    #[test]
    fn test_bootloader_without_usages() {
        let mock = MockTransport::with_layout(MockIdentity::default(), Vec::new());
        mock.enter_bootloader();
        let table = resolve(&mut mock.clone()).unwrap();
        assert!(table.info().is_bootloader());
        assert!(table.is_empty());
        assert_eq!(table.max_report_len(), 0);
    }
}
