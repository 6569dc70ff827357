//! Protocol constants for aXiom touch controllers.
//!
//! Usage numbers, fixed target addresses and system-manager command words.

// ============================================================================
// Usage Numbers
// ============================================================================

/// System manager report.
pub const USAGE_SYSTEM_REPORT: u8 = 0x01;
/// System manager command register.
pub const USAGE_SYSTEM_MANAGER: u8 = 0x02;
/// Customer data (serial numbers, part numbers, ...).
pub const USAGE_CUSTOMER_DATA: u8 = 0x04;
/// Device information and usage table.
pub const USAGE_DEVICE_INFO: u8 = 0x31;
/// CRC data for firmware and config.
pub const USAGE_CRC_DATA: u8 = 0x33;
/// Report FIFO.
pub const USAGE_REPORT_FIFO: u8 = 0x34;
/// Factory calibration data.
pub const USAGE_FACTORY_CALIBRATION: u8 = 0x36;
/// 2D multi-target touch report.
pub const USAGE_TOUCH_REPORT: u8 = 0x41;
/// Hotspots report.
pub const USAGE_HOTSPOT_REPORT: u8 = 0x45;
/// Per-target pilot ID metadata report.
pub const USAGE_PILOT_REPORT: u8 = 0x46;

// ============================================================================
// Addresses and Sizes
// ============================================================================

/// u31 is always mapped at the bottom of the page space.
pub const DEVICE_INFO_ADDRESS: u16 = 0x0000;

/// u31 header length in bytes.
pub const DEVICE_INFO_HEADER_LEN: usize = 12;

/// Length of one usage table entry.
pub const USAGE_ENTRY_LEN: usize = 6;

/// Size of a target address page.
pub const PAGE_SIZE: usize = 256;

/// Default maximum payload of a single transport write.
pub const DEFAULT_MAX_WRITE_LEN: usize = 256;

// ============================================================================
// Bootloader
// ============================================================================

/// Address firmware chunk fragments are written to while in bootloader mode.
pub const BOOTLOADER_DATA_ADDRESS: u16 = 0x0100;

/// Address of the bootloader command register.
pub const BOOTLOADER_COMMAND_ADDRESS: u16 = 0x0000;

/// Bootloader command: reset into runtime firmware.
pub const BOOTLOADER_CMD_RESET: [u8; 2] = [0x02, 0x00];

/// Keys sent, in order, with the enter-bootloader command.
pub const BOOTLOADER_ENTRY_KEYS: [u16; 3] = [0x5555, 0xAAAA, 0xA55A];

// ============================================================================
// System Manager (u02) Commands
// ============================================================================

pub const CMD_SOFT_RESET: u16 = 0x0001;
pub const CMD_STOP: u16 = 0x0005;
pub const CMD_SAVE_CONFIG: u16 = 0x0007;
pub const CMD_FILL_CONFIG: u16 = 0x0009;
pub const CMD_ENTER_BOOTLOADER: u16 = 0x000B;

/// Parameters that unlock the save-config command.
pub const SAVE_CONFIG_KEYS: [u16; 2] = [0xB10C, 0xC0DE];

// ============================================================================
// Container Formats
// ============================================================================

/// `.th2cfgbin` signature (big-endian at offset 0).
pub const CONFIG_SIGNATURE: u32 = 0x2007_1969;

/// `.th2cfgbin` header length, signature included.
pub const CONFIG_HEADER_LEN: usize = 13;

/// Per-record overhead in a `.th2cfgbin` file.
pub const CONFIG_RECORD_HEADER_LEN: usize = 5;

/// `.axfw` signature.
pub const AXFW_SIGNATURE: [u8; 4] = *b"AXFW";

/// `.axfw` header length.
pub const AXFW_HEADER_LEN: usize = 24;

/// Offset from which the `.axfw` file CRC is computed.
pub const AXFW_CRC_START: usize = 8;

/// The only `.axfw` format version this decoder accepts (2.0).
pub const AXFW_FORMAT_VERSION: u16 = 0x0200;

/// Firmware chunk header length.
pub const CHUNK_HEADER_LEN: usize = 8;

// ============================================================================
// USB Protocol Bridge
// ============================================================================

pub const BRIDGE_VENDOR_ID: u16 = 0x03EB;
pub const BRIDGE_PID_BASIC: u16 = 0x2F04;
pub const BRIDGE_PID_DIGITIZER: u16 = 0x2F08;
pub const BRIDGE_PID_ABSOLUTE_MOUSE: u16 = 0x6F02;

/// All bridge PIDs for device discovery.
pub const BRIDGE_PIDS: &[u16] = &[
    BRIDGE_PID_BASIC,
    BRIDGE_PID_DIGITIZER,
    BRIDGE_PID_ABSOLUTE_MOUSE,
];

/// HID report size used by the bridge.
pub const BRIDGE_PACKET_SIZE: usize = 64;

/// Bridge command that performs an aXiom read/write transaction.
pub const BRIDGE_CMD_AXIOM_RW: u8 = 0x51;

/// Bridge command that halts any transaction the bridge is running.
pub const BRIDGE_CMD_STOP: u8 = 0x8A;

/// Bridge command that switches the USB personality.
pub const BRIDGE_CMD_SET_MODE: u8 = 0xE7;
