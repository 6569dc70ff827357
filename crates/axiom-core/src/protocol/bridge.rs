//! USB protocol bridge modes.
//!
//! The bridge enumerates with a different PID in each mode. Switching is a
//! stop packet followed by a mode packet; the bridge then re-enumerates.

use std::fmt;
use std::str::FromStr;

use super::constants::{
    BRIDGE_CMD_SET_MODE, BRIDGE_CMD_STOP, BRIDGE_PACKET_SIZE, BRIDGE_PID_ABSOLUTE_MOUSE,
    BRIDGE_PID_BASIC, BRIDGE_PID_DIGITIZER,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeMode {
    /// Plain protocol bridge (TBP).
    Basic,
    /// HID digitizer plus the protocol bridge.
    Digitizer,
    /// HID absolute mouse plus the protocol bridge.
    AbsoluteMouse,
}

impl BridgeMode {
    pub const ALL: [BridgeMode; 3] = [
        BridgeMode::Basic,
        BridgeMode::Digitizer,
        BridgeMode::AbsoluteMouse,
    ];

    /// Mode the bridge is in, judged by the PID it enumerated with.
    pub fn from_pid(pid: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.pid() == pid)
    }

    pub fn pid(&self) -> u16 {
        match self {
            BridgeMode::Basic => BRIDGE_PID_BASIC,
            BridgeMode::Digitizer => BRIDGE_PID_DIGITIZER,
            BridgeMode::AbsoluteMouse => BRIDGE_PID_ABSOLUTE_MOUSE,
        }
    }

    fn selector(&self) -> u8 {
        match self {
            BridgeMode::Basic => 0xFA,
            BridgeMode::Digitizer => 0xFE,
            BridgeMode::AbsoluteMouse => 0xFF,
        }
    }

    /// The packet that puts the bridge into this mode.
    ///
    /// Mouse mode also carries X and Y scaling (multiplier, divisor), left
    /// at 1:1.
    pub fn packet(&self) -> [u8; BRIDGE_PACKET_SIZE] {
        let mut packet = [0u8; BRIDGE_PACKET_SIZE];
        packet[1] = self.selector();
        packet[2] = BRIDGE_CMD_SET_MODE;
        if *self == BridgeMode::AbsoluteMouse {
            packet[3] = 0x01;
            for scale in packet[4..12].chunks_exact_mut(2) {
                scale.copy_from_slice(&1u16.to_le_bytes());
            }
        }
        packet
    }
}

/// The packet that halts the bridge before a mode change.
pub fn stop_packet() -> [u8; BRIDGE_PACKET_SIZE] {
    let mut packet = [0u8; BRIDGE_PACKET_SIZE];
    packet[1] = BRIDGE_CMD_STOP;
    packet
}

impl fmt::Display for BridgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeMode::Basic => write!(f, "tbp"),
            BridgeMode::Digitizer => write!(f, "digi"),
            BridgeMode::AbsoluteMouse => write!(f, "mouse"),
        }
    }
}

impl FromStr for BridgeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tbp" | "basic" => Ok(BridgeMode::Basic),
            "digi" | "digitizer" => Ok(BridgeMode::Digitizer),
            "mouse" => Ok(BridgeMode::AbsoluteMouse),
            other => Err(format!("unknown bridge mode '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_packets() {
        assert_eq!(&BridgeMode::Basic.packet()[..4], &[0x00, 0xFA, 0xE7, 0x00]);
        assert_eq!(&BridgeMode::Digitizer.packet()[..4], &[0x00, 0xFE, 0xE7, 0x00]);
        assert_eq!(
            &BridgeMode::AbsoluteMouse.packet()[..12],
            &[0x00, 0xFF, 0xE7, 0x01, 1, 0, 1, 0, 1, 0, 1, 0]
        );
        assert!(BridgeMode::Basic.packet()[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_mode_from_pid() {
        for mode in BridgeMode::ALL {
            assert_eq!(BridgeMode::from_pid(mode.pid()), Some(mode));
        }
        assert_eq!(BridgeMode::from_pid(0x1234), None);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("digi".parse::<BridgeMode>(), Ok(BridgeMode::Digitizer));
        assert_eq!("TBP".parse::<BridgeMode>(), Ok(BridgeMode::Basic));
        assert!("hid".parse::<BridgeMode>().is_err());
    }
}
