//! nusb-based transport for the aXiom USB protocol bridge.
//!
//! The bridge tunnels aXiom transactions through 64-byte interrupt reports.
//! Each transaction is a `0x51` command carrying the 4-byte aXiom header
//! (address, length and read flag) followed by any write payload.

use nusb::descriptors::TransferType;
use nusb::io::{EndpointRead, EndpointWrite};
use nusb::transfer::{Direction, In, Interrupt, Out};
use nusb::{Interface, MaybeFuture, list_devices};
use std::io::{Read, Write};
use tracing::{debug, info, instrument, trace};

use super::traits::{AxiomTransport, TransportError};
use crate::protocol::bridge::{self, BridgeMode};
use crate::protocol::constants::{
    BRIDGE_CMD_AXIOM_RW, BRIDGE_PACKET_SIZE, BRIDGE_PIDS, BRIDGE_VENDOR_ID,
};

/// Bytes of a bridge packet taken by the command and aXiom header.
const FRAME_OVERHEAD: usize = 7;
/// Offset of read data in a bridge response.
const RESPONSE_DATA_OFFSET: usize = 2;
/// Largest write payload per packet, kept word aligned.
const MAX_WRITE_PAYLOAD: usize = (BRIDGE_PACKET_SIZE - FRAME_OVERHEAD) & !1;
/// Largest read per packet, kept word aligned.
const MAX_READ_PAYLOAD: usize = (BRIDGE_PACKET_SIZE - RESPONSE_DATA_OFFSET) & !1;

/// Build one bridge command packet.
pub(crate) fn encode_frame(address: u16, payload: &[u8], read_len: usize) -> Vec<u8> {
    let is_read = read_len > 0;
    let len = if is_read { read_len } else { payload.len() };
    let [addr_lo, addr_hi] = address.to_le_bytes();
    let [len_lo, len_hi] = (len as u16).to_le_bytes();

    let mut frame = Vec::with_capacity(BRIDGE_PACKET_SIZE);
    frame.push(BRIDGE_CMD_AXIOM_RW);
    frame.push((4 + payload.len()) as u8);
    frame.push(read_len as u8);
    frame.push(addr_lo);
    frame.push(addr_hi);
    frame.push(len_lo);
    frame.push((len_hi & 0x7F) | if is_read { 0x80 } else { 0 });
    frame.extend_from_slice(payload);
    frame.resize(BRIDGE_PACKET_SIZE, 0);
    frame
}

/// USB protocol bridge transport.
pub struct UsbBridgeTransport {
    writer: EndpointWrite<Interrupt>,
    reader: EndpointRead<Interrupt>,
    vid: u16,
    pid: u16,
}

/// Interrupt endpoint address for one direction on the claimed interface.
fn interrupt_endpoint(interface: &Interface, direction: Direction) -> Result<u8, TransportError> {
    interface
        .descriptors()
        .next()
        .and_then(|alt| {
            alt.endpoints()
                .find(|ep| ep.transfer_type() == TransferType::Interrupt && ep.direction() == direction)
                .map(|ep| ep.address())
        })
        .ok_or_else(|| TransportError::EndpointNotFound {
            ep_type: "Interrupt".into(),
            direction: format!("{:?}", direction),
        })
}

impl UsbBridgeTransport {
    /// Open the first protocol bridge found, in any of its modes.
    #[instrument(level = "info")]
    pub fn open() -> Result<Self, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == BRIDGE_VENDOR_ID && BRIDGE_PIDS.contains(&d.product_id()))
            .ok_or(TransportError::DeviceNotFound {
                vid: BRIDGE_VENDOR_ID,
            })?;
        Self::open_device_info(device_info)
    }

    fn open_device_info(device_info: nusb::DeviceInfo) -> Result<Self, TransportError> {
        let vid = device_info.vendor_id();
        let pid = device_info.product_id();
        let mode = BridgeMode::from_pid(pid);

        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            mode = ?mode,
            "Found protocol bridge"
        );

        let interface = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .detach_and_claim_interface(0)
            .wait()
            .map_err(|e| TransportError::ClaimInterfaceFailed {
                interface: 0,
                message: e.to_string(),
            })?;

        let in_endpoint = interrupt_endpoint(&interface, Direction::In)?;
        let out_endpoint = interrupt_endpoint(&interface, Direction::Out)?;

        let writer = interface
            .endpoint::<Interrupt, Out>(out_endpoint)
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .writer(BRIDGE_PACKET_SIZE);
        let reader = interface
            .endpoint::<Interrupt, In>(in_endpoint)
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .reader(BRIDGE_PACKET_SIZE);

        info!(
            in_ep = %format!("0x{:02X}", in_endpoint),
            out_ep = %format!("0x{:02X}", out_endpoint),
            "Bridge opened"
        );

        Ok(Self {
            writer,
            reader,
            vid,
            pid,
        })
    }

    pub fn vendor_id(&self) -> u16 {
        self.vid
    }

    pub fn product_id(&self) -> u16 {
        self.pid
    }

    /// Current bridge mode, from the PID the bridge enumerated with.
    pub fn mode(&self) -> Option<BridgeMode> {
        BridgeMode::from_pid(self.pid)
    }

    /// Stop the bridge and switch it to `mode`. Nothing is sent when the
    /// bridge is already in that mode. The bridge re-enumerates with the
    /// new PID, so this transport is stale afterwards.
    #[instrument(skip(self), fields(mode = %mode))]
    pub fn set_mode(&mut self, mode: BridgeMode) -> Result<(), TransportError> {
        if self.mode() == Some(mode) {
            debug!("Bridge already in requested mode");
            return Ok(());
        }
        self.send_packet(&bridge::stop_packet())?;
        self.send_packet(&mode.packet())?;
        info!(from = ?self.mode(), "Bridge mode switched");
        Ok(())
    }

    /// Write one raw packet with no response expected.
    fn send_packet(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        self.writer
            .write_all(packet)
            .and_then(|_| self.writer.flush())
            .map_err(|e| TransportError::WriteFailed {
                address: 0,
                message: e.to_string(),
            })
    }

    /// Send one command packet and read the bridge's response packet.
    fn transact(&mut self, address: u16, frame: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.writer
            .write_all(frame)
            .and_then(|_| self.writer.flush())
            .map_err(|e| TransportError::WriteFailed {
                address,
                message: e.to_string(),
            })?;

        let mut response = vec![0u8; BRIDGE_PACKET_SIZE];
        let n = self
            .reader
            .read(&mut response)
            .map_err(|e| TransportError::ReadFailed {
                address,
                message: e.to_string(),
            })?;
        response.truncate(n);
        trace!(address = %format!("0x{:04X}", address), len = n, "Bridge response");

        if response.first() != Some(&BRIDGE_CMD_AXIOM_RW) {
            return Err(TransportError::ReadFailed {
                address,
                message: format!("unexpected bridge response {:02X?}", response.first()),
            });
        }
        Ok(response)
    }
}

impl AxiomTransport for UsbBridgeTransport {
    #[instrument(skip(self), fields(address = %format!("0x{:04X}", address)))]
    fn read_page(&mut self, address: u16, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut data = Vec::with_capacity(len);
        while data.len() < len {
            let piece = (len - data.len()).min(MAX_READ_PAYLOAD);
            let at = address.wrapping_add(data.len() as u16);
            let response = self.transact(at, &encode_frame(at, &[], piece))?;
            let body = response
                .get(RESPONSE_DATA_OFFSET..RESPONSE_DATA_OFFSET + piece)
                .ok_or_else(|| TransportError::ReadFailed {
                    address: at,
                    message: format!("short response: {} bytes", response.len()),
                })?;
            data.extend_from_slice(body);
        }
        debug!(bytes_read = data.len(), "Read complete");
        Ok(data)
    }

    #[instrument(skip(self, data), fields(address = %format!("0x{:04X}", address), len = data.len()))]
    fn write_page(&mut self, address: u16, data: &[u8]) -> Result<(), TransportError> {
        for (i, piece) in data.chunks(MAX_WRITE_PAYLOAD).enumerate() {
            let at = address.wrapping_add((i * MAX_WRITE_PAYLOAD) as u16);
            self.transact(at, &encode_frame(at, piece, 0))?;
        }
        debug!(bytes_written = data.len(), "Write complete");
        Ok(())
    }

    fn max_write_len(&self) -> usize {
        MAX_WRITE_PAYLOAD
    }

    fn bridge_mode(&self) -> Result<BridgeMode, TransportError> {
        self.mode().ok_or_else(|| {
            TransportError::Unsupported(format!("unknown bridge PID {:04X}", self.pid))
        })
    }

    fn set_bridge_mode(&mut self, mode: BridgeMode) -> Result<(), TransportError> {
        self.set_mode(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_frame() {
        let frame = encode_frame(0x0300, &[], 32);
        assert_eq!(&frame[..7], &[0x51, 4, 32, 0x00, 0x03, 32, 0x80]);
        assert_eq!(frame.len(), BRIDGE_PACKET_SIZE);
    }

    #[test]
    fn test_write_frame() {
        let frame = encode_frame(0x0102, &[0xAA, 0xBB], 0);
        assert_eq!(&frame[..9], &[0x51, 6, 0, 0x02, 0x01, 2, 0x00, 0xAA, 0xBB]);
    }

    #[test]
    fn test_payload_limits_fit_packet() {
        assert!(FRAME_OVERHEAD + MAX_WRITE_PAYLOAD <= BRIDGE_PACKET_SIZE);
        assert!(RESPONSE_DATA_OFFSET + MAX_READ_PAYLOAD <= BRIDGE_PACKET_SIZE);
        assert_eq!(MAX_WRITE_PAYLOAD % 2, 0);
    }
}
