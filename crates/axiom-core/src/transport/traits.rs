//! Transport layer abstraction.
//!
//! Defines the `AxiomTransport` trait for page-addressed reads and writes,
//! allowing different implementations (USB bridge, mock, etc.).

use thiserror::Error;

use crate::protocol::BridgeMode;
use crate::protocol::constants::{BOOTLOADER_DATA_ADDRESS, CHUNK_HEADER_LEN, DEFAULT_MAX_WRITE_LEN};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X}")]
    DeviceNotFound { vid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Write to 0x{address:04X} failed: {message}")]
    WriteFailed { address: u16, message: String },

    #[error("Read from 0x{address:04X} failed: {message}")]
    ReadFailed { address: u16, message: String },

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Unsupported transport: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Byte transport to an aXiom device.
///
/// Every call takes `&mut self`; whoever holds the transport has the bus.
pub trait AxiomTransport: Send {
    /// Read `len` bytes starting at a target address.
    fn read_page(&mut self, address: u16, len: usize) -> Result<Vec<u8>, TransportError>;

    /// Write `data` starting at a target address.
    ///
    /// Implementations split writes larger than their packet size.
    fn write_page(&mut self, address: u16, data: &[u8]) -> Result<(), TransportError>;

    /// Largest single write the device accepts.
    fn max_write_len(&self) -> usize {
        DEFAULT_MAX_WRITE_LEN
    }

    /// Send one firmware chunk while the device is in bootloader mode.
    fn write_chunk(
        &mut self,
        header: &[u8; CHUNK_HEADER_LEN],
        payload: &[u8],
    ) -> Result<(), TransportError> {
        for fragment in fragment_chunk(header, payload, self.max_write_len()) {
            self.write_page(BOOTLOADER_DATA_ADDRESS, &fragment)?;
        }
        Ok(())
    }

    /// Mode of the USB protocol bridge in front of the device, if any.
    fn bridge_mode(&self) -> Result<BridgeMode, TransportError> {
        Err(TransportError::Unsupported(
            "bridge mode needs the USB protocol bridge".into(),
        ))
    }

    /// Switch the USB protocol bridge to another mode. The bridge
    /// re-enumerates afterwards, so the transport must be reopened.
    fn set_bridge_mode(&mut self, _mode: BridgeMode) -> Result<(), TransportError> {
        Err(TransportError::Unsupported(
            "bridge mode needs the USB protocol bridge".into(),
        ))
    }

    /// Release the underlying device.
    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

impl<T: AxiomTransport + ?Sized> AxiomTransport for Box<T> {
    fn read_page(&mut self, address: u16, len: usize) -> Result<Vec<u8>, TransportError> {
        (**self).read_page(address, len)
    }

    fn write_page(&mut self, address: u16, data: &[u8]) -> Result<(), TransportError> {
        (**self).write_page(address, data)
    }

    fn max_write_len(&self) -> usize {
        (**self).max_write_len()
    }

    fn write_chunk(
        &mut self,
        header: &[u8; CHUNK_HEADER_LEN],
        payload: &[u8],
    ) -> Result<(), TransportError> {
        (**self).write_chunk(header, payload)
    }

    fn bridge_mode(&self) -> Result<BridgeMode, TransportError> {
        (**self).bridge_mode()
    }

    fn set_bridge_mode(&mut self, mode: BridgeMode) -> Result<(), TransportError> {
        (**self).set_bridge_mode(mode)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }
}

/// Split a chunk (header then payload) into writes of at most `max_len` bytes.
pub fn fragment_chunk(
    header: &[u8; CHUNK_HEADER_LEN],
    payload: &[u8],
    max_len: usize,
) -> Vec<Vec<u8>> {
    let mut stream = Vec::with_capacity(header.len() + payload.len());
    stream.extend_from_slice(header);
    stream.extend_from_slice(payload);
    stream
        .chunks(max_len.max(1))
        .map(<[u8]>::to_vec)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_small_chunk() {
        let header = [1, 2, 3, 4, 5, 6, 0, 2];
        let frags = fragment_chunk(&header, &[0xAA, 0xBB], 256);
        assert_eq!(frags, vec![vec![1, 2, 3, 4, 5, 6, 0, 2, 0xAA, 0xBB]]);
    }

    #[test]
    fn test_fragment_splits_on_max_len() {
        let header = [0u8; CHUNK_HEADER_LEN];
        let payload = vec![0x55; 20];
        let frags = fragment_chunk(&header, &payload, 10);
        assert_eq!(frags.len(), 3);
        assert_eq!(frags[0].len(), 10);
        assert_eq!(frags[1].len(), 10);
        assert_eq!(frags[2].len(), 8);
        assert_eq!(frags.concat().len(), 28);
    }

    struct PagesOnly;

    impl AxiomTransport for PagesOnly {
        fn read_page(&mut self, _address: u16, len: usize) -> Result<Vec<u8>, TransportError> {
            Ok(vec![0; len])
        }

        fn write_page(&mut self, _address: u16, _data: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[test]
    fn test_bridge_mode_unsupported_by_default() {
        let mut transport: Box<dyn AxiomTransport> = Box::new(PagesOnly);
        assert!(matches!(
            transport.bridge_mode(),
            Err(TransportError::Unsupported(_))
        ));
        assert!(matches!(
            transport.set_bridge_mode(BridgeMode::Digitizer),
            Err(TransportError::Unsupported(_))
        ));
    }
}
