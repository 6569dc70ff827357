//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod traits;

pub use mock::{MockIdentity, MockTransport, MockUsage};
pub use nusb::UsbBridgeTransport;
pub use traits::{AxiomTransport, TransportError, fragment_chunk};
