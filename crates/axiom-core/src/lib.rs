//! aXiom-Core: usage-table protocol and device programming for aXiom touch
//! controllers.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, u31 device info, u33 CRC data, system commands
//! - **Transport**: Page read/write abstraction (USB bridge over nusb, mock)
//! - **Usage table**: Resolves usage IDs to target addresses
//! - **Device**: Exclusive device handle built on a transport
//! - **Payload**: `.th2cfgbin` config and `.axfw`/`.alc` firmware containers
//! - **State**: Config load and firmware download sequencers
//! - **Report**: Report FIFO decoding and the dispatch loop
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: Settings and high-level operations
//!
//! # Example
//!
//! ```no_run
//! use axiom_core::session::{AxiomSession, SessionConfig};
//!
//! let mut session = AxiomSession::connect(SessionConfig::default())?;
//! println!("{}", session.info());
//! session.load_config("panel.th2cfgbin")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod device;
pub mod events;
pub mod payload;
pub mod protocol;
pub mod report;
pub mod session;
pub mod state;
pub mod status;
pub mod transport;
pub mod usage_table;

// Re-exports for convenience
pub use device::{AxiomDevice, DeviceError, DeviceSessionState};
pub use events::{AxiomEvent, AxiomObserver, LogLevel, NullObserver, TracingObserver};
pub use payload::{ConfigFile, ConfigUsageEntry, FirmwareFile, FirmwareFormat, FirmwareHeader};
pub use protocol::{CrcData, DeviceInfo, DeviceMode, SystemCommand};
pub use report::{CancellationToken, DecodedReport, ReportEvent, ReportLoop, ScheduleMode};
pub use session::{AxiomSession, Interface, SessionConfig};
pub use state::{FirmwareOutcome, SequenceError, Stage};
pub use status::ExitStatus;
pub use transport::{AxiomTransport, MockTransport, TransportError, UsbBridgeTransport};
pub use usage_table::{UsageRecord, UsageTable, UsageTableError, resolve};
