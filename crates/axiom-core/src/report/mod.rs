//! Report FIFO decoding and dispatch.

pub mod decoders;
pub mod dispatch;
pub mod frame;
pub mod gpio;
pub mod registry;

pub use decoders::{
    DecodeError, HotspotReason, HotspotRecord, HotspotReport, HotspotSource, PilotReport,
    SystemReport, SystemReportKind, TouchReport, TouchTarget,
};
pub use dispatch::{
    CancellationToken, ChannelWakeSource, LoopStats, ReportDispatcher, ReportEvent, ReportLoop,
    ReportLoopError, ScheduleMode, WakeHandle, WakeSource,
};
pub use frame::{FrameError, ReportFrame};
pub use gpio::{GpioError, SysfsGpioWakeSource};
pub use registry::{DEFAULT_REPORTS, DecodedReport, DecoderKind, DecoderRegistry, ReportFeatures};
