//! Report dispatch loop.
//!
//! Reads the u34 FIFO either on a fixed interval or once per wake from a
//! [`WakeSource`], decodes each frame through the [`DecoderRegistry`] and
//! hands the results to a caller-supplied sink.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};

use super::decoders::TouchReport;
use super::frame::{FrameError, ReportFrame};
use super::registry::{DecodedReport, DecoderRegistry};
use crate::device::{AxiomDevice, DeviceError};
use crate::protocol::constants::{USAGE_PILOT_REPORT, USAGE_TOUCH_REPORT};
use crate::transport::AxiomTransport;

/// Default polled-mode interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Default upper bound on one interrupt-mode wait.
pub const DEFAULT_WAIT_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEvent {
    Decoded { usage: u8, report: DecodedReport },
    /// The device dropped reports before this frame.
    FramesDropped { usage: u8 },
    /// A frame for a registered usage could not be used.
    DecodeSkipped { usage: u8, reason: String },
}

#[derive(Error, Debug)]
pub enum ReportLoopError {
    #[error("Device is in bootloader mode, no reports available")]
    BootloaderMode,
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub reads: u64,
    pub decoded: u64,
    pub dropped: u64,
    pub skipped: u64,
}

/// Shared stop flag for the report loop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Something that signals a pending report, such as the controller's
/// interrupt line.
pub trait WakeSource: Send {
    /// Block for at most `timeout`. Returns `true` when woken.
    fn wait(&mut self, timeout: Duration) -> bool;

    /// Give the underlying resource back. Called once when the loop exits.
    fn release(&mut self);
}

/// Wake source fed from another thread through a channel.
pub struct ChannelWakeSource {
    rx: Option<Receiver<()>>,
}

/// Sending half of a [`ChannelWakeSource`].
#[derive(Debug, Clone)]
pub struct WakeHandle(Sender<()>);

impl WakeHandle {
    /// Signal one pending report. Returns `false` once the source is released.
    pub fn wake(&self) -> bool {
        self.0.send(()).is_ok()
    }
}

impl ChannelWakeSource {
    pub fn new() -> (Self, WakeHandle) {
        let (tx, rx) = mpsc::channel();
        (Self { rx: Some(rx) }, WakeHandle(tx))
    }
}

impl WakeSource for ChannelWakeSource {
    fn wait(&mut self, timeout: Duration) -> bool {
        let Some(rx) = &self.rx else {
            thread::sleep(timeout);
            return false;
        };
        match rx.recv_timeout(timeout) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                // Nobody left to wake us; keep the wait bounded.
                thread::sleep(timeout);
                false
            }
        }
    }

    fn release(&mut self) {
        if self.rx.take().is_some() {
            debug!("Wake source released");
        }
    }
}

/// How the loop decides when to read the FIFO.
pub enum ScheduleMode {
    Polled {
        interval: Duration,
    },
    Interrupt {
        source: Box<dyn WakeSource>,
        /// Longest single wait, bounding how late cancellation is seen.
        slice: Duration,
    },
}

impl ScheduleMode {
    pub fn interrupt(source: impl WakeSource + 'static) -> Self {
        ScheduleMode::Interrupt {
            source: Box::new(source),
            slice: DEFAULT_WAIT_SLICE,
        }
    }
}

impl Default for ScheduleMode {
    fn default() -> Self {
        ScheduleMode::Polled {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Frame decoding plus the touch/pilot pairing state.
#[derive(Debug, Default)]
pub struct ReportDispatcher {
    registry: DecoderRegistry,
    pending_touch: Option<TouchReport>,
    stats: LoopStats,
}

impl ReportDispatcher {
    pub fn new(registry: DecoderRegistry) -> Self {
        Self {
            registry,
            pending_touch: None,
            stats: LoopStats::default(),
        }
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    fn emit(&mut self, event: ReportEvent, sink: &mut impl FnMut(ReportEvent)) {
        match &event {
            ReportEvent::Decoded { .. } => self.stats.decoded += 1,
            ReportEvent::FramesDropped { .. } => self.stats.dropped += 1,
            ReportEvent::DecodeSkipped { .. } => self.stats.skipped += 1,
        }
        sink(event);
    }

    fn skip(&mut self, usage: u8, reason: String, sink: &mut impl FnMut(ReportEvent)) {
        debug!(usage = %format!("u{:02X}", usage), reason = %reason, "Report skipped");
        self.emit(ReportEvent::DecodeSkipped { usage, reason }, sink);
    }

    /// Decode one raw FIFO read and emit whatever it produced.
    pub fn process_frame(&mut self, raw: &[u8], sink: &mut impl FnMut(ReportEvent)) {
        let frame = match ReportFrame::parse(raw) {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                let FrameError::LengthExceedsRead { usage, .. } = e;
                self.skip(usage, e.to_string(), sink);
                return;
            }
        };

        if frame.overflow {
            warn!(usage = %format!("u{:02X}", frame.usage_id), "Report FIFO overflowed");
            self.emit(
                ReportEvent::FramesDropped {
                    usage: frame.usage_id,
                },
                sink,
            );
        }
        if frame.is_empty() {
            return;
        }

        let usage = frame.usage_id;
        let Some(kind) = self.registry.lookup(usage) else {
            trace!(usage = %format!("u{:02X}", usage), "Unregistered usage dropped");
            return;
        };
        match kind.decode(frame.body) {
            Ok(report) => self.deliver(usage, report, sink),
            Err(e) => self.skip(usage, e.to_string(), sink),
        }
    }

    fn deliver(&mut self, usage: u8, report: DecodedReport, sink: &mut impl FnMut(ReportEvent)) {
        if !self.registry.features().pilot_id {
            self.emit(ReportEvent::Decoded { usage, report }, sink);
            return;
        }
        match report {
            DecodedReport::Touch(touch) => {
                self.flush_unpaired(sink);
                self.pending_touch = Some(touch);
            }
            DecodedReport::Pilot(pilot) => match self.pending_touch.take() {
                Some(mut touch) if touch.timestamp == pilot.timestamp => {
                    touch.pilot_ids = Some(pilot.pilot_ids);
                    self.emit(
                        ReportEvent::Decoded {
                            usage: USAGE_TOUCH_REPORT,
                            report: DecodedReport::Touch(touch),
                        },
                        sink,
                    );
                }
                Some(touch) => self.skip(
                    USAGE_PILOT_REPORT,
                    format!(
                        "pilot timestamp {} does not match touch timestamp {}",
                        pilot.timestamp, touch.timestamp
                    ),
                    sink,
                ),
                None => self.skip(
                    USAGE_PILOT_REPORT,
                    "pilot metadata without a preceding touch report".to_string(),
                    sink,
                ),
            },
            other => self.emit(ReportEvent::Decoded { usage, report: other }, sink),
        }
    }

    /// Report a touch still waiting for its pilot metadata as skipped.
    pub fn flush_unpaired(&mut self, sink: &mut impl FnMut(ReportEvent)) {
        if let Some(touch) = self.pending_touch.take() {
            self.skip(
                USAGE_TOUCH_REPORT,
                format!("no pilot metadata for touch at timestamp {}", touch.timestamp),
                sink,
            );
        }
    }

    fn read_one<T: AxiomTransport>(
        &mut self,
        device: &mut AxiomDevice<T>,
        sink: &mut impl FnMut(ReportEvent),
    ) -> Result<(), DeviceError> {
        let raw = device.read_report_fifo()?;
        self.stats.reads += 1;
        self.process_frame(&raw, sink);
        Ok(())
    }
}

/// The report loop: a dispatcher driven by a schedule.
pub struct ReportLoop {
    dispatcher: ReportDispatcher,
    mode: ScheduleMode,
}

impl ReportLoop {
    pub fn new(registry: DecoderRegistry, mode: ScheduleMode) -> Self {
        Self {
            dispatcher: ReportDispatcher::new(registry),
            mode,
        }
    }

    pub fn dispatcher_mut(&mut self) -> &mut ReportDispatcher {
        &mut self.dispatcher
    }

    /// Run until `cancel` is set or the device fails.
    #[instrument(level = "info", skip_all)]
    pub fn run<T: AxiomTransport>(
        &mut self,
        device: &mut AxiomDevice<T>,
        cancel: &CancellationToken,
        mut sink: impl FnMut(ReportEvent),
    ) -> Result<LoopStats, ReportLoopError> {
        if device.is_bootloader() {
            return Err(ReportLoopError::BootloaderMode);
        }
        let dispatcher = &mut self.dispatcher;

        let result = match &mut self.mode {
            ScheduleMode::Polled { interval } => {
                info!(interval_ms = interval.as_millis() as u64, "Polling report FIFO");
                run_polled(dispatcher, *interval, device, cancel, &mut sink)
            }
            ScheduleMode::Interrupt { source, slice } => {
                info!("Waiting for report interrupts");
                let result =
                    run_interrupt(dispatcher, source.as_mut(), *slice, device, cancel, &mut sink);
                source.release();
                result
            }
        };
        dispatcher.flush_unpaired(&mut sink);

        let stats = dispatcher.stats();
        info!(
            reads = stats.reads,
            decoded = stats.decoded,
            dropped = stats.dropped,
            skipped = stats.skipped,
            "Report loop stopped"
        );
        result?;
        Ok(stats)
    }
}

fn run_polled<T: AxiomTransport>(
    dispatcher: &mut ReportDispatcher,
    interval: Duration,
    device: &mut AxiomDevice<T>,
    cancel: &CancellationToken,
    sink: &mut impl FnMut(ReportEvent),
) -> Result<(), DeviceError> {
    while !cancel.is_cancelled() {
        dispatcher.read_one(device, sink)?;
        thread::sleep(interval);
    }
    Ok(())
}

fn run_interrupt<T: AxiomTransport>(
    dispatcher: &mut ReportDispatcher,
    source: &mut dyn WakeSource,
    slice: Duration,
    device: &mut AxiomDevice<T>,
    cancel: &CancellationToken,
    sink: &mut impl FnMut(ReportEvent),
) -> Result<(), DeviceError> {
    // A report pending before we started waiting would never raise a new
    // interrupt.
    if !cancel.is_cancelled() {
        dispatcher.read_one(device, sink)?;
    }
    while !cancel.is_cancelled() {
        if source.wait(slice) && !cancel.is_cancelled() {
            dispatcher.read_one(device, sink)?;
        }
    }
    Ok(())
}
