//! Event system for UI decoupling.
//!
//! Sequencers report stage changes and progress through an observer, so a
//! CLI (or anything else) can present them without the core knowing how.

use std::fmt;

use crate::protocol::DeviceMode;
use crate::state::Stage;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Long-running operations that report progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ConfigLoad,
    FirmwareDownload,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::ConfigLoad => write!(f, "Config Load"),
            Operation::FirmwareDownload => write!(f, "Firmware Download"),
        }
    }
}

/// Events emitted by the sequencers and the session.
#[derive(Debug, Clone)]
pub enum AxiomEvent {
    /// Device opened and its usage table resolved.
    DeviceOpened { device: String, mode: DeviceMode },
    /// Sequencer stage changed.
    StageChanged { from: Stage, to: Stage },
    /// Progress through the bulk part of an operation.
    Progress {
        operation: Operation,
        current: u64,
        total: u64,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Operation completed successfully.
    Complete { operation: Operation },
}

impl AxiomEvent {
    pub fn warn(message: impl Into<String>) -> Self {
        AxiomEvent::Log {
            level: LogLevel::Warn,
            message: message.into(),
        }
    }
}

/// Observer trait for receiving events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait AxiomObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &AxiomEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl AxiomObserver for NullObserver {
    fn on_event(&self, _event: &AxiomEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl AxiomObserver for TracingObserver {
    fn on_event(&self, event: &AxiomEvent) {
        match event {
            AxiomEvent::DeviceOpened { device, mode } => {
                tracing::info!(device = %device, mode = %mode, "Device opened");
            }
            AxiomEvent::StageChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Stage changed");
            }
            AxiomEvent::Progress {
                operation,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(operation = %operation, progress = %format!("{}%", pct), "Progress");
            }
            AxiomEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            AxiomEvent::Complete { operation } => {
                tracing::info!(operation = %operation, "Operation complete");
            }
        }
    }
}
