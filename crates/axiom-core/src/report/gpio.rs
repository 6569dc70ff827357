//! Report interrupt line read through the sysfs GPIO interface.
//!
//! The aXiom nIRQ output is active low and stays asserted while the report
//! FIFO holds data, so the line level is sampled rather than waiting for an
//! edge.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::dispatch::WakeSource;

/// Default sysfs GPIO root.
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// How often the line level is sampled while waiting.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Error, Debug)]
pub enum GpioError {
    #[error("GPIO {pin}: failed to export: {source}")]
    Export { pin: u32, source: io::Error },

    #[error("GPIO {pin}: failed to set input direction: {source}")]
    Direction { pin: u32, source: io::Error },

    #[error("GPIO {pin}: failed to read value: {source}")]
    Read { pin: u32, source: io::Error },
}

/// Wake source driven by an active-low GPIO input.
#[derive(Debug)]
pub struct SysfsGpioWakeSource {
    root: PathBuf,
    pin: u32,
    value: Option<PathBuf>,
    exported: bool,
}

impl SysfsGpioWakeSource {
    /// Claim `pin` under `/sys/class/gpio` as an input.
    pub fn open(pin: u32) -> Result<Self, GpioError> {
        Self::with_root(SYSFS_GPIO_ROOT, pin)
    }

    /// Claim `pin` under a different sysfs GPIO root.
    pub fn with_root(root: impl AsRef<Path>, pin: u32) -> Result<Self, GpioError> {
        let root = root.as_ref().to_path_buf();
        let line = root.join(format!("gpio{}", pin));

        let exported = if line.exists() {
            false
        } else {
            fs::write(root.join("export"), pin.to_string())
                .map_err(|source| GpioError::Export { pin, source })?;
            true
        };

        fs::write(line.join("direction"), "in")
            .map_err(|source| GpioError::Direction { pin, source })?;

        let source = Self {
            root,
            pin,
            value: Some(line.join("value")),
            exported,
        };
        // Fail at open rather than on the first wait.
        source.is_asserted()?;
        info!(pin, exported, "GPIO interrupt line claimed");
        Ok(source)
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    fn is_asserted(&self) -> Result<bool, GpioError> {
        let Some(value) = &self.value else {
            return Ok(false);
        };
        let level = fs::read_to_string(value).map_err(|source| GpioError::Read {
            pin: self.pin,
            source,
        })?;
        Ok(level.trim() == "0")
    }
}

impl WakeSource for SysfsGpioWakeSource {
    fn wait(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.is_asserted() {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "GPIO read failed");
                    return false;
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(SAMPLE_INTERVAL.min(deadline - now));
        }
    }

    fn release(&mut self) {
        if self.value.take().is_none() {
            return;
        }
        if self.exported
            && let Err(e) = fs::write(self.root.join("unexport"), self.pin.to_string())
        {
            warn!(pin = self.pin, error = %e, "GPIO unexport failed");
        }
        debug!(pin = self.pin, "GPIO interrupt line released");
    }
}
