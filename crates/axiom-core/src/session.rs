//! aXiom session: settings plus the operations the command line drives.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::device::AxiomDevice;
use crate::events::{AxiomEvent, AxiomObserver, TracingObserver};
use crate::payload::{ConfigFile, FirmwareFile};
use crate::protocol::{BridgeMode, DeviceInfo};
use crate::protocol::constants::USAGE_FACTORY_CALIBRATION;
use crate::report::{
    CancellationToken, DEFAULT_REPORTS, DecoderRegistry, LoopStats, ReportEvent, ReportFeatures,
    ReportLoop, ScheduleMode, SysfsGpioWakeSource, WakeSource,
};
use crate::state::{
    ConfigCheck, ConfigLoadOptions, ConfigLoadReport, FirmwareOptions, FirmwareOutcome,
    check_config, load_config, update_firmware,
};
use crate::transport::{AxiomTransport, TransportError, UsbBridgeTransport};
use crate::usage_table::UsageTable;

/// I2C addresses an aXiom device can answer on.
pub const I2C_ADDRESSES: [u8; 2] = [0x66, 0x67];

/// Physical interface to the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interface {
    #[default]
    Usb,
    I2c,
    Spi,
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interface::Usb => write!(f, "usb"),
            Interface::I2c => write!(f, "i2c"),
            Interface::Spi => write!(f, "spi"),
        }
    }
}

/// Configuration for an aXiom session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub interface: Interface,
    pub i2c_bus: Option<u8>,
    pub i2c_address: u8,
    pub spi_bus: Option<u8>,
    pub spi_device: Option<u8>,
    /// Wait after save-config, in milliseconds.
    pub save_settle_ms: u64,
    /// Wait after a config-load soft reset, in milliseconds.
    pub reset_settle_ms: u64,
    /// Wait after the bootloader entry sequence, in milliseconds.
    pub bootloader_settle_ms: u64,
    /// Wait after the bootloader reset, in milliseconds.
    pub firmware_reset_settle_ms: u64,
    /// Report FIFO poll interval, in milliseconds.
    pub poll_interval_ms: u64,
    /// GPIO line wired to the device's active-low report interrupt. When
    /// set, the report loop waits on it instead of polling.
    pub gpio_interrupt: Option<u32>,
    /// Report usages to decode.
    pub reports: Vec<u8>,
    pub pilot_id: bool,
    /// Device reports hotspots from force centres of mass only.
    pub force_hotspots: bool,
    /// Allow a variant change or same-version firmware download.
    pub force: bool,
    pub overwrite_customer_data: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            interface: Interface::Usb,
            i2c_bus: None,
            i2c_address: I2C_ADDRESSES[0],
            spi_bus: None,
            spi_device: None,
            save_settle_ms: 2000,
            reset_settle_ms: 1000,
            bootloader_settle_ms: 500,
            firmware_reset_settle_ms: 2000,
            poll_interval_ms: 1,
            gpio_interrupt: None,
            reports: DEFAULT_REPORTS.to_vec(),
            pilot_id: false,
            force_hotspots: false,
            force: false,
            overwrite_customer_data: false,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check the interface settings hang together.
    pub fn validate(&self) -> Result<()> {
        match self.interface {
            Interface::Usb => {}
            Interface::I2c => {
                if self.i2c_bus.is_none() {
                    bail!("I2C interface needs a bus number");
                }
                if !I2C_ADDRESSES.contains(&self.i2c_address) {
                    bail!(
                        "I2C address 0x{:02X} is not an aXiom address (0x66 or 0x67)",
                        self.i2c_address
                    );
                }
            }
            Interface::Spi => {
                if self.spi_bus.is_none() || self.spi_device.is_none() {
                    bail!("SPI interface needs a bus and device number");
                }
            }
        }
        Ok(())
    }

    pub fn config_load_options(&self) -> ConfigLoadOptions {
        ConfigLoadOptions {
            overwrite_customer_data: self.overwrite_customer_data,
            save_settle: Duration::from_millis(self.save_settle_ms),
            reset_settle: Duration::from_millis(self.reset_settle_ms),
        }
    }

    pub fn firmware_options(&self) -> FirmwareOptions {
        FirmwareOptions {
            force: self.force,
            bootloader_settle: Duration::from_millis(self.bootloader_settle_ms),
            reset_settle: Duration::from_millis(self.firmware_reset_settle_ms),
        }
    }

    pub fn report_features(&self) -> ReportFeatures {
        ReportFeatures {
            pilot_id: self.pilot_id,
            hotspot_force_only: self.force_hotspots,
        }
    }

    /// Wake source for the report loop, if an interrupt line is configured.
    pub fn wake_source(&self) -> Result<Option<Box<dyn WakeSource>>> {
        match self.gpio_interrupt {
            Some(pin) => Ok(Some(Box::new(SysfsGpioWakeSource::open(pin)?))),
            None => Ok(None),
        }
    }

    /// Open the transport for the configured interface.
    pub fn open_transport(&self) -> Result<Box<dyn AxiomTransport>> {
        self.validate()?;
        match self.interface {
            Interface::Usb => Ok(Box::new(UsbBridgeTransport::open()?)),
            other => Err(TransportError::Unsupported(format!("{} transport", other)).into()),
        }
    }
}

/// Switch the USB protocol bridge to `mode`, returning the mode it was in.
///
/// Works on the raw transport; the bridge re-enumerates afterwards, so the
/// transport should be dropped.
#[instrument(skip(transport), fields(mode = %mode))]
pub fn switch_bridge_mode<T: AxiomTransport + ?Sized>(
    transport: &mut T,
    mode: BridgeMode,
) -> Result<BridgeMode> {
    let previous = transport.bridge_mode()?;
    transport.set_bridge_mode(mode)?;
    if previous == mode {
        info!("Bridge already in {} mode", mode);
    } else {
        info!(from = %previous, "Bridge switching, reconnect before further use");
    }
    Ok(previous)
}

/// Read and check a firmware file without touching a device.
pub fn inspect_firmware<P: AsRef<Path>>(path: P) -> Result<FirmwareFile> {
    let file = FirmwareFile::from_path(path)?;
    let chunks = file.validate()?;
    info!(format = %file.format(), chunks, bytes = file.stream_len(), "Firmware file checked");
    Ok(file)
}

/// aXiom session - one open device plus the settings used to drive it.
pub struct AxiomSession<T: AxiomTransport, O: AxiomObserver> {
    config: SessionConfig,
    device: AxiomDevice<T>,
    observer: Arc<O>,
}

impl AxiomSession<Box<dyn AxiomTransport>, TracingObserver> {
    /// Open the configured interface with the default tracing observer.
    pub fn connect(config: SessionConfig) -> Result<Self> {
        let transport = config.open_transport()?;
        Self::open(config, transport, Arc::new(TracingObserver))
    }
}

impl<T: AxiomTransport, O: AxiomObserver> AxiomSession<T, O> {
    /// Resolve the device behind `transport`.
    pub fn open(config: SessionConfig, transport: T, observer: Arc<O>) -> Result<Self> {
        let device = AxiomDevice::open(transport)?;
        observer.on_event(&AxiomEvent::DeviceOpened {
            device: device.info().device_name(),
            mode: device.info().mode,
        });
        Ok(Self {
            config,
            device,
            observer,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn info(&self) -> &DeviceInfo {
        self.device.info()
    }

    pub fn usage_table(&self) -> &UsageTable {
        self.device.table()
    }

    pub fn device_mut(&mut self) -> &mut AxiomDevice<T> {
        &mut self.device
    }

    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn load_config<P: AsRef<Path>>(&mut self, path: P) -> Result<ConfigLoadReport> {
        let config = ConfigFile::from_path(path)?;
        let options = self.config.config_load_options();
        let report = load_config(&mut self.device, &config, &options, self.observer.as_ref())?;
        info!(
            written = report.written.len(),
            skipped = report.skipped.len(),
            bytes = report.bytes_written,
            "Config loaded"
        );
        Ok(report)
    }

    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn check_config<P: AsRef<Path>>(&mut self, path: P) -> Result<ConfigCheck> {
        let config = ConfigFile::from_path(path)?;
        Ok(check_config(&mut self.device, &config)?)
    }

    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn update_firmware<P: AsRef<Path>>(&mut self, path: P) -> Result<FirmwareOutcome> {
        let file = FirmwareFile::from_path(path)?;
        let options = self.config.firmware_options();
        Ok(update_firmware(
            &mut self.device,
            &file,
            &options,
            self.observer.as_ref(),
        )?)
    }

    /// Read the factory calibration usage (u36).
    pub fn read_factory_data(&mut self) -> Result<Vec<u8>> {
        if self.device.is_bootloader() {
            return Err(crate::device::DeviceError::BootloaderMode.into());
        }
        let data = self.device.read_usage(USAGE_FACTORY_CALIBRATION)?;
        info!(len = data.len(), "Factory calibration read");
        Ok(data)
    }

    /// Decode reports until `cancel` is set.
    ///
    /// Without a wake source the FIFO is polled at the configured interval.
    pub fn dump_reports(
        &mut self,
        cancel: &CancellationToken,
        wake: Option<Box<dyn WakeSource>>,
        sink: impl FnMut(ReportEvent),
    ) -> Result<LoopStats> {
        let registry = DecoderRegistry::new(self.config.report_features(), &self.config.reports);
        let mode = match wake {
            Some(source) => ScheduleMode::Interrupt {
                source,
                slice: crate::report::dispatch::DEFAULT_WAIT_SLICE,
            },
            None => ScheduleMode::Polled {
                interval: Duration::from_millis(self.config.poll_interval_ms),
            },
        };
        let mut report_loop = ReportLoop::new(registry, mode);
        Ok(report_loop.run(&mut self.device, cancel, sink)?)
    }

    pub fn close(self) -> Result<()> {
        self.device.close()?;
        Ok(())
    }
}
