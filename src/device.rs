//! HID transport: device discovery, reads and feature reports.
//!
//! IPTS touchscreens show up as regular HID devices on the digitizer
//! usage page. The daemon reads their input reports as an opaque byte
//! stream and uses two feature reports: one to switch between singletouch
//! and multitouch mode, one to fetch the device metadata.

use crate::config::DeviceConfig;
use crate::parser::{Metadata, Parser, ParserEvents};

use hidapi::{HidApi, HidDevice, HidError};
use thiserror::Error;

use std::ffi::CString;
use std::path::Path;

/// Large enough for the biggest touch data report any known device sends.
pub const BUFFER_SIZE: usize = 16384;

const USAGE_PAGE_DIGITIZER: u16 = 0x000D;
const USAGE_TOUCHSCREEN: u16 = 0x0004;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to initialize hidapi")]
    Api(#[source] HidError),

    #[error("no IPTS touchscreen found")]
    NotFound,

    #[error("invalid device path")]
    InvalidPath,

    #[error("failed to open device")]
    Open(#[source] HidError),

    #[error("failed to read from device")]
    Read(#[source] HidError),

    #[error("feature report failed")]
    Feature(#[source] HidError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Singletouch = 0,
    Multitouch = 1,
}

pub struct IptsDevice {
    device: HidDevice,
    vendor: u16,
    product: u16,
    config: DeviceConfig,
}

impl IptsDevice {
    /// Searches the HID device list for a touchscreen and opens the
    /// first match.
    pub fn discover(config: &DeviceConfig) -> Result<Self, DeviceError> {
        let api = HidApi::new().map_err(DeviceError::Api)?;

        for info in api.device_list() {
            if info.usage_page() != USAGE_PAGE_DIGITIZER || info.usage() != USAGE_TOUCHSCREEN {
                continue;
            }

            log::info!(
                "Found touchscreen {:04X}:{:04X} at {}",
                info.vendor_id(),
                info.product_id(),
                info.path().to_string_lossy()
            );

            let device = api.open_path(info.path()).map_err(DeviceError::Open)?;

            return Ok(Self {
                device,
                vendor: info.vendor_id(),
                product: info.product_id(),
                config: *config,
            });
        }

        Err(DeviceError::NotFound)
    }

    /// Opens a specific hidraw device node.
    pub fn open(path: &Path, config: &DeviceConfig) -> Result<Self, DeviceError> {
        let api = HidApi::new().map_err(DeviceError::Api)?;

        let cpath = CString::new(path.as_os_str().as_encoded_bytes())
            .map_err(|_| DeviceError::InvalidPath)?;

        let device = api.open_path(&cpath).map_err(DeviceError::Open)?;

        let (vendor, product) = match device.get_device_info() {
            Ok(info) => (info.vendor_id(), info.product_id()),
            Err(_) => (0, 0),
        };

        Ok(Self {
            device,
            vendor,
            product,
            config: *config,
        })
    }

    pub fn vendor(&self) -> u16 {
        self.vendor
    }

    pub fn product(&self) -> u16 {
        self.product
    }

    /// Reads one input report.
    ///
    /// Returns the number of bytes read; 0 means no data arrived within
    /// the timeout, which lets the caller observe its stop flag.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        self.device.read_timeout(buf, 5).map_err(DeviceError::Read)
    }

    /// Switches the device between singletouch and multitouch mode.
    /// Touch data only flows in multitouch mode.
    pub fn set_mode(&self, mode: Mode) -> Result<(), DeviceError> {
        let report = [self.config.mode_report, mode as u8];

        self.device
            .send_feature_report(&report)
            .map_err(DeviceError::Feature)
    }

    /// Fetches and parses the metadata feature report.
    ///
    /// Not all devices support it; the caller falls back to configured
    /// values when this returns `None`.
    pub fn metadata(&self) -> Option<Metadata> {
        let mut buf = [0u8; 256];
        buf[0] = self.config.metadata_report;

        let size = match self.device.get_feature_report(&mut buf) {
            Ok(size) => size,
            Err(e) => {
                log::debug!("Device has no metadata report: {e}");
                return None;
            }
        };

        #[derive(Default)]
        struct Capture {
            metadata: Option<Metadata>,
        }

        impl ParserEvents for Capture {
            fn on_metadata(&mut self, metadata: &Metadata) {
                self.metadata = Some(*metadata);
            }
        }

        let mut capture = Capture::default();
        let mut parser = Parser::new();

        // Feature reports carry only the report ID as header.
        if let Err(e) = parser.parse_with_header(&buf[..size], 1, &mut capture) {
            log::warn!("Failed to parse metadata report: {e}");
            return None;
        }

        capture.metadata
    }
}
