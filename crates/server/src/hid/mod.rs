//! HID device access
//!
//! Wraps `hidapi` for enumeration and opening, and provides the concrete sink
//! types driven by the registry.

pub mod debug;
pub mod rev_lights;

pub use debug::{DebugDevice, DebugFactory};
pub use rev_lights::{RevLightDevice, RevLightFactory, led_mask};

use crate::hotplug::{DeviceEnumerator, HotplugError};
use crate::registry::SinkError;
use hidapi::{HidApi, HidDevice};
use protocol::SinkDescriptor;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Size of an output report, excluding the report id
pub const REPORT_SIZE: usize = 64;

/// Output half of an open HID device
pub trait ReportWriter: Send + 'static {
    /// Write one report; `data[0]` is the report id
    fn write_report(&self, data: &[u8]) -> Result<usize, SinkError>;
}

/// Input half of an open HID device
pub trait ReportReader: Send + 'static {
    /// Read one report, waiting at most `timeout_ms`; returns 0 on timeout
    fn read_report(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, SinkError>;
}

impl ReportWriter for HidDevice {
    fn write_report(&self, data: &[u8]) -> Result<usize, SinkError> {
        self.write(data).map_err(|e| SinkError::Write(e.to_string()))
    }
}

impl ReportReader for HidDevice {
    fn read_report(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, SinkError> {
        Ok(self.read_timeout(buf, timeout_ms)?)
    }
}

/// One row of `--list-devices` output
#[derive(Debug, Clone)]
pub struct HidDeviceSummary {
    pub descriptor: SinkDescriptor,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

/// Shared `hidapi` context
///
/// `HidApi` keeps its own cached device list, so every enumeration refreshes
/// it first. Callers already holding the registry lock may take this lock,
/// never the reverse.
pub struct HidBackend {
    api: Mutex<HidApi>,
}

impl HidBackend {
    pub fn new() -> Result<Self, SinkError> {
        let api = HidApi::new()?;
        Ok(Self {
            api: Mutex::new(api),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HidApi> {
        self.api.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the interface matching all four fields of `descriptor`
    pub fn open(&self, descriptor: &SinkDescriptor) -> Result<HidDevice, SinkError> {
        let mut api = self.lock();
        api.refresh_devices()?;

        let info = api
            .device_list()
            .find(|info| descriptor_of(info) == *descriptor)
            .ok_or(SinkError::NotFound(*descriptor))?;

        debug!("Opening HID interface {} at {:?}", descriptor, info.path());
        info.open_device(&api)
            .map_err(|e| SinkError::Open(format!("{}: {}", descriptor, e)))
    }

    /// Describe every HID interface currently attached
    pub fn list_devices(&self) -> Result<Vec<HidDeviceSummary>, SinkError> {
        let mut api = self.lock();
        api.refresh_devices()?;

        Ok(api
            .device_list()
            .map(|info| HidDeviceSummary {
                descriptor: descriptor_of(info),
                manufacturer: info.manufacturer_string().map(str::to_string),
                product: info.product_string().map(str::to_string),
            })
            .collect())
    }
}

impl DeviceEnumerator for HidBackend {
    fn enumerate(&self) -> Result<Vec<SinkDescriptor>, HotplugError> {
        let mut api = self.lock();
        api.refresh_devices()
            .map_err(|e| HotplugError::Enumerate(e.to_string()))?;

        let mut present: Vec<SinkDescriptor> = api.device_list().map(descriptor_of).collect();
        // Composite devices list one entry per interface and platform
        present.sort_unstable_by_key(|d| (d.vendor_id, d.product_id, d.usage_page, d.usage));
        present.dedup();
        Ok(present)
    }
}

fn descriptor_of(info: &hidapi::DeviceInfo) -> SinkDescriptor {
    SinkDescriptor::new(
        info.vendor_id(),
        info.product_id(),
        info.usage_page(),
        info.usage(),
    )
}
