//! Shift-light LED board
//!
//! The board exposes eight LEDs. Each LED has an RPM threshold expressed as a
//! percentage of the rev limiter; the LED is lit when the engine is at or
//! above it. The lit set is sent as a single bitmask byte.

use super::{HidBackend, REPORT_SIZE, ReportWriter};
use crate::registry::{Sink, SinkError, SinkFactory, SinkHandle};
use protocol::{SinkDescriptor, TelemetrySnapshot};
use std::sync::Arc;
use tracing::trace;

/// Number of LEDs on the board
pub const LED_COUNT: usize = 8;

/// Thresholds of the reference board
pub const DEFAULT_THRESHOLDS: [u8; LED_COUNT] = [80, 83, 85, 87, 89, 91, 93, 95];

/// Bitmask of lit LEDs; bit `i` is set when `percent >= thresholds[i]`
pub fn led_mask(percent: i32, thresholds: &[u8; LED_COUNT]) -> u8 {
    thresholds
        .iter()
        .enumerate()
        .filter(|(_, threshold)| percent >= i32::from(**threshold))
        .fold(0u8, |mask, (bit, _)| mask | (1 << bit))
}

/// Open rev-light board
pub struct RevLightDevice<W: ReportWriter> {
    writer: W,
    thresholds: [u8; LED_COUNT],
    last_mask: u8,
    report: [u8; REPORT_SIZE + 1],
}

impl<W: ReportWriter> RevLightDevice<W> {
    pub fn new(writer: W, thresholds: [u8; LED_COUNT]) -> Self {
        Self {
            writer,
            thresholds,
            last_mask: 0,
            report: [0u8; REPORT_SIZE + 1],
        }
    }
}

impl<W: ReportWriter> Sink for RevLightDevice<W> {
    fn send(&mut self, snapshot: &TelemetrySnapshot) -> Result<(), SinkError> {
        let mask = led_mask(snapshot.rev_light_percent(), &self.thresholds);

        // All LEDs were already off
        if mask == 0 && self.last_mask == 0 {
            return Ok(());
        }

        // report[0] stays 0: the board uses unnumbered reports
        self.report[1] = mask;
        self.writer.write_report(&self.report)?;
        self.last_mask = mask;

        trace!("Rev lights {:#010b}", mask);
        Ok(())
    }
}

impl<W: ReportWriter> SinkHandle for RevLightDevice<W> {
    fn close(self: Box<Self>) -> Result<(), SinkError> {
        if self.last_mask == 0 {
            return Ok(());
        }
        // Leave the LEDs dark; fails when the device is already gone
        self.writer.write_report(&[0u8; REPORT_SIZE + 1])?;
        Ok(())
    }
}

/// Opens rev-light boards through a shared [`HidBackend`]
pub struct RevLightFactory {
    backend: Arc<HidBackend>,
    thresholds: [u8; LED_COUNT],
}

impl RevLightFactory {
    pub fn new(backend: Arc<HidBackend>, thresholds: [u8; LED_COUNT]) -> Self {
        Self {
            backend,
            thresholds,
        }
    }
}

impl SinkFactory for RevLightFactory {
    fn open(&mut self, descriptor: &SinkDescriptor) -> Result<Box<dyn SinkHandle>, SinkError> {
        let device = self.backend.open(descriptor)?;
        Ok(Box::new(RevLightDevice::new(device, self.thresholds)))
    }

    fn label(&self) -> &str {
        "rev-lights"
    }
}
