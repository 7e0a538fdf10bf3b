//! Firmware debug console
//!
//! Boards built with a debug interface print text over a vendor-defined HID
//! usage. Opening the interface starts a reader thread that forwards each
//! line to the log; nothing is ever written to it.

use super::{HidBackend, REPORT_SIZE, ReportReader};
use crate::registry::{Sink, SinkError, SinkFactory, SinkHandle};
use protocol::{SinkDescriptor, TelemetrySnapshot};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

const READ_TIMEOUT_MS: i32 = 100;

/// Longest line kept before it is flushed without a newline
const MAX_LINE: usize = 1024;

/// Splits the byte stream coming from the device into text lines
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append a report and return every line it completes
    fn push(&mut self, report: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        // Reports are zero padded to their full size
        for &byte in report.iter().filter(|b| **b != 0) {
            match byte {
                b'\n' => lines.push(self.take()),
                b'\r' => {}
                _ => {
                    self.pending.push(byte);
                    if self.pending.len() >= MAX_LINE {
                        lines.push(self.take());
                    }
                }
            }
        }
        lines
    }

    fn take(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}

/// Open debug interface
pub struct DebugDevice {
    descriptor: SinkDescriptor,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl DebugDevice {
    /// Start logging everything `device` prints
    pub fn spawn<R: ReportReader>(
        device: R,
        descriptor: SinkDescriptor,
    ) -> Result<Self, SinkError> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let reader = std::thread::Builder::new()
            .name("hid-debug".to_string())
            .spawn(move || read_loop(device, descriptor, flag))
            .map_err(|e| SinkError::Open(format!("failed to spawn reader: {}", e)))?;

        Ok(Self {
            descriptor,
            running,
            reader: Some(reader),
        })
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(reader) = self.reader.take()
            && reader.join().is_err()
        {
            warn!("Debug reader for {} panicked", self.descriptor);
        }
    }
}

fn read_loop<R: ReportReader>(device: R, descriptor: SinkDescriptor, running: Arc<AtomicBool>) {
    let mut buf = [0u8; REPORT_SIZE];
    let mut lines = LineBuffer::default();

    debug!("Debug reader started for {}", descriptor);

    while running.load(Ordering::SeqCst) {
        match device.read_report(&mut buf, READ_TIMEOUT_MS) {
            Ok(0) => continue,
            Ok(n) => {
                for line in lines.push(&buf[..n]) {
                    info!(target: "opendash::hid_debug", "{}", line);
                }
            }
            Err(e) => {
                // Device removal surfaces here before the hot-plug event
                debug!("Debug reader for {} stopped: {}", descriptor, e);
                break;
            }
        }
    }
}

impl Sink for DebugDevice {
    fn send(&mut self, _snapshot: &TelemetrySnapshot) -> Result<(), SinkError> {
        Ok(())
    }
}

impl SinkHandle for DebugDevice {
    fn close(mut self: Box<Self>) -> Result<(), SinkError> {
        self.stop();
        Ok(())
    }
}

impl Drop for DebugDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Opens debug interfaces through a shared [`HidBackend`]
pub struct DebugFactory {
    backend: Arc<HidBackend>,
}

impl DebugFactory {
    pub fn new(backend: Arc<HidBackend>) -> Self {
        Self { backend }
    }
}

impl SinkFactory for DebugFactory {
    fn open(&mut self, descriptor: &SinkDescriptor) -> Result<Box<dyn SinkHandle>, SinkError> {
        let device = self.backend.open(descriptor)?;
        Ok(Box::new(DebugDevice::spawn(device, *descriptor)?))
    }

    fn label(&self) -> &str {
        "hid-debug"
    }
}
