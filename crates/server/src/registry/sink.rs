//! Sink capabilities exposed to device implementations

use protocol::{SinkDescriptor, TelemetrySnapshot};
use thiserror::Error;

/// Errors raised by sinks and their factories
#[derive(Debug, Error)]
pub enum SinkError {
    /// No physical device matches the descriptor
    #[error("No device matches {0}")]
    NotFound(SinkDescriptor),

    #[error("Failed to open device: {0}")]
    Open(String),

    #[error("Failed to write to device: {0}")]
    Write(String),

    #[error("Failed to close device: {0}")]
    Close(String),

    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),
}

/// An output target that accepts telemetry snapshots
///
/// Implementations translate the snapshot into whatever the device expects.
/// A failed send is reported to the caller and never retried by the sink.
pub trait Sink: Send {
    fn send(&mut self, snapshot: &TelemetrySnapshot) -> Result<(), SinkError>;
}

/// An open device handle owned by the registry
pub trait SinkHandle: Sink {
    /// Release the underlying OS handle
    fn close(self: Box<Self>) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Opens handles for one registered descriptor
///
/// The registry calls [`SinkFactory::open`] every time a matching device is
/// discovered, including after it was unplugged and plugged back in.
pub trait SinkFactory: Send {
    fn open(&mut self, descriptor: &SinkDescriptor) -> Result<Box<dyn SinkHandle>, SinkError>;

    /// Short human readable name used in log messages
    fn label(&self) -> &str {
        "sink"
    }
}

impl<F> SinkFactory for F
where
    F: FnMut(&SinkDescriptor) -> Result<Box<dyn SinkHandle>, SinkError> + Send,
{
    fn open(&mut self, descriptor: &SinkDescriptor) -> Result<Box<dyn SinkHandle>, SinkError> {
        self(descriptor)
    }
}
