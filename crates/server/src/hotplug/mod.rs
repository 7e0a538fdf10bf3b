//! Device arrival and removal notifications
//!
//! A [`HotplugEventSource`] owns a backend thread and reports arrivals and
//! removals to a [`HotplugListener`]. Notifications carry no device identity
//! beyond an opaque [`HotplugToken`]; the listener is expected to
//! re-enumerate. [`HotplugBridge`] is the listener used by the server: it
//! enumerates HID interfaces and reconciles the [`DeviceRegistry`] with them.
//!
//! Two backends are available:
//!
//! - [`UsbHotplugSource`]: libusb hot-plug callbacks through `rusb`
//! - [`PollingHotplugSource`]: periodic enumeration for platforms without
//!   hot-plug support

mod poll;
mod usb;

pub use poll::PollingHotplugSource;
pub use usb::UsbHotplugSource;

use crate::registry::DeviceRegistry;
use protocol::SinkDescriptor;
use serde::{Deserialize, Serialize};
use async_channel::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Hot-plug errors
#[derive(Debug, Error)]
pub enum HotplugError {
    #[error("Hot-plug not supported on this platform")]
    Unsupported,

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Failed to enumerate devices: {0}")]
    Enumerate(String),

    #[error("Failed to start hot-plug thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Opaque identifier of the device that triggered a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HotplugToken(pub u64);

impl HotplugToken {
    /// Token of the synthetic arrival fired once at startup
    pub const INITIAL: HotplugToken = HotplugToken(0);
}

/// Receives device notifications on a backend-owned thread
pub trait HotplugListener: Send + Sync {
    fn on_arrival(&self, token: HotplugToken);
    fn on_removal(&self, token: HotplugToken);
}

/// Lists the descriptors of every device currently attached
pub trait DeviceEnumerator: Send + Sync {
    fn enumerate(&self) -> Result<Vec<SinkDescriptor>, HotplugError>;
}

/// A platform source of hot-plug notifications
pub trait HotplugEventSource: Send {
    /// Start delivering notifications to `listener` until the returned
    /// handle is shut down or dropped
    fn start(
        self: Box<Self>,
        listener: Arc<dyn HotplugListener>,
    ) -> Result<HotplugHandle, HotplugError>;

    fn name(&self) -> &'static str;
}

/// Running backend thread
///
/// Dropping the handle stops the backend and waits for its thread.
pub struct HotplugHandle {
    name: &'static str,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl HotplugHandle {
    pub(crate) fn new(name: &'static str, stop: Sender<()>, thread: JoinHandle<()>) -> Self {
        Self {
            name,
            stop: Some(stop),
            thread: Some(thread),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the backend and join its thread
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        // Closing the channel stops the backend even if the signal is lost
        if let Some(stop) = self.stop.take() {
            let _ = stop.try_send(());
            stop.close();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Hot-plug thread ({}) panicked", self.name);
            } else {
                debug!("Hot-plug thread ({}) stopped", self.name);
            }
        }
    }
}

impl Drop for HotplugHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// Hot-plug backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// libusb hot-plug when available, polling otherwise
    #[default]
    Auto,
    Usb,
    Poll,
}

/// Timing parameters for the backends
#[derive(Debug, Clone, Copy)]
pub struct HotplugOptions {
    pub poll_interval: Duration,
    pub settle: Duration,
}

impl Default for HotplugOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            settle: Duration::from_millis(250),
        }
    }
}

/// Build the event source for `kind`
pub fn select_backend(
    kind: BackendKind,
    enumerator: Arc<dyn DeviceEnumerator>,
    options: HotplugOptions,
) -> Result<Box<dyn HotplugEventSource>, HotplugError> {
    match kind {
        BackendKind::Usb => Ok(Box::new(UsbHotplugSource::new(options.settle)?)),
        BackendKind::Poll => Ok(Box::new(PollingHotplugSource::new(
            enumerator,
            options.poll_interval,
        ))),
        BackendKind::Auto => {
            if rusb::has_hotplug() {
                select_backend(BackendKind::Usb, enumerator, options)
            } else {
                info!("libusb hot-plug unavailable, falling back to polling");
                select_backend(BackendKind::Poll, enumerator, options)
            }
        }
    }
}

/// Listener that re-enumerates and reconciles the registry on every event
pub struct HotplugBridge {
    registry: Arc<DeviceRegistry>,
    enumerator: Arc<dyn DeviceEnumerator>,
}

impl HotplugBridge {
    pub fn new(registry: Arc<DeviceRegistry>, enumerator: Arc<dyn DeviceEnumerator>) -> Self {
        Self {
            registry,
            enumerator,
        }
    }

    /// Connect devices already attached at startup
    ///
    /// Run once the backend has started: the USB backend does not report
    /// devices attached before its callback was registered.
    pub fn prime(&self) {
        self.on_arrival(HotplugToken::INITIAL);
    }

    fn refresh(&self, reason: &str, token: HotplugToken) {
        let present = match self.enumerator.enumerate() {
            Ok(present) => present,
            Err(e) => {
                warn!("Skipping reconcile after {} {:?}: {}", reason, token, e);
                return;
            }
        };

        let report = self.registry.reconcile(&present);
        debug!(
            "{} {:?}: {} devices present, opened={}, closed={}, failed={}",
            reason,
            token,
            present.len(),
            report.opened,
            report.closed,
            report.failed
        );
    }
}

impl HotplugListener for HotplugBridge {
    fn on_arrival(&self, token: HotplugToken) {
        self.refresh("arrival", token);
    }

    fn on_removal(&self, token: HotplugToken) {
        self.refresh("removal", token);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::registry::{Sink, SinkError, SinkHandle, SinkState};
    use common::test_utils::create_mock_descriptor;
    use protocol::TelemetrySnapshot;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Enumerator whose result is set by the test
    #[derive(Default)]
    pub(crate) struct FakeEnumerator {
        pub present: Mutex<Vec<SinkDescriptor>>,
        pub fail: AtomicBool,
        pub calls: AtomicUsize,
    }

    impl FakeEnumerator {
        pub fn set(&self, present: Vec<SinkDescriptor>) {
            *self.present.lock().unwrap() = present;
        }
    }

    impl DeviceEnumerator for FakeEnumerator {
        fn enumerate(&self) -> Result<Vec<SinkDescriptor>, HotplugError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(HotplugError::Enumerate("bus reset".to_string()));
            }
            Ok(self.present.lock().unwrap().clone())
        }
    }

    struct NullHandle;

    impl Sink for NullHandle {
        fn send(&mut self, _snapshot: &TelemetrySnapshot) -> Result<(), SinkError> {
            Ok(())
        }
    }

    impl SinkHandle for NullHandle {}

    fn registry_with(descriptor: SinkDescriptor) -> Arc<DeviceRegistry> {
        let registry = Arc::new(DeviceRegistry::new());
        let factory = |_: &SinkDescriptor| -> Result<Box<dyn SinkHandle>, SinkError> {
            Ok(Box::new(NullHandle))
        };
        registry
            .register_descriptor(descriptor, Box::new(factory))
            .unwrap();
        registry
    }

    #[test]
    fn test_prime_reconciles_once() {
        let d = create_mock_descriptor(1);
        let registry = registry_with(d);
        let enumerator = Arc::new(FakeEnumerator::default());
        enumerator.set(vec![d]);

        let bridge = HotplugBridge::new(Arc::clone(&registry), enumerator.clone());
        bridge.prime();

        assert_eq!(enumerator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.state_of(&d), Some(SinkState::Connected));
    }

    #[test]
    fn test_removal_disconnects() {
        let d = create_mock_descriptor(1);
        let registry = registry_with(d);
        let enumerator = Arc::new(FakeEnumerator::default());
        enumerator.set(vec![d]);
        let bridge = HotplugBridge::new(Arc::clone(&registry), enumerator.clone());
        bridge.prime();

        enumerator.set(vec![]);
        bridge.on_removal(HotplugToken(0x0105));

        assert_eq!(registry.state_of(&d), Some(SinkState::Disconnected));
    }

    #[test]
    fn test_enumeration_failure_skips_reconcile() {
        let d = create_mock_descriptor(1);
        let registry = registry_with(d);
        let enumerator = Arc::new(FakeEnumerator::default());
        enumerator.set(vec![d]);
        let bridge = HotplugBridge::new(Arc::clone(&registry), enumerator.clone());
        bridge.prime();

        enumerator.fail.store(true, Ordering::SeqCst);
        bridge.on_removal(HotplugToken(7));

        // A failed enumeration must not look like every device left
        assert_eq!(registry.state_of(&d), Some(SinkState::Connected));
    }

    #[test]
    fn test_backend_kind_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            backend: BackendKind,
        }
        let parsed: Wrapper = toml::from_str(r#"backend = "poll""#).unwrap();
        assert_eq!(parsed.backend, BackendKind::Poll);
        assert_eq!(BackendKind::default(), BackendKind::Auto);
    }

    #[test]
    fn test_select_poll_backend() {
        let enumerator: Arc<dyn DeviceEnumerator> = Arc::new(FakeEnumerator::default());
        let source =
            select_backend(BackendKind::Poll, enumerator, HotplugOptions::default()).unwrap();
        assert_eq!(source.name(), "poll");
    }
}
