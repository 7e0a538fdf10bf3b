//! USB sink registry
//!
//! Tracks every sink descriptor registered at startup and the subset whose
//! physical device is currently open. The registry is driven from two sides:
//!
//! - the hot-plug bridge calls [`DeviceRegistry::reconcile`] from a backend
//!   thread whenever devices arrive or leave
//! - the receive loop calls [`DeviceRegistry::broadcast`] once per datagram
//!
//! Both operations take the same registry-wide lock, so a broadcast either sees
//! an entry fully connected with a live handle or does not see it at all.
//!
//! # State machine
//!
//! ```text
//! Registered ──open──> Connected ──device left──> Disconnected
//!                          ^                           │
//!                          └──────────open─────────────┘
//! ```
//!
//! Only the hot-plug path moves a sink out of `Connected`. A failed send is
//! logged and counted but never disconnects the sink.

mod sink;

pub use sink::{Sink, SinkError, SinkFactory, SinkHandle};

use protocol::{SinkDescriptor, TelemetrySnapshot};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Send failures are logged on the first occurrence and then every N
const FAILURE_LOG_INTERVAL: u32 = 100;

/// Registry errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The descriptor is already registered; the first registration is kept
    #[error("Descriptor already registered: {0}")]
    Duplicate(SinkDescriptor),
}

/// Connection state of a registered sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Known descriptor, never opened
    Registered,
    /// Device present and handle open
    Connected,
    /// Device removed and handle closed
    Disconnected,
}

/// Point-in-time view of one registry entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkStatus {
    pub descriptor: SinkDescriptor,
    pub label: String,
    pub state: SinkState,
    /// Send failures since the last successful send
    pub consecutive_failures: u32,
}

/// Outcome of a reconcile pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub opened: usize,
    pub closed: usize,
    /// Opens that failed and will be retried on the next reconcile
    pub failed: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Outcome of a broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Whether the `count`th consecutive send failure is logged
fn failure_is_logged(count: u32) -> bool {
    count % FAILURE_LOG_INTERVAL == 1
}

enum EntryState {
    Registered,
    Connected(Box<dyn SinkHandle>),
    Disconnected,
}

struct RegistryEntry {
    descriptor: SinkDescriptor,
    factory: Box<dyn SinkFactory>,
    state: EntryState,
    consecutive_failures: u32,
}

/// Device lifecycle operations reserved to the registry
trait ManagedSink {
    fn matches(&self, descriptor: &SinkDescriptor) -> bool;
    fn open(&mut self) -> Result<(), SinkError>;
    fn close(&mut self);
}

impl RegistryEntry {
    fn new(descriptor: SinkDescriptor, factory: Box<dyn SinkFactory>) -> Self {
        Self {
            descriptor,
            factory,
            state: EntryState::Registered,
            consecutive_failures: 0,
        }
    }

    fn is_open(&self) -> bool {
        matches!(self.state, EntryState::Connected(_))
    }

    fn state(&self) -> SinkState {
        match self.state {
            EntryState::Registered => SinkState::Registered,
            EntryState::Connected(_) => SinkState::Connected,
            EntryState::Disconnected => SinkState::Disconnected,
        }
    }

    fn status(&self) -> SinkStatus {
        SinkStatus {
            descriptor: self.descriptor,
            label: self.factory.label().to_string(),
            state: self.state(),
            consecutive_failures: self.consecutive_failures,
        }
    }

    fn send(&mut self, snapshot: &TelemetrySnapshot) -> Option<Result<(), SinkError>> {
        let EntryState::Connected(handle) = &mut self.state else {
            return None;
        };
        let result = handle.send(snapshot);

        match &result {
            Ok(()) => {
                if self.consecutive_failures > 0 {
                    info!(
                        "{} {} recovered after {} failed sends",
                        self.factory.label(),
                        self.descriptor,
                        self.consecutive_failures
                    );
                    self.consecutive_failures = 0;
                }
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if failure_is_logged(self.consecutive_failures) {
                    warn!(
                        "Send to {} {} failed ({} in a row): {}",
                        self.factory.label(),
                        self.descriptor,
                        self.consecutive_failures,
                        e
                    );
                }
            }
        }
        Some(result)
    }
}

impl ManagedSink for RegistryEntry {
    fn matches(&self, descriptor: &SinkDescriptor) -> bool {
        self.descriptor == *descriptor
    }

    fn open(&mut self) -> Result<(), SinkError> {
        if self.is_open() {
            return Ok(());
        }

        let handle = self.factory.open(&self.descriptor)?;
        self.state = EntryState::Connected(handle);
        self.consecutive_failures = 0;

        info!("{} connected: {}", self.factory.label(), self.descriptor);
        Ok(())
    }

    fn close(&mut self) {
        match std::mem::replace(&mut self.state, EntryState::Disconnected) {
            EntryState::Connected(handle) => {
                if let Err(e) = handle.close() {
                    warn!(
                        "Error closing {} {}: {}",
                        self.factory.label(),
                        self.descriptor,
                        e
                    );
                }
                info!("{} disconnected: {}", self.factory.label(), self.descriptor);
            }
            other => self.state = other,
        }
    }
}

/// Registry of hot-pluggable USB sinks
///
/// Constructed once at startup and shared behind an `Arc` with the receive
/// loop and the hot-plug bridge.
#[derive(Default)]
pub struct DeviceRegistry {
    entries: Mutex<Vec<RegistryEntry>>,
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RegistryEntry>> {
        // A sink that panicked mid-send leaves entries consistent
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a descriptor with the factory that opens its devices
    ///
    /// The new entry starts in [`SinkState::Registered`] and is opened on the
    /// next reconcile that lists it as present. Registering the same
    /// descriptor twice fails and leaves the first registration untouched.
    pub fn register_descriptor(
        &self,
        descriptor: SinkDescriptor,
        factory: Box<dyn SinkFactory>,
    ) -> Result<(), RegistryError> {
        let mut entries = self.lock();

        if entries.iter().any(|entry| entry.matches(&descriptor)) {
            return Err(RegistryError::Duplicate(descriptor));
        }

        info!("Registered {}: {}", factory.label(), descriptor);
        entries.push(RegistryEntry::new(descriptor, factory));
        Ok(())
    }

    /// Align registry state with the devices that are physically present
    ///
    /// Connected entries missing from `present` are closed; registered or
    /// disconnected entries found in `present` are opened. Entries already
    /// connected and still present are left alone, so calling this twice with
    /// the same list does nothing the second time.
    pub fn reconcile(&self, present: &[SinkDescriptor]) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut entries = self.lock();

        for entry in entries.iter_mut() {
            let is_present = present.iter().any(|d| entry.matches(d));

            match (entry.is_open(), is_present) {
                (true, false) => {
                    entry.close();
                    report.closed += 1;
                }
                (false, true) => match entry.open() {
                    Ok(()) => report.opened += 1,
                    Err(e) => {
                        warn!(
                            "Failed to open {} {}: {} (will retry on next device change)",
                            entry.factory.label(),
                            entry.descriptor,
                            e
                        );
                        report.failed += 1;
                    }
                },
                _ => {}
            }
        }

        if !report.is_noop() {
            debug!(
                "Reconciled {} present devices: opened={}, closed={}, failed={}",
                present.len(),
                report.opened,
                report.closed,
                report.failed
            );
        }
        report
    }

    /// Deliver a snapshot to every connected sink in registration order
    ///
    /// A failing sink does not prevent delivery to the others and stays
    /// connected.
    pub fn broadcast(&self, snapshot: &TelemetrySnapshot) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut entries = self.lock();

        for entry in entries.iter_mut() {
            match entry.send(snapshot) {
                Some(Ok(())) => report.delivered += 1,
                Some(Err(_)) => report.failed += 1,
                None => {}
            }
        }
        report
    }

    /// Close every open handle
    ///
    /// Used on shutdown. Closed entries become [`SinkState::Disconnected`].
    pub fn close_all(&self) -> usize {
        let mut entries = self.lock();
        let mut closed = 0;

        for entry in entries.iter_mut().filter(|entry| entry.is_open()) {
            entry.close();
            closed += 1;
        }
        closed
    }

    /// State of the entry registered for `descriptor`
    pub fn state_of(&self, descriptor: &SinkDescriptor) -> Option<SinkState> {
        self.lock()
            .iter()
            .find(|entry| entry.matches(descriptor))
            .map(RegistryEntry::state)
    }

    /// Number of sinks currently receiving broadcasts
    pub fn connected_count(&self) -> usize {
        self.lock().iter().filter(|entry| entry.is_open()).count()
    }

    /// Status of every entry in registration order
    pub fn status(&self) -> Vec<SinkStatus> {
        self.lock().iter().map(RegistryEntry::status).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
