//! libusb hot-plug backend
//!
//! Registers a `rusb` hot-plug callback and pumps libusb events on a
//! dedicated thread. The kernel creates the HID node some time after the USB
//! device arrives, so events are held for a settle delay before the listener
//! is notified. Events of the same kind arriving within that delay are
//! coalesced into one notification.

use super::{HotplugError, HotplugEventSource, HotplugHandle, HotplugListener, HotplugToken};
use async_channel::{Receiver, TryRecvError};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Upper bound on how long one libusb event pump blocks
const EVENT_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Arrival,
    Removal,
}

#[derive(Debug)]
struct Pending {
    kind: EventKind,
    token: HotplugToken,
    due: Instant,
}

/// Events waiting for their settle delay to pass
#[derive(Debug)]
struct SettleQueue {
    settle: Duration,
    pending: VecDeque<Pending>,
}

impl SettleQueue {
    fn new(settle: Duration) -> Self {
        Self {
            settle,
            pending: VecDeque::new(),
        }
    }

    fn push(&mut self, kind: EventKind, token: HotplugToken, now: Instant) {
        let due = now + self.settle;

        // A pending event of the same kind already covers this one
        if let Some(existing) = self.pending.iter_mut().find(|p| p.kind == kind) {
            existing.token = token;
            existing.due = due;
            return;
        }
        self.pending.push_back(Pending { kind, token, due });
    }

    /// Remove and return every event whose delay has passed
    fn take_due(&mut self, now: Instant) -> Vec<(EventKind, HotplugToken)> {
        let mut ready = Vec::new();
        self.pending.retain(|p| {
            if p.due <= now {
                ready.push((p.kind, p.token));
                false
            } else {
                true
            }
        });
        ready
    }
}

fn token_of<T: UsbContext>(device: &Device<T>) -> HotplugToken {
    HotplugToken((u64::from(device.bus_number()) << 8) | u64::from(device.address()))
}

/// Callback registered with libusb; runs inside `handle_events`
struct HotplugCallback {
    queue: Arc<Mutex<SettleQueue>>,
}

impl HotplugCallback {
    fn queue(&self, kind: EventKind, token: HotplugToken) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(kind, token, Instant::now());
    }
}

impl<T: UsbContext> Hotplug<T> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<T>) {
        debug!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.queue(EventKind::Arrival, token_of(&device));
    }

    fn device_left(&mut self, device: Device<T>) {
        debug!(
            "Hot-plug callback: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.queue(EventKind::Removal, token_of(&device));
    }
}

pub struct UsbHotplugSource {
    context: Context,
    settle: Duration,
}

impl UsbHotplugSource {
    pub fn new(settle: Duration) -> Result<Self, HotplugError> {
        if !rusb::has_hotplug() {
            return Err(HotplugError::Unsupported);
        }
        Ok(Self {
            context: Context::new()?,
            settle,
        })
    }
}

impl HotplugEventSource for UsbHotplugSource {
    fn start(
        self: Box<Self>,
        listener: Arc<dyn HotplugListener>,
    ) -> Result<HotplugHandle, HotplugError> {
        let name = self.name();
        let (stop_tx, stop_rx) = async_channel::bounded::<()>(1);
        let (ready_tx, ready_rx) = async_channel::bounded::<Result<(), rusb::Error>>(1);
        let UsbHotplugSource { context, settle } = *self;

        let thread = std::thread::Builder::new()
            .name("hotplug-usb".to_string())
            .spawn(move || {
                let queue = Arc::new(Mutex::new(SettleQueue::new(settle)));
                let callback = HotplugCallback {
                    queue: Arc::clone(&queue),
                };

                // Devices present before registration are picked up by priming
                let registration: rusb::Result<Registration<Context>> = HotplugBuilder::new()
                    .enumerate(false)
                    .register(&context, Box::new(callback));

                let _registration = match registration {
                    Ok(registration) => {
                        let _ = ready_tx.send_blocking(Ok(()));
                        registration
                    }
                    Err(e) => {
                        let _ = ready_tx.send_blocking(Err(e));
                        return;
                    }
                };

                info!("USB hot-plug started (settle {:?})", settle);
                run_event_loop(&context, &queue, listener.as_ref(), &stop_rx);
                info!("USB hot-plug stopped");
            })?;

        match ready_rx.recv_blocking() {
            Ok(Ok(())) => Ok(HotplugHandle::new(name, stop_tx, thread)),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(HotplugError::Usb(e))
            }
            Err(_) => {
                let _ = thread.join();
                Err(HotplugError::Usb(rusb::Error::Other))
            }
        }
    }

    fn name(&self) -> &'static str {
        "usb"
    }
}

fn run_event_loop(
    context: &Context,
    queue: &Mutex<SettleQueue>,
    listener: &dyn HotplugListener,
    stop_rx: &Receiver<()>,
) {
    loop {
        match stop_rx.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(()) | Err(TryRecvError::Closed) => break,
        }

        match context.handle_events(Some(EVENT_TIMEOUT)) {
            Ok(()) => {}
            Err(rusb::Error::Interrupted) => {
                debug!("USB event handling interrupted");
            }
            Err(e) => {
                warn!("Error handling USB events: {}", e);
                std::thread::sleep(EVENT_TIMEOUT);
            }
        }

        let ready = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take_due(Instant::now());

        for (kind, token) in ready {
            // The listener reconciles the registry; keep the pump alive if it panics
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| match kind {
                EventKind::Arrival => listener.on_arrival(token),
                EventKind::Removal => listener.on_removal(token),
            }));
            if let Err(e) = result {
                error!("Panic in hot-plug listener: {:?}", e);
            }
        }
    }
}
