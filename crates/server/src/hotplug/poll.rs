//! Polling hot-plug backend
//!
//! Enumerates on a fixed interval and fires a notification whenever the set
//! of attached descriptors changes.

use super::{
    DeviceEnumerator, HotplugError, HotplugEventSource, HotplugHandle, HotplugListener,
    HotplugToken,
};
use async_channel::{Receiver, TryRecvError};
use protocol::SinkDescriptor;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest sleep between checks of the stop channel
const STOP_CHECK: Duration = Duration::from_millis(50);

pub struct PollingHotplugSource {
    enumerator: Arc<dyn DeviceEnumerator>,
    interval: Duration,
}

impl PollingHotplugSource {
    pub fn new(enumerator: Arc<dyn DeviceEnumerator>, interval: Duration) -> Self {
        Self {
            enumerator,
            interval,
        }
    }
}

/// Differences between two enumerations
struct Poller {
    known: Option<HashSet<SinkDescriptor>>,
    next_token: u64,
}

impl Poller {
    fn new() -> Self {
        Self {
            known: None,
            next_token: HotplugToken::INITIAL.0 + 1,
        }
    }

    fn token(&mut self) -> HotplugToken {
        let token = HotplugToken(self.next_token);
        self.next_token += 1;
        token
    }

    /// Compare `present` with the previous tick and notify `listener`
    ///
    /// The first tick reports an arrival when anything is attached, so a
    /// device plugged in between priming and the first poll is not missed.
    fn tick(&mut self, present: Vec<SinkDescriptor>, listener: &dyn HotplugListener) {
        let present: HashSet<SinkDescriptor> = present.into_iter().collect();

        let Some(known) = self.known.as_ref() else {
            if !present.is_empty() {
                let token = self.token();
                debug!("Poll: {} interfaces at first poll", present.len());
                listener.on_arrival(token);
            }
            self.known = Some(present);
            return;
        };

        let removed = known.difference(&present).count();
        let arrived = present.difference(known).count();

        if removed > 0 {
            let token = self.token();
            debug!("Poll: {} interfaces removed", removed);
            listener.on_removal(token);
        }
        if arrived > 0 {
            let token = self.token();
            debug!("Poll: {} interfaces arrived", arrived);
            listener.on_arrival(token);
        }

        self.known = Some(present);
    }
}

impl HotplugEventSource for PollingHotplugSource {
    fn start(
        self: Box<Self>,
        listener: Arc<dyn HotplugListener>,
    ) -> Result<HotplugHandle, HotplugError> {
        let name = self.name();
        let (stop_tx, stop_rx) = async_channel::bounded::<()>(1);
        let PollingHotplugSource {
            enumerator,
            interval,
        } = *self;

        let thread = std::thread::Builder::new()
            .name("hotplug-poll".to_string())
            .spawn(move || {
                info!("Polling for device changes every {:?}", interval);
                let mut poller = Poller::new();

                loop {
                    match enumerator.enumerate() {
                        Ok(present) => poller.tick(present, listener.as_ref()),
                        Err(e) => warn!("Device poll failed: {}", e),
                    }

                    if wait_for_stop(&stop_rx, interval) {
                        break;
                    }
                }
            })?;

        Ok(HotplugHandle::new(name, stop_tx, thread))
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}

/// Sleep for `interval`, returning early with `true` once a stop is requested
fn wait_for_stop(stop_rx: &Receiver<()>, interval: Duration) -> bool {
    let deadline = Instant::now() + interval;
    loop {
        match stop_rx.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(()) | Err(TryRecvError::Closed) => return true,
        }

        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep((deadline - now).min(STOP_CHECK));
    }
}
