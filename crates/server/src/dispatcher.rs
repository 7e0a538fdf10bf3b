//! Telemetry receive loop
//!
//! One thread reads datagrams from the UDP socket, decodes each one and fans
//! the snapshot out to USB sinks and then to browser viewers. Nothing is
//! buffered: the next datagram is read only after both broadcasts return.

use crate::network::ConnectionPool;
use crate::registry::DeviceRegistry;
use protocol::{DecodeError, TelemetrySnapshot};
use std::io;
use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// How long a read blocks before the running flag is checked again
pub const READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Larger than any telemetry datagram; longer packets are truncated
const RECV_BUFFER: usize = 2048;

/// Routes decoded snapshots to every sink
pub struct Dispatcher {
    registry: Arc<DeviceRegistry>,
    pool: Arc<ConnectionPool>,
}

impl Dispatcher {
    pub fn new(registry: Arc<DeviceRegistry>, pool: Arc<ConnectionPool>) -> Self {
        Self { registry, pool }
    }

    /// Decode one datagram and broadcast it
    pub fn dispatch(&self, datagram: &[u8]) -> Result<TelemetrySnapshot, DecodeError> {
        let snapshot = protocol::decode(datagram)?;

        let report = self.registry.broadcast(&snapshot);
        trace!(
            "Snapshot delivered to {} sinks ({} failed)",
            report.delivered, report.failed
        );

        if !self.pool.is_empty() {
            match serde_json::to_string(&snapshot.data_point()) {
                Ok(payload) => {
                    if let Err(e) = self.pool.broadcast(&payload) {
                        debug!("Viewer broadcast: {}", e);
                    }
                }
                Err(e) => warn!("Failed to serialize data point: {}", e),
            }
        }

        Ok(snapshot)
    }

    /// Receive and dispatch until `running` is cleared
    ///
    /// Malformed datagrams are logged and skipped. Socket errors other than
    /// timeouts end the loop.
    pub fn run(&self, socket: &UdpSocket, running: &AtomicBool) -> io::Result<()> {
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        let mut buf = [0u8; RECV_BUFFER];

        info!("Receiving telemetry on udp://{}", socket.local_addr()?);

        while running.load(Ordering::SeqCst) {
            let (len, peer) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Err(e) = self.dispatch(&buf[..len]) {
                warn!("Dropping datagram from {}: {}", peer, e);
            }
        }

        info!("Telemetry receiver stopped");
        Ok(())
    }
}

/// Run the receive loop on a dedicated thread
pub fn spawn_receiver(
    socket: UdpSocket,
    dispatcher: Dispatcher,
    running: Arc<AtomicBool>,
) -> io::Result<JoinHandle<io::Result<()>>> {
    std::thread::Builder::new()
        .name("telemetry-rx".to_string())
        .spawn(move || dispatcher.run(&socket, &running))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid::{ReportWriter, RevLightDevice};
    use crate::network::{Connection, PoolError};
    use crate::registry::{SinkError, SinkHandle};
    use common::test_utils::{PacketBuilder, REV_LIGHTS_DESCRIPTOR};
    use protocol::{PACKET_SIZE, SinkDescriptor};
    use std::sync::Mutex;
    use std::sync::mpsc;

    struct ChannelWriter(Mutex<mpsc::Sender<u8>>);

    impl ReportWriter for ChannelWriter {
        fn write_report(&self, data: &[u8]) -> Result<usize, SinkError> {
            let _ = self.0.lock().unwrap().send(data[1]);
            Ok(data.len())
        }
    }

    struct ChannelConnection(mpsc::Sender<String>);

    impl Connection for ChannelConnection {
        fn write(&mut self, payload: &str) -> Result<(), PoolError> {
            self.0
                .send(payload.to_string())
                .map_err(|_| PoolError::Closed(0))
        }
    }

    fn rig() -> (Dispatcher, mpsc::Receiver<u8>, mpsc::Receiver<String>) {
        let (mask_tx, mask_rx) = mpsc::channel();
        let mask_tx = Mutex::new(Some(mask_tx));
        let registry = Arc::new(DeviceRegistry::new());
        let factory = move |_: &SinkDescriptor| -> Result<Box<dyn SinkHandle>, SinkError> {
            let tx = mask_tx
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| SinkError::Open("already opened".to_string()))?;
            Ok(Box::new(RevLightDevice::new(
                ChannelWriter(Mutex::new(tx)),
                [65, 70, 74, 76, 78, 80, 82, 85],
            )))
        };
        registry
            .register_descriptor(REV_LIGHTS_DESCRIPTOR, Box::new(factory))
            .unwrap();
        registry.reconcile(&[REV_LIGHTS_DESCRIPTOR]);

        let (json_tx, json_rx) = mpsc::channel();
        let pool = Arc::new(ConnectionPool::new());
        pool.add(Box::new(ChannelConnection(json_tx)));

        (Dispatcher::new(registry, pool), mask_rx, json_rx)
    }

    #[test]
    fn test_dispatch_reaches_sinks_and_viewers() {
        let (dispatcher, masks, json) = rig();
        let datagram = PacketBuilder::new()
            .engine_rate(6000.0)
            .max_rpm(8000.0)
            .gear(4.0)
            .speed(40.0)
            .build();

        let snapshot = dispatcher.dispatch(&datagram).unwrap();

        assert_eq!(snapshot.rev_light_percent(), 75);
        assert_eq!(masks.try_recv().unwrap(), 0b0000_0111);
        assert_eq!(json.try_recv().unwrap(), r#"{"Gear":4,"Speed":89}"#);
    }

    #[test]
    fn test_short_datagram_not_broadcast() {
        let (dispatcher, masks, json) = rig();

        let result = dispatcher.dispatch(&[0u8; PACKET_SIZE - 1]);

        assert!(matches!(result, Err(DecodeError::ShortBuffer { .. })));
        assert!(masks.try_recv().is_err());
        assert!(json.try_recv().is_err());
    }

    #[test]
    fn test_receive_loop_end_to_end() {
        let (dispatcher, masks, json) = rig();
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let receiver = spawn_receiver(socket, dispatcher, Arc::clone(&running)).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        // A malformed datagram must not stop the loop
        sender.send_to(&[1, 2, 3], addr).unwrap();
        let datagram = PacketBuilder::new()
            .engine_rate(6000.0)
            .max_rpm(8000.0)
            .build();
        sender.send_to(&datagram, addr).unwrap();

        let timeout = Duration::from_secs(5);
        assert_eq!(masks.recv_timeout(timeout).unwrap(), 0b0000_0111);
        assert_eq!(
            json.recv_timeout(timeout).unwrap(),
            r#"{"Gear":0,"Speed":0}"#
        );

        running.store(false, Ordering::SeqCst);
        receiver.join().unwrap().unwrap();
    }
}
