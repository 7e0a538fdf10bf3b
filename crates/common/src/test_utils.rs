//! Test utilities for opendash
//!
//! Provides packet builders, mock descriptors and helper functions for testing
//! across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::PacketBuilder;
//!
//! let datagram = PacketBuilder::new().engine_rate(6000.0).max_rpm(8000.0).build();
//! let snapshot = protocol::decode(&datagram).unwrap();
//! assert_eq!(snapshot.rev_light_percent(), 75);
//! ```

use protocol::{PACKET_SIZE, SinkDescriptor, offsets};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Descriptor of the reference rev-light board
pub const REV_LIGHTS_DESCRIPTOR: SinkDescriptor =
    SinkDescriptor::new(0x16c0, 0x0480, 0xffab, 0x0200);

/// Builds 264-byte telemetry datagrams field by field
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    buf: [u8; PACKET_SIZE],
}

impl Default for PacketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketBuilder {
    /// Start from an all-zero packet
    pub fn new() -> Self {
        Self {
            buf: [0u8; PACKET_SIZE],
        }
    }

    /// Write `value` at an arbitrary byte offset
    ///
    /// # Panics
    /// Panics if `offset + 4` exceeds the packet size.
    pub fn field(mut self, offset: usize, value: f32) -> Self {
        self.buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        self
    }

    pub fn engine_rate(self, rpm: f32) -> Self {
        self.field(offsets::ENGINE_RATE, rpm)
    }

    pub fn max_rpm(self, rpm: f32) -> Self {
        self.field(offsets::MAX_RPM, rpm)
    }

    pub fn gear(self, gear: f32) -> Self {
        self.field(offsets::GEAR, gear)
    }

    /// Speed in metres per second
    pub fn speed(self, speed: f32) -> Self {
        self.field(offsets::SPEED, speed)
    }

    pub fn build(self) -> [u8; PACKET_SIZE] {
        self.buf
    }
}

/// Create a mock descriptor that differs from others by `id`
///
/// # Example
/// ```
/// use common::test_utils::create_mock_descriptor;
///
/// assert_ne!(create_mock_descriptor(1), create_mock_descriptor(2));
/// assert_eq!(create_mock_descriptor(7).usage, 7);
/// ```
pub fn create_mock_descriptor(id: u16) -> SinkDescriptor {
    SinkDescriptor::new(0x1234, 0x5678, 0xff00, id)
}

/// Create `count` distinct mock descriptors
pub fn create_mock_descriptor_list(count: u16) -> Vec<SinkDescriptor> {
    (1..=count).map(create_mock_descriptor).collect()
}

/// Run a future with a timeout
///
/// # Example
/// ```no_run
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
