//! Telemetry wire protocol for opendash
//!
//! This crate decodes the fixed-layout UDP telemetry packets emitted by the
//! simulator into [`TelemetrySnapshot`] values, and defines the small set of
//! types shared by every output sink: the device identity tuple
//! ([`SinkDescriptor`]) and the JSON document pushed to browser viewers
//! ([`DataPoint`]).
//!
//! # Example
//!
//! ```
//! use protocol::{PACKET_SIZE, decode};
//!
//! let datagram = [0u8; PACKET_SIZE];
//! let snapshot = decode(&datagram).unwrap();
//! assert_eq!(snapshot.gear(), 0);
//!
//! // Short datagrams never produce a partial snapshot
//! assert!(decode(&datagram[..100]).is_err());
//! ```

pub mod error;
pub mod packet;
pub mod types;

pub use error::{DecodeError, Result};
pub use packet::{PACKET_SIZE, decode, offsets};
pub use types::{
    DataPoint, MPS_TO_MPH, SessionBlock, SinkDescriptor, TelemetrySnapshot, Vec3, Wheels,
};
