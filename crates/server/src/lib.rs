//! opendash server library
//!
//! Decoded telemetry flows from the UDP receive loop ([`dispatcher`]) into
//! two fan-out collections:
//!
//! - [`registry::DeviceRegistry`]: hot-pluggable USB HID sinks, kept in step
//!   with the bus by [`hotplug`]
//! - [`network::ConnectionPool`]: browser viewers connected over WebSocket

pub mod config;
pub mod dispatcher;
pub mod hid;
pub mod hotplug;
pub mod network;
pub mod registry;
