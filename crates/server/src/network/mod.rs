//! Browser viewer fan-out
//!
//! # Architecture
//!
//! ```text
//! receive loop ──broadcast──> ConnectionPool
//!                               ├─> QueuedConnection ──queue──> writer task ──> browser
//!                               └─> QueuedConnection ──queue──> writer task ──> browser
//!
//! WebSocketServer
//!   └─> accept on /sock, add a QueuedConnection per session
//! ```

pub mod pool;
pub mod websocket;

pub use pool::{Connection, ConnectionPool, PoolError};
pub use websocket::{QueuedConnection, WS_PATH, WebSocketServer};
