//! Fan-out to live viewer connections

use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

/// Viewer write errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The connection's writer has terminated
    #[error("Connection {0} closed")]
    Closed(u64),
}

/// A viewer that accepts text payloads
pub trait Connection: Send {
    fn write(&mut self, payload: &str) -> Result<(), PoolError>;
}

/// Set of live viewer connections
///
/// A connection whose write fails is removed and never written to again.
/// The pool has no size limit.
#[derive(Default)]
pub struct ConnectionPool {
    connections: Mutex<Vec<Box<dyn Connection>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Box<dyn Connection>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, connection: Box<dyn Connection>) {
        let mut connections = self.lock();
        connections.push(connection);
        debug!("Viewer added ({} connected)", connections.len());
    }

    /// Write `payload` to every connection
    ///
    /// Connections that fail are dropped. When several fail, only the last
    /// error is returned.
    pub fn broadcast(&self, payload: &str) -> Result<(), PoolError> {
        let mut connections = self.lock();
        let mut last_error = None;

        connections.retain_mut(|connection| match connection.write(payload) {
            Ok(()) => true,
            Err(e) => {
                debug!("Dropping viewer: {}", e);
                last_error = Some(e);
                false
            }
        });

        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
