//! WebSocket viewer endpoint
//!
//! Browsers connect to `/sock` and receive one JSON text frame per telemetry
//! snapshot. Each session is split into:
//!
//! - a writer task draining a bounded queue into the socket
//! - a reader loop that discards inbound frames and detects the close
//!
//! The pool only ever enqueues. When a queue is full the oldest payload is
//! dropped, so a slow browser sees fewer frames instead of stalling the
//! receive loop.

use super::pool::{Connection, ConnectionPool, PoolError};
use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, trace, warn};

/// Only path accepted for the upgrade
pub const WS_PATH: &str = "/sock";

/// How often the accept loop checks the running flag
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Pool entry for one browser session
pub struct QueuedConnection {
    id: u64,
    tx: async_channel::Sender<String>,
}

impl Connection for QueuedConnection {
    fn write(&mut self, payload: &str) -> Result<(), PoolError> {
        match self.tx.force_send(payload.to_string()) {
            Ok(None) => Ok(()),
            Ok(Some(_dropped)) => {
                trace!("Viewer {} queue full, dropped oldest frame", self.id);
                Ok(())
            }
            Err(_) => Err(PoolError::Closed(self.id)),
        }
    }
}

/// WebSocket endpoint feeding viewers from a [`ConnectionPool`]
pub struct WebSocketServer {
    listener: TcpListener,
    pool: Arc<ConnectionPool>,
    queue_depth: usize,
    next_id: AtomicU64,
}

impl WebSocketServer {
    pub async fn bind(
        addr: SocketAddr,
        pool: Arc<ConnectionPool>,
        queue_depth: usize,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind WebSocket listener on {}", addr))?;

        Ok(Self {
            listener,
            pool,
            queue_depth: queue_depth.max(1),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read WebSocket listener address")
    }

    /// Accept viewers until `running` is cleared
    pub async fn run(self, running: Arc<AtomicBool>) -> anyhow::Result<()> {
        info!("WebSocket viewers on ws://{}{}", self.local_addr()?, WS_PATH);

        while running.load(Ordering::SeqCst) {
            match timeout(ACCEPT_POLL, self.listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let pool = Arc::clone(&self.pool);
                    let depth = self.queue_depth;
                    tokio::spawn(async move {
                        handle_session(stream, peer, id, pool, depth).await;
                    });
                }
                Ok(Err(e)) => {
                    error!("WebSocket accept error: {}", e);
                }
                Err(_) => {}
            }
        }

        info!("WebSocket server stopped");
        Ok(())
    }
}

#[allow(clippy::result_large_err)]
fn check_path(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    if request.uri().path() == WS_PATH {
        return Ok(response);
    }

    let mut rejection = ErrorResponse::new(Some("Not Found".to_string()));
    *rejection.status_mut() = StatusCode::NOT_FOUND;
    Err(rejection)
}

async fn handle_session(
    stream: TcpStream,
    peer: SocketAddr,
    id: u64,
    pool: Arc<ConnectionPool>,
    queue_depth: usize,
) {
    let ws = match accept_hdr_async(stream, check_path).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("Rejected viewer {}: {}", peer, e);
            return;
        }
    };
    info!("Viewer {} connected from {}", id, peer);

    let (mut sink, mut inbound) = ws.split();
    let (tx, rx) = async_channel::bounded::<String>(queue_depth);

    pool.add(Box::new(QueuedConnection { id, tx: tx.clone() }));

    let mut writer = tokio::spawn(async move {
        while let Ok(payload) = rx.recv().await {
            if let Err(e) = sink.send(Message::Text(payload)).await {
                debug!("Viewer {} write failed: {}", id, e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    let writer_result = loop {
        tokio::select! {
            frame = inbound.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break None,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Viewer {} read error: {}", id, e);
                    break None;
                }
            },
            result = &mut writer => break Some(result),
        }
    };

    // Fails the next pool write, which removes the entry
    tx.close();
    let writer_result = match writer_result {
        Some(result) => result,
        None => writer.await,
    };
    if let Err(e) = writer_result {
        warn!("Viewer {} writer task failed: {}", id, e);
    }
    info!("Viewer {} disconnected", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{DEFAULT_TEST_TIMEOUT, with_timeout};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Error as WsError;

    async fn start_server(
        queue_depth: usize,
    ) -> (SocketAddr, Arc<ConnectionPool>, Arc<AtomicBool>) {
        let pool = Arc::new(ConnectionPool::new());
        let server = WebSocketServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::clone(&pool),
            queue_depth,
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        tokio::spawn(server.run(Arc::clone(&running)));
        (addr, pool, running)
    }

    async fn wait_for_viewers(pool: &ConnectionPool, count: usize) {
        while pool.len() != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn test_queued_connection_drops_oldest() {
        let (tx, rx) = async_channel::bounded(2);
        let mut connection = QueuedConnection { id: 1, tx };

        connection.write("a").unwrap();
        connection.write("b").unwrap();
        connection.write("c").unwrap();

        assert_eq!(rx.try_recv().unwrap(), "b");
        assert_eq!(rx.try_recv().unwrap(), "c");

        drop(rx);
        assert_eq!(connection.write("d"), Err(PoolError::Closed(1)));
    }

    #[tokio::test]
    async fn test_viewer_receives_json_frames() {
        let (addr, pool, running) = start_server(16).await;

        let (mut client, _) = connect_async(format!("ws://{}/sock", addr)).await.unwrap();
        with_timeout(DEFAULT_TEST_TIMEOUT, wait_for_viewers(&pool, 1))
            .await
            .unwrap();

        let payload = serde_json::to_string(&protocol::DataPoint { gear: 3, speed: 120 }).unwrap();
        pool.broadcast(&payload).unwrap();

        let frame = with_timeout(DEFAULT_TEST_TIMEOUT, client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame, Message::Text(r#"{"Gear":3,"Speed":120}"#.to_string()));

        running.store(false, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn test_other_paths_rejected() {
        let (addr, pool, running) = start_server(16).await;

        let result = connect_async(format!("ws://{}/other", addr)).await;

        match result {
            Err(WsError::Http(response)) => assert_eq!(response.status(), 404),
            other => panic!("expected 404, got {:?}", other.map(|_| ())),
        }
        assert!(pool.is_empty());
        running.store(false, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn test_closed_viewer_removed_from_pool() {
        let (addr, pool, running) = start_server(16).await;

        let (mut client, _) = connect_async(format!("ws://{}/sock", addr)).await.unwrap();
        with_timeout(DEFAULT_TEST_TIMEOUT, wait_for_viewers(&pool, 1))
            .await
            .unwrap();

        client.close(None).await.unwrap();

        let removed = with_timeout(DEFAULT_TEST_TIMEOUT, async {
            loop {
                let _ = pool.broadcast("{}");
                if pool.is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(removed.is_ok());
        running.store(false, Ordering::SeqCst);
    }
}
