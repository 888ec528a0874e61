//! Server orchestration: wires the relay hub to its listener backends.
//!
//! [`SignalServer::start`] constructs the hub (which owns the room
//! directory — there is no global state to reach around it), binds every
//! enabled listener backend, and spawns the lot. The returned
//! [`ServerHandle`] reports the resolved addresses and tears everything
//! down on [`shutdown`](ServerHandle::shutdown).

use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::hub::RelayHub;
use crate::transports::{Listener, RawListener};
#[cfg(feature = "transport-websocket")]
use crate::transports::WebSocketListener;

/// The signaling server. Stateless by itself — state lives in the hub
/// task spawned by [`start`](Self::start).
#[derive(Debug)]
pub struct SignalServer;

impl SignalServer {
    /// Bind all listeners and spawn the hub and accept loops.
    ///
    /// Bind addresses with port `0` resolve to OS-assigned ports, reported
    /// on the returned handle — integration tests rely on this.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::SignalServerError::Io`] if a listener
    /// cannot bind.
    pub async fn start(config: ServerConfig) -> Result<ServerHandle> {
        let (hub_tx, hub) = RelayHub::new(config.event_log_capacity);

        let mut listeners: Vec<Box<dyn Listener>> = Vec::new();

        let raw =
            RawListener::bind(config.raw_addr, hub_tx.clone(), config.idle_timeout).await?;
        let raw_addr = raw.local_addr();
        listeners.push(Box::new(raw));

        #[cfg(feature = "transport-websocket")]
        let ws_addr = {
            let ws =
                WebSocketListener::bind(config.ws_addr, hub_tx.clone(), config.idle_timeout)
                    .await?;
            let addr = ws.local_addr();
            listeners.push(Box::new(ws));
            Some(addr)
        };
        #[cfg(not(feature = "transport-websocket"))]
        let ws_addr = None;

        let mut tasks = vec![tokio::spawn(hub.run())];
        for listener in listeners {
            tasks.push(tokio::spawn(listener.run()));
        }

        info!(%raw_addr, ?ws_addr, "signaling server started");
        Ok(ServerHandle {
            raw_addr,
            ws_addr,
            tasks,
        })
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    /// Resolved address of the raw-framed + polling listener.
    pub raw_addr: SocketAddr,
    /// Resolved address of the WebSocket listener, when that backend is
    /// compiled in.
    pub ws_addr: Option<SocketAddr>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop the server: abort the accept loops and the hub and await them.
    ///
    /// In-flight connection tasks notice the hub is gone on their next
    /// interaction and close their sockets.
    pub async fn shutdown(mut self) {
        debug!("signal server: shutdown requested");
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("server task ended with join error: {e}");
                }
            }
        }
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("raw_addr", &self.raw_addr)
            .field("ws_addr", &self.ws_addr)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn test_config() -> ServerConfig {
        ServerConfig::new()
            .with_raw_addr("127.0.0.1:0".parse().unwrap())
            .with_ws_addr("127.0.0.1:0".parse().unwrap())
    }

    #[tokio::test]
    async fn start_resolves_ephemeral_ports_and_shuts_down() {
        let handle = SignalServer::start(test_config()).await.unwrap();
        assert_ne!(handle.raw_addr.port(), 0);
        #[cfg(feature = "transport-websocket")]
        assert!(handle.ws_addr.is_some_and(|a| a.port() != 0));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn two_servers_can_coexist() {
        let a = SignalServer::start(test_config()).await.unwrap();
        let b = SignalServer::start(test_config()).await.unwrap();
        assert_ne!(a.raw_addr, b.raw_addr);
        a.shutdown().await;
        b.shutdown().await;
    }
}
