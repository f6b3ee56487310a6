//! TCP endpoint for accepting framed connections.

use crate::connection::{Connection, EventReceiver};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Reference port for development deployments.
pub const DEFAULT_PORT: u16 = 7775;

/// Server endpoint accepting framed TCP connections.
pub struct ServerEndpoint {
    listener: TcpListener,
    addr: SocketAddr,
}

impl ServerEndpoint {
    /// Bind to `addr` and start listening.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        info!("Creating server endpoint on {}", addr);

        let listener = TcpListener::bind(addr)
            .await
            .context("Failed to bind server endpoint")?;
        let actual_addr = listener.local_addr()?;

        info!("Server endpoint bound to {}", actual_addr);

        Ok(Self {
            listener,
            addr: actual_addr,
        })
    }

    /// Local address this endpoint is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Accept the next incoming connection.
    ///
    /// The returned connection is already `Connected` with its receive loop
    /// running; the receiver carries its lifecycle events and frames.
    pub async fn accept(&self) -> Result<(Connection, EventReceiver, SocketAddr)> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .context("Failed to accept connection")?;
        debug!("Accepted connection from {}", peer);

        let (connection, events) = Connection::from_stream(stream, peer).await;
        Ok((connection, events, peer))
    }
}
