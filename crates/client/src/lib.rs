#![warn(missing_docs)]
//! Thin client façade over the framed transport.

use anyhow::{Context, Result};
use ironveil_net::{Connection, ConnectionEvent, ConnectionState, EventReceiver};
use tracing::info;

/// Client-side handle to a world server session.
///
/// Wraps one [`Connection`] and remembers the endpoint so the transport can
/// be re-established after a drop. Retry cadence and backoff stay with the
/// caller.
pub struct Client {
    host: String,
    port: u16,
    connection: Connection,
    events: EventReceiver,
}

impl Client {
    /// Connect to the world server at `host:port`.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let (connection, events) = Connection::new();
        connection
            .connect(host, port)
            .await
            .with_context(|| format!("Failed to connect to {host}:{port}"))?;

        Ok(Self {
            host: host.to_string(),
            port,
            connection,
            events,
        })
    }

    /// Current transport state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Send one payload frame to the server.
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        self.connection
            .send(payload)
            .await
            .context("Failed to send frame")
    }

    /// Next pending event without waiting, if one is buffered.
    pub fn poll_event(&mut self) -> Option<ConnectionEvent> {
        self.events.try_recv().ok()
    }

    /// Wait for the next event.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    /// Gracefully close the session.
    pub async fn disconnect(&self) {
        self.connection.disconnect("").await;
    }

    /// Tear the transport down (if needed) and dial the same endpoint again.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.connection.disconnect("").await;
        info!("Reconnecting to {}:{}", self.host, self.port);
        self.connection
            .connect(&self.host, self.port)
            .await
            .with_context(|| format!("Failed to reconnect to {}:{}", self.host, self.port))
    }
}
