//! Framed TCP connection with a background receive loop.
//!
//! A [`Connection`] owns one byte-stream session: it frames outgoing
//! payloads, reassembles incoming bytes into frames on a background task, and
//! walks a strictly linear state machine
//! (`Disconnected -> Connecting -> Connected -> Disconnecting ->
//! Disconnected`). Every teardown trigger (explicit call, remote close, I/O
//! fault, protocol violation) converges on one idempotent path that releases
//! the stream once and fires exactly one [`ConnectionEvent::Disconnected`].

use crate::frame::{encode_frame, FrameAccumulator, FrameError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, trace, warn};

const READ_CHUNK_LEN: usize = 8 * 1024;

/// Lifecycle states of a framed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No session; `connect` is permitted.
    Disconnected = 0,
    /// A connect attempt is in flight.
    Connecting = 1,
    /// Send/receive are permitted.
    Connected = 2,
    /// Teardown is releasing the stream.
    Disconnecting = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Notifications emitted by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Transport established; send/receive are now permitted.
    Connected,
    /// One reassembled frame payload.
    Frame(Vec<u8>),
    /// Session fully torn down. An empty reason is a caller-initiated close.
    Disconnected {
        /// Human-readable teardown cause.
        reason: String,
    },
}

/// Receiving side of a connection's event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<ConnectionEvent>;

/// Transport failures surfaced to callers.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Operation requires the `Connected` state.
    #[error("connection is not in the Connected state")]
    NotConnected,
    /// `connect` requires the `Disconnected` state.
    #[error("connection attempt already in progress or established")]
    AlreadyConnected,
    /// The attempt was cancelled while dialing.
    #[error("connect attempt cancelled")]
    Cancelled,
    /// Establishing the underlying stream failed.
    #[error("failed to connect to {addr}")]
    ConnectFailed {
        /// Endpoint the attempt targeted.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },
    /// Writing a frame to the stream failed.
    #[error("failed to write frame")]
    Io(#[from] std::io::Error),
    /// Outgoing payload violates the frame size cap.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

struct Shared {
    state: AtomicU8,
    remote: StdMutex<Option<SocketAddr>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    shutdown: watch::Sender<bool>,
    torn_down: AtomicBool,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn remote_label(&self) -> String {
        match *self.remote.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(addr) => addr.to_string(),
            None => "unconnected peer".to_string(),
        }
    }
}

/// A framed TCP connection handle.
///
/// Cloning hands out another handle to the same session; one object per
/// connection, reusable across connect/disconnect cycles.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// A disconnected connection and the receiving end of its event stream.
    pub fn new() -> (Self, EventReceiver) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            remote: StdMutex::new(None),
            writer: Mutex::new(None),
            events,
            shutdown,
            torn_down: AtomicBool::new(false),
        });
        (Self { shared }, receiver)
    }

    /// Wrap an already-established stream (the server accept path).
    pub(crate) async fn from_stream(stream: TcpStream, peer: SocketAddr) -> (Self, EventReceiver) {
        let (connection, receiver) = Self::new();
        connection.shared.set_state(ConnectionState::Connecting);
        connection.install(stream, peer).await;
        (connection, receiver)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Address of the peer, once a session has been established.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        *self
            .shared
            .remote
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Establish a session with `host:port`.
    ///
    /// On success the state is `Connected`, the background receive loop is
    /// running, and a [`ConnectionEvent::Connected`] has been emitted. A
    /// failed attempt cleans up and lands back on `Disconnected`. Dropping
    /// the returned future, or calling [`Connection::disconnect`] from
    /// another handle, cancels the attempt.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), TransportError> {
        if self
            .shared
            .state
            .compare_exchange(
                ConnectionState::Disconnected as u8,
                ConnectionState::Connecting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(TransportError::AlreadyConnected);
        }
        let _ = self.shared.shutdown.send_replace(false);

        let mut attempt = ConnectAttempt {
            shared: Arc::clone(&self.shared),
            complete: false,
        };
        let addr = format!("{host}:{port}");
        debug!("Connecting to {addr}");

        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                if *self.shared.shutdown.borrow() {
                    attempt.complete = true;
                    self.shared.set_state(ConnectionState::Disconnecting);
                    self.shared.set_state(ConnectionState::Disconnected);
                    debug!("Connect attempt to {addr} cancelled");
                    return Err(TransportError::Cancelled);
                }
                let peer = match stream.peer_addr() {
                    Ok(peer) => peer,
                    Err(source) => {
                        attempt.complete = true;
                        self.shared.set_state(ConnectionState::Disconnecting);
                        self.shared.set_state(ConnectionState::Disconnected);
                        return Err(TransportError::ConnectFailed { addr, source });
                    }
                };
                self.install(stream, peer).await;
                attempt.complete = true;
                Ok(())
            }
            Err(source) => {
                // A failed attempt still walks Disconnecting so cleanup is
                // never skipped on the way back to Disconnected.
                attempt.complete = true;
                self.shared.set_state(ConnectionState::Disconnecting);
                self.shared.set_state(ConnectionState::Disconnected);
                warn!("Failed to connect to {addr}: {source}");
                Err(TransportError::ConnectFailed { addr, source })
            }
        }
    }

    async fn install(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(err) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {peer}: {err}");
        }
        let (read_half, write_half) = stream.into_split();
        *self.shared.writer.lock().await = Some(write_half);
        *self
            .shared
            .remote
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(peer);

        let _ = self.shared.shutdown.send_replace(false);
        let shutdown = self.shared.shutdown.subscribe();
        self.shared.torn_down.store(false, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Connected);
        let _ = self.shared.events.send(ConnectionEvent::Connected);
        info!("Connection to {peer} established");

        tokio::spawn(receive_loop(
            Arc::clone(&self.shared),
            read_half,
            shutdown,
        ));
    }

    /// Send one payload as a single atomic frame.
    ///
    /// Concurrent sends on the same connection serialize on an internal
    /// write lock, so frames never interleave on the wire. Fails with
    /// [`TransportError::NotConnected`] outside the `Connected` state.
    pub async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        if self.shared.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        let frame = encode_frame(payload)?;

        let mut writer = self.shared.writer.lock().await;
        // Re-check under the lock: a teardown may have raced in between.
        let Some(stream) = writer.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        let result = async {
            stream.write_all(&frame).await?;
            stream.flush().await
        }
        .await;
        drop(writer);

        match result {
            Ok(()) => {
                trace!(
                    "Sent {}-byte frame to {}",
                    payload.len(),
                    self.shared.remote_label()
                );
                Ok(())
            }
            Err(err) => {
                let reason = format!("write failed: {err}");
                teardown(&self.shared, &reason).await;
                Err(TransportError::Io(err))
            }
        }
    }

    /// Close the session.
    ///
    /// Safe to call any number of times and from racing triggers; resources
    /// release once and exactly one `Disconnected` event fires. An empty
    /// reason marks a caller-initiated graceful close. Called while an
    /// attempt is still dialing, it cancels the attempt instead.
    pub async fn disconnect(&self, reason: &str) {
        match self.shared.state() {
            ConnectionState::Connected => teardown(&self.shared, reason).await,
            ConnectionState::Connecting => {
                // The connect call notices the flag and aborts the attempt.
                let _ = self.shared.shutdown.send(true);
            }
            ConnectionState::Disconnected | ConnectionState::Disconnecting => {}
        }
    }
}

/// Restores `Disconnected` if a connect future is dropped mid-attempt.
struct ConnectAttempt {
    shared: Arc<Shared>,
    complete: bool,
}

impl Drop for ConnectAttempt {
    fn drop(&mut self) {
        if !self.complete {
            self.shared.set_state(ConnectionState::Disconnected);
        }
    }
}

/// One idempotent teardown path shared by every disconnect trigger.
async fn teardown(shared: &Arc<Shared>, reason: &str) {
    if shared.torn_down.swap(true, Ordering::SeqCst) {
        return;
    }
    shared.set_state(ConnectionState::Disconnecting);
    if reason.is_empty() {
        info!("Disconnecting from {} (graceful close)", shared.remote_label());
    } else {
        info!("Disconnecting from {}: {}", shared.remote_label(), reason);
    }

    // Stop the receive loop at its next read boundary.
    let _ = shared.shutdown.send(true);

    // Release the write half; the receive loop drops the read half on exit,
    // which closes the socket.
    let mut writer = shared.writer.lock().await;
    if let Some(mut stream) = writer.take() {
        let _ = stream.shutdown().await;
    }
    drop(writer);

    shared.set_state(ConnectionState::Disconnected);
    let _ = shared.events.send(ConnectionEvent::Disconnected {
        reason: reason.to_string(),
    });
}

/// Background task: read stream bytes, reassemble frames, emit events.
async fn receive_loop(
    shared: Arc<Shared>,
    mut reader: OwnedReadHalf,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut accumulator = FrameAccumulator::new();
    let mut chunk = vec![0u8; READ_CHUNK_LEN];

    let reason = 'read: loop {
        let read = tokio::select! {
            _ = shutdown.changed() => {
                // Cooperative cancellation during teardown is not an error.
                trace!("Receive loop for {} cancelled", shared.remote_label());
                return;
            }
            read = reader.read(&mut chunk) => read,
        };

        match read {
            Ok(0) => break 'read "remote closed the connection".to_string(),
            Ok(count) => {
                accumulator.extend(&chunk[..count]);
                loop {
                    match accumulator.next_frame() {
                        Ok(Some(payload)) => {
                            trace!(
                                "Received {}-byte frame from {}",
                                payload.len(),
                                shared.remote_label()
                            );
                            let _ = shared.events.send(ConnectionEvent::Frame(payload));
                        }
                        Ok(None) => continue 'read,
                        Err(err) => break 'read format!("protocol violation: {err}"),
                    }
                }
            }
            Err(err) => break 'read format!("read failed: {err}"),
        }
    };

    debug!("Receive loop for {} ending: {}", shared.remote_label(), reason);
    teardown(&shared, &reason).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MAX_FRAME_LEN;
    use crate::transport::ServerEndpoint;
    use std::time::Duration;

    async fn recv(events: &mut EventReceiver) -> ConnectionEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for connection event")
            .expect("event channel closed")
    }

    async fn loopback_pair() -> (Connection, EventReceiver, Connection, EventReceiver) {
        let endpoint = ServerEndpoint::bind("127.0.0.1:0".parse().unwrap())
            .await
            .expect("Failed to bind endpoint");
        let addr = endpoint.local_addr();

        let accept = tokio::spawn(async move { endpoint.accept().await.expect("accept") });

        let (client, mut client_events) = Connection::new();
        client
            .connect("127.0.0.1", addr.port())
            .await
            .expect("connect");
        assert_eq!(recv(&mut client_events).await, ConnectionEvent::Connected);

        let (server, mut server_events, _peer) = accept.await.expect("accept task");
        assert_eq!(recv(&mut server_events).await, ConnectionEvent::Connected);

        (client, client_events, server, server_events)
    }

    #[tokio::test]
    async fn frames_round_trip_both_directions() {
        let (client, mut client_events, server, mut server_events) = loopback_pair().await;

        client.send(b"ping").await.expect("client send");
        assert_eq!(
            recv(&mut server_events).await,
            ConnectionEvent::Frame(b"ping".to_vec())
        );

        server.send(b"pong").await.expect("server send");
        assert_eq!(
            recv(&mut client_events).await,
            ConnectionEvent::Frame(b"pong".to_vec())
        );
    }

    #[tokio::test]
    async fn send_requires_connected_state() {
        let (connection, _events) = Connection::new();
        assert!(matches!(
            connection.send(b"nope").await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn failed_connect_returns_to_disconnected() {
        let (connection, _events) = Connection::new();
        // Port 1 on loopback is never listening in the test environment.
        let result = connection.connect("127.0.0.1", 1).await;
        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (client, mut client_events, _server, _server_events) = loopback_pair().await;

        client.disconnect("").await;
        client.disconnect("").await;
        assert_eq!(client.state(), ConnectionState::Disconnected);

        assert_eq!(
            recv(&mut client_events).await,
            ConnectionEvent::Disconnected {
                reason: String::new()
            }
        );
        // No second notification may follow.
        let extra = tokio::time::timeout(Duration::from_millis(200), client_events.recv()).await;
        assert!(extra.is_err(), "unexpected second disconnect event");
    }

    #[tokio::test]
    async fn remote_close_surfaces_as_disconnect_event() {
        let (_client, mut client_events, server, _server_events) = loopback_pair().await;

        server.disconnect("").await;

        match recv(&mut client_events).await {
            ConnectionEvent::Disconnected { reason } => {
                assert_eq!(reason, "remote closed the connection");
            }
            other => panic!("expected disconnect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn one_byte_chunks_reassemble_into_one_frame() {
        let endpoint = ServerEndpoint::bind("127.0.0.1:0".parse().unwrap())
            .await
            .expect("bind");
        let addr = endpoint.local_addr();

        let accept = tokio::spawn(async move { endpoint.accept().await.expect("accept") });

        // Raw peer so the test controls exactly how bytes hit the wire.
        let mut raw = TcpStream::connect(addr).await.expect("raw connect");
        raw.set_nodelay(true).expect("nodelay");

        let (_server, mut server_events, _peer) = accept.await.expect("accept task");
        assert_eq!(recv(&mut server_events).await, ConnectionEvent::Connected);

        let frame = encode_frame(b"slow drip").unwrap();
        for byte in &frame {
            raw.write_all(std::slice::from_ref(byte)).await.expect("write");
            raw.flush().await.expect("flush");
        }

        assert_eq!(
            recv(&mut server_events).await,
            ConnectionEvent::Frame(b"slow drip".to_vec())
        );
    }

    #[tokio::test]
    async fn oversized_declared_length_fails_the_connection() {
        let endpoint = ServerEndpoint::bind("127.0.0.1:0".parse().unwrap())
            .await
            .expect("bind");
        let addr = endpoint.local_addr();

        let accept = tokio::spawn(async move { endpoint.accept().await.expect("accept") });

        let mut raw = TcpStream::connect(addr).await.expect("raw connect");
        let (_server, mut server_events, _peer) = accept.await.expect("accept task");
        assert_eq!(recv(&mut server_events).await, ConnectionEvent::Connected);

        raw.write_all(&((MAX_FRAME_LEN as u32) + 1).to_le_bytes())
            .await
            .expect("write");
        raw.flush().await.expect("flush");

        match recv(&mut server_events).await {
            ConnectionEvent::Disconnected { reason } => {
                assert!(reason.contains("protocol violation"), "reason: {reason}");
            }
            other => panic!("expected disconnect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_is_reusable_after_disconnect() {
        let endpoint = ServerEndpoint::bind("127.0.0.1:0".parse().unwrap())
            .await
            .expect("bind");
        let addr = endpoint.local_addr();

        tokio::spawn(async move {
            loop {
                let Ok((_conn, _events, _peer)) = endpoint.accept().await else {
                    return;
                };
            }
        });

        let (client, mut client_events) = Connection::new();
        client
            .connect("127.0.0.1", addr.port())
            .await
            .expect("first connect");
        assert_eq!(recv(&mut client_events).await, ConnectionEvent::Connected);

        client.disconnect("").await;
        assert_eq!(
            recv(&mut client_events).await,
            ConnectionEvent::Disconnected {
                reason: String::new()
            }
        );

        client
            .connect("127.0.0.1", addr.port())
            .await
            .expect("second connect");
        assert_eq!(recv(&mut client_events).await, ConnectionEvent::Connected);
        assert_eq!(client.state(), ConnectionState::Connected);
    }
}
