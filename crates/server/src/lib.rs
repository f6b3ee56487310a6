#![warn(missing_docs)]
//! Authoritative world server: clock, identities, session registry.

pub mod runtime;

use anyhow::{Context, Result};
use ironveil_core::{EntityId, GameClock, IdentityGenerator, ServerTimestamp, SimTick};
use ironveil_net::{
    BufferPool, Connection, ConnectionEvent, EventReceiver, PacketWriter, ServerEndpoint,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One connected peer and its bookkeeping.
pub struct Session {
    /// Network connection to the peer.
    connection: Connection,

    /// Lifecycle events and frames from the peer.
    events: EventReceiver,

    /// Entity identity assigned to this session.
    entity: EntityId,

    /// Timeline point the session was registered at.
    connected_at: ServerTimestamp,

    /// Timeline point of the last frame received from the peer.
    last_activity: ServerTimestamp,
}

impl Session {
    /// Entity identity assigned to this session.
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// When the session was registered.
    pub fn connected_at(&self) -> ServerTimestamp {
        self.connected_at
    }

    /// When the peer last sent a frame.
    pub fn last_activity(&self) -> ServerTimestamp {
        self.last_activity
    }
}

/// Authoritative server harness.
///
/// Owns the simulation clock, the identity generator for this shard, the
/// listening endpoint, and every live session. The substrate attaches no
/// meaning to session frame payloads; consumers layer their own schemas on
/// top with the wire codec.
pub struct GameServer {
    clock: GameClock,
    identities: IdentityGenerator,
    endpoint: ServerEndpoint,
    write_buffers: Arc<BufferPool>,
    sessions: HashMap<SocketAddr, Session>,
}

impl GameServer {
    /// Bind a server for `shard` to the given address and start its clock.
    pub async fn bind(addr: SocketAddr, shard: u16) -> Result<Self> {
        let endpoint = ServerEndpoint::bind(addr)
            .await
            .context("Failed to bind game server")?;
        let identities = IdentityGenerator::new(shard).context("Invalid shard id")?;

        let mut clock = GameClock::new();
        clock.start();

        info!(
            "Game server for shard {} listening on {}",
            shard,
            endpoint.local_addr()
        );

        Ok(Self {
            clock,
            identities,
            endpoint,
            write_buffers: BufferPool::new(),
            sessions: HashMap::new(),
        })
    }

    /// Local address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    /// The tick the simulation is currently on.
    pub fn current_tick(&self) -> SimTick {
        self.clock.current_tick()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Session registered for `peer`, if any.
    pub fn session(&self, peer: &SocketAddr) -> Option<&Session> {
        self.sessions.get(peer)
    }

    /// Accept one pending connection and register it as a session.
    ///
    /// Each session is assigned a freshly minted entity identity.
    pub async fn accept_session(&mut self) -> Result<SocketAddr> {
        let (connection, events, peer) = self.endpoint.accept().await?;
        let entity = self.identities.generate();
        let now = self.clock.timestamp();

        info!("Session {} registered as entity {}", peer, entity);

        self.sessions.insert(
            peer,
            Session {
                connection,
                events,
                entity,
                connected_at: now,
                last_activity: now,
            },
        );
        Ok(peer)
    }

    /// Advance the scheduler by one frame.
    ///
    /// Recomputes the frame delta, runs every owed tick back-to-back (the
    /// catch-up policy: never drop ticks), and returns the sleep budget in
    /// milliseconds until the next tick comes due.
    pub async fn pump(&mut self) -> Result<u64> {
        self.clock.advance_frame();
        while self.clock.should_tick() {
            self.run_tick().await?;
            self.clock.tick();
        }
        Ok(self.clock.ms_until_next_tick())
    }

    /// One simulation tick: drain session traffic, prune dead sessions,
    /// broadcast the tick announcement.
    async fn run_tick(&mut self) -> Result<()> {
        let tick = self.clock.current_tick();
        let stamp = self.clock.timestamp();

        // Drain buffered traffic and collect sessions that went away.
        let mut closed: Vec<SocketAddr> = Vec::new();
        for (peer, session) in &mut self.sessions {
            while let Ok(event) = session.events.try_recv() {
                match event {
                    ConnectionEvent::Connected => {}
                    ConnectionEvent::Frame(payload) => {
                        session.last_activity = stamp;
                        debug!("Session {} sent {}-byte frame", peer, payload.len());
                    }
                    ConnectionEvent::Disconnected { reason } => {
                        if reason.is_empty() {
                            info!("Session {} closed", peer);
                        } else {
                            info!("Session {} disconnected: {}", peer, reason);
                        }
                        closed.push(*peer);
                    }
                }
            }
        }
        for peer in &closed {
            self.sessions.remove(peer);
        }

        // Tick announcement: tick number plus the session's entity identity.
        for (peer, session) in &mut self.sessions {
            let mut writer = PacketWriter::new(&self.write_buffers);
            writer.write_u64(tick.0);
            writer.write_entity_id(session.entity);
            if let Err(err) = session.connection.send(writer.as_bytes()).await {
                warn!("Failed to announce tick to {}: {}", peer, err);
            }
        }

        Ok(())
    }

    /// Disconnect every session gracefully and drop the registry.
    pub async fn shutdown(&mut self) {
        info!("Shutting down {} session(s)", self.sessions.len());
        for (_peer, session) in self.sessions.drain() {
            session.connection.disconnect("").await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironveil_net::PacketReader;
    use ironveil_testkit::next_event_within;

    #[tokio::test]
    async fn sessions_receive_tick_announcements() {
        let mut server = GameServer::bind("127.0.0.1:0".parse().unwrap(), 5)
            .await
            .expect("bind server");
        let addr = server.local_addr();

        let (client, mut client_events) = Connection::new();
        let connect = tokio::spawn(async move {
            client
                .connect("127.0.0.1", addr.port())
                .await
                .expect("connect");
            client
        });

        let peer = server.accept_session().await.expect("accept session");
        let client = connect.await.expect("connect task");
        assert_eq!(server.session_count(), 1);

        let entity = server.session(&peer).expect("session exists").entity();
        assert!(entity.is_valid());
        assert_eq!(entity.shard(), 5);

        assert_eq!(
            next_event_within(&mut client_events, 1000).await,
            Some(ConnectionEvent::Connected)
        );

        // Force a tick regardless of wall-clock timing.
        server.run_tick().await.expect("tick");

        match next_event_within(&mut client_events, 1000).await {
            Some(ConnectionEvent::Frame(payload)) => {
                let mut reader = PacketReader::new(&payload);
                assert_eq!(reader.read_u64().unwrap(), server.current_tick().0);
                assert_eq!(reader.read_entity_id().unwrap(), entity);
                assert!(reader.is_empty());
            }
            other => panic!("expected tick announcement, got {other:?}"),
        }

        client.disconnect("").await;
        // Give the close time to surface, then let a tick prune the session.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        server.run_tick().await.expect("tick");
        assert_eq!(server.session_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_disconnects_sessions() {
        let mut server = GameServer::bind("127.0.0.1:0".parse().unwrap(), 1)
            .await
            .expect("bind server");
        let addr = server.local_addr();

        let (client, mut client_events) = Connection::new();
        let connect = tokio::spawn(async move {
            client
                .connect("127.0.0.1", addr.port())
                .await
                .expect("connect");
            client
        });
        server.accept_session().await.expect("accept session");
        let _client = connect.await.expect("connect task");

        server.shutdown().await;
        assert_eq!(server.session_count(), 0);

        assert_eq!(
            next_event_within(&mut client_events, 1000).await,
            Some(ConnectionEvent::Connected)
        );
        match next_event_within(&mut client_events, 1000).await {
            Some(ConnectionEvent::Disconnected { reason }) => {
                assert_eq!(reason, "remote closed the connection");
            }
            other => panic!("expected disconnect, got {other:?}"),
        }
    }
}
