//! Game Client
//!
//! A headless client for the wire protocol: connects, joins, keeps a local
//! [`ClientSnapshot`] current by applying deltas, and submits intents with
//! its own sequence numbering. Rendering layers sit on top of this and
//! never see wire bytes.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_tungstenite::{connect_async, MaybeTlsStream};
use tracing::debug;

use crate::game::delta::{ClientSnapshot, DeltaGap};
use crate::game::intent::{Action, Intent, RejectReason};
use crate::game::state::{ClientId, EntityId};
use crate::net::channel::{Channel, ChannelError};
use crate::net::frame::{self, DecodeError};
use crate::net::protocol::{ControlMessage, DisconnectReason, Message};

/// Client-side errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Could not establish the WebSocket connection.
    #[error("connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    /// Transport failure on an established connection.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The server sent something unintelligible.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The server refused the join.
    #[error("join refused: {0}")]
    Refused(DisconnectReason),

    /// The server broke the protocol contract.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The connection ended before the exchange completed.
    #[error("connection closed")]
    Closed,

    /// A delta arrived out of order.
    #[error(transparent)]
    Gap(#[from] DeltaGap),
}

/// Something that happened on the connection, surfaced by [`DungeonClient::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The local view advanced to a new tick.
    Updated {
        /// The tick the local view now reflects.
        tick: u64,
    },
    /// The server replaced the local view with a fresh snapshot.
    Resynced {
        /// The tick of the new snapshot.
        tick: u64,
    },
    /// A submitted intent was dropped.
    Rejected {
        /// Sequence number of the dropped intent.
        seq: u64,
        /// Why it was dropped.
        reason: RejectReason,
    },
    /// The server ended the session.
    Disconnected {
        /// The server's reason, if it sent a goodbye.
        reason: Option<DisconnectReason>,
    },
}

/// How often [`DungeonClient::poll`] sends a keepalive on an otherwise
/// idle connection. Well under any sane server timeout threshold.
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(1);

/// A connected, joined game client.
pub struct DungeonClient {
    channel: Channel<MaybeTlsStream<TcpStream>>,
    client_id: ClientId,
    avatar: EntityId,
    view: ClientSnapshot,
    next_seq: u64,
    keepalive: Interval,
}

impl DungeonClient {
    /// Connect to `addr` (host:port) and join the world.
    pub async fn connect(
        addr: &str,
        identity_hint: Option<String>,
    ) -> Result<Self, ClientError> {
        let (ws, _) = connect_async(format!("ws://{addr}")).await?;
        let mut channel = Channel::new(ws);

        channel
            .send(&Message::Control(ControlMessage::Join {
                protocol_version: frame::VERSION,
                identity_hint,
            }))
            .await?;

        match channel.recv().await {
            Some(Ok(Message::Control(ControlMessage::Welcome {
                client_id,
                avatar,
                snapshot,
                ..
            }))) => {
                debug!(client = %client_id.short(), tick = snapshot.tick, "joined");
                let mut keepalive = interval(KEEPALIVE_PERIOD);
                keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Ok(Self {
                    channel,
                    client_id,
                    avatar,
                    view: snapshot.into(),
                    next_seq: 1,
                    keepalive,
                })
            }
            Some(Ok(Message::Control(ControlMessage::Goodbye { reason }))) => {
                Err(ClientError::Refused(reason))
            }
            Some(Ok(other)) => Err(ClientError::Protocol(format!(
                "expected welcome, got {other:?}"
            ))),
            Some(Err(e)) => Err(e.into()),
            None => Err(ClientError::Closed),
        }
    }

    /// The identity the server assigned to this session.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// This client's avatar entity.
    pub fn avatar(&self) -> EntityId {
        self.avatar
    }

    /// The local view of the world.
    pub fn view(&self) -> &ClientSnapshot {
        &self.view
    }

    /// Submit an action, returning the sequence number it was sent under.
    pub async fn submit(&mut self, action: Action) -> Result<u64, ClientError> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.channel
            .send(&Message::Intent(Intent {
                seq,
                issuer: self.client_id,
                action,
            }))
            .await?;
        Ok(seq)
    }

    /// Send a keepalive. Only needed when nothing else is being sent.
    pub async fn heartbeat(&mut self) -> Result<(), ClientError> {
        self.channel
            .send(&Message::Control(ControlMessage::Heartbeat))
            .await?;
        Ok(())
    }

    /// Wait for the next connection event, applying state traffic to the
    /// local view along the way.
    ///
    /// Also drives the keepalive: a client that only observes stays
    /// connected as long as it keeps polling.
    pub async fn poll(&mut self) -> Result<ClientEvent, ClientError> {
        loop {
            let inbound = tokio::select! {
                _ = self.keepalive.tick() => {
                    self.channel
                        .send(&Message::Control(ControlMessage::Heartbeat))
                        .await?;
                    continue;
                }
                inbound = self.channel.recv() => inbound,
            };
            match inbound {
                Some(Ok(Message::Delta(delta))) => {
                    if self.view.apply(&delta)? {
                        return Ok(ClientEvent::Updated {
                            tick: self.view.tick,
                        });
                    }
                    // Already-acknowledged tick; keep polling.
                }
                Some(Ok(Message::Snapshot(snap))) => {
                    let tick = snap.tick;
                    self.view.reset(snap);
                    return Ok(ClientEvent::Resynced { tick });
                }
                Some(Ok(Message::Control(ControlMessage::IntentRejected { seq, reason }))) => {
                    return Ok(ClientEvent::Rejected { seq, reason });
                }
                Some(Ok(Message::Control(ControlMessage::Goodbye { reason }))) => {
                    return Ok(ClientEvent::Disconnected {
                        reason: Some(reason),
                    });
                }
                Some(Ok(Message::Control(ControlMessage::Heartbeat))) => {}
                Some(Ok(other)) => {
                    return Err(ClientError::Protocol(format!(
                        "unexpected message: {other:?}"
                    )));
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(ClientEvent::Disconnected { reason: None }),
            }
        }
    }

    /// Leave gracefully and close the connection.
    pub async fn leave(mut self) -> Result<(), ClientError> {
        self.channel
            .send(&Message::Control(ControlMessage::Leave))
            .await?;
        self.channel.close().await;
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::Direction;
    use crate::game::tick::RuleConfig;
    use crate::net::server::{GameServer, ServerConfig};

    async fn spawn_server(max_sessions: usize) -> (String, tokio::sync::broadcast::Sender<()>) {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            max_sessions,
            tick_rate: 100,
            world_seed: 7,
            rules: RuleConfig {
                enemy_stride: 0,
                initial_enemies: 0,
                initial_items: 0,
                ..RuleConfig::default()
            },
            ..Default::default()
        };
        let server = GameServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let shutdown = server.shutdown_handle();
        tokio::spawn(server.run());
        (addr, shutdown)
    }

    #[tokio::test]
    async fn test_end_to_end_join_move_leave() {
        let (addr, shutdown) = spawn_server(8).await;

        let mut client = DungeonClient::connect(&addr, Some("hero".to_string()))
            .await
            .unwrap();
        let avatar = client.avatar();
        let start = client.view().entity(avatar).unwrap().position;

        client
            .submit(Action::Move {
                dir: Direction::North,
            })
            .await
            .unwrap();

        let mut moved = false;
        for _ in 0..300 {
            match client.poll().await.unwrap() {
                ClientEvent::Updated { .. } | ClientEvent::Resynced { .. } => {
                    let pos = client.view().entity(avatar).unwrap().position;
                    if pos.y == start.y + 1 {
                        moved = true;
                        break;
                    }
                }
                ClientEvent::Rejected { seq, reason } => {
                    panic!("intent {seq} rejected: {reason}");
                }
                ClientEvent::Disconnected { reason } => {
                    panic!("disconnected early: {reason:?}");
                }
            }
        }
        assert!(moved, "avatar should have stepped north");

        client.leave().await.unwrap();
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn test_two_clients_see_each_other() {
        let (addr, shutdown) = spawn_server(8).await;

        let mut alice = DungeonClient::connect(&addr, None).await.unwrap();
        let bob = DungeonClient::connect(&addr, None).await.unwrap();
        let bob_avatar = bob.avatar();

        let mut seen = false;
        for _ in 0..300 {
            match alice.poll().await.unwrap() {
                ClientEvent::Updated { .. } | ClientEvent::Resynced { .. } => {
                    if alice.view().entity(bob_avatar).is_some() {
                        seen = true;
                        break;
                    }
                }
                ClientEvent::Rejected { .. } => {}
                ClientEvent::Disconnected { reason } => {
                    panic!("disconnected early: {reason:?}");
                }
            }
        }
        assert!(seen, "alice should see bob's avatar");
        assert_ne!(alice.client_id(), bob.client_id());

        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn test_capacity_refusal() {
        let (addr, shutdown) = spawn_server(0).await;

        match DungeonClient::connect(&addr, None).await {
            Err(ClientError::Refused(DisconnectReason::Capacity)) => {}
            Err(other) => panic!("expected capacity refusal, got {other:?}"),
            Ok(_) => panic!("expected capacity refusal, got a session"),
        }

        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn test_idle_observer_survives_timeout_threshold() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            tick_rate: 100,
            heartbeat_interval: Duration::from_millis(250),
            timeout_threshold: Duration::from_secs(2),
            world_seed: 7,
            rules: RuleConfig {
                enemy_stride: 0,
                initial_enemies: 0,
                initial_items: 0,
                ..RuleConfig::default()
            },
            ..Default::default()
        };
        let server = GameServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let shutdown = server.shutdown_handle();
        tokio::spawn(server.run());

        let mut client = DungeonClient::connect(&addr, None).await.unwrap();

        // Observe without ever submitting an intent. The keepalive inside
        // poll must carry the session well past the timeout threshold.
        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while std::time::Instant::now() < deadline {
            if let ClientEvent::Disconnected { reason } = client.poll().await.unwrap() {
                panic!("idle client dropped: {reason:?}");
            }
        }

        client.leave().await.unwrap();
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn test_disconnect_event_on_server_shutdown() {
        let (addr, shutdown) = spawn_server(8).await;
        let mut client = DungeonClient::connect(&addr, None).await.unwrap();

        let _ = shutdown.send(());

        let mut disconnected = false;
        for _ in 0..300 {
            match client.poll().await {
                Ok(ClientEvent::Disconnected { reason }) => {
                    assert!(
                        reason.is_none() || reason == Some(DisconnectReason::ServerShutdown),
                        "unexpected reason {reason:?}"
                    );
                    disconnected = true;
                    break;
                }
                Ok(_) => {}
                Err(_) => {
                    disconnected = true;
                    break;
                }
            }
        }
        assert!(disconnected);
    }
}
