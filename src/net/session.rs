//! Session Actor
//!
//! One task per connected client. The session owns the connection channel
//! exclusively, walks the lifecycle Connecting -> Joined -> Active ->
//! Disconnecting -> Closed, and is the only component that talks both to
//! the socket and to the world.
//!
//! A session failure never touches any other session: the task tears
//! itself down, tells the world to reclaim its entities, and removes
//! itself from the registry.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{timeout, Instant};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::game::intent::RejectReason;
use crate::game::state::ClientId;
use crate::net::channel::Channel;
use crate::net::frame;
use crate::net::protocol::{ControlMessage, DisconnectReason, Message};
use crate::world::{ResyncData, SessionNotice, WorldHandle};

/// Session lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// WebSocket is up, waiting for the client's join.
    Connecting,
    /// Joined the world, welcome sent.
    Joined,
    /// Registered and relaying traffic.
    Active,
    /// Tearing down: world reclaim and registry removal in progress.
    Disconnecting,
    /// Fully torn down.
    Closed,
}

/// Advisory commands other tasks may send a session.
///
/// The session task is the only writer of its own state; everyone else can
/// merely ask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionControl {
    /// The heartbeat monitor judged this session dead.
    Timeout,
    /// Close this one session on behalf of the server.
    Shutdown,
}

/// Registry entry for one live session.
#[derive(Clone)]
pub struct SessionHandle {
    /// Session identity.
    pub client_id: ClientId,
    /// Advisory control channel into the session task.
    pub control: mpsc::Sender<SessionControl>,
    /// Milliseconds since the server epoch at the last inbound message.
    /// Written only by the session task; the monitor just reads it.
    pub last_seen_ms: Arc<AtomicU64>,
}

/// Shared map of live sessions, keyed by client id.
pub type SessionRegistry = Arc<RwLock<BTreeMap<ClientId, SessionHandle>>>;

/// Per-session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Wire protocol version this server speaks.
    pub protocol_version: u8,
    /// How long a fresh connection may sit silent before its join.
    pub handshake_timeout: Duration,
    /// Upper bound on any single outbound send. A peer that stops draining
    /// its socket is a transport failure, not a reason to park the task.
    pub send_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protocol_version: frame::VERSION,
            handshake_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(10),
        }
    }
}

/// Send a terminal goodbye on a connection that never became a session.
pub async fn refuse<S>(stream: WebSocketStream<S>, reason: DisconnectReason)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut channel = Channel::new(stream);
    let _ = channel
        .send(&Message::Control(ControlMessage::Goodbye { reason }))
        .await;
    channel.close().await;
}

/// The per-connection session task.
pub struct SessionActor<S> {
    channel: Channel<S>,
    world: WorldHandle,
    registry: SessionRegistry,
    config: SessionConfig,
    epoch: Instant,
    phase: SessionPhase,
}

impl<S> SessionActor<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an accepted WebSocket stream.
    pub fn new(
        stream: WebSocketStream<S>,
        world: WorldHandle,
        registry: SessionRegistry,
        config: SessionConfig,
        epoch: Instant,
    ) -> Self {
        Self {
            channel: Channel::new(stream),
            world,
            registry,
            config,
            epoch,
            phase: SessionPhase::Connecting,
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        debug!(?phase, "session phase");
        self.phase = phase;
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Send with an upper bound; a full socket counts as a dead peer.
    async fn send_bounded(&mut self, msg: &Message) -> Result<(), ()> {
        match timeout(self.config.send_timeout, self.channel.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) | Err(_) => Err(()),
        }
    }

    async fn goodbye(&mut self, reason: DisconnectReason) {
        let _ = self
            .send_bounded(&Message::Control(ControlMessage::Goodbye { reason }))
            .await;
    }

    /// Drive the session to completion. Consumes the actor; when this
    /// returns, the connection is closed and all shared state is cleaned up.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        // Handshake: the first message must be a matching join.
        let identity_hint =
            match timeout(self.config.handshake_timeout, self.channel.recv()).await {
                Ok(Some(Ok(Message::Control(ControlMessage::Join {
                    protocol_version,
                    identity_hint,
                })))) => {
                    if protocol_version != self.config.protocol_version {
                        warn!(
                            client_version = protocol_version,
                            "join with mismatched protocol version"
                        );
                        self.goodbye(DisconnectReason::ProtocolError).await;
                        self.channel.close().await;
                        return;
                    }
                    identity_hint
                }
                Ok(Some(Ok(_))) | Ok(Some(Err(_))) => {
                    self.goodbye(DisconnectReason::ProtocolError).await;
                    self.channel.close().await;
                    return;
                }
                Ok(None) => return,
                Err(_) => {
                    self.goodbye(DisconnectReason::Timeout).await;
                    self.channel.close().await;
                    return;
                }
            };

        let client_id = ClientId::generate();
        let (notice_tx, mut notices) = mpsc::channel(32);

        // Subscribe before joining so the delta carrying our own avatar's
        // spawn is not missed.
        let mut deltas = self.world.subscribe();

        let ack = match self.world.join(client_id, notice_tx).await {
            Ok(ack) => ack,
            Err(_) => {
                self.goodbye(DisconnectReason::ServerShutdown).await;
                self.channel.close().await;
                return;
            }
        };
        self.set_phase(SessionPhase::Joined);
        info!(
            client = %client_id.short(),
            hint = identity_hint.as_deref().unwrap_or("-"),
            avatar = ack.avatar.0,
            "session joined"
        );

        let mut last_delivered = ack.snapshot.tick;
        let welcome = Message::Control(ControlMessage::Welcome {
            client_id,
            avatar: ack.avatar,
            tick: ack.snapshot.tick,
            snapshot: ack.snapshot,
        });
        if self.send_bounded(&welcome).await.is_err() {
            let _ = self.world.leave(client_id).await;
            return;
        }

        let last_seen = Arc::new(AtomicU64::new(self.now_ms()));
        let (control_tx, mut control) = mpsc::channel(4);
        self.registry.write().await.insert(
            client_id,
            SessionHandle {
                client_id,
                control: control_tx,
                last_seen_ms: last_seen.clone(),
            },
        );
        self.set_phase(SessionPhase::Active);

        // Highest intent sequence accepted so far; anything at or below it
        // is stale and rejected here without bothering the world.
        let mut last_accepted_seq = 0u64;

        let reason = loop {
            tokio::select! {
                inbound = self.channel.recv() => {
                    match inbound {
                        None => break None,
                        Some(Err(e)) => {
                            warn!(client = %client_id.short(), "inbound decode failed: {e}");
                            break Some(DisconnectReason::ProtocolError);
                        }
                        Some(Ok(msg)) => {
                            last_seen.store(self.now_ms(), Ordering::Relaxed);
                            match msg {
                                Message::Control(ControlMessage::Heartbeat) => {}
                                Message::Control(ControlMessage::Leave) => {
                                    debug!(client = %client_id.short(), "client leaving");
                                    break None;
                                }
                                Message::Intent(mut intent) => {
                                    if intent.seq <= last_accepted_seq {
                                        let reject = Message::Control(ControlMessage::IntentRejected {
                                            seq: intent.seq,
                                            reason: RejectReason::StaleSequence,
                                        });
                                        if self.send_bounded(&reject).await.is_err() {
                                            break None;
                                        }
                                    } else {
                                        last_accepted_seq = intent.seq;
                                        // Clients cannot act as anyone else.
                                        intent.issuer = client_id;
                                        if self.world.submit_intent(intent).await.is_err() {
                                            break Some(DisconnectReason::ServerShutdown);
                                        }
                                    }
                                }
                                other => {
                                    warn!(
                                        client = %client_id.short(),
                                        "out-of-phase message: {other:?}"
                                    );
                                    break Some(DisconnectReason::ProtocolError);
                                }
                            }
                        }
                    }
                }
                delta = deltas.recv() => {
                    match delta {
                        Ok(delta) => {
                            if delta.tick == last_delivered + 1 {
                                last_delivered = delta.tick;
                                if self.send_bounded(&Message::Delta(delta)).await.is_err() {
                                    break None;
                                }
                            } else if delta.tick > last_delivered + 1 {
                                match self.catch_up(&mut last_delivered).await {
                                    Ok(()) => {}
                                    Err(reason) => break reason,
                                }
                            }
                            // Older ticks were already covered by the
                            // joining snapshot; drop them.
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(client = %client_id.short(), skipped, "delta stream lagged");
                            match self.catch_up(&mut last_delivered).await {
                                Ok(()) => {}
                                Err(reason) => break reason,
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            break Some(DisconnectReason::ServerShutdown);
                        }
                    }
                }
                notice = notices.recv() => {
                    match notice {
                        Some(SessionNotice::Rejected { seq, reason }) => {
                            let reject = Message::Control(ControlMessage::IntentRejected { seq, reason });
                            if self.send_bounded(&reject).await.is_err() {
                                break None;
                            }
                        }
                        // The world dropped our notice channel: it already
                        // reclaimed us.
                        None => break None,
                    }
                }
                cmd = control.recv() => {
                    match cmd {
                        Some(SessionControl::Timeout) => break Some(DisconnectReason::Timeout),
                        Some(SessionControl::Shutdown) | None => {
                            break Some(DisconnectReason::ServerShutdown);
                        }
                    }
                }
                _ = shutdown.recv() => break Some(DisconnectReason::ServerShutdown),
            }
        };

        self.set_phase(SessionPhase::Disconnecting);
        if let Some(reason) = reason {
            self.goodbye(reason).await;
        }
        let _ = self.world.leave(client_id).await;
        self.registry.write().await.remove(&client_id);
        let _ = timeout(self.config.send_timeout, self.channel.close()).await;
        self.set_phase(SessionPhase::Closed);
        info!(client = %client_id.short(), reason = ?reason, "session closed");
    }

    /// Bring a behind client back to contiguity, with missed deltas when the
    /// world still has them and a fresh snapshot otherwise.
    async fn catch_up(
        &mut self,
        last_delivered: &mut u64,
    ) -> Result<(), Option<DisconnectReason>> {
        match self.world.resync(*last_delivered).await {
            Ok(ResyncData::Deltas(missed)) => {
                for delta in missed {
                    if delta.tick <= *last_delivered {
                        continue;
                    }
                    *last_delivered = delta.tick;
                    if self.send_bounded(&Message::Delta(delta)).await.is_err() {
                        return Err(None);
                    }
                }
                Ok(())
            }
            Ok(ResyncData::Snapshot(snap)) => {
                *last_delivered = snap.tick;
                self.send_bounded(&Message::Snapshot(snap))
                    .await
                    .map_err(|_| None)
            }
            Err(_) => Err(Some(DisconnectReason::ServerShutdown)),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
