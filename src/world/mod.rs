//! World Actor
//!
//! The single concurrency unit that owns the authoritative [`WorldState`].
//! All gameplay-affecting mutation is serialized through its command
//! mailbox; nothing else ever reads or writes the world directly.
//!
//! Each tick the actor drains the intents queued since the previous tick,
//! applies them in arrival order, advances the tick counter, and broadcasts
//! the resulting [`StateDelta`]. The broadcast channel is bounded: a slow
//! session lags and resyncs from the replay buffer rather than ever stalling
//! the tick loop.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::game::delta::{ChangeSet, StateDelta};
use crate::game::intent::{Intent, RejectReason};
use crate::game::state::{ClientId, EntityId, EntityKind, WorldSnapshot, WorldState};
use crate::game::tick::{run_tick, RuleConfig};

/// World actor configuration.
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Simulation tick rate (Hz).
    pub tick_rate: u32,
    /// How many recent deltas to keep for resyncing lagged sessions.
    pub replay_buffer_len: usize,
    /// Capacity of the delta broadcast channel.
    pub broadcast_capacity: usize,
    /// Gameplay rule parameters.
    pub rules: RuleConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            tick_rate: 20,
            replay_buffer_len: 64,
            broadcast_capacity: 64,
            rules: RuleConfig::default(),
        }
    }
}

/// Directed notice from the world to one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionNotice {
    /// An intent was dropped during rule evaluation.
    Rejected {
        /// Sequence number of the dropped intent.
        seq: u64,
        /// Why it was dropped.
        reason: RejectReason,
    },
}

/// Reply to a successful join.
#[derive(Debug, Clone)]
pub struct JoinAck {
    /// The freshly spawned avatar for this client.
    pub avatar: EntityId,
    /// Full snapshot including the avatar, at the current tick.
    pub snapshot: WorldSnapshot,
}

/// Reply to a resync request.
#[derive(Debug, Clone)]
pub enum ResyncData {
    /// The missed deltas, contiguous from the requested tick.
    Deltas(Vec<StateDelta>),
    /// Too far behind; start over from a full snapshot.
    Snapshot(WorldSnapshot),
}

/// Commands accepted by the world actor's mailbox.
#[derive(Debug)]
pub enum WorldCommand {
    /// Queue an intent for the next rule-evaluation pass. Never applied
    /// synchronously.
    SubmitIntent(Intent),
    /// Spawn an avatar for a new session and return the joining snapshot.
    Join {
        /// Identity of the joining client.
        client_id: ClientId,
        /// Channel for directed notices (intent rejections).
        notices: mpsc::Sender<SessionNotice>,
        /// Join reply.
        reply: oneshot::Sender<JoinAck>,
    },
    /// Remove a departing client's owned entities and confirm.
    Leave {
        /// Identity of the departing client.
        client_id: ClientId,
        /// Confirmation that reclamation happened.
        reply: oneshot::Sender<()>,
    },
    /// Read-only full snapshot for local collaborators.
    Snapshot {
        /// Snapshot reply.
        reply: oneshot::Sender<WorldSnapshot>,
    },
    /// Catch a lagged session up from `since_tick`.
    Resync {
        /// Last tick the session delivered.
        since_tick: u64,
        /// Resync reply.
        reply: oneshot::Sender<ResyncData>,
    },
    /// Stop the actor cleanly.
    Shutdown,
}

/// The world actor failed an internal invariant.
///
/// This is fatal to the whole session server: silent continuation would risk
/// undetectable divergence shared by every client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorldError {
    /// The authoritative state broke one of its invariants.
    #[error("world invariant violation: {0}")]
    InvariantViolation(String),
}

/// The world actor is no longer running.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("world actor is gone")]
pub struct WorldGone;

/// Cheap cloneable handle to the world actor.
#[derive(Clone)]
pub struct WorldHandle {
    commands: mpsc::Sender<WorldCommand>,
    deltas: broadcast::Sender<StateDelta>,
}

impl WorldHandle {
    /// Subscribe to the delta broadcast.
    pub fn subscribe(&self) -> broadcast::Receiver<StateDelta> {
        self.deltas.subscribe()
    }

    /// Queue an intent for the next tick.
    pub async fn submit_intent(&self, intent: Intent) -> Result<(), WorldGone> {
        self.commands
            .send(WorldCommand::SubmitIntent(intent))
            .await
            .map_err(|_| WorldGone)
    }

    /// Join a client, spawning its avatar.
    pub async fn join(
        &self,
        client_id: ClientId,
        notices: mpsc::Sender<SessionNotice>,
    ) -> Result<JoinAck, WorldGone> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(WorldCommand::Join {
                client_id,
                notices,
                reply,
            })
            .await
            .map_err(|_| WorldGone)?;
        rx.await.map_err(|_| WorldGone)
    }

    /// Leave: reclaim the client's owned entities. Resolves once the world
    /// has confirmed removal.
    pub async fn leave(&self, client_id: ClientId) -> Result<(), WorldGone> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(WorldCommand::Leave { client_id, reply })
            .await
            .map_err(|_| WorldGone)?;
        rx.await.map_err(|_| WorldGone)
    }

    /// Read-only snapshot of the current world.
    pub async fn snapshot(&self) -> Result<WorldSnapshot, WorldGone> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(WorldCommand::Snapshot { reply })
            .await
            .map_err(|_| WorldGone)?;
        rx.await.map_err(|_| WorldGone)
    }

    /// Fetch whatever is needed to catch up from `since_tick`.
    pub async fn resync(&self, since_tick: u64) -> Result<ResyncData, WorldGone> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(WorldCommand::Resync { since_tick, reply })
            .await
            .map_err(|_| WorldGone)?;
        rx.await.map_err(|_| WorldGone)
    }

    /// Ask the actor to stop.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(WorldCommand::Shutdown).await;
    }
}

/// The world actor task state.
pub struct WorldActor {
    state: WorldState,
    config: WorldConfig,
    /// Intents received since the previous tick, in arrival order.
    pending: Vec<Intent>,
    /// Entity changes made between ticks (joins/leaves), folded into the
    /// next tick's delta.
    carried: ChangeSet,
    replay: VecDeque<StateDelta>,
    notices: BTreeMap<ClientId, mpsc::Sender<SessionNotice>>,
    delta_tx: broadcast::Sender<StateDelta>,
    commands: mpsc::Receiver<WorldCommand>,
    last_broadcast_tick: u64,
}

impl WorldActor {
    /// Spawn the world actor over an already-populated world.
    pub fn spawn(
        state: WorldState,
        config: WorldConfig,
    ) -> (WorldHandle, JoinHandle<Result<(), WorldError>>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(1024);
        let (delta_tx, _) = broadcast::channel(config.broadcast_capacity.max(1));

        let handle = WorldHandle {
            commands: cmd_tx,
            deltas: delta_tx.clone(),
        };

        let actor = WorldActor {
            last_broadcast_tick: state.tick,
            state,
            config,
            pending: Vec::new(),
            carried: ChangeSet::default(),
            replay: VecDeque::new(),
            notices: BTreeMap::new(),
            delta_tx,
            commands: cmd_rx,
        };

        let task = tokio::spawn(actor.run());
        (handle, task)
    }

    async fn run(mut self) -> Result<(), WorldError> {
        let tick_duration = Duration::from_micros(1_000_000 / self.config.tick_rate.max(1) as u64);
        let mut ticker = interval(tick_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            tick_rate = self.config.tick_rate,
            entities = self.state.entity_count(),
            "world actor running"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.step()?;
                }
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(WorldCommand::SubmitIntent(intent)) => {
                            self.pending.push(intent);
                        }
                        Some(WorldCommand::Join { client_id, notices, reply }) => {
                            self.handle_join(client_id, notices, reply);
                        }
                        Some(WorldCommand::Leave { client_id, reply }) => {
                            self.handle_leave(client_id, reply);
                        }
                        Some(WorldCommand::Snapshot { reply }) => {
                            let _ = reply.send(self.state.snapshot());
                        }
                        Some(WorldCommand::Resync { since_tick, reply }) => {
                            let _ = reply.send(self.resync(since_tick));
                        }
                        Some(WorldCommand::Shutdown) | None => {
                            info!(tick = self.state.tick, "world actor stopping");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Run one tick: a single atomic logical unit from the perspective of
    /// observers.
    fn step(&mut self) -> Result<(), WorldError> {
        let intents = std::mem::take(&mut self.pending);
        let mut changes = std::mem::take(&mut self.carried);
        let before = self.state.tick;

        let outcome = run_tick(&mut self.state, intents, &self.config.rules, &mut changes);

        if self.state.tick != before + 1 {
            return Err(WorldError::InvariantViolation(format!(
                "tick advanced from {} to {}",
                before, self.state.tick
            )));
        }

        let delta = changes.into_delta(&self.state);
        if delta.tick != self.last_broadcast_tick + 1 {
            return Err(WorldError::InvariantViolation(format!(
                "delta tick {} after broadcast tick {}",
                delta.tick, self.last_broadcast_tick
            )));
        }
        self.last_broadcast_tick = delta.tick;

        self.replay.push_back(delta.clone());
        while self.replay.len() > self.config.replay_buffer_len {
            self.replay.pop_front();
        }

        // No receivers just means nobody is connected yet.
        let _ = self.delta_tx.send(delta);

        for (client, seq, reason) in outcome.rejections {
            if let Some(tx) = self.notices.get(&client) {
                if tx.try_send(SessionNotice::Rejected { seq, reason }).is_err() {
                    debug!(client = %client.short(), seq, "rejection notice dropped");
                }
            }
        }

        Ok(())
    }

    fn handle_join(
        &mut self,
        client_id: ClientId,
        notices: mpsc::Sender<SessionNotice>,
        reply: oneshot::Sender<JoinAck>,
    ) {
        let pos = self.state.random_open_position();
        let avatar = self.state.spawn(
            EntityKind::Player,
            pos,
            self.config.rules.player_max_health,
            Some(client_id),
        );
        self.carried.created(avatar);
        self.notices.insert(client_id, notices);

        info!(client = %client_id.short(), avatar = avatar.0, tick = self.state.tick, "client joined world");

        if reply
            .send(JoinAck {
                avatar,
                snapshot: self.state.snapshot(),
            })
            .is_err()
        {
            // Session died mid-join; reclaim immediately.
            warn!(client = %client_id.short(), "join reply dropped, reclaiming");
            self.reclaim(&client_id);
        }
    }

    fn handle_leave(&mut self, client_id: ClientId, reply: oneshot::Sender<()>) {
        self.reclaim(&client_id);
        info!(client = %client_id.short(), tick = self.state.tick, "client left world");
        let _ = reply.send(());
    }

    fn reclaim(&mut self, client_id: &ClientId) {
        for id in self.state.owned_by(client_id) {
            self.state.remove(id);
            self.carried.removed(id);
        }
        self.notices.remove(client_id);
        // Unconsumed intents from a departed client are discarded, not
        // evaluated against a world it no longer inhabits.
        self.pending.retain(|i| &i.issuer != client_id);
    }

    fn resync(&self, since_tick: u64) -> ResyncData {
        if since_tick >= self.state.tick {
            return ResyncData::Deltas(Vec::new());
        }
        let covered = self
            .replay
            .front()
            .map(|d| d.tick <= since_tick + 1)
            .unwrap_or(false);
        if covered {
            ResyncData::Deltas(
                self.replay
                    .iter()
                    .filter(|d| d.tick > since_tick)
                    .cloned()
                    .collect(),
            )
        } else {
            ResyncData::Snapshot(self.state.snapshot())
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
