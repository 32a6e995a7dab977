//! WebSocket Game Server
//!
//! Binds the listener, runs the accept loop, and wires every accepted
//! connection into its own session task. Owns the lifecycle of the world
//! actor and the heartbeat monitor.
//!
//! A failed session costs that one client. A failed world actor halts the
//! whole server: continuing without the authoritative state would hand
//! every client a silently diverging view.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};

use crate::game::state::WorldState;
use crate::game::tick::{populate, RuleConfig};
use crate::net::frame;
use crate::net::heartbeat::{run_monitor, MonitorConfig};
use crate::net::protocol::DisconnectReason;
use crate::net::session::{self, SessionActor, SessionConfig, SessionRegistry};
use crate::world::{WorldActor, WorldConfig, WorldError, WorldHandle};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent sessions. Connections beyond this are refused
    /// with a capacity goodbye.
    pub max_sessions: usize,
    /// Simulation tick rate (Hz).
    pub tick_rate: u32,
    /// Heartbeat monitor sweep interval.
    pub heartbeat_interval: Duration,
    /// Silence longer than this disconnects a session.
    pub timeout_threshold: Duration,
    /// How long a fresh connection may wait before joining.
    pub handshake_timeout: Duration,
    /// World generation seed.
    pub world_seed: u64,
    /// Arena width in tiles, including border walls.
    pub arena_width: i32,
    /// Arena height in tiles, including border walls.
    pub arena_height: i32,
    /// Delta broadcast channel capacity.
    pub broadcast_capacity: usize,
    /// Replay buffer depth for resyncing lagged sessions.
    pub replay_buffer_len: usize,
    /// Gameplay rules.
    pub rules: RuleConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4000".parse().unwrap(),
            max_sessions: 64,
            tick_rate: 20,
            heartbeat_interval: Duration::from_secs(2),
            timeout_threshold: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(5),
            world_seed: 0,
            arena_width: 32,
            arena_height: 32,
            broadcast_capacity: 256,
            replay_buffer_len: 128,
            rules: RuleConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build a config from the environment, falling back to defaults.
    ///
    /// Recognized variables: `DUNGEON_ADDR`, `DUNGEON_MAX_SESSIONS`,
    /// `DUNGEON_TICK_RATE`, `DUNGEON_HEARTBEAT_SECS`, `DUNGEON_TIMEOUT_SECS`,
    /// `DUNGEON_SEED`, and `DUNGEON_SEED_PHRASE` (hashed into a seed when no
    /// numeric seed is given). Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        fn read<T: std::str::FromStr>(name: &str) -> Option<T> {
            let raw = std::env::var(name).ok()?;
            match raw.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("ignoring unparseable {name}={raw}");
                    None
                }
            }
        }

        if let Some(addr) = read::<SocketAddr>("DUNGEON_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(max) = read::<usize>("DUNGEON_MAX_SESSIONS") {
            config.max_sessions = max;
        }
        if let Some(rate) = read::<u32>("DUNGEON_TICK_RATE") {
            config.tick_rate = rate;
        }
        if let Some(secs) = read::<u64>("DUNGEON_HEARTBEAT_SECS") {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = read::<u64>("DUNGEON_TIMEOUT_SECS") {
            config.timeout_threshold = Duration::from_secs(secs);
        }
        if let Some(seed) = read::<u64>("DUNGEON_SEED") {
            config.world_seed = seed;
        } else if let Ok(phrase) = std::env::var("DUNGEON_SEED_PHRASE") {
            config.world_seed = crate::core::rng::derive_world_seed(&phrase);
        }

        config
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Listener failure.
    #[error("bind failed: {0}")]
    Bind(#[from] std::io::Error),

    /// The world actor broke an invariant; the server halted.
    #[error("world actor failed: {0}")]
    World(#[from] WorldError),

    /// Internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// The game server.
pub struct GameServer {
    config: ServerConfig,
    listener: TcpListener,
    registry: SessionRegistry,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Bind the listener. The accept loop starts on [`GameServer::run`].
    pub async fn bind(config: ServerConfig) -> Result<Self, GameServerError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            config,
            listener,
            registry: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        })
    }

    /// The actual bound address (useful when binding port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// A handle that stops the server when fired.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Run the server until shutdown or a fatal world failure.
    pub async fn run(self) -> Result<(), GameServerError> {
        let mut state = WorldState::new(
            self.config.world_seed,
            self.config.arena_width,
            self.config.arena_height,
        );
        populate(&mut state, &self.config.rules);
        info!(
            seed = self.config.world_seed,
            width = self.config.arena_width,
            height = self.config.arena_height,
            entities = state.entity_count(),
            "world generated"
        );

        let (world, mut world_task) = WorldActor::spawn(
            state,
            WorldConfig {
                tick_rate: self.config.tick_rate,
                replay_buffer_len: self.config.replay_buffer_len,
                broadcast_capacity: self.config.broadcast_capacity,
                rules: self.config.rules.clone(),
            },
        );

        let epoch = Instant::now();
        tokio::spawn(run_monitor(
            self.registry.clone(),
            epoch,
            MonitorConfig {
                sweep_interval: self.config.heartbeat_interval,
                timeout_threshold: self.config.timeout_threshold,
            },
            self.shutdown_tx.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!(addr = %self.local_addr()?, "listening");

        let result = loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            self.handle_connection(stream, peer, &world, epoch).await;
                        }
                        Err(e) => error!("accept failed: {e}"),
                    }
                }
                finished = &mut world_task => {
                    break match finished {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => {
                            error!("world actor failed, halting server: {e}");
                            Err(GameServerError::World(e))
                        }
                        Err(e) => Err(GameServerError::Internal(format!(
                            "world task aborted: {e}"
                        ))),
                    };
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown requested");
                    world.shutdown().await;
                    break match (&mut world_task).await {
                        Ok(world_result) => world_result.map_err(GameServerError::World),
                        Err(e) => Err(GameServerError::Internal(format!(
                            "world task aborted: {e}"
                        ))),
                    };
                }
            }
        };

        // Tell every session (and the monitor) to wind down.
        let _ = self.shutdown_tx.send(());
        result
    }

    /// Hand an accepted TCP connection to its own session task.
    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        world: &WorldHandle,
        epoch: Instant,
    ) {
        let at_capacity = self.registry.read().await.len() >= self.config.max_sessions;

        let world = world.clone();
        let registry = self.registry.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let session_config = SessionConfig {
            protocol_version: frame::VERSION,
            handshake_timeout: self.config.handshake_timeout,
            send_timeout: self.config.timeout_threshold,
        };

        tokio::spawn(async move {
            let ws = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    debug!(%peer, "websocket handshake failed: {e}");
                    return;
                }
            };

            if at_capacity {
                warn!(%peer, "at session capacity, refusing");
                session::refuse(ws, DisconnectReason::Capacity).await;
                return;
            }

            debug!(%peer, "connection accepted");
            SessionActor::new(ws, world, registry, session_config, epoch)
                .run(shutdown_rx)
                .await;
        });
    }
}

// =============================================================================
// TESTS
// =============================================================================
