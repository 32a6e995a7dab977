//! # Dungeon Server
//!
//! Authoritative session server for a real-time multiplayer dungeon game.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     DUNGEON SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │  └── hash.rs     - State hashing for divergence checks       │
//! │                                                              │
//! │  game/           - World model (deterministic)               │
//! │  ├── state.rs    - Entities, identities, world state         │
//! │  ├── intent.rs   - Client intents and rejection reasons      │
//! │  ├── delta.rs    - Per-tick deltas, client-side snapshot     │
//! │  └── tick.rs     - Rule evaluation pass                      │
//! │                                                              │
//! │  world/          - The world actor (single writer)           │
//! │                                                              │
//! │  net/            - Networking (non-deterministic)            │
//! │  ├── frame.rs    - Binary frame envelope                     │
//! │  ├── protocol.rs - Wire messages                             │
//! │  ├── channel.rs  - Typed WebSocket transport                 │
//! │  ├── session.rs  - Per-connection session actor              │
//! │  ├── heartbeat.rs- Liveness monitor                          │
//! │  └── server.rs   - Listener and server lifecycle             │
//! │                                                              │
//! │  client/         - Headless protocol client                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority Model
//!
//! Clients never mutate state: they submit **intents**, the world actor
//! evaluates them against the rules once per tick, and everyone receives
//! the same stream of **deltas**. The `core/` and `game/` modules are
//! fully deterministic:
//! - No HashMap (BTreeMap for sorted iteration)
//! - No system time dependencies
//! - All randomness from seeded Xorshift128+
//!
//! Given the same seed and the same intent sequence, the world evolves
//! identically on every run.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod client;
pub mod core;
pub mod game;
pub mod net;
pub mod world;

// Re-export commonly used types
pub use crate::core::rng::DeterministicRng;
pub use client::{ClientEvent, DungeonClient};
pub use game::delta::{ClientSnapshot, StateDelta};
pub use game::intent::{Action, Intent, RejectReason};
pub use game::state::{ClientId, Entity, EntityId, WorldSnapshot, WorldState};
pub use net::server::{GameServer, ServerConfig};
pub use world::{WorldActor, WorldHandle};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire protocol version
pub const PROTOCOL_VERSION: u8 = net::frame::VERSION;

/// Default simulation tick rate (Hz)
pub const TICK_RATE: u32 = 20;
