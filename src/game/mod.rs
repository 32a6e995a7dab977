//! World Model
//!
//! Deterministic world simulation. No I/O, no clocks: the world actor feeds
//! this module intents and it hands back deltas.
//!
//! ## Module Structure
//!
//! - `state`: world state, entities, identities
//! - `intent`: client intents and rejection reasons
//! - `delta`: per-tick deltas and the client-side snapshot
//! - `tick`: the rule evaluation pass

pub mod delta;
pub mod intent;
pub mod state;
pub mod tick;

// Re-export key types
pub use delta::{ChangeSet, ClientSnapshot, DeltaGap, StateDelta};
pub use intent::{Action, Intent, RejectReason};
pub use state::{ClientId, Direction, Entity, EntityId, EntityKind, Position, WorldSnapshot, WorldState};
pub use tick::{RuleConfig, TickOutcome};
