//! Client Intents
//!
//! An intent is a client's request to act, tagged with a client-local
//! sequence number. It is validated by the session actor (sequence
//! monotonicity) and re-validated by the world actor (target existence)
//! before it mutates anything.

use serde::{Deserialize, Serialize};

use crate::game::state::{ClientId, Direction, EntityId};

/// The action a client wants its avatar to take.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Step one tile in a cardinal direction.
    Move {
        /// Direction to step.
        dir: Direction,
    },
    /// Strike an adjacent entity.
    Attack {
        /// Entity to strike.
        target: EntityId,
    },
    /// Pick up an adjacent (or underfoot) item.
    Interact {
        /// Item entity to pick up.
        target: EntityId,
    },
}

/// A client-submitted action, immutable once created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    /// Client-local monotonically increasing sequence number.
    pub seq: u64,
    /// The client that issued this intent. The session actor overwrites this
    /// with its own identity, so a client cannot impersonate another.
    pub issuer: ClientId,
    /// Requested action.
    pub action: Action,
}

/// Why an intent was rejected.
///
/// Rejections are per-intent: the session stays connected and later intents
/// are still considered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Sequence number not greater than the last accepted one.
    StaleSequence,
    /// The issuer has no live avatar in the world.
    NoAvatar,
    /// Movement target tile is a wall or occupied.
    Blocked,
    /// The referenced entity does not exist (possibly already removed).
    NoSuchEntity,
    /// Target exists but is not adjacent to the avatar.
    OutOfRange,
    /// Target exists but the action does not apply to it.
    InvalidTarget,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectReason::StaleSequence => "stale sequence number",
            RejectReason::NoAvatar => "no live avatar",
            RejectReason::Blocked => "movement blocked",
            RejectReason::NoSuchEntity => "no such entity",
            RejectReason::OutOfRange => "target out of range",
            RejectReason::InvalidTarget => "invalid target",
        };
        f.write_str(s)
    }
}
