//! World State Definitions
//!
//! The authoritative world model: entities on a walled grid plus the tick
//! counter. Uses BTreeMap for deterministic iteration order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::hash::{StateHash, StateHasher};
use crate::core::rng::DeterministicRng;

// =============================================================================
// CLIENT ID
// =============================================================================

/// Opaque unique client identity (UUID as bytes).
///
/// Assigned by the dispatcher at connection accept time and immutable for the
/// connection's lifetime. Implements Ord for deterministic BTreeMap ordering.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ClientId(pub [u8; 16]);

impl ClientId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Allocate a fresh random identity.
    pub fn generate() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Short hex prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

// =============================================================================
// ENTITIES
// =============================================================================

/// Unique entity identifier.
///
/// Allocated from a monotonically increasing counter and never reused after
/// removal, so a delayed delta can never ambiguously refer to a newer entity.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct EntityId(pub u64);

/// What kind of thing an entity is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    /// A player-controlled avatar.
    Player,
    /// A server-driven monster.
    Enemy,
    /// A pickup lying on the floor.
    Item,
}

/// A grid position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Column, increasing eastward.
    pub x: i32,
    /// Row, increasing northward.
    pub y: i32,
}

impl Position {
    /// Create a position.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The position one step in the given direction.
    pub fn step(&self, dir: Direction) -> Position {
        let (dx, dy) = dir.offset();
        Position::new(self.x + dx, self.y + dy)
    }

    /// Whether another position is on an orthogonally adjacent tile.
    pub fn adjacent(&self, other: Position) -> bool {
        (self.x - other.x).abs() + (self.y - other.y).abs() == 1
    }
}

/// A cardinal movement direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// +y
    North,
    /// -y
    South,
    /// +x
    East,
    /// -x
    West,
}

impl Direction {
    /// All four directions, in a fixed order.
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    /// Grid offset for this direction.
    pub fn offset(&self) -> (i32, i32) {
        match self {
            Direction::North => (0, 1),
            Direction::South => (0, -1),
            Direction::East => (1, 0),
            Direction::West => (-1, 0),
        }
    }
}

/// One entity in the world.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique id, never reused.
    pub id: EntityId,
    /// Entity kind.
    pub kind: EntityKind,
    /// Grid position.
    pub position: Position,
    /// Hit points. Entities at zero are removed at the end of the tick.
    pub health: i32,
    /// Owning client for player avatars, None for world-driven entities.
    pub owner: Option<ClientId>,
}

impl Entity {
    /// Whether this entity blocks movement onto its tile.
    pub fn blocks_movement(&self) -> bool {
        matches!(self.kind, EntityKind::Player | EntityKind::Enemy)
    }
}

// =============================================================================
// WORLD STATE
// =============================================================================

/// The full authoritative world.
///
/// Exactly one live instance exists per game session. It is owned and mutated
/// exclusively by the world actor; every other component sees it only through
/// snapshots and deltas.
#[derive(Clone, Debug)]
pub struct WorldState {
    /// Authoritative tick counter, strictly increasing.
    pub tick: u64,
    /// Seed the world was created from.
    pub seed: u64,
    /// Arena width in tiles, including the border walls.
    pub width: i32,
    /// Arena height in tiles, including the border walls.
    pub height: i32,
    /// World RNG; all rule randomness flows through this.
    pub rng: DeterministicRng,
    entities: BTreeMap<EntityId, Entity>,
    next_entity_id: u64,
}

impl WorldState {
    /// Create an empty world.
    pub fn new(seed: u64, width: i32, height: i32) -> Self {
        Self {
            tick: 0,
            seed,
            width,
            height,
            rng: DeterministicRng::new(seed),
            entities: BTreeMap::new(),
            next_entity_id: 1,
        }
    }

    /// Spawn a new entity, allocating a fresh id.
    pub fn spawn(
        &mut self,
        kind: EntityKind,
        position: Position,
        health: i32,
        owner: Option<ClientId>,
    ) -> EntityId {
        let id = EntityId(self.next_entity_id);
        self.next_entity_id += 1;
        self.entities.insert(
            id,
            Entity {
                id,
                kind,
                position,
                health,
                owner,
            },
        );
        id
    }

    /// Remove an entity. The id is retired permanently.
    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    /// Look up an entity.
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Look up an entity mutably.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// Iterate all entities in id order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// The player avatar owned by a client, if any.
    pub fn avatar_of(&self, client: &ClientId) -> Option<EntityId> {
        self.entities
            .values()
            .find(|e| e.kind == EntityKind::Player && e.owner.as_ref() == Some(client))
            .map(|e| e.id)
    }

    /// All entity ids owned by a client.
    pub fn owned_by(&self, client: &ClientId) -> Vec<EntityId> {
        self.entities
            .values()
            .filter(|e| e.owner.as_ref() == Some(client))
            .map(|e| e.id)
            .collect()
    }

    /// Whether a position is inside the walls.
    pub fn in_bounds(&self, pos: Position) -> bool {
        pos.x > 0 && pos.x < self.width - 1 && pos.y > 0 && pos.y < self.height - 1
    }

    /// The blocking entity on a tile, if any.
    pub fn blocker_at(&self, pos: Position) -> Option<EntityId> {
        self.entities
            .values()
            .find(|e| e.position == pos && e.blocks_movement())
            .map(|e| e.id)
    }

    /// Whether a tile can be stepped onto.
    pub fn is_walkable(&self, pos: Position) -> bool {
        self.in_bounds(pos) && self.blocker_at(pos).is_none()
    }

    /// Draw a random unoccupied in-bounds position from the world RNG.
    ///
    /// Falls back to a deterministic scan if rejection sampling keeps missing
    /// on a crowded floor.
    pub fn random_open_position(&mut self) -> Position {
        for _ in 0..64 {
            let x = self.rng.next_int_range(1, self.width - 2);
            let y = self.rng.next_int_range(1, self.height - 2);
            let pos = Position::new(x, y);
            if self.is_walkable(pos) {
                return pos;
            }
        }
        for y in 1..self.height - 1 {
            for x in 1..self.width - 1 {
                let pos = Position::new(x, y);
                if self.is_walkable(pos) {
                    return pos;
                }
            }
        }
        // Completely full floor; overlap rather than fail.
        Position::new(1, 1)
    }

    /// Take a full serializable snapshot of the world.
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            tick: self.tick,
            width: self.width,
            height: self.height,
            entities: self.entities.values().cloned().collect(),
        }
    }

    /// Compute the deterministic hash of the world.
    pub fn compute_hash(&self) -> StateHash {
        let mut hasher = StateHasher::for_world_state();
        hasher.update_u64(self.tick);
        hasher.update_u64(self.seed);
        hasher.update_i32(self.width);
        hasher.update_i32(self.height);
        for entity in self.entities.values() {
            hasher.update_u64(entity.id.0);
            hasher.update_u8(match entity.kind {
                EntityKind::Player => 0,
                EntityKind::Enemy => 1,
                EntityKind::Item => 2,
            });
            hasher.update_i32(entity.position.x);
            hasher.update_i32(entity.position.y);
            hasher.update_i32(entity.health);
            match &entity.owner {
                Some(owner) => {
                    hasher.update_bool(true);
                    hasher.update_bytes(owner.as_bytes());
                }
                None => hasher.update_bool(false),
            }
        }
        hasher.finalize()
    }
}

/// A full world snapshot as sent to joining or resyncing clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Tick the snapshot was taken at.
    pub tick: u64,
    /// Arena width in tiles.
    pub width: i32,
    /// Arena height in tiles.
    pub height: i32,
    /// Every live entity, in id order.
    pub entities: Vec<Entity>,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_world() -> WorldState {
        WorldState::new(42, 16, 12)
    }

    #[test]
    fn test_spawn_and_remove() {
        let mut world = test_world();
        let id = world.spawn(EntityKind::Enemy, Position::new(3, 3), 10, None);

        assert_eq!(world.entity_count(), 1);
        assert_eq!(world.entity(id).unwrap().kind, EntityKind::Enemy);

        let removed = world.remove(id).unwrap();
        assert_eq!(removed.id, id);
        assert_eq!(world.entity_count(), 0);
        assert!(world.entity(id).is_none());
    }

    #[test]
    fn test_entity_ids_never_reused() {
        let mut world = test_world();
        let first = world.spawn(EntityKind::Item, Position::new(2, 2), 1, None);
        world.remove(first);
        let second = world.spawn(EntityKind::Item, Position::new(2, 2), 1, None);

        assert_ne!(first, second);
        assert!(second.0 > first.0);
    }

    #[test]
    fn test_avatar_lookup() {
        let mut world = test_world();
        let client = ClientId::new([7; 16]);
        let avatar = world.spawn(EntityKind::Player, Position::new(4, 4), 100, Some(client));
        world.spawn(EntityKind::Enemy, Position::new(5, 5), 10, None);

        assert_eq!(world.avatar_of(&client), Some(avatar));
        assert_eq!(world.owned_by(&client), vec![avatar]);

        let stranger = ClientId::new([8; 16]);
        assert_eq!(world.avatar_of(&stranger), None);
    }

    #[test]
    fn test_bounds_and_walls() {
        let world = test_world();
        assert!(world.in_bounds(Position::new(1, 1)));
        assert!(world.in_bounds(Position::new(14, 10)));
        // Border tiles are walls
        assert!(!world.in_bounds(Position::new(0, 5)));
        assert!(!world.in_bounds(Position::new(15, 5)));
        assert!(!world.in_bounds(Position::new(5, 0)));
        assert!(!world.in_bounds(Position::new(5, 11)));
    }

    #[test]
    fn test_walkability_blocked_by_entities() {
        let mut world = test_world();
        let pos = Position::new(3, 3);
        world.spawn(EntityKind::Enemy, pos, 10, None);
        assert!(!world.is_walkable(pos));

        // Items do not block
        let item_pos = Position::new(4, 4);
        world.spawn(EntityKind::Item, item_pos, 1, None);
        assert!(world.is_walkable(item_pos));
    }

    #[test]
    fn test_random_open_position_is_walkable() {
        let mut world = test_world();
        for _ in 0..50 {
            let pos = world.random_open_position();
            assert!(world.is_walkable(pos));
        }
    }

    #[test]
    fn test_snapshot_contents() {
        let mut world = test_world();
        let a = world.spawn(EntityKind::Player, Position::new(2, 2), 100, None);
        let b = world.spawn(EntityKind::Item, Position::new(3, 3), 1, None);

        let snap = world.snapshot();
        assert_eq!(snap.tick, 0);
        assert_eq!(snap.entities.len(), 2);
        assert_eq!(snap.entities[0].id, a);
        assert_eq!(snap.entities[1].id, b);
    }

    #[test]
    fn test_hash_tracks_state() {
        let mut world1 = test_world();
        let mut world2 = test_world();
        assert_eq!(world1.compute_hash(), world2.compute_hash());

        world1.spawn(EntityKind::Enemy, Position::new(3, 3), 10, None);
        assert_ne!(world1.compute_hash(), world2.compute_hash());

        world2.spawn(EntityKind::Enemy, Position::new(3, 3), 10, None);
        assert_eq!(world1.compute_hash(), world2.compute_hash());
    }

    #[test]
    fn test_position_adjacency() {
        let p = Position::new(5, 5);
        assert!(p.adjacent(Position::new(5, 6)));
        assert!(p.adjacent(Position::new(4, 5)));
        assert!(!p.adjacent(Position::new(6, 6)));
        assert!(!p.adjacent(p));
    }

    #[test]
    fn test_direction_steps() {
        let p = Position::new(5, 5);
        assert_eq!(p.step(Direction::North), Position::new(5, 6));
        assert_eq!(p.step(Direction::South), Position::new(5, 4));
        assert_eq!(p.step(Direction::East), Position::new(6, 5));
        assert_eq!(p.step(Direction::West), Position::new(4, 5));
    }
}
