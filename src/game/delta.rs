//! State Deltas
//!
//! The minimal description of what changed between two ticks, plus the
//! client-side snapshot that consumes them. Deltas are immutable once
//! emitted and are tagged with the tick they produce.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::game::state::{Entity, EntityId, WorldSnapshot, WorldState};

/// The changes between tick N and tick N+1, tagged with N+1.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    /// The tick this delta produces when applied.
    pub tick: u64,
    /// Entities created this tick.
    pub created: Vec<Entity>,
    /// Entities whose attributes changed this tick.
    pub updated: Vec<Entity>,
    /// Ids of entities removed this tick. Never reused.
    pub removed: Vec<EntityId>,
}

impl StateDelta {
    /// An empty delta for the given tick.
    pub fn empty(tick: u64) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }

    /// Whether the delta carries no entity changes.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Accumulates entity changes during a tick (and between ticks, for joins and
/// leaves handled by the world actor outside the rule pass).
///
/// Collapses redundant entries when building the delta: an entity created and
/// then updated in the same tick appears only in `created`. A creation paired
/// with a removal drops the creation but keeps the removal: a snapshot handed
/// out mid-window (a joining session) has already exposed the entity, and
/// removing an id nobody has seen is a no-op on every view.
#[derive(Debug, Default)]
pub struct ChangeSet {
    created: BTreeSet<EntityId>,
    updated: BTreeSet<EntityId>,
    removed: BTreeSet<EntityId>,
}

impl ChangeSet {
    /// Record an entity creation.
    pub fn created(&mut self, id: EntityId) {
        self.created.insert(id);
    }

    /// Record an attribute change.
    pub fn updated(&mut self, id: EntityId) {
        self.updated.insert(id);
    }

    /// Record a removal.
    pub fn removed(&mut self, id: EntityId) {
        self.removed.insert(id);
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Build the delta for the world's current tick, consuming the set.
    ///
    /// Entities listed as created or updated must still exist in the world;
    /// ids that were also removed are dropped from those lists first.
    pub fn into_delta(self, world: &WorldState) -> StateDelta {
        let mut delta = StateDelta::empty(world.tick);

        for id in &self.created {
            if self.removed.contains(id) {
                continue; // spawned and despawned within the tick
            }
            if let Some(entity) = world.entity(*id) {
                delta.created.push(entity.clone());
            }
        }

        for id in &self.updated {
            if self.created.contains(id) || self.removed.contains(id) {
                continue;
            }
            if let Some(entity) = world.entity(*id) {
                delta.updated.push(entity.clone());
            }
        }

        delta.removed.extend(self.removed.iter().copied());

        delta
    }
}

/// Error applying a delta whose tick is too far ahead of the local snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("delta gap: snapshot at tick {have}, delta for tick {got}")]
pub struct DeltaGap {
    /// Local snapshot tick.
    pub have: u64,
    /// Tick of the delta that could not be applied.
    pub got: u64,
}

/// A client-side copy of the world, maintained by applying deltas.
///
/// Rendering and game-logic collaborators read this; they never see wire
/// bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientSnapshot {
    /// Tick this snapshot reflects.
    pub tick: u64,
    /// Arena width in tiles.
    pub width: i32,
    /// Arena height in tiles.
    pub height: i32,
    entities: BTreeMap<EntityId, Entity>,
}

impl From<WorldSnapshot> for ClientSnapshot {
    fn from(snap: WorldSnapshot) -> Self {
        Self {
            tick: snap.tick,
            width: snap.width,
            height: snap.height,
            entities: snap.entities.into_iter().map(|e| (e.id, e)).collect(),
        }
    }
}

impl ClientSnapshot {
    /// Apply a delta.
    ///
    /// Returns `Ok(true)` if the delta advanced the snapshot, `Ok(false)` if
    /// it was already acknowledged (tick not ahead of ours — applying it
    /// again is a no-op by design), and `Err(DeltaGap)` when a tick was
    /// missed and a resync is needed.
    pub fn apply(&mut self, delta: &StateDelta) -> Result<bool, DeltaGap> {
        if delta.tick <= self.tick {
            return Ok(false);
        }
        if delta.tick != self.tick + 1 {
            return Err(DeltaGap {
                have: self.tick,
                got: delta.tick,
            });
        }

        for entity in &delta.created {
            self.entities.insert(entity.id, entity.clone());
        }
        for entity in &delta.updated {
            self.entities.insert(entity.id, entity.clone());
        }
        for id in &delta.removed {
            self.entities.remove(id);
        }
        self.tick = delta.tick;
        Ok(true)
    }

    /// Replace the whole snapshot (resync).
    pub fn reset(&mut self, snap: WorldSnapshot) {
        *self = snap.into();
    }

    /// Look up an entity.
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Iterate all entities in id order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Number of entities in the local view.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{ClientId, EntityKind, Position};

    fn world_with_entities() -> (WorldState, EntityId, EntityId) {
        let mut world = WorldState::new(1, 16, 16);
        let a = world.spawn(EntityKind::Player, Position::new(2, 2), 100, None);
        let b = world.spawn(EntityKind::Enemy, Position::new(5, 5), 10, None);
        (world, a, b)
    }

    #[test]
    fn test_changeset_collapses_create_update() {
        let (world, a, _) = world_with_entities();
        let mut changes = ChangeSet::default();
        changes.created(a);
        changes.updated(a);

        let delta = changes.into_delta(&world);
        assert_eq!(delta.created.len(), 1);
        assert!(delta.updated.is_empty());
    }

    #[test]
    fn test_changeset_same_tick_spawn_despawn_keeps_removal() {
        let (mut world, _, b) = world_with_entities();
        let ghost = world.spawn(EntityKind::Item, Position::new(7, 7), 1, None);
        world.remove(ghost);

        let mut changes = ChangeSet::default();
        changes.created(ghost);
        changes.removed(ghost);
        changes.updated(b);

        let delta = changes.into_delta(&world);
        assert!(delta.created.is_empty());
        assert_eq!(delta.removed, vec![ghost]);
        assert_eq!(delta.updated.len(), 1);
        assert_eq!(delta.updated[0].id, b);
    }

    #[test]
    fn test_mid_window_snapshot_sees_same_tick_despawn() {
        // A snapshot handed out between ticks can already contain an entity
        // that despawns again before the next delta; that delta must still
        // carry the removal or the entity lingers in the view forever.
        let (mut world, _, _) = world_with_entities();
        let mut changes = ChangeSet::default();

        let ghost = world.spawn(EntityKind::Player, Position::new(8, 8), 100, None);
        changes.created(ghost);
        let mut snap: ClientSnapshot = world.snapshot().into();
        assert!(snap.entity(ghost).is_some());

        world.remove(ghost);
        changes.removed(ghost);
        world.tick += 1;

        let delta = changes.into_delta(&world);
        snap.apply(&delta).unwrap();
        assert!(snap.entity(ghost).is_none());
    }

    #[test]
    fn test_changeset_removed_wins_over_updated() {
        let (mut world, a, _) = world_with_entities();
        world.remove(a);

        let mut changes = ChangeSet::default();
        changes.updated(a);
        changes.removed(a);

        let delta = changes.into_delta(&world);
        assert!(delta.updated.is_empty());
        assert_eq!(delta.removed, vec![a]);
    }

    #[test]
    fn test_apply_advances_snapshot() {
        let (mut world, a, _) = world_with_entities();
        let mut snap: ClientSnapshot = world.snapshot().into();

        world.tick += 1;
        world.entity_mut(a).unwrap().position = Position::new(3, 2);
        let mut changes = ChangeSet::default();
        changes.updated(a);
        let delta = changes.into_delta(&world);

        assert_eq!(snap.apply(&delta), Ok(true));
        assert_eq!(snap.tick, 1);
        assert_eq!(snap.entity(a).unwrap().position, Position::new(3, 2));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let (mut world, a, _) = world_with_entities();
        let mut snap: ClientSnapshot = world.snapshot().into();

        world.tick += 1;
        world.entity_mut(a).unwrap().health = 50;
        let mut changes = ChangeSet::default();
        changes.updated(a);
        let delta = changes.into_delta(&world);

        assert_eq!(snap.apply(&delta), Ok(true));
        let after_once = snap.clone();

        // Applying the same already-acknowledged delta again changes nothing.
        assert_eq!(snap.apply(&delta), Ok(false));
        assert_eq!(snap, after_once);
    }

    #[test]
    fn test_apply_detects_gap() {
        let (world, _, _) = world_with_entities();
        let mut snap: ClientSnapshot = world.snapshot().into();

        let delta = StateDelta::empty(5);
        assert_eq!(snap.apply(&delta), Err(DeltaGap { have: 0, got: 5 }));
        // Snapshot untouched after the failed apply.
        assert_eq!(snap.tick, 0);
    }

    #[test]
    fn test_apply_removal() {
        let (mut world, _, b) = world_with_entities();
        let mut snap: ClientSnapshot = world.snapshot().into();
        assert_eq!(snap.entity_count(), 2);

        world.tick += 1;
        world.remove(b);
        let mut changes = ChangeSet::default();
        changes.removed(b);
        let delta = changes.into_delta(&world);

        snap.apply(&delta).unwrap();
        assert_eq!(snap.entity_count(), 1);
        assert!(snap.entity(b).is_none());
    }

    #[test]
    fn test_reset_replaces_view() {
        let (mut world, _, _) = world_with_entities();
        let mut snap: ClientSnapshot = world.snapshot().into();

        world.tick = 10;
        world.spawn(
            EntityKind::Player,
            Position::new(9, 9),
            100,
            Some(ClientId::new([3; 16])),
        );
        snap.reset(world.snapshot());

        assert_eq!(snap.tick, 10);
        assert_eq!(snap.entity_count(), 3);
    }
}
