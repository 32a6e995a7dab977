//! Authoritative Rule Evaluation
//!
//! One tick of the world: drain the intents received since the previous
//! tick, apply them in arrival order, run the world-driven rules (enemy
//! wandering and strikes), resolve deaths, and emit the resulting delta.
//!
//! This function is deterministic: BTreeMap iteration, intents in arrival
//! order, all randomness from the world RNG.

use tracing::debug;

use crate::game::delta::ChangeSet;
use crate::game::intent::{Action, Intent, RejectReason};
use crate::game::state::{ClientId, Direction, EntityKind, WorldState};

/// Tunable rule parameters.
#[derive(Debug, Clone)]
pub struct RuleConfig {
    /// Hit points a fresh player avatar spawns with.
    pub player_max_health: i32,
    /// Damage dealt by a player attack.
    pub attack_damage: i32,
    /// Hit points a fresh enemy spawns with.
    pub enemy_max_health: i32,
    /// Damage dealt by an enemy strike.
    pub enemy_damage: i32,
    /// Enemies act once every this many ticks.
    pub enemy_stride: u64,
    /// Enemies placed at world startup.
    pub initial_enemies: u32,
    /// Items placed at world startup.
    pub initial_items: u32,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            player_max_health: 100,
            attack_damage: 25,
            enemy_max_health: 50,
            enemy_damage: 10,
            enemy_stride: 10,
            initial_enemies: 6,
            initial_items: 8,
        }
    }
}

/// Result of one tick.
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Per-intent rejection notices for the issuing sessions.
    pub rejections: Vec<(ClientId, u64, RejectReason)>,
}

/// Populate a fresh world with its initial enemies and items.
pub fn populate(state: &mut WorldState, config: &RuleConfig) {
    for _ in 0..config.initial_enemies {
        let pos = state.random_open_position();
        state.spawn(EntityKind::Enemy, pos, config.enemy_max_health, None);
    }
    for _ in 0..config.initial_items {
        let pos = state.random_open_position();
        state.spawn(EntityKind::Item, pos, 1, None);
    }
}

/// Run one simulation tick.
///
/// `changes` may already carry entity changes recorded between ticks (joins
/// and leaves); rule changes accumulate into the same set. The caller builds
/// the delta from it afterwards, once `state.tick` has advanced.
pub fn run_tick(
    state: &mut WorldState,
    intents: Vec<Intent>,
    config: &RuleConfig,
    changes: &mut ChangeSet,
) -> TickOutcome {
    let mut outcome = TickOutcome::default();

    // 0. Advance the tick counter
    state.tick += 1;

    // 1. Apply intents in the order the world received them
    for intent in intents {
        if let Err(reason) = apply_intent(state, &intent, config, changes) {
            debug!(
                issuer = %intent.issuer.short(),
                seq = intent.seq,
                %reason,
                "intent rejected"
            );
            outcome.rejections.push((intent.issuer, intent.seq, reason));
        }
    }

    // 2. World-driven rules
    if config.enemy_stride > 0 && state.tick % config.enemy_stride == 0 {
        run_enemies(state, config, changes);
    }

    // 3. Resolve deaths
    resolve_deaths(state, config, changes);

    outcome
}

fn apply_intent(
    state: &mut WorldState,
    intent: &Intent,
    config: &RuleConfig,
    changes: &mut ChangeSet,
) -> Result<(), RejectReason> {
    let avatar_id = state
        .avatar_of(&intent.issuer)
        .ok_or(RejectReason::NoAvatar)?;

    match intent.action {
        Action::Move { dir } => {
            let avatar = state.entity(avatar_id).expect("avatar exists");
            let dest = avatar.position.step(dir);
            if !state.is_walkable(dest) {
                return Err(RejectReason::Blocked);
            }
            state.entity_mut(avatar_id).expect("avatar exists").position = dest;
            changes.updated(avatar_id);
            Ok(())
        }
        Action::Attack { target } => {
            let target_entity = state.entity(target).ok_or(RejectReason::NoSuchEntity)?;
            if target_entity.kind == EntityKind::Item {
                return Err(RejectReason::InvalidTarget);
            }
            let avatar_pos = state.entity(avatar_id).expect("avatar exists").position;
            if !avatar_pos.adjacent(target_entity.position) {
                return Err(RejectReason::OutOfRange);
            }
            let target_mut = state.entity_mut(target).expect("target exists");
            target_mut.health -= config.attack_damage;
            changes.updated(target);
            Ok(())
        }
        Action::Interact { target } => {
            let target_entity = state.entity(target).ok_or(RejectReason::NoSuchEntity)?;
            if target_entity.kind != EntityKind::Item {
                return Err(RejectReason::InvalidTarget);
            }
            let avatar_pos = state.entity(avatar_id).expect("avatar exists").position;
            let item_pos = target_entity.position;
            if avatar_pos != item_pos && !avatar_pos.adjacent(item_pos) {
                return Err(RejectReason::OutOfRange);
            }
            state.remove(target);
            changes.removed(target);
            Ok(())
        }
    }
}

/// Enemies wander one tile and strike adjacent players.
fn run_enemies(state: &mut WorldState, config: &RuleConfig, changes: &mut ChangeSet) {
    let enemy_ids: Vec<_> = state
        .entities()
        .filter(|e| e.kind == EntityKind::Enemy)
        .map(|e| e.id)
        .collect();

    for id in enemy_ids {
        let Some(enemy) = state.entity(id) else {
            continue;
        };
        let pos = enemy.position;

        // Wander
        let dir = *state
            .rng
            .choose(&Direction::ALL)
            .expect("directions non-empty");
        let dest = pos.step(dir);
        if state.is_walkable(dest) {
            state.entity_mut(id).expect("enemy exists").position = dest;
            changes.updated(id);
        }

        // Strike one adjacent player, if any
        let here = state.entity(id).expect("enemy exists").position;
        let victim = state
            .entities()
            .filter(|e| e.kind == EntityKind::Player && e.position.adjacent(here))
            .map(|e| e.id)
            .next();
        if let Some(victim_id) = victim {
            let player = state.entity_mut(victim_id).expect("player exists");
            player.health -= config.enemy_damage;
            changes.updated(victim_id);
        }
    }
}

/// Remove entities at zero health. Dead player avatars respawn as a fresh
/// entity with a new id, keeping the no-reuse invariant trivially intact.
fn resolve_deaths(state: &mut WorldState, config: &RuleConfig, changes: &mut ChangeSet) {
    let dead: Vec<_> = state
        .entities()
        .filter(|e| e.health <= 0)
        .map(|e| (e.id, e.kind, e.owner))
        .collect();

    for (id, kind, owner) in dead {
        state.remove(id);
        changes.removed(id);

        if kind == EntityKind::Player {
            if let Some(owner) = owner {
                let pos = state.random_open_position();
                let fresh = state.spawn(
                    EntityKind::Player,
                    pos,
                    config.player_max_health,
                    Some(owner),
                );
                changes.created(fresh);
                debug!(owner = %owner.short(), old = id.0, new = fresh.0, "avatar respawned");
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
