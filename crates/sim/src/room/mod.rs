mod aggro;
mod ai;
mod combat;
mod entities;
mod events;
mod level;
mod spawn;
mod status;
mod tasks;

use std::collections::BTreeMap;
use std::f32::consts::TAU;
use std::fmt;
use std::sync::Arc;

use glam::Vec3;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::content::{ArchetypeId, ArchetypeTable};
use crate::math::{yaw_from_direction, Position};

pub use aggro::{AggroTable, AggroWeights, TargetCandidate};
pub use combat::{DamageRequest, DamageResult};
pub use entities::{
    ChargePhase, ChargeRecord, CooldownKey, Enemy, EnemyId, EnemyRuntime, Player, PlayerId,
    WanderState,
};
pub use events::{
    AbilityHit, EnemyTickState, EnemyView, PlayerView, PulseHit, RemovalReason, RoomEvent,
};
pub use level::{level_for_kill_count, MAX_LEVEL};
pub use spawn::{plan_spawn, SpawnDecision, SpawnGate, SpawnScheduler, SpawnSkipReason};
pub use status::{ActiveEffects, StatusEffectKind, StatusEffectStore};
pub use tasks::{DeferredTask, TaskQueue};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomConfig {
    pub spawn_inner_radius: f32,
    pub spawn_outer_radius: f32,
    pub global_enemy_cap: u32,
    pub seed_initial_enemies: bool,
    pub death_grace_ms: u64,
    pub aggro: AggroWeights,
    pub separation_radius: f32,
    pub separation_force: f32,
    pub separation_cap: f32,
    pub max_weapon_range: f32,
    pub player_base_health: f32,
    pub wander_timebox_ms: u64,
    pub ai_tick_ms: u64,
    pub max_step_ms: u64,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            spawn_inner_radius: 18.0,
            spawn_outer_radius: 32.0,
            global_enemy_cap: 24,
            seed_initial_enemies: true,
            death_grace_ms: 3000,
            aggro: AggroWeights::default(),
            separation_radius: 2.5,
            separation_force: 1.5,
            separation_cap: 1.0,
            max_weapon_range: 60.0,
            player_base_health: 100.0,
            wander_timebox_ms: 3000,
            ai_tick_ms: 50,
            max_step_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSpawn {
    pub id: PlayerId,
    pub weapon: Option<String>,
    pub subclass: Option<String>,
    pub position: Option<Vec3>,
}

impl PlayerSpawn {
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            weapon: None,
            subclass: None,
            position: None,
        }
    }
}

/// One combat session. All state is owned here and mutated only through these methods,
/// by inbound requests, by [`Room::tick`] and by the deferred tasks `tick` drains.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    archetypes: Arc<ArchetypeTable>,
    config: RoomConfig,
    rng: StdRng,
    players: BTreeMap<PlayerId, Player>,
    enemies: BTreeMap<EnemyId, Enemy>,
    aggro: AggroTable,
    status: StatusEffectStore,
    spawner: SpawnScheduler,
    tasks: TaskQueue,
    kill_count: u32,
    game_started: bool,
    next_enemy_id: u64,
    last_ai_tick: Option<u64>,
    events: Vec<RoomEvent>,
}

impl Room {
    pub fn new(
        id: RoomId,
        archetypes: Arc<ArchetypeTable>,
        config: RoomConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            id,
            archetypes,
            aggro: AggroTable::new(config.aggro),
            config,
            rng,
            players: BTreeMap::new(),
            enemies: BTreeMap::new(),
            status: StatusEffectStore::default(),
            spawner: SpawnScheduler::default(),
            tasks: TaskQueue::default(),
            kill_count: 0,
            game_started: false,
            next_enemy_id: 1,
            last_ai_tick: None,
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.game_started
    }

    pub fn kill_count(&self) -> u32 {
        self.kill_count
    }

    pub fn level(&self) -> u8 {
        level_for_kill_count(self.kill_count)
    }

    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn enemy(&self, id: EnemyId) -> Option<&Enemy> {
        self.enemies.get(&id)
    }

    pub fn enemies(&self) -> impl Iterator<Item = &Enemy> {
        self.enemies.values()
    }

    pub fn enemy_count(&self) -> usize {
        self.enemies.len()
    }

    pub fn living_enemy_count(&self) -> u32 {
        self.enemies.values().filter(|enemy| enemy.is_active()).count() as u32
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn drain_events(&mut self) -> Vec<RoomEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn start_game(&mut self, initiator: &PlayerId, now: u64) -> bool {
        if self.game_started {
            debug!(room = %self.id, initiator = %initiator, "start_game_ignored_already_started");
            return false;
        }
        self.game_started = true;
        self.last_ai_tick = None;
        let archetypes = Arc::clone(&self.archetypes);
        self.spawner.start(&archetypes, now);
        self.events.push(RoomEvent::GameStarted {
            kill_count: self.kill_count,
            initiator_id: initiator.clone(),
        });
        info!(
            room = %self.id,
            initiator = %initiator,
            kill_count = self.kill_count,
            "room_game_started"
        );

        if self.config.seed_initial_enemies {
            let level = self.level();
            for descriptor in archetypes.descriptors() {
                if level < descriptor.spawn.min_level {
                    continue;
                }
                for _ in 0..descriptor.spawn.initial {
                    if self.spawn_enemy(&descriptor.def_name, now).is_none() {
                        break;
                    }
                }
            }
        }
        true
    }

    pub fn stop_game(&mut self, now: u64) {
        if !self.game_started {
            return;
        }
        self.game_started = false;
        self.spawner.stop();
        let removed = std::mem::take(&mut self.enemies);
        for enemy_id in removed.keys() {
            self.events.push(RoomEvent::EnemyRemoved {
                enemy_id: *enemy_id,
                reason: RemovalReason::GameStopped,
            });
        }
        self.aggro.clear();
        self.status.clear();
        self.last_ai_tick = None;
        self.events.push(RoomEvent::GameStopped {
            kill_count: self.kill_count,
        });
        info!(
            room = %self.id,
            removed_enemies = removed.len(),
            kill_count = self.kill_count,
            at_ms = now,
            "room_game_stopped"
        );
    }

    pub fn add_player(&mut self, spawn: PlayerSpawn, now: u64) -> bool {
        if self.players.contains_key(&spawn.id) {
            debug!(room = %self.id, player = %spawn.id, "add_player_ignored_duplicate");
            return false;
        }
        let max_health = self.config.player_base_health + self.kill_count as f32;
        let player = Player {
            id: spawn.id.clone(),
            position: spawn.position.unwrap_or(Vec3::ZERO),
            rotation: 0.0,
            health: max_health,
            max_health,
            weapon: spawn.weapon,
            subclass: spawn.subclass,
            stealthed: false,
            joined_at: now,
        };
        self.events.push(RoomEvent::PlayerJoined {
            player: PlayerView::from(&player),
        });
        info!(room = %self.id, player = %player.id, max_health, "room_player_joined");
        self.players.insert(spawn.id, player);
        true
    }

    pub fn remove_player(&mut self, id: &PlayerId, now: u64) -> bool {
        if self.players.remove(id).is_none() {
            return false;
        }
        self.aggro.forget_player(id);
        for enemy in self.enemies.values_mut() {
            if enemy.runtime.target_id.as_ref() == Some(id) {
                enemy.runtime.target_id = None;
            }
        }
        self.events.push(RoomEvent::PlayerLeft {
            player_id: id.clone(),
        });
        info!(room = %self.id, player = %id, remaining = self.players.len(), "room_player_left");
        if self.players.is_empty() && self.game_started {
            self.stop_game(now);
        }
        true
    }

    pub fn update_player(
        &mut self,
        id: &PlayerId,
        position: Vec3,
        rotation: f32,
        stealthed: Option<bool>,
    ) -> bool {
        let Some(player) = self.players.get_mut(id) else {
            return false;
        };
        if !Position::from(position).is_finite() || !rotation.is_finite() {
            debug!(room = %self.id, player = %id, "update_player_ignored_non_finite");
            return false;
        }
        player.position = position;
        player.rotation = rotation;
        if let Some(stealthed) = stealthed {
            player.stealthed = stealthed;
        }
        true
    }

    pub fn heal_player(&mut self, id: &PlayerId, amount: f32) -> Option<f32> {
        if !amount.is_finite() || amount <= 0.0 {
            return None;
        }
        let player = self.players.get_mut(id)?;
        player.health = (player.health + amount).min(player.max_health);
        let (health, max_health) = (player.health, player.max_health);
        self.events.push(RoomEvent::PlayerHealthUpdated {
            player_id: id.clone(),
            health,
            max_health,
        });
        Some(health)
    }

    pub fn spawn_enemy(&mut self, archetype_name: &str, now: u64) -> Option<EnemyId> {
        if !self.game_started {
            return None;
        }
        let archetypes = Arc::clone(&self.archetypes);
        let Some(descriptor) = archetypes.descriptor_by_name(archetype_name) else {
            debug!(room = %self.id, archetype = archetype_name, "spawn_unknown_archetype");
            return None;
        };
        if self.living_enemy_count() >= self.config.global_enemy_cap {
            debug!(room = %self.id, archetype = archetype_name, "spawn_blocked_global_cap");
            return None;
        }
        if let Some(cap) = descriptor.spawn.instance_cap {
            if self.living_of_archetype(descriptor.id) >= cap {
                debug!(room = %self.id, archetype = archetype_name, cap, "spawn_blocked_instance_cap");
                return None;
            }
        }

        let inner = self.config.spawn_inner_radius.min(self.config.spawn_outer_radius);
        let outer = self.config.spawn_outer_radius.max(inner);
        let angle = self.rng.gen_range(0.0..TAU);
        let radius = if outer > inner {
            self.rng.gen_range(inner..outer)
        } else {
            inner
        };
        let position = Vec3::new(radius * angle.cos(), 0.0, radius * angle.sin());
        let max_health = descriptor.max_health_for_level(self.level());

        let id = EnemyId(self.next_enemy_id);
        self.next_enemy_id = self.next_enemy_id.saturating_add(1);
        let enemy = Enemy {
            id,
            archetype: descriptor.id,
            kind: descriptor.def_name.clone(),
            position,
            rotation: yaw_from_direction(-position),
            health: max_health,
            max_health,
            is_dying: false,
            spawned_at: now,
            death_time: None,
            runtime: EnemyRuntime::default(),
        };
        self.events.push(RoomEvent::EnemySpawned {
            enemy: EnemyView::from(&enemy),
        });
        debug!(
            room = %self.id,
            enemy = %id,
            archetype = archetype_name,
            max_health,
            "enemy_spawned"
        );
        self.enemies.insert(id, enemy);
        Some(id)
    }

    pub fn apply_status_effect(
        &mut self,
        enemy_id: EnemyId,
        kind: StatusEffectKind,
        duration_ms: u64,
        now: u64,
    ) -> bool {
        if !self.game_started {
            return false;
        }
        match self.enemies.get(&enemy_id) {
            Some(enemy) if enemy.is_active() => {}
            _ => return false,
        }
        self.status.apply(enemy_id, kind, duration_ms, now);
        self.events.push(RoomEvent::EnemyStatusApplied {
            enemy_id,
            effect_type: kind,
            duration_ms,
        });
        true
    }

    pub fn is_enemy_affected_by(
        &mut self,
        enemy_id: EnemyId,
        kind: StatusEffectKind,
        now: u64,
    ) -> bool {
        self.status.is_affected(enemy_id, kind, now)
    }

    pub fn enemy_status_effects(
        &mut self,
        enemy_id: EnemyId,
        now: u64,
    ) -> Vec<(StatusEffectKind, u64)> {
        self.status.effects_of(enemy_id, now)
    }

    pub fn enemy_snapshot(&self) -> Vec<EnemyView> {
        self.enemies.values().map(EnemyView::from).collect()
    }

    pub fn tick(&mut self, now: u64) {
        while let Some((_, task)) = self.tasks.pop_due(now) {
            self.run_deferred(task, now);
        }
        if !self.game_started {
            return;
        }

        self.run_spawn_timers(now);

        let elapsed_ms = match self.last_ai_tick {
            Some(last) => now.saturating_sub(last).min(self.config.max_step_ms),
            None => self.config.ai_tick_ms,
        };
        self.last_ai_tick = Some(now);
        self.run_ai_pass(now, elapsed_ms as f32 / 1000.0);

        if !self.enemies.is_empty() {
            let mut rows = Vec::with_capacity(self.enemies.len());
            for enemy in self.enemies.values() {
                let effects = self.status.active_effects(enemy.id, now);
                rows.push(EnemyTickState::from_enemy(enemy, effects));
            }
            self.events.push(RoomEvent::EnemiesUpdated {
                enemies: rows,
                timestamp: now,
            });
        }
    }

    fn run_spawn_timers(&mut self, now: u64) {
        let archetypes = Arc::clone(&self.archetypes);
        for archetype_id in self.spawner.take_due(now) {
            let Some(descriptor) = archetypes.descriptor(archetype_id) else {
                continue;
            };
            let gate = SpawnGate {
                started: self.game_started,
                level: self.level(),
                living_total: self.living_enemy_count(),
                living_of_archetype: self.living_of_archetype(archetype_id),
                global_cap: self.config.global_enemy_cap,
            };
            match plan_spawn(&descriptor.spawn, gate, &mut self.rng) {
                SpawnDecision::Skip(reason) => {
                    debug!(
                        room = %self.id,
                        archetype = %descriptor.def_name,
                        reason = reason.as_str(),
                        "spawn_skipped"
                    );
                }
                SpawnDecision::Spawn(count) => {
                    for _ in 0..count {
                        if self.spawn_enemy(&descriptor.def_name, now).is_none() {
                            break;
                        }
                    }
                }
            }
        }
    }

    fn run_deferred(&mut self, task: DeferredTask, now: u64) {
        match task {
            DeferredTask::AttackImpact {
                enemy_id,
                target_id,
            } => self.resolve_attack_impact(enemy_id, &target_id, now),
            DeferredTask::ChargeRelease { enemy_id } => self.release_charge(enemy_id, now),
            DeferredTask::ChargeImpact { enemy_id } => self.resolve_charge_impact(enemy_id, now),
            DeferredTask::ChargeRecover { enemy_id } => self.recover_charge(enemy_id),
            DeferredTask::BurstImpact {
                enemy_id,
                slot,
                variant,
                target_id,
                point,
            } => self.resolve_burst_impact(enemy_id, slot, variant, &target_id, point, now),
            DeferredTask::TeleportStrike {
                enemy_id,
                slot,
                target_id,
            } => self.resolve_teleport_strike(enemy_id, slot, &target_id, now),
            DeferredTask::BlinkLand {
                enemy_id,
                destination,
            } => self.land_blink(enemy_id, destination),
            DeferredTask::RemoveEnemy { enemy_id } => self.remove_dead_enemy(enemy_id),
        }
    }

    fn living_of_archetype(&self, archetype: ArchetypeId) -> u32 {
        self.enemies
            .values()
            .filter(|enemy| enemy.archetype == archetype && enemy.is_active())
            .count() as u32
    }
}
