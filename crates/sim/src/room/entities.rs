use std::collections::HashMap;
use std::fmt;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::content::{ArchetypeId, ChargeSource};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnemyId(pub u64);

impl fmt::Display for EnemyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub position: Vec3,
    pub rotation: f32,
    pub health: f32,
    pub max_health: f32,
    pub weapon: Option<String>,
    pub subclass: Option<String>,
    pub stealthed: bool,
    pub joined_at: u64,
}

impl Player {
    pub fn is_downed(&self) -> bool {
        self.health <= 0.0
    }

    pub fn is_targetable(&self) -> bool {
        !self.is_downed() && !self.stealthed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CooldownKey {
    DefaultAttack,
    Ability { slot: usize, variant: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargePhase {
    Charging,
    Releasing,
    Resolved,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRecord {
    pub source: ChargeSource,
    pub phase: ChargePhase,
    pub started_at: u64,
    pub origin: Vec3,
    pub commit_point: Vec3,
    pub target_id: PlayerId,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WanderState {
    pub point: Vec3,
    pub picked_at: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnemyRuntime {
    // Last use per cooldown slot; readiness is `now >= last + cooldown`.
    pub last_used: HashMap<CooldownKey, u64>,
    pub charge: Option<ChargeRecord>,
    pub busy_until: u64,
    pub wander: Option<WanderState>,
    pub target_id: Option<PlayerId>,
    pub is_moving: bool,
    pub is_attacking: bool,
}

impl EnemyRuntime {
    pub fn is_ready(&self, key: CooldownKey, cooldown_ms: u64, now: u64) -> bool {
        match self.last_used.get(&key) {
            Some(last) => now >= last.saturating_add(cooldown_ms),
            None => true,
        }
    }

    pub fn stamp(&mut self, key: CooldownKey, now: u64) {
        self.last_used.insert(key, now);
    }

    pub fn is_charging(&self) -> bool {
        self.charge.is_some()
    }

    pub fn is_busy(&self, now: u64) -> bool {
        self.charge.is_some() || now < self.busy_until
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Enemy {
    pub id: EnemyId,
    pub archetype: ArchetypeId,
    pub kind: String,
    pub position: Vec3,
    pub rotation: f32,
    pub health: f32,
    pub max_health: f32,
    pub is_dying: bool,
    pub spawned_at: u64,
    pub death_time: Option<u64>,
    pub runtime: EnemyRuntime,
}

impl Enemy {
    pub fn is_active(&self) -> bool {
        !self.is_dying
    }
}
