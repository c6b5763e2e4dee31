use serde::{Deserialize, Serialize};

use super::entities::{Enemy, EnemyId, Player, PlayerId};
use super::status::{ActiveEffects, StatusEffectKind};
use crate::math::Position;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnemyView {
    pub id: EnemyId,
    #[serde(rename = "type")]
    pub kind: String,
    pub position: Position,
    pub rotation: f32,
    pub health: f32,
    pub max_health: f32,
    pub is_dying: bool,
}

impl From<&Enemy> for EnemyView {
    fn from(enemy: &Enemy) -> Self {
        Self {
            id: enemy.id,
            kind: enemy.kind.clone(),
            position: enemy.position.into(),
            rotation: enemy.rotation,
            health: enemy.health,
            max_health: enemy.max_health,
            is_dying: enemy.is_dying,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub id: PlayerId,
    pub position: Position,
    pub rotation: f32,
    pub health: f32,
    pub max_health: f32,
    pub weapon: Option<String>,
    pub subclass: Option<String>,
}

impl From<&Player> for PlayerView {
    fn from(player: &Player) -> Self {
        Self {
            id: player.id.clone(),
            position: player.position.into(),
            rotation: player.rotation,
            health: player.health,
            max_health: player.max_health,
            weapon: player.weapon.clone(),
            subclass: player.subclass.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnemyTickState {
    pub id: EnemyId,
    pub position: Position,
    pub rotation: f32,
    pub target_id: Option<PlayerId>,
    pub is_moving: bool,
    pub is_attacking: bool,
    pub is_charging: bool,
    pub is_stunned: bool,
    pub is_frozen: bool,
    pub is_slowed: bool,
}

impl EnemyTickState {
    pub fn from_enemy(enemy: &Enemy, effects: ActiveEffects) -> Self {
        Self {
            id: enemy.id,
            position: enemy.position.into(),
            rotation: enemy.rotation,
            target_id: enemy.runtime.target_id.clone(),
            is_moving: enemy.runtime.is_moving,
            is_attacking: enemy.runtime.is_attacking,
            is_charging: enemy.runtime.is_charging(),
            is_stunned: effects.stunned,
            is_frozen: effects.frozen,
            is_slowed: effects.slowed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemovalReason {
    Died,
    GameStopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilityHit {
    pub player_id: PlayerId,
    pub damage: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PulseHit {
    pub player_id: PlayerId,
    pub damage: f32,
    pub knockback_position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum RoomEvent {
    GameStarted {
        kill_count: u32,
        initiator_id: PlayerId,
    },
    GameStopped {
        kill_count: u32,
    },
    PlayerJoined {
        player: PlayerView,
    },
    PlayerLeft {
        player_id: PlayerId,
    },
    EnemySpawned {
        enemy: EnemyView,
    },
    EnemyRemoved {
        enemy_id: EnemyId,
        reason: RemovalReason,
    },
    EnemiesUpdated {
        enemies: Vec<EnemyTickState>,
        timestamp: u64,
    },
    EnemyHealthUpdated {
        enemy_id: EnemyId,
        health: f32,
        max_health: f32,
        damage: f32,
        from_player_id: PlayerId,
        was_killed: bool,
    },
    EnemyDied {
        enemy_id: EnemyId,
        killed_by: PlayerId,
        death_position: Position,
        enemy_type: String,
    },
    KillCountUpdated {
        kill_count: u32,
        killed_by: PlayerId,
        enemy_type: String,
    },
    PlayerHealthUpdated {
        player_id: PlayerId,
        health: f32,
        max_health: f32,
    },
    EnemyCharging {
        enemy_id: EnemyId,
        start_position: Position,
        target_position: Position,
        charge_duration: u64,
        attack_range: f32,
    },
    EnemyAttackStart {
        enemy_id: EnemyId,
        attack_type: String,
        start_position: Position,
        target_position: Position,
    },
    EnemyStatusApplied {
        enemy_id: EnemyId,
        effect_type: StatusEffectKind,
        duration_ms: u64,
    },
    EnemyBurstCast {
        enemy_id: EnemyId,
        variant: String,
        target_position: Position,
        radius: f32,
        delay: u64,
    },
    EnemyBurstImpact {
        enemy_id: EnemyId,
        variant: String,
        position: Position,
        radius: f32,
        hits: Vec<AbilityHit>,
    },
    EnemyTeleport {
        enemy_id: EnemyId,
        from_position: Position,
        to_position: Position,
        target_id: PlayerId,
    },
    EnemyTeleportStrike {
        enemy_id: EnemyId,
        target_id: PlayerId,
        damage: f32,
        hit: bool,
    },
    EnemyPulseCast {
        enemy_id: EnemyId,
        ability: String,
        position: Position,
        radius: f32,
    },
    EnemyPulseImpact {
        enemy_id: EnemyId,
        ability: String,
        position: Position,
        radius: f32,
        hits: Vec<PulseHit>,
    },
    EnemyBlinkCast {
        enemy_id: EnemyId,
        from_position: Position,
        to_position: Position,
        windup: u64,
    },
    EnemyBlinkImpact {
        enemy_id: EnemyId,
        position: Position,
    },
}

impl RoomEvent {
    // Per-tick batches may be dropped under back-pressure; everything else must arrive.
    pub fn is_telemetry(&self) -> bool {
        matches!(self, Self::EnemiesUpdated { .. })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::GameStarted { .. } => "game-started",
            Self::GameStopped { .. } => "game-stopped",
            Self::PlayerJoined { .. } => "player-joined",
            Self::PlayerLeft { .. } => "player-left",
            Self::EnemySpawned { .. } => "enemy-spawned",
            Self::EnemyRemoved { .. } => "enemy-removed",
            Self::EnemiesUpdated { .. } => "enemies-updated",
            Self::EnemyHealthUpdated { .. } => "enemy-health-updated",
            Self::EnemyDied { .. } => "enemy-died",
            Self::KillCountUpdated { .. } => "kill-count-updated",
            Self::PlayerHealthUpdated { .. } => "player-health-updated",
            Self::EnemyCharging { .. } => "enemy-charging",
            Self::EnemyAttackStart { .. } => "enemy-attack-start",
            Self::EnemyStatusApplied { .. } => "enemy-status-applied",
            Self::EnemyBurstCast { .. } => "enemy-burst-cast",
            Self::EnemyBurstImpact { .. } => "enemy-burst-impact",
            Self::EnemyTeleport { .. } => "enemy-teleport",
            Self::EnemyTeleportStrike { .. } => "enemy-teleport-strike",
            Self::EnemyPulseCast { .. } => "enemy-pulse-cast",
            Self::EnemyPulseImpact { .. } => "enemy-pulse-impact",
            Self::EnemyBlinkCast { .. } => "enemy-blink-cast",
            Self::EnemyBlinkImpact { .. } => "enemy-blink-impact",
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn health_update_uses_wire_names() {
        let event = RoomEvent::EnemyHealthUpdated {
            enemy_id: EnemyId(7),
            health: 40.0,
            max_health: 725.0,
            damage: 15.0,
            from_player_id: PlayerId::new("p1"),
            was_killed: false,
        };
        let value = serde_json::to_value(&event).expect("json");
        assert_eq!(
            value,
            json!({
                "type": "enemy-health-updated",
                "enemyId": 7,
                "health": 40.0,
                "maxHealth": 725.0,
                "damage": 15.0,
                "fromPlayerId": "p1",
                "wasKilled": false
            })
        );
    }

    #[test]
    fn charging_event_carries_telegraph_fields() {
        let event = RoomEvent::EnemyCharging {
            enemy_id: EnemyId(3),
            start_position: Position::new(0.0, 0.0, 0.0),
            target_position: Position::new(1.0, 0.0, 2.0),
            charge_duration: 900,
            attack_range: 4.0,
        };
        let value = serde_json::to_value(&event).expect("json");
        assert_eq!(value["type"], "enemy-charging");
        assert_eq!(value["chargeDuration"], 900);
        assert_eq!(value["attackRange"], 4.0);
        assert_eq!(value["targetPosition"], json!({"x": 1.0, "y": 0.0, "z": 2.0}));
    }

    #[test]
    fn spawned_enemy_view_names_type_field() {
        let event = RoomEvent::EnemySpawned {
            enemy: EnemyView {
                id: EnemyId(1),
                kind: "skeleton".to_string(),
                position: Position::default(),
                rotation: 0.0,
                health: 725.0,
                max_health: 725.0,
                is_dying: false,
            },
        };
        let value = serde_json::to_value(&event).expect("json");
        assert_eq!(value["enemy"]["type"], "skeleton");
        assert_eq!(value["enemy"]["isDying"], false);
    }

    #[test]
    fn removal_reason_is_kebab_case() {
        let event = RoomEvent::EnemyRemoved {
            enemy_id: EnemyId(2),
            reason: RemovalReason::GameStopped,
        };
        let value = serde_json::to_value(&event).expect("json");
        assert_eq!(value["reason"], "game-stopped");
    }

    #[test]
    fn only_batches_are_telemetry() {
        let batch = RoomEvent::EnemiesUpdated {
            enemies: Vec::new(),
            timestamp: 5,
        };
        assert!(batch.is_telemetry());
        assert!(!RoomEvent::GameStopped { kill_count: 0 }.is_telemetry());
    }

    #[test]
    fn type_name_matches_serialized_tag() {
        let event = RoomEvent::PlayerLeft {
            player_id: PlayerId::new("p"),
        };
        let value = serde_json::to_value(&event).expect("json");
        assert_eq!(value["type"], event.type_name());
    }
}
