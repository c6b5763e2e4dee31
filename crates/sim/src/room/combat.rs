use glam::Vec3;
use tracing::{debug, info, warn};

use super::entities::{EnemyId, PlayerId};
use super::events::{RemovalReason, RoomEvent};
use super::tasks::DeferredTask;
use super::Room;
use crate::math::planar_distance;

#[derive(Debug, Clone, PartialEq)]
pub struct DamageRequest {
    pub attacker: PlayerId,
    pub enemy_id: EnemyId,
    pub amount: f32,
    pub hit_position: Vec3,
    pub damage_type: Option<String>,
    pub is_critical: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DamageResult {
    pub enemy_id: EnemyId,
    pub new_health: f32,
    pub max_health: f32,
    pub damage: f32,
    pub was_killed: bool,
    pub enemy_type: String,
    pub death_position: Option<Vec3>,
}

impl Room {
    /// Applies damage without broadcasting. `None` means nothing changed: the game is
    /// stopped, the amount is not a positive number, or the enemy is gone or already dying.
    /// The call that takes health to zero marks the enemy dying, bumps the kill count,
    /// grants every player +1 max health and +1 health, and schedules removal.
    pub fn damage_enemy(
        &mut self,
        enemy_id: EnemyId,
        amount: f32,
        source: &PlayerId,
        now: u64,
    ) -> Option<DamageResult> {
        if !self.game_started || !amount.is_finite() || amount <= 0.0 {
            return None;
        }
        let enemy = self.enemies.get_mut(&enemy_id)?;
        if enemy.is_dying {
            return None;
        }

        enemy.health = (enemy.health - amount).max(0.0);
        let was_killed = enemy.health <= 0.0;
        let mut result = DamageResult {
            enemy_id,
            new_health: enemy.health,
            max_health: enemy.max_health,
            damage: amount,
            was_killed,
            enemy_type: enemy.kind.clone(),
            death_position: None,
        };
        if !was_killed {
            self.aggro.add_damage(enemy_id, source, amount);
            return Some(result);
        }

        enemy.is_dying = true;
        enemy.death_time = Some(now);
        enemy.runtime.is_moving = false;
        enemy.runtime.is_attacking = false;
        result.death_position = Some(enemy.position);

        self.kill_count = self.kill_count.saturating_add(1);
        for player in self.players.values_mut() {
            player.max_health += 1.0;
            player.health = (player.health + 1.0).min(player.max_health);
        }
        self.aggro.discard_enemy(enemy_id);
        self.status.discard_enemy(enemy_id);
        self.tasks.schedule(
            now.saturating_add(self.config.death_grace_ms),
            DeferredTask::RemoveEnemy { enemy_id },
        );
        info!(
            room = %self.id,
            enemy = %enemy_id,
            killed_by = %source,
            kill_count = self.kill_count,
            "enemy_killed"
        );
        Some(result)
    }

    pub fn handle_damage_request(
        &mut self,
        request: &DamageRequest,
        now: u64,
    ) -> Option<DamageResult> {
        if !self.game_started {
            debug!(room = %self.id, enemy = %request.enemy_id, "damage_ignored_game_not_started");
            return None;
        }
        let Some(attacker) = self.players.get(&request.attacker) else {
            debug!(room = %self.id, attacker = %request.attacker, "damage_ignored_unknown_attacker");
            return None;
        };
        let enemy = match self.enemies.get(&request.enemy_id) {
            Some(enemy) if !enemy.is_dying => enemy,
            _ => {
                debug!(room = %self.id, enemy = %request.enemy_id, "damage_ignored_enemy_unavailable");
                return None;
            }
        };
        let distance = planar_distance(attacker.position, enemy.position);
        if distance > self.config.max_weapon_range {
            warn!(
                room = %self.id,
                attacker = %request.attacker,
                enemy = %request.enemy_id,
                distance,
                max_range = self.config.max_weapon_range,
                hit_x = request.hit_position.x,
                hit_z = request.hit_position.z,
                "damage_rejected_out_of_range"
            );
            return None;
        }

        let result = self.damage_enemy(request.enemy_id, request.amount, &request.attacker, now)?;
        self.events.push(RoomEvent::EnemyHealthUpdated {
            enemy_id: result.enemy_id,
            health: result.new_health,
            max_health: result.max_health,
            damage: result.damage,
            from_player_id: request.attacker.clone(),
            was_killed: result.was_killed,
        });
        if let Some(death_position) = result.death_position {
            self.events.push(RoomEvent::EnemyDied {
                enemy_id: result.enemy_id,
                killed_by: request.attacker.clone(),
                death_position: death_position.into(),
                enemy_type: result.enemy_type.clone(),
            });
            self.events.push(RoomEvent::KillCountUpdated {
                kill_count: self.kill_count,
                killed_by: request.attacker.clone(),
                enemy_type: result.enemy_type.clone(),
            });
            for player in self.players.values() {
                self.events.push(RoomEvent::PlayerHealthUpdated {
                    player_id: player.id.clone(),
                    health: player.health,
                    max_health: player.max_health,
                });
            }
        }
        Some(result)
    }

    pub(crate) fn damage_player(&mut self, player_id: &PlayerId, amount: f32) -> Option<f32> {
        let player = self.players.get_mut(player_id)?;
        if player.is_downed() || amount <= 0.0 {
            return None;
        }
        player.health = (player.health - amount).max(0.0);
        let (health, max_health) = (player.health, player.max_health);
        if health <= 0.0 {
            info!(room = %self.id, player = %player_id, "player_downed");
        }
        self.events.push(RoomEvent::PlayerHealthUpdated {
            player_id: player_id.clone(),
            health,
            max_health,
        });
        Some(health)
    }

    pub(super) fn remove_dead_enemy(&mut self, enemy_id: EnemyId) {
        match self.enemies.get(&enemy_id) {
            Some(enemy) if enemy.is_dying => {}
            _ => return,
        }
        self.enemies.remove(&enemy_id);
        self.events.push(RoomEvent::EnemyRemoved {
            enemy_id,
            reason: RemovalReason::Died,
        });
    }
}
