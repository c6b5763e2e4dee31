use std::sync::Arc;

use glam::Vec3;
use rand::Rng;
use tracing::debug;

use crate::content::{
    AbilitySpec, ArchetypeDescriptor, AttackSpec, BlinkSpec, BurstVariant, ChargeShape,
    ChargeSource, ChargeSpec, PulseSpec, ShadowStepSpec,
};
use crate::math::{
    forward_from_yaw, planar_angle_between, planar_direction, planar_distance, yaw_from_direction,
};
use crate::room::entities::{ChargePhase, ChargeRecord, CooldownKey, EnemyId, PlayerId};
use crate::room::events::{AbilityHit, PulseHit, RoomEvent};
use crate::room::tasks::DeferredTask;
use crate::room::Room;

const BASIC_ATTACK_TYPE: &str = "basic";

#[derive(Debug, Clone, Copy)]
pub(super) struct Engagement<'a> {
    pub target_id: &'a PlayerId,
    pub target_position: Vec3,
    pub distance: f32,
}

fn cooldown_key(source: ChargeSource) -> CooldownKey {
    match source {
        ChargeSource::DefaultAttack => CooldownKey::DefaultAttack,
        ChargeSource::Ability(slot) => CooldownKey::Ability { slot, variant: 0 },
    }
}

fn slot_key(slot: usize) -> CooldownKey {
    CooldownKey::Ability { slot, variant: 0 }
}

impl Room {
    fn is_ready(&self, enemy_id: EnemyId, key: CooldownKey, cooldown_ms: u64, now: u64) -> bool {
        self.enemies
            .get(&enemy_id)
            .is_some_and(|enemy| enemy.runtime.is_ready(key, cooldown_ms, now))
    }

    fn enemy_position(&self, enemy_id: EnemyId) -> Option<Vec3> {
        self.enemies.get(&enemy_id).map(|enemy| enemy.position)
    }

    fn live_players_within(&self, center: Vec3, radius: f32) -> Vec<(PlayerId, Vec3)> {
        self.players
            .values()
            .filter(|player| !player.is_downed())
            .filter(|player| planar_distance(center, player.position) <= radius)
            .map(|player| (player.id.clone(), player.position))
            .collect()
    }

    pub(super) fn try_ability(
        &mut self,
        enemy_id: EnemyId,
        slot: usize,
        ability: &AbilitySpec,
        engagement: Engagement<'_>,
        now: u64,
    ) -> bool {
        match ability {
            AbilitySpec::Charge(spec) => {
                if !self.is_ready(enemy_id, slot_key(slot), spec.cooldown_ms, now)
                    || engagement.distance > spec.range
                {
                    return false;
                }
                self.begin_charge(enemy_id, ChargeSource::Ability(slot), spec, engagement, now);
                true
            }
            AbilitySpec::Burst { variants, .. } => {
                self.try_burst(enemy_id, slot, variants, engagement, now)
            }
            AbilitySpec::ShadowStep(spec) => {
                if !self.is_ready(enemy_id, slot_key(slot), spec.cooldown_ms, now) {
                    return false;
                }
                self.begin_shadow_step(enemy_id, slot, spec, engagement, now)
            }
            AbilitySpec::Pulse(spec) => {
                if !self.is_ready(enemy_id, slot_key(slot), spec.cooldown_ms, now) {
                    return false;
                }
                let Some(position) = self.enemy_position(enemy_id) else {
                    return false;
                };
                let in_reach = self.players.values().any(|player| {
                    player.is_targetable()
                        && planar_distance(position, player.position) <= spec.radius
                });
                if !in_reach {
                    return false;
                }
                self.fire_pulse(enemy_id, slot, spec, now);
                true
            }
            AbilitySpec::Blink(spec) => {
                if !self.is_ready(enemy_id, slot_key(slot), spec.cooldown_ms, now) {
                    return false;
                }
                if engagement.distance >= spec.min_distance
                    && engagement.distance <= spec.max_distance
                {
                    return false;
                }
                self.begin_blink(enemy_id, slot, spec, engagement, now)
            }
        }
    }

    pub(super) fn try_default_attack(
        &mut self,
        enemy_id: EnemyId,
        descriptor: &ArchetypeDescriptor,
        engagement: Engagement<'_>,
        now: u64,
    ) -> bool {
        match &descriptor.attack {
            AttackSpec::Simple {
                cooldown_ms,
                windup_ms,
                ..
            } => {
                if !self.is_ready(enemy_id, CooldownKey::DefaultAttack, *cooldown_ms, now) {
                    return false;
                }
                let Some(enemy) = self.enemies.get_mut(&enemy_id) else {
                    return false;
                };
                enemy.runtime.stamp(CooldownKey::DefaultAttack, now);
                enemy.runtime.is_attacking = true;
                enemy.runtime.busy_until = now.saturating_add(*windup_ms);
                let start_position = enemy.position;
                self.events.push(RoomEvent::EnemyAttackStart {
                    enemy_id,
                    attack_type: BASIC_ATTACK_TYPE.to_string(),
                    start_position: start_position.into(),
                    target_position: engagement.target_position.into(),
                });
                self.tasks.schedule(
                    now.saturating_add(*windup_ms),
                    DeferredTask::AttackImpact {
                        enemy_id,
                        target_id: engagement.target_id.clone(),
                    },
                );
                true
            }
            AttackSpec::Charge(spec) => {
                if !self.is_ready(enemy_id, CooldownKey::DefaultAttack, spec.cooldown_ms, now) {
                    return false;
                }
                self.begin_charge(enemy_id, ChargeSource::DefaultAttack, spec, engagement, now);
                true
            }
        }
    }

    pub(crate) fn resolve_attack_impact(
        &mut self,
        enemy_id: EnemyId,
        target_id: &PlayerId,
        now: u64,
    ) {
        let archetypes = Arc::clone(&self.archetypes);
        let Some(enemy) = self.enemies.get_mut(&enemy_id) else {
            return;
        };
        enemy.runtime.is_attacking = false;
        let position = enemy.position;
        let Some(descriptor) = archetypes.descriptor(enemy.archetype) else {
            return;
        };
        let Some(target) = self.players.get(target_id) else {
            return;
        };
        if planar_distance(position, target.position) > descriptor.attack_range {
            debug!(room = %self.id, enemy = %enemy_id, target = %target_id, at_ms = now, "attack_missed_out_of_range");
            return;
        }
        self.damage_player(target_id, descriptor.attack.damage());
    }

    fn begin_charge(
        &mut self,
        enemy_id: EnemyId,
        source: ChargeSource,
        spec: &ChargeSpec,
        engagement: Engagement<'_>,
        now: u64,
    ) {
        let Some(enemy) = self.enemies.get_mut(&enemy_id) else {
            return;
        };
        let origin = enemy.position;
        let commit_point = engagement.target_position;
        enemy.runtime.stamp(cooldown_key(source), now);
        enemy.runtime.is_moving = false;
        enemy.runtime.charge = Some(ChargeRecord {
            source,
            phase: ChargePhase::Charging,
            started_at: now,
            origin,
            commit_point,
            target_id: engagement.target_id.clone(),
        });
        let direction = planar_direction(origin, commit_point);
        if direction != Vec3::ZERO {
            enemy.rotation = yaw_from_direction(direction);
        }
        self.events.push(RoomEvent::EnemyCharging {
            enemy_id,
            start_position: origin.into(),
            target_position: commit_point.into(),
            charge_duration: spec.charge_ms,
            attack_range: spec.range,
        });
        self.tasks.schedule(
            now.saturating_add(spec.charge_ms),
            DeferredTask::ChargeRelease { enemy_id },
        );
    }

    fn charge_spec_for(&self, enemy_id: EnemyId) -> Option<(ChargeRecord, ChargeSpec)> {
        let enemy = self.enemies.get(&enemy_id)?;
        let record = enemy.runtime.charge.clone()?;
        let spec = self
            .archetypes
            .descriptor(enemy.archetype)?
            .charge_spec(record.source)?
            .clone();
        Some((record, spec))
    }

    pub(crate) fn release_charge(&mut self, enemy_id: EnemyId, now: u64) {
        let Some((record, spec)) = self.charge_spec_for(enemy_id) else {
            return;
        };
        if record.phase != ChargePhase::Charging {
            return;
        }
        let Some(enemy) = self.enemies.get_mut(&enemy_id) else {
            return;
        };
        if let Some(charge) = enemy.runtime.charge.as_mut() {
            charge.phase = ChargePhase::Releasing;
        }
        enemy.runtime.is_attacking = true;
        let start_position = enemy.position;
        self.events.push(RoomEvent::EnemyAttackStart {
            enemy_id,
            attack_type: spec.name.clone(),
            start_position: start_position.into(),
            target_position: record.commit_point.into(),
        });
        self.tasks.schedule(
            now.saturating_add(spec.impact_delay_ms),
            DeferredTask::ChargeImpact { enemy_id },
        );
    }

    /// Hit check against where players stand now, not where they stood at the telegraph.
    pub(crate) fn resolve_charge_impact(&mut self, enemy_id: EnemyId, now: u64) {
        let Some((record, spec)) = self.charge_spec_for(enemy_id) else {
            return;
        };
        if record.phase != ChargePhase::Releasing {
            return;
        }
        let Some(position) = self.enemy_position(enemy_id) else {
            return;
        };

        let victims = match spec.shape {
            ChargeShape::Cone { degrees } => {
                let half_angle = degrees.to_radians() * 0.5;
                let attack_direction = planar_direction(record.origin, record.commit_point);
                self.live_players_within(position, spec.range)
                    .into_iter()
                    .filter(|(_, player_position)| {
                        attack_direction == Vec3::ZERO
                            || planar_angle_between(attack_direction, *player_position - position)
                                <= half_angle
                    })
                    .map(|(player_id, _)| player_id)
                    .collect::<Vec<_>>()
            }
            ChargeShape::Single => self
                .players
                .get(&record.target_id)
                .filter(|player| !player.is_downed())
                .filter(|player| planar_distance(position, player.position) <= spec.range)
                .map(|player| vec![player.id.clone()])
                .unwrap_or_default(),
        };
        for victim in &victims {
            self.damage_player(victim, spec.damage);
        }
        debug!(
            room = %self.id,
            enemy = %enemy_id,
            ability = %spec.name,
            hits = victims.len(),
            "charge_resolved"
        );

        if let Some(enemy) = self.enemies.get_mut(&enemy_id) {
            enemy.runtime.is_attacking = false;
            if let Some(charge) = enemy.runtime.charge.as_mut() {
                charge.phase = ChargePhase::Resolved;
            }
        }
        self.tasks.schedule(
            now.saturating_add(spec.recover_ms),
            DeferredTask::ChargeRecover { enemy_id },
        );
    }

    pub(crate) fn recover_charge(&mut self, enemy_id: EnemyId) {
        let Some(enemy) = self.enemies.get_mut(&enemy_id) else {
            return;
        };
        if enemy
            .runtime
            .charge
            .as_ref()
            .is_some_and(|charge| charge.phase == ChargePhase::Resolved)
        {
            enemy.runtime.charge = None;
        }
    }

    fn try_burst(
        &mut self,
        enemy_id: EnemyId,
        slot: usize,
        variants: &[BurstVariant],
        engagement: Engagement<'_>,
        now: u64,
    ) -> bool {
        let ready = variants
            .iter()
            .enumerate()
            .filter(|(idx, variant)| {
                engagement.distance <= variant.range
                    && self.is_ready(
                        enemy_id,
                        CooldownKey::Ability { slot, variant: *idx },
                        variant.cooldown_ms,
                        now,
                    )
            })
            .map(|(idx, _)| idx)
            .collect::<Vec<_>>();
        let chosen = match ready.len() {
            0 => return false,
            1 => ready[0],
            n => ready[self.rng.gen_range(0..n)],
        };
        let variant = &variants[chosen];

        let Some(enemy) = self.enemies.get_mut(&enemy_id) else {
            return false;
        };
        enemy.runtime.stamp(
            CooldownKey::Ability {
                slot,
                variant: chosen,
            },
            now,
        );
        enemy.runtime.busy_until = now.saturating_add(variant.delay_ms);
        enemy.runtime.is_moving = false;
        let direction = planar_direction(enemy.position, engagement.target_position);
        if direction != Vec3::ZERO {
            enemy.rotation = yaw_from_direction(direction);
        }
        self.events.push(RoomEvent::EnemyBurstCast {
            enemy_id,
            variant: variant.name.clone(),
            target_position: engagement.target_position.into(),
            radius: variant.radius,
            delay: variant.delay_ms,
        });
        self.tasks.schedule(
            now.saturating_add(variant.delay_ms),
            DeferredTask::BurstImpact {
                enemy_id,
                slot,
                variant: chosen,
                target_id: engagement.target_id.clone(),
                point: engagement.target_position,
            },
        );
        true
    }

    pub(crate) fn resolve_burst_impact(
        &mut self,
        enemy_id: EnemyId,
        slot: usize,
        variant_idx: usize,
        target_id: &PlayerId,
        point: Vec3,
        _now: u64,
    ) {
        let archetypes = Arc::clone(&self.archetypes);
        let Some(enemy) = self.enemies.get(&enemy_id) else {
            return;
        };
        let variant = match archetypes
            .descriptor(enemy.archetype)
            .and_then(|descriptor| descriptor.abilities.get(slot))
        {
            Some(AbilitySpec::Burst { variants, .. }) => match variants.get(variant_idx) {
                Some(variant) => variant,
                None => return,
            },
            _ => return,
        };

        let victims = if variant.area {
            self.live_players_within(point, variant.radius)
                .into_iter()
                .map(|(player_id, _)| player_id)
                .collect::<Vec<_>>()
        } else {
            self.players
                .get(target_id)
                .filter(|player| !player.is_downed())
                .filter(|player| planar_distance(point, player.position) <= variant.radius)
                .map(|player| vec![player.id.clone()])
                .unwrap_or_default()
        };
        let mut hits = Vec::with_capacity(victims.len());
        for victim in victims {
            if self.damage_player(&victim, variant.damage).is_some() {
                hits.push(AbilityHit {
                    player_id: victim,
                    damage: variant.damage,
                });
            }
        }
        self.events.push(RoomEvent::EnemyBurstImpact {
            enemy_id,
            variant: variant.name.clone(),
            position: point.into(),
            radius: variant.radius,
            hits,
        });
    }

    fn begin_shadow_step(
        &mut self,
        enemy_id: EnemyId,
        slot: usize,
        spec: &ShadowStepSpec,
        engagement: Engagement<'_>,
        now: u64,
    ) -> bool {
        let Some(target_rotation) = self
            .players
            .get(engagement.target_id)
            .map(|player| player.rotation)
        else {
            return false;
        };
        let Some(enemy) = self.enemies.get_mut(&enemy_id) else {
            return false;
        };
        let from = enemy.position;
        let behind =
            engagement.target_position - forward_from_yaw(target_rotation) * spec.behind_distance;
        let to = Vec3::new(behind.x, from.y, behind.z);
        enemy.position = to;
        let direction = planar_direction(to, engagement.target_position);
        if direction != Vec3::ZERO {
            enemy.rotation = yaw_from_direction(direction);
        }
        enemy.runtime.stamp(slot_key(slot), now);
        enemy.runtime.busy_until = now.saturating_add(spec.emerge_delay_ms);
        enemy.runtime.is_moving = false;
        self.events.push(RoomEvent::EnemyTeleport {
            enemy_id,
            from_position: from.into(),
            to_position: to.into(),
            target_id: engagement.target_id.clone(),
        });
        self.tasks.schedule(
            now.saturating_add(spec.emerge_delay_ms),
            DeferredTask::TeleportStrike {
                enemy_id,
                slot,
                target_id: engagement.target_id.clone(),
            },
        );
        true
    }

    pub(crate) fn resolve_teleport_strike(
        &mut self,
        enemy_id: EnemyId,
        slot: usize,
        target_id: &PlayerId,
        _now: u64,
    ) {
        let archetypes = Arc::clone(&self.archetypes);
        let Some(enemy) = self.enemies.get(&enemy_id) else {
            return;
        };
        let position = enemy.position;
        let Some(descriptor) = archetypes.descriptor(enemy.archetype) else {
            return;
        };
        let Some(AbilitySpec::ShadowStep(spec)) = descriptor.abilities.get(slot) else {
            return;
        };
        let damage = descriptor.attack.damage() * spec.damage_multiplier;
        let reach = descriptor.attack_range * spec.range_tolerance;
        let in_reach = self
            .players
            .get(target_id)
            .is_some_and(|player| planar_distance(position, player.position) <= reach);
        let hit = in_reach && self.damage_player(target_id, damage).is_some();
        self.events.push(RoomEvent::EnemyTeleportStrike {
            enemy_id,
            target_id: target_id.clone(),
            damage: if hit { damage } else { 0.0 },
            hit,
        });
    }

    fn fire_pulse(&mut self, enemy_id: EnemyId, slot: usize, spec: &PulseSpec, now: u64) {
        let Some(enemy) = self.enemies.get_mut(&enemy_id) else {
            return;
        };
        enemy.runtime.stamp(slot_key(slot), now);
        enemy.runtime.is_moving = false;
        let center = enemy.position;
        let fallback_direction = forward_from_yaw(enemy.rotation);
        self.events.push(RoomEvent::EnemyPulseCast {
            enemy_id,
            ability: spec.name.clone(),
            position: center.into(),
            radius: spec.radius,
        });

        let mut hits = Vec::new();
        for (player_id, player_position) in self.live_players_within(center, spec.radius) {
            if self.damage_player(&player_id, spec.damage).is_none() {
                continue;
            }
            let mut direction = planar_direction(center, player_position);
            if direction == Vec3::ZERO {
                direction = fallback_direction;
            }
            let knocked = player_position + direction * spec.knockback;
            if let Some(player) = self.players.get_mut(&player_id) {
                player.position = knocked;
            }
            hits.push(PulseHit {
                player_id,
                damage: spec.damage,
                knockback_position: knocked.into(),
            });
        }
        self.events.push(RoomEvent::EnemyPulseImpact {
            enemy_id,
            ability: spec.name.clone(),
            position: center.into(),
            radius: spec.radius,
            hits,
        });
    }

    fn begin_blink(
        &mut self,
        enemy_id: EnemyId,
        slot: usize,
        spec: &BlinkSpec,
        engagement: Engagement<'_>,
        now: u64,
    ) -> bool {
        let Some(enemy) = self.enemies.get_mut(&enemy_id) else {
            return false;
        };
        let from = enemy.position;
        let mut away = planar_direction(engagement.target_position, from);
        if away == Vec3::ZERO {
            away = -forward_from_yaw(enemy.rotation);
        }
        let desired = engagement.target_position + away * spec.preferred_range;
        let displacement = Vec3::new(desired.x - from.x, 0.0, desired.z - from.z)
            .clamp_length_max(spec.max_displacement);
        if displacement == Vec3::ZERO {
            return false;
        }
        let destination = from + displacement;

        enemy.runtime.stamp(slot_key(slot), now);
        enemy.runtime.busy_until = now.saturating_add(spec.windup_ms);
        enemy.runtime.is_moving = false;
        self.events.push(RoomEvent::EnemyBlinkCast {
            enemy_id,
            from_position: from.into(),
            to_position: destination.into(),
            windup: spec.windup_ms,
        });
        self.tasks.schedule(
            now.saturating_add(spec.windup_ms),
            DeferredTask::BlinkLand {
                enemy_id,
                destination,
            },
        );
        true
    }

    pub(crate) fn land_blink(&mut self, enemy_id: EnemyId, destination: Vec3) {
        let Some(enemy) = self.enemies.get_mut(&enemy_id) else {
            return;
        };
        enemy.position = destination;
        self.events.push(RoomEvent::EnemyBlinkImpact {
            enemy_id,
            position: destination.into(),
        });
    }
}
