mod abilities;
mod steering;

use std::sync::Arc;

use tracing::debug;

use self::abilities::Engagement;
use crate::math::planar_distance;
use crate::room::aggro::TargetCandidate;
use crate::room::entities::EnemyId;
use crate::room::Room;

impl Room {
    pub(super) fn run_ai_pass(&mut self, now: u64, elapsed_seconds: f32) {
        let candidates = self
            .players
            .values()
            .filter(|player| player.is_targetable())
            .map(|player| TargetCandidate {
                id: player.id.clone(),
                position: player.position,
            })
            .collect::<Vec<_>>();
        let stealthed_only = candidates.is_empty()
            && self
                .players
                .values()
                .any(|player| !player.is_downed() && player.stealthed);

        let enemy_ids = self.enemies.keys().copied().collect::<Vec<EnemyId>>();
        for enemy_id in enemy_ids {
            self.step_enemy(enemy_id, &candidates, stealthed_only, now, elapsed_seconds);
        }
    }

    fn step_enemy(
        &mut self,
        enemy_id: EnemyId,
        candidates: &[TargetCandidate],
        stealthed_only: bool,
        now: u64,
        elapsed_seconds: f32,
    ) {
        let archetypes = Arc::clone(&self.archetypes);
        let Some(enemy) = self.enemies.get(&enemy_id) else {
            return;
        };
        if enemy.is_dying {
            return;
        }
        let position = enemy.position;
        let Some(descriptor) = archetypes.descriptor(enemy.archetype) else {
            return;
        };

        let effects = self.status.active_effects(enemy_id, now);
        self.aggro.accrue_proximity(enemy_id, position, candidates);
        let target_id = self.aggro.select_target(enemy_id, position, candidates);
        if let Some(enemy) = self.enemies.get_mut(&enemy_id) {
            enemy.runtime.target_id = target_id.clone();
            enemy.runtime.is_moving = false;
        }

        // Cooldowns are wall-clock stamps, so they keep elapsing while incapacitated.
        if effects.is_incapacitated() {
            return;
        }
        if stealthed_only {
            self.wander(enemy_id, descriptor, now, elapsed_seconds, effects.slowed);
            return;
        }
        if let Some(enemy) = self.enemies.get_mut(&enemy_id) {
            enemy.runtime.wander = None;
        }

        let Some(target_id) = target_id else {
            return;
        };
        let Some(target_position) = candidates
            .iter()
            .find(|candidate| candidate.id == target_id)
            .map(|candidate| candidate.position)
        else {
            return;
        };
        if self
            .enemies
            .get(&enemy_id)
            .is_some_and(|enemy| enemy.runtime.is_busy(now))
        {
            return;
        }

        let engagement = Engagement {
            target_id: &target_id,
            target_position,
            distance: planar_distance(position, target_position),
        };
        for (slot, ability) in descriptor.abilities.iter().enumerate() {
            if self.try_ability(enemy_id, slot, ability, engagement, now) {
                debug!(
                    room = %self.id,
                    enemy = %enemy_id,
                    ability = ability.name(),
                    target = %target_id,
                    "enemy_ability_used"
                );
                return;
            }
        }

        if engagement.distance > descriptor.attack_range {
            self.steer_toward(
                enemy_id,
                target_position,
                descriptor.move_speed,
                elapsed_seconds,
                effects.slowed,
            );
        } else {
            self.face(enemy_id, target_position);
            self.try_default_attack(enemy_id, descriptor, engagement, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use glam::Vec3;

    use crate::room::test_support::*;
    use crate::room::{CooldownKey, PlayerId, RoomEvent, StatusEffectKind};

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    fn health_of(room: &crate::room::Room, id: &str) -> f32 {
        room.player(&PlayerId::new(id)).expect("player").health
    }

    fn count(events: &[RoomEvent], name: &str) -> usize {
        events.iter().filter(|event| event.type_name() == name).count()
    }

    #[test]
    fn enemy_steers_toward_its_target() {
        let mut room = started_room();
        let id = place_enemy(&mut room, "skeleton", Vec3::new(10.0, 0.0, 0.0));
        room.tick(50);

        let enemy = room.enemy(id).expect("enemy");
        assert!(approx(enemy.position.x, 10.0 - 3.2 * 0.05));
        assert!(approx(enemy.rotation, -FRAC_PI_2));
        assert!(enemy.runtime.is_moving);
        assert_eq!(enemy.runtime.target_id, Some(PlayerId::new("a")));
    }

    #[test]
    fn slowed_enemy_moves_half_as_far() {
        let mut room = started_room();
        let id = place_enemy(&mut room, "skeleton", Vec3::new(10.0, 0.0, 0.0));
        room.apply_status_effect(id, StatusEffectKind::Slow, 10_000, 0);
        room.tick(50);
        let enemy = room.enemy(id).expect("enemy");
        assert!(approx(enemy.position.x, 10.0 - 3.2 * 0.05 * 0.5));
    }

    #[test]
    fn stunned_enemy_still_targets_but_stays_put() {
        let mut room = started_room();
        let id = place_enemy(&mut room, "skeleton", Vec3::new(10.0, 0.0, 0.0));
        room.apply_status_effect(id, StatusEffectKind::Stun, 10_000, 0);
        room.drain_events();
        room.tick(50);

        let enemy = room.enemy(id).expect("enemy");
        assert_eq!(enemy.position, Vec3::new(10.0, 0.0, 0.0));
        assert!(!enemy.runtime.is_moving);
        assert_eq!(enemy.runtime.target_id, Some(PlayerId::new("a")));
    }

    #[test]
    fn stealthed_players_make_enemies_wander() {
        let mut room = started_room();
        player_mut(&mut room, "a").stealthed = true;
        let start = Vec3::new(1.0, 0.0, 0.0);
        let id = place_enemy(&mut room, "skeleton", start);
        room.drain_events();

        for step in 1..=40 {
            room.tick(step * 50);
        }
        let events = room.drain_events();
        assert_eq!(count(&events, "enemy-attack-start"), 0);
        let enemy = room.enemy(id).expect("enemy");
        assert_eq!(enemy.runtime.target_id, None);
        assert!(enemy.runtime.wander.is_some());
        assert!(enemy.position.distance(start) <= 6.0 * 2.0 + 1e-3);
        assert_eq!(health_of(&room, "a"), 100.0);
    }

    #[test]
    fn simple_attack_rechecks_range_at_impact() {
        let mut room = started_room();
        place_enemy(&mut room, "skeleton", Vec3::new(1.5, 0.0, 0.0));
        room.tick(50);
        let events = room.drain_events();
        assert!(events.iter().any(|event| matches!(
            event,
            RoomEvent::EnemyAttackStart { attack_type, .. } if attack_type == "basic"
        )));

        player_mut(&mut room, "a").position = Vec3::new(-10.0, 0.0, 0.0);
        room.tick(500);
        assert_eq!(health_of(&room, "a"), 100.0);
        assert_eq!(count(&room.drain_events(), "player-health-updated"), 0);
    }

    #[test]
    fn simple_attack_lands_once_when_target_stays() {
        let mut room = started_room();
        place_enemy(&mut room, "skeleton", Vec3::new(1.5, 0.0, 0.0));
        room.tick(50);
        room.tick(500);
        room.tick(550);
        assert_eq!(health_of(&room, "a"), 88.0);
        assert_eq!(count(&room.drain_events(), "player-health-updated"), 1);
    }

    fn brute_facing_player(room: &mut crate::room::Room) -> crate::room::EnemyId {
        let id = place_enemy(room, "brute", Vec3::new(0.0, 0.0, 3.0));
        enemy_mut(room, id)
            .runtime
            .stamp(CooldownKey::Ability { slot: 0, variant: 0 }, 0);
        room.drain_events();
        id
    }

    #[test]
    fn charge_telegraph_carries_commit_point_and_duration() {
        let mut room = started_room();
        let id = brute_facing_player(&mut room);
        room.tick(50);

        let telegraph = room
            .drain_events()
            .into_iter()
            .find_map(|event| match event {
                RoomEvent::EnemyCharging {
                    enemy_id,
                    start_position,
                    target_position,
                    charge_duration,
                    attack_range,
                } => Some((enemy_id, start_position, target_position, charge_duration, attack_range)),
                _ => None,
            })
            .expect("telegraph");
        assert_eq!(telegraph.0, id);
        assert_eq!(Vec3::from(telegraph.1), Vec3::new(0.0, 0.0, 3.0));
        assert_eq!(Vec3::from(telegraph.2), Vec3::ZERO);
        assert_eq!(telegraph.3, 900);
        assert_eq!(telegraph.4, 4.0);
        assert!(room.enemy(id).expect("brute").runtime.is_charging());
    }

    #[test]
    fn leaving_the_cone_dodges_the_charge() {
        let mut room = started_room();
        let id = brute_facing_player(&mut room);
        room.tick(50);
        // Still in range, but 90 degrees off the committed direction.
        player_mut(&mut room, "a").position = Vec3::new(3.0, 0.0, 3.0);

        room.tick(950);
        let events = room.drain_events();
        assert!(events.iter().any(|event| matches!(
            event,
            RoomEvent::EnemyAttackStart { attack_type, .. } if attack_type == "cleave"
        )));
        room.tick(1150);
        assert_eq!(health_of(&room, "a"), 100.0);

        room.tick(1550);
        assert!(!room.enemy(id).expect("brute").runtime.is_charging());
    }

    #[test]
    fn charge_hits_exactly_once_per_cycle() {
        let mut room = started_room();
        brute_facing_player(&mut room);
        room.tick(50);
        room.tick(950);
        room.tick(1150);
        room.tick(1550);
        room.tick(1600);

        assert_eq!(health_of(&room, "a"), 60.0);
        assert_eq!(count(&room.drain_events(), "player-health-updated"), 1);
    }

    #[test]
    fn dying_enemy_still_resolves_its_charge() {
        let mut room = started_room();
        let id = brute_facing_player(&mut room);
        room.tick(50);
        let result = room
            .damage_enemy(id, 1.0e6, &PlayerId::new("a"), 100)
            .expect("kill");
        assert!(result.was_killed);

        room.tick(950);
        room.tick(1150);
        // 100 + 1 from the kill, then the cleave.
        assert_eq!(health_of(&room, "a"), 61.0);
    }

    #[test]
    fn tasks_for_removed_enemies_are_ignored() {
        let mut room = started_room();
        brute_facing_player(&mut room);
        room.tick(50);
        room.stop_game(60);
        room.drain_events();

        room.tick(950);
        room.tick(1150);
        assert!(room.drain_events().is_empty());
        assert_eq!(room.pending_tasks(), 0);
    }

    #[test]
    fn ground_slam_damages_and_knocks_back() {
        let mut room = started_room();
        place_enemy(&mut room, "brute", Vec3::new(0.0, 0.0, 3.0));
        room.drain_events();
        room.tick(50);

        let events = room.drain_events();
        assert_eq!(count(&events, "enemy-pulse-cast"), 1);
        let hits = events
            .iter()
            .find_map(|event| match event {
                RoomEvent::EnemyPulseImpact { hits, .. } => Some(hits.clone()),
                _ => None,
            })
            .expect("impact");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].damage, 15.0);
        let knocked = Vec3::from(hits[0].knockback_position);
        assert!(approx(knocked.z, -5.0));

        let player = room.player(&PlayerId::new("a")).expect("a");
        assert_eq!(player.health, 85.0);
        assert!(approx(player.position.z, -5.0));
    }

    #[test]
    fn shadow_step_lands_behind_and_strikes() {
        let mut room = started_room();
        place_enemy(&mut room, "wraith", Vec3::new(0.0, 0.0, 10.0));
        room.drain_events();
        room.tick(50);

        let destination = room
            .drain_events()
            .into_iter()
            .find_map(|event| match event {
                RoomEvent::EnemyTeleport { to_position, .. } => Some(Vec3::from(to_position)),
                _ => None,
            })
            .expect("teleport");
        assert!(approx(destination.z, -1.6));

        room.tick(350);
        let strike = room
            .drain_events()
            .into_iter()
            .find_map(|event| match event {
                RoomEvent::EnemyTeleportStrike { hit, damage, .. } => Some((hit, damage)),
                _ => None,
            })
            .expect("strike");
        assert!(strike.0);
        assert!(approx(strike.1, 16.0 * 1.8));
        assert!(approx(health_of(&room, "a"), 100.0 - 16.0 * 1.8));
    }

    #[test]
    fn burst_telegraphs_then_hits_at_the_marked_point() {
        let mut room = started_room();
        let id = place_enemy(&mut room, "cultist", Vec3::new(0.0, 0.0, 12.0));
        enemy_mut(&mut room, id)
            .runtime
            .stamp(CooldownKey::Ability { slot: 0, variant: 0 }, 0);
        room.drain_events();

        room.tick(50);
        assert_eq!(count(&room.drain_events(), "enemy-burst-cast"), 1);

        room.tick(1000);
        let hits = room
            .drain_events()
            .into_iter()
            .find_map(|event| match event {
                RoomEvent::EnemyBurstImpact { hits, .. } => Some(hits),
                _ => None,
            })
            .expect("impact");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].player_id, PlayerId::new("a"));
        let health = health_of(&room, "a");
        assert!(health == 78.0 || health == 82.0, "health {health}");
    }

    fn cultist_lining_up_its_lance(room: &mut crate::room::Room) -> crate::room::EnemyId {
        let id = place_enemy(room, "cultist", Vec3::new(0.0, 0.0, 12.0));
        {
            let runtime = &mut enemy_mut(room, id).runtime;
            runtime.stamp(CooldownKey::DefaultAttack, 0);
            runtime.stamp(CooldownKey::Ability { slot: 1, variant: 0 }, 0);
            runtime.stamp(CooldownKey::Ability { slot: 1, variant: 1 }, 0);
            runtime.stamp(CooldownKey::Ability { slot: 2, variant: 0 }, 0);
        }
        room.drain_events();
        id
    }

    #[test]
    fn arcane_lance_hits_a_target_that_stays() {
        let mut room = started_room();
        let id = cultist_lining_up_its_lance(&mut room);
        room.tick(50);
        assert_eq!(count(&room.drain_events(), "enemy-charging"), 1);

        room.tick(1150);
        room.tick(1400);
        assert_eq!(health_of(&room, "a"), 72.0);
        room.tick(1800);
        room.tick(1850);

        assert_eq!(health_of(&room, "a"), 72.0);
        assert_eq!(count(&room.drain_events(), "player-health-updated"), 1);
        assert!(!room.enemy(id).expect("cultist").runtime.is_charging());
    }

    #[test]
    fn arcane_lance_misses_once_the_target_leaves_range() {
        let mut room = started_room();
        cultist_lining_up_its_lance(&mut room);
        room.tick(50);
        // 22 units from the caster, beyond the 16 unit lance.
        player_mut(&mut room, "a").position = Vec3::new(0.0, 0.0, -10.0);

        room.tick(1150);
        room.tick(1400);
        let events = room.drain_events();
        assert!(events.iter().any(|event| matches!(
            event,
            RoomEvent::EnemyAttackStart { attack_type, .. } if attack_type == "arcane-lance"
        )));
        assert_eq!(count(&events, "player-health-updated"), 0);
        assert_eq!(health_of(&room, "a"), 100.0);
    }

    #[test]
    fn blink_repositions_to_preferred_range() {
        let mut room = started_room();
        let id = place_enemy(&mut room, "cultist", Vec3::new(0.0, 0.0, 3.0));
        {
            let runtime = &mut enemy_mut(&mut room, id).runtime;
            runtime.stamp(CooldownKey::Ability { slot: 0, variant: 0 }, 0);
            runtime.stamp(CooldownKey::Ability { slot: 1, variant: 0 }, 0);
            runtime.stamp(CooldownKey::Ability { slot: 1, variant: 1 }, 0);
        }
        room.drain_events();

        room.tick(50);
        assert_eq!(count(&room.drain_events(), "enemy-blink-cast"), 1);
        room.tick(400);
        assert_eq!(count(&room.drain_events(), "enemy-blink-impact"), 1);
        let position = room.enemy(id).expect("cultist").position;
        assert!(approx(position.z, 10.0));
    }

    #[test]
    fn sustained_proximity_overtakes_damage_aggro() {
        let mut room = room_with(quiet_config());
        join(&mut room, "a", Vec3::new(30.0, 0.0, 0.0));
        join(&mut room, "b", Vec3::ZERO);
        room.start_game(&PlayerId::new("a"), 0);
        let id = place_enemy(&mut room, "skeleton", Vec3::ZERO);
        room.apply_status_effect(id, StatusEffectKind::Stun, 1_000_000, 0);
        room.damage_enemy(id, 50.0, &PlayerId::new("a"), 0)
            .expect("damage");

        // b gains 1.0 per tick standing on the enemy; a is past the cutoff.
        for step in 1..=100 {
            room.tick(step * 50);
        }
        let target = room.enemy(id).expect("enemy").runtime.target_id.clone();
        assert_eq!(target, Some(PlayerId::new("a")));

        room.tick(101 * 50);
        let target = room.enemy(id).expect("enemy").runtime.target_id.clone();
        assert_eq!(target, Some(PlayerId::new("b")));
    }

    #[test]
    fn dying_enemies_are_skipped() {
        let mut room = started_room();
        let id = place_enemy(&mut room, "skeleton", Vec3::new(10.0, 0.0, 0.0));
        room.damage_enemy(id, 1.0e6, &PlayerId::new("a"), 0)
            .expect("kill");
        room.tick(50);
        assert_eq!(
            room.enemy(id).expect("corpse").position,
            Vec3::new(10.0, 0.0, 0.0)
        );
    }
}
