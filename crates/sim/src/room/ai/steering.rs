use std::f32::consts::TAU;

use glam::Vec3;
use rand::Rng;

use crate::content::ArchetypeDescriptor;
use crate::math::{flatten, planar_direction, planar_distance, yaw_from_direction};
use crate::room::entities::{EnemyId, WanderState};
use crate::room::Room;

const MIN_SEPARATION_DISTANCE: f32 = 0.1;
const SLOW_FACTOR: f32 = 0.5;
const ARRIVE_EPSILON: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SeparationParams {
    pub radius: f32,
    pub force: f32,
    pub cap: f32,
}

pub(crate) fn separation<I>(position: Vec3, self_id: EnemyId, others: I, params: SeparationParams) -> Vec3
where
    I: IntoIterator<Item = (EnemyId, Vec3)>,
{
    let mut sum = Vec3::ZERO;
    for (other_id, other_position) in others {
        if other_id == self_id {
            continue;
        }
        let away = flatten(position - other_position);
        let distance = away.length();
        if distance >= params.radius {
            continue;
        }
        // Stacked enemies split along an id-derived axis so they do not stay merged.
        let direction = if distance > 1e-4 {
            away / distance
        } else {
            let angle = (self_id.0 as f32 * 2.399_963).rem_euclid(TAU);
            Vec3::new(angle.sin(), 0.0, angle.cos())
        };
        sum += direction * (params.force / distance.max(MIN_SEPARATION_DISTANCE));
    }
    sum.normalize_or_zero().clamp_length_max(params.cap)
}

pub(crate) fn steer_direction(position: Vec3, goal: Vec3, separation: Vec3) -> Vec3 {
    flatten(planar_direction(position, goal) + separation).normalize_or_zero()
}

pub(crate) fn step_length(speed: f32, elapsed_seconds: f32, slowed: bool) -> f32 {
    let factor = if slowed { SLOW_FACTOR } else { 1.0 };
    speed * elapsed_seconds * factor
}

impl Room {
    pub(super) fn steer_toward(
        &mut self,
        enemy_id: EnemyId,
        goal: Vec3,
        speed: f32,
        elapsed_seconds: f32,
        slowed: bool,
    ) -> bool {
        let Some(position) = self.enemies.get(&enemy_id).map(|enemy| enemy.position) else {
            return false;
        };
        let params = SeparationParams {
            radius: self.config.separation_radius,
            force: self.config.separation_force,
            cap: self.config.separation_cap,
        };
        let push = separation(
            position,
            enemy_id,
            self.enemies
                .values()
                .filter(|other| other.is_active())
                .map(|other| (other.id, other.position)),
            params,
        );

        let remaining = planar_distance(position, goal);
        let step = step_length(speed, elapsed_seconds, slowed);
        let Some(enemy) = self.enemies.get_mut(&enemy_id) else {
            return false;
        };
        if remaining <= step.max(ARRIVE_EPSILON) && push == Vec3::ZERO {
            enemy.position = Vec3::new(goal.x, enemy.position.y, goal.z);
            enemy.runtime.is_moving = remaining > 0.0;
            return true;
        }
        let direction = steer_direction(position, goal, push);
        if direction == Vec3::ZERO {
            return false;
        }
        enemy.position += direction * step.min(remaining.max(ARRIVE_EPSILON));
        enemy.rotation = yaw_from_direction(direction);
        enemy.runtime.is_moving = true;
        false
    }

    pub(super) fn face(&mut self, enemy_id: EnemyId, point: Vec3) {
        let Some(enemy) = self.enemies.get_mut(&enemy_id) else {
            return;
        };
        let direction = planar_direction(enemy.position, point);
        if direction != Vec3::ZERO {
            enemy.rotation = yaw_from_direction(direction);
        }
    }

    pub(super) fn wander(
        &mut self,
        enemy_id: EnemyId,
        descriptor: &ArchetypeDescriptor,
        now: u64,
        elapsed_seconds: f32,
        slowed: bool,
    ) {
        let Some(enemy) = self.enemies.get(&enemy_id) else {
            return;
        };
        let expired = match enemy.runtime.wander {
            Some(state) => now.saturating_sub(state.picked_at) >= self.config.wander_timebox_ms,
            None => true,
        };
        let origin = enemy.position;
        if expired {
            let angle = self.rng.gen_range(0.0..TAU);
            let radius = self.rng.gen_range(0.0..=descriptor.wander_radius.max(0.0));
            let point = origin + Vec3::new(angle.sin() * radius, 0.0, angle.cos() * radius);
            if let Some(enemy) = self.enemies.get_mut(&enemy_id) {
                enemy.runtime.wander = Some(WanderState {
                    point,
                    picked_at: now,
                });
            }
        }

        let Some(point) = self
            .enemies
            .get(&enemy_id)
            .and_then(|enemy| enemy.runtime.wander)
            .map(|state| state.point)
        else {
            return;
        };
        if planar_distance(origin, point) <= ARRIVE_EPSILON {
            return;
        }
        self.steer_toward(
            enemy_id,
            point,
            descriptor.wander_speed,
            elapsed_seconds,
            slowed,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SeparationParams {
        SeparationParams {
            radius: 2.5,
            force: 1.5,
            cap: 1.0,
        }
    }

    #[test]
    fn separation_ignores_self_and_distant_neighbours() {
        let others = vec![
            (EnemyId(1), Vec3::ZERO),
            (EnemyId(2), Vec3::new(10.0, 0.0, 0.0)),
        ];
        assert_eq!(separation(Vec3::ZERO, EnemyId(1), others, params()), Vec3::ZERO);
    }

    #[test]
    fn separation_pushes_away_and_is_capped() {
        let others = vec![(EnemyId(2), Vec3::new(0.5, 0.0, 0.0))];
        let push = separation(Vec3::ZERO, EnemyId(1), others, params());
        assert!(push.x < 0.0);
        assert!((push.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn weak_separation_is_normalized_to_unit_push() {
        let others = vec![(EnemyId(2), Vec3::new(0.0, 0.0, 2.0))];
        let push = separation(Vec3::ZERO, EnemyId(1), others, params());
        assert!((push.length() - 1.0).abs() < 1e-5);
        assert!((push.z + 1.0).abs() < 1e-5);
    }

    #[test]
    fn separation_cap_below_one_shortens_the_push() {
        let tight = SeparationParams {
            cap: 0.4,
            ..params()
        };
        let others = vec![(EnemyId(2), Vec3::new(2.0, 0.0, 0.0))];
        let push = separation(Vec3::ZERO, EnemyId(1), others, tight);
        assert!((push.length() - 0.4).abs() < 1e-5);
    }

    #[test]
    fn stacked_enemies_still_separate() {
        let others = vec![(EnemyId(2), Vec3::ZERO)];
        let push = separation(Vec3::ZERO, EnemyId(1), others, params());
        assert!(push.length() > 0.0);
    }

    #[test]
    fn slow_halves_step() {
        assert_eq!(step_length(4.0, 0.05, false), 0.2);
        assert_eq!(step_length(4.0, 0.05, true), 0.1);
    }

    #[test]
    fn steer_direction_is_unit_and_planar() {
        let direction = steer_direction(Vec3::ZERO, Vec3::new(0.0, 5.0, 10.0), Vec3::ZERO);
        assert!((direction.length() - 1.0).abs() < 1e-5);
        assert_eq!(direction.y, 0.0);
        assert!(direction.z > 0.99);
    }
}
