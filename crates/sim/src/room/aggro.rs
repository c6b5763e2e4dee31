use std::collections::{BTreeMap, HashMap};

use glam::Vec3;

use super::entities::{EnemyId, PlayerId};
use crate::math::planar_distance;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggroWeights {
    pub damage: f32,
    pub proximity: f32,
    pub proximity_cutoff: f32,
}

impl Default for AggroWeights {
    fn default() -> Self {
        Self {
            damage: 2.0,
            proximity: 0.05,
            proximity_cutoff: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetCandidate {
    pub id: PlayerId,
    pub position: Vec3,
}

#[derive(Debug, Default)]
pub struct AggroTable {
    weights: AggroWeights,
    rows: HashMap<EnemyId, BTreeMap<PlayerId, f32>>,
}

impl AggroTable {
    pub fn new(weights: AggroWeights) -> Self {
        Self {
            weights,
            rows: HashMap::new(),
        }
    }

    pub fn add_damage(&mut self, enemy_id: EnemyId, player_id: &PlayerId, amount: f32) {
        if amount <= 0.0 {
            return;
        }
        *self.entry(enemy_id, player_id) += amount * self.weights.damage;
    }

    pub fn accrue_proximity(
        &mut self,
        enemy_id: EnemyId,
        enemy_position: Vec3,
        candidates: &[TargetCandidate],
    ) {
        for candidate in candidates {
            let distance = planar_distance(enemy_position, candidate.position);
            let bonus = ((self.weights.proximity_cutoff - distance) * self.weights.proximity).max(0.0);
            if bonus > 0.0 {
                *self.entry(enemy_id, &candidate.id) += bonus;
            }
        }
    }

    pub fn score(&self, enemy_id: EnemyId, player_id: &PlayerId) -> f32 {
        self.rows
            .get(&enemy_id)
            .and_then(|row| row.get(player_id))
            .copied()
            .unwrap_or(0.0)
    }

    /// Highest score wins, lowest id on ties. With no positive score the nearest candidate
    /// is chosen instead.
    pub fn select_target(
        &self,
        enemy_id: EnemyId,
        enemy_position: Vec3,
        candidates: &[TargetCandidate],
    ) -> Option<PlayerId> {
        let mut ordered = candidates.iter().collect::<Vec<_>>();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));

        let mut best: Option<(&TargetCandidate, f32)> = None;
        for candidate in ordered.iter().copied() {
            let score = self.score(enemy_id, &candidate.id);
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((candidate, score));
            }
        }
        if let Some((candidate, score)) = best {
            if score > 0.0 {
                return Some(candidate.id.clone());
            }
        }

        let mut nearest: Option<(&TargetCandidate, f32)> = None;
        for candidate in ordered.iter().copied() {
            let distance = planar_distance(enemy_position, candidate.position);
            if nearest.map_or(true, |(_, best_distance)| distance < best_distance) {
                nearest = Some((candidate, distance));
            }
        }
        nearest.map(|(candidate, _)| candidate.id.clone())
    }

    pub fn discard_enemy(&mut self, enemy_id: EnemyId) {
        self.rows.remove(&enemy_id);
    }

    pub fn forget_player(&mut self, player_id: &PlayerId) {
        for row in self.rows.values_mut() {
            row.remove(player_id);
        }
        self.rows.retain(|_, row| !row.is_empty());
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    pub fn has_row(&self, enemy_id: EnemyId) -> bool {
        self.rows.contains_key(&enemy_id)
    }

    fn entry(&mut self, enemy_id: EnemyId, player_id: &PlayerId) -> &mut f32 {
        self.rows
            .entry(enemy_id)
            .or_default()
            .entry(player_id.clone())
            .or_insert(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, x: f32, z: f32) -> TargetCandidate {
        TargetCandidate {
            id: PlayerId::new(id),
            position: Vec3::new(x, 0.0, z),
        }
    }

    #[test]
    fn damage_is_weighted_and_permanent() {
        let mut table = AggroTable::new(AggroWeights::default());
        table.add_damage(EnemyId(1), &PlayerId::new("a"), 50.0);
        assert_eq!(table.score(EnemyId(1), &PlayerId::new("a")), 100.0);
        table.add_damage(EnemyId(1), &PlayerId::new("a"), 0.0);
        assert_eq!(table.score(EnemyId(1), &PlayerId::new("a")), 100.0);
    }

    #[test]
    fn without_scores_nearest_candidate_is_selected() {
        let table = AggroTable::new(AggroWeights::default());
        let candidates = vec![candidate("a", 10.0, 0.0), candidate("b", 3.0, 0.0)];
        assert_eq!(
            table.select_target(EnemyId(1), Vec3::ZERO, &candidates),
            Some(PlayerId::new("b"))
        );
    }

    #[test]
    fn higher_score_wins_regardless_of_distance() {
        let mut table = AggroTable::new(AggroWeights::default());
        table.add_damage(EnemyId(1), &PlayerId::new("far"), 10.0);
        table.add_damage(EnemyId(1), &PlayerId::new("near"), 5.0);
        let candidates = vec![candidate("near", 1.0, 0.0), candidate("far", 50.0, 0.0)];
        assert_eq!(
            table.select_target(EnemyId(1), Vec3::ZERO, &candidates),
            Some(PlayerId::new("far"))
        );
    }

    #[test]
    fn equal_scores_resolve_to_lowest_id() {
        let mut table = AggroTable::new(AggroWeights::default());
        table.add_damage(EnemyId(1), &PlayerId::new("zed"), 10.0);
        table.add_damage(EnemyId(1), &PlayerId::new("amy"), 10.0);
        let candidates = vec![candidate("zed", 1.0, 0.0), candidate("amy", 9.0, 0.0)];
        assert_eq!(
            table.select_target(EnemyId(1), Vec3::ZERO, &candidates),
            Some(PlayerId::new("amy"))
        );
    }

    #[test]
    fn equidistant_fallback_resolves_to_lowest_id() {
        let table = AggroTable::new(AggroWeights::default());
        let candidates = vec![candidate("b", 0.0, 5.0), candidate("a", 5.0, 0.0)];
        assert_eq!(
            table.select_target(EnemyId(1), Vec3::ZERO, &candidates),
            Some(PlayerId::new("a"))
        );
    }

    #[test]
    fn sustained_proximity_overtakes_damage_aggro() {
        let mut table = AggroTable::new(AggroWeights::default());
        let enemy = EnemyId(1);
        table.add_damage(enemy, &PlayerId::new("a"), 50.0);
        // A sits outside the cutoff, B stands on the enemy: +1.0 per tick.
        let candidates = vec![candidate("a", 25.0, 0.0), candidate("b", 0.0, 0.0)];

        for _ in 0..100 {
            table.accrue_proximity(enemy, Vec3::ZERO, &candidates);
            assert_eq!(
                table.select_target(enemy, Vec3::ZERO, &candidates),
                Some(PlayerId::new("a"))
            );
        }
        table.accrue_proximity(enemy, Vec3::ZERO, &candidates);
        assert_eq!(
            table.select_target(enemy, Vec3::ZERO, &candidates),
            Some(PlayerId::new("b"))
        );
    }

    #[test]
    fn proximity_beyond_cutoff_adds_nothing() {
        let mut table = AggroTable::new(AggroWeights::default());
        table.accrue_proximity(EnemyId(1), Vec3::ZERO, &[candidate("a", 30.0, 0.0)]);
        assert!(!table.has_row(EnemyId(1)));
    }

    #[test]
    fn discard_and_forget_remove_rows() {
        let mut table = AggroTable::new(AggroWeights::default());
        table.add_damage(EnemyId(1), &PlayerId::new("a"), 5.0);
        table.add_damage(EnemyId(2), &PlayerId::new("a"), 5.0);
        table.add_damage(EnemyId(2), &PlayerId::new("b"), 5.0);

        table.discard_enemy(EnemyId(1));
        assert!(!table.has_row(EnemyId(1)));

        table.forget_player(&PlayerId::new("a"));
        assert_eq!(table.score(EnemyId(2), &PlayerId::new("a")), 0.0);
        assert_eq!(table.score(EnemyId(2), &PlayerId::new("b")), 10.0);
    }
}
