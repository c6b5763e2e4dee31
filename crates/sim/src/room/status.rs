use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::entities::EnemyId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusEffectKind {
    Stun,
    Freeze,
    Slow,
}

impl StatusEffectKind {
    pub const ALL: [StatusEffectKind; 3] = [Self::Stun, Self::Freeze, Self::Slow];
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveEffects {
    pub stunned: bool,
    pub frozen: bool,
    pub slowed: bool,
}

impl ActiveEffects {
    pub fn is_incapacitated(self) -> bool {
        self.stunned || self.frozen
    }
}

/// Expiry timestamps per enemy and effect. Nothing ticks these; reads compare against
/// `now` and clear what has lapsed.
#[derive(Debug, Default)]
pub struct StatusEffectStore {
    expiries: HashMap<EnemyId, HashMap<StatusEffectKind, u64>>,
}

impl StatusEffectStore {
    pub fn apply(&mut self, enemy_id: EnemyId, kind: StatusEffectKind, duration_ms: u64, now: u64) {
        self.expiries
            .entry(enemy_id)
            .or_default()
            .insert(kind, now.saturating_add(duration_ms));
    }

    pub fn is_affected(&mut self, enemy_id: EnemyId, kind: StatusEffectKind, now: u64) -> bool {
        let Some(effects) = self.expiries.get_mut(&enemy_id) else {
            return false;
        };
        let active = match effects.get(&kind) {
            Some(expires_at) if now < *expires_at => true,
            Some(_) => {
                effects.remove(&kind);
                false
            }
            None => false,
        };
        if effects.is_empty() {
            self.expiries.remove(&enemy_id);
        }
        active
    }

    pub fn active_effects(&mut self, enemy_id: EnemyId, now: u64) -> ActiveEffects {
        ActiveEffects {
            stunned: self.is_affected(enemy_id, StatusEffectKind::Stun, now),
            frozen: self.is_affected(enemy_id, StatusEffectKind::Freeze, now),
            slowed: self.is_affected(enemy_id, StatusEffectKind::Slow, now),
        }
    }

    pub fn effects_of(&mut self, enemy_id: EnemyId, now: u64) -> Vec<(StatusEffectKind, u64)> {
        let mut live = Vec::new();
        for kind in StatusEffectKind::ALL {
            if !self.is_affected(enemy_id, kind, now) {
                continue;
            }
            if let Some(expires_at) = self
                .expiries
                .get(&enemy_id)
                .and_then(|effects| effects.get(&kind))
            {
                live.push((kind, expires_at - now));
            }
        }
        live
    }

    pub fn discard_enemy(&mut self, enemy_id: EnemyId) {
        self.expiries.remove(&enemy_id);
    }

    pub fn clear(&mut self) {
        self.expiries.clear();
    }

    pub fn tracked_enemies(&self) -> usize {
        self.expiries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_is_active_until_expiry() {
        let mut store = StatusEffectStore::default();
        store.apply(EnemyId(1), StatusEffectKind::Stun, 1000, 500);

        assert!(store.is_affected(EnemyId(1), StatusEffectKind::Stun, 500));
        assert!(store.is_affected(EnemyId(1), StatusEffectKind::Stun, 1499));
        assert!(!store.is_affected(EnemyId(1), StatusEffectKind::Stun, 1500));
        assert!(!store.is_affected(EnemyId(1), StatusEffectKind::Freeze, 600));
    }

    #[test]
    fn expired_effects_are_cleared_on_read() {
        let mut store = StatusEffectStore::default();
        store.apply(EnemyId(1), StatusEffectKind::Slow, 100, 0);
        assert_eq!(store.tracked_enemies(), 1);

        assert!(!store.is_affected(EnemyId(1), StatusEffectKind::Slow, 200));
        assert_eq!(store.tracked_enemies(), 0);
    }

    #[test]
    fn refresh_overwrites_expiry() {
        let mut store = StatusEffectStore::default();
        store.apply(EnemyId(4), StatusEffectKind::Freeze, 5000, 0);
        store.apply(EnemyId(4), StatusEffectKind::Freeze, 100, 1000);
        assert!(!store.is_affected(EnemyId(4), StatusEffectKind::Freeze, 1100));
    }

    #[test]
    fn active_effects_and_remaining_times() {
        let mut store = StatusEffectStore::default();
        store.apply(EnemyId(2), StatusEffectKind::Stun, 300, 0);
        store.apply(EnemyId(2), StatusEffectKind::Slow, 2000, 0);

        let effects = store.active_effects(EnemyId(2), 100);
        assert!(effects.stunned);
        assert!(!effects.frozen);
        assert!(effects.slowed);
        assert!(effects.is_incapacitated());

        let remaining = store.effects_of(EnemyId(2), 1000);
        assert_eq!(remaining, vec![(StatusEffectKind::Slow, 1000)]);
    }

    #[test]
    fn discard_drops_every_effect_for_enemy() {
        let mut store = StatusEffectStore::default();
        store.apply(EnemyId(9), StatusEffectKind::Stun, 300, 0);
        store.discard_enemy(EnemyId(9));
        assert!(!store.is_affected(EnemyId(9), StatusEffectKind::Stun, 1));
    }
}
