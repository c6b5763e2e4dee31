use std::collections::BTreeMap;

use glam::Vec3;

use super::entities::{EnemyId, PlayerId};

/// One-shot follow-up to an action taken on an earlier tick. Every task names its enemy by
/// id and re-fetches it when it fires; a missing enemy makes the task a no-op.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredTask {
    AttackImpact {
        enemy_id: EnemyId,
        target_id: PlayerId,
    },
    ChargeRelease {
        enemy_id: EnemyId,
    },
    ChargeImpact {
        enemy_id: EnemyId,
    },
    ChargeRecover {
        enemy_id: EnemyId,
    },
    BurstImpact {
        enemy_id: EnemyId,
        slot: usize,
        variant: usize,
        target_id: PlayerId,
        point: Vec3,
    },
    TeleportStrike {
        enemy_id: EnemyId,
        slot: usize,
        target_id: PlayerId,
    },
    BlinkLand {
        enemy_id: EnemyId,
        destination: Vec3,
    },
    RemoveEnemy {
        enemy_id: EnemyId,
    },
}

impl DeferredTask {
    pub fn enemy_id(&self) -> EnemyId {
        match self {
            Self::AttackImpact { enemy_id, .. }
            | Self::ChargeRelease { enemy_id }
            | Self::ChargeImpact { enemy_id }
            | Self::ChargeRecover { enemy_id }
            | Self::BurstImpact { enemy_id, .. }
            | Self::TeleportStrike { enemy_id, .. }
            | Self::BlinkLand { enemy_id, .. }
            | Self::RemoveEnemy { enemy_id } => *enemy_id,
        }
    }
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    entries: BTreeMap<(u64, u64), DeferredTask>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn schedule(&mut self, fire_at: u64, task: DeferredTask) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        self.entries.insert((fire_at, seq), task);
    }

    pub fn pop_due(&mut self, now: u64) -> Option<(u64, DeferredTask)> {
        let (&(fire_at, _), _) = self.entries.first_key_value()?;
        if fire_at > now {
            return None;
        }
        self.entries
            .pop_first()
            .map(|((fire_at, _), task)| (fire_at, task))
    }

    pub fn next_fire_at(&self) -> Option<u64> {
        self.entries.keys().next().map(|(fire_at, _)| *fire_at)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
