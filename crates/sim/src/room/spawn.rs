use rand::Rng;

use crate::content::{ArchetypeId, ArchetypeTable, SpawnPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnSkipReason {
    Stopped,
    BelowMinLevel,
    GlobalCap,
    InstanceCap,
}

impl SpawnSkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::BelowMinLevel => "below_min_level",
            Self::GlobalCap => "global_cap",
            Self::InstanceCap => "instance_cap",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnDecision {
    Skip(SpawnSkipReason),
    Spawn(u32),
}

#[derive(Debug, Clone, Copy)]
pub struct SpawnGate {
    pub started: bool,
    pub level: u8,
    pub living_total: u32,
    pub living_of_archetype: u32,
    pub global_cap: u32,
}

pub fn plan_spawn<R: Rng>(policy: &SpawnPolicy, gate: SpawnGate, rng: &mut R) -> SpawnDecision {
    if !gate.started {
        return SpawnDecision::Skip(SpawnSkipReason::Stopped);
    }
    if gate.level < policy.min_level {
        return SpawnDecision::Skip(SpawnSkipReason::BelowMinLevel);
    }
    if gate.living_total >= gate.global_cap {
        return SpawnDecision::Skip(SpawnSkipReason::GlobalCap);
    }
    let instance_room = match policy.instance_cap {
        Some(cap) if gate.living_of_archetype >= cap => {
            return SpawnDecision::Skip(SpawnSkipReason::InstanceCap);
        }
        Some(cap) => cap - gate.living_of_archetype,
        None => u32::MAX,
    };

    let burst_min = policy.burst_min.max(1);
    let burst_max = policy.burst_max.max(burst_min);
    let wanted = rng.gen_range(burst_min..=burst_max);
    let count = wanted
        .min(gate.global_cap - gate.living_total)
        .min(instance_room);
    SpawnDecision::Spawn(count)
}

/// One independent periodic timer per archetype. A skipped firing simply waits for the
/// next period; late firings do not catch up.
#[derive(Debug, Default)]
pub struct SpawnScheduler {
    next_fire_at: Vec<Option<u64>>,
    periods: Vec<u64>,
}

impl SpawnScheduler {
    pub fn start(&mut self, archetypes: &ArchetypeTable, now: u64) {
        self.periods = archetypes
            .descriptors()
            .iter()
            .map(|descriptor| descriptor.spawn.period_ms.max(1))
            .collect();
        self.next_fire_at = self
            .periods
            .iter()
            .map(|period| Some(now.saturating_add(*period)))
            .collect();
    }

    pub fn stop(&mut self) {
        self.next_fire_at.clear();
        self.periods.clear();
    }

    pub fn is_running(&self) -> bool {
        !self.next_fire_at.is_empty()
    }

    pub fn take_due(&mut self, now: u64) -> Vec<ArchetypeId> {
        let mut due = Vec::new();
        for (idx, slot) in self.next_fire_at.iter_mut().enumerate() {
            let Some(fire_at) = *slot else {
                continue;
            };
            if fire_at <= now {
                due.push(ArchetypeId(idx as u32));
                *slot = Some(now.saturating_add(self.periods[idx]));
            }
        }
        due
    }

    pub fn next_fire_at(&self, archetype: ArchetypeId) -> Option<u64> {
        self.next_fire_at
            .get(archetype.0 as usize)
            .copied()
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::content::builtin_archetype_table;

    fn policy(min_level: u8, instance_cap: Option<u32>, burst: (u32, u32)) -> SpawnPolicy {
        SpawnPolicy {
            period_ms: 1000,
            min_level,
            instance_cap,
            burst_min: burst.0,
            burst_max: burst.1,
            initial: 0,
        }
    }

    fn gate(level: u8, living_total: u32, living_of_archetype: u32) -> SpawnGate {
        SpawnGate {
            started: true,
            level,
            living_total,
            living_of_archetype,
            global_cap: 24,
        }
    }

    #[test]
    fn skips_in_gate_order() {
        let mut rng = StdRng::seed_from_u64(1);
        let p = policy(3, Some(1), (1, 1));

        let stopped = SpawnGate {
            started: false,
            ..gate(5, 0, 0)
        };
        assert_eq!(
            plan_spawn(&p, stopped, &mut rng),
            SpawnDecision::Skip(SpawnSkipReason::Stopped)
        );
        assert_eq!(
            plan_spawn(&p, gate(2, 0, 0), &mut rng),
            SpawnDecision::Skip(SpawnSkipReason::BelowMinLevel)
        );
        assert_eq!(
            plan_spawn(&p, gate(3, 24, 0), &mut rng),
            SpawnDecision::Skip(SpawnSkipReason::GlobalCap)
        );
        assert_eq!(
            plan_spawn(&p, gate(3, 5, 1), &mut rng),
            SpawnDecision::Skip(SpawnSkipReason::InstanceCap)
        );
        assert_eq!(plan_spawn(&p, gate(3, 5, 0), &mut rng), SpawnDecision::Spawn(1));
    }

    #[test]
    fn burst_is_bounded_by_remaining_capacity() {
        let mut rng = StdRng::seed_from_u64(7);
        let p = policy(1, None, (3, 3));
        assert_eq!(plan_spawn(&p, gate(1, 22, 0), &mut rng), SpawnDecision::Spawn(2));

        let capped = policy(1, Some(4), (3, 3));
        assert_eq!(
            plan_spawn(&capped, gate(1, 0, 3), &mut rng),
            SpawnDecision::Spawn(1)
        );
    }

    #[test]
    fn burst_stays_within_declared_range() {
        let mut rng = StdRng::seed_from_u64(42);
        let p = policy(1, None, (1, 3));
        for _ in 0..200 {
            match plan_spawn(&p, gate(1, 0, 0), &mut rng) {
                SpawnDecision::Spawn(count) => assert!((1..=3).contains(&count)),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn timers_fire_per_archetype_and_rearm_without_catch_up() {
        let table = builtin_archetype_table().expect("table");
        let mut scheduler = SpawnScheduler::default();
        scheduler.start(&table, 0);
        assert!(scheduler.is_running());

        // skeleton every 6000 ms, cultist every 9000 ms
        assert!(scheduler.take_due(5999).is_empty());
        assert_eq!(scheduler.take_due(6000), vec![ArchetypeId(0)]);
        assert_eq!(scheduler.next_fire_at(ArchetypeId(0)), Some(12000));

        // A late poll fires once and re-arms from the poll time.
        let due = scheduler.take_due(30000);
        assert!(due.contains(&ArchetypeId(0)));
        assert!(due.contains(&ArchetypeId(1)));
        assert_eq!(scheduler.next_fire_at(ArchetypeId(0)), Some(36000));
        assert!(scheduler.take_due(30001).is_empty());
    }

    #[test]
    fn stop_disarms_every_timer() {
        let table = builtin_archetype_table().expect("table");
        let mut scheduler = SpawnScheduler::default();
        scheduler.start(&table, 0);
        scheduler.stop();
        assert!(!scheduler.is_running());
        assert!(scheduler.take_due(u64::MAX).is_empty());
    }
}
