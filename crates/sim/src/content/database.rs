use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(pub u32);

/// Level-scaled max health. Lookup takes the exact level, else the nearest lower tabulated
/// level, else `base`.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthTable {
    base: f32,
    by_level: BTreeMap<u8, f32>,
}

impl HealthTable {
    pub fn new(base: f32, by_level: BTreeMap<u8, f32>) -> Self {
        Self { base, by_level }
    }

    pub fn base(&self) -> f32 {
        self.base
    }

    pub fn max_health_for_level(&self, level: u8) -> f32 {
        self.by_level
            .range(..=level)
            .next_back()
            .map(|(_, health)| *health)
            .unwrap_or(self.base)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChargeShape {
    Cone { degrees: f32 },
    Single,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeSpec {
    pub name: String,
    pub shape: ChargeShape,
    pub damage: f32,
    pub range: f32,
    pub cooldown_ms: u64,
    pub charge_ms: u64,
    pub impact_delay_ms: u64,
    pub recover_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttackSpec {
    Simple {
        damage: f32,
        cooldown_ms: u64,
        windup_ms: u64,
    },
    Charge(ChargeSpec),
}

impl AttackSpec {
    pub fn damage(&self) -> f32 {
        match self {
            Self::Simple { damage, .. } => *damage,
            Self::Charge(spec) => spec.damage,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BurstVariant {
    pub name: String,
    pub area: bool,
    pub damage: f32,
    pub radius: f32,
    pub range: f32,
    pub cooldown_ms: u64,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShadowStepSpec {
    pub name: String,
    pub cooldown_ms: u64,
    pub behind_distance: f32,
    pub emerge_delay_ms: u64,
    pub damage_multiplier: f32,
    pub range_tolerance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PulseSpec {
    pub name: String,
    pub cooldown_ms: u64,
    pub radius: f32,
    pub damage: f32,
    pub knockback: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlinkSpec {
    pub name: String,
    pub cooldown_ms: u64,
    pub min_distance: f32,
    pub max_distance: f32,
    pub preferred_range: f32,
    pub max_displacement: f32,
    pub windup_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AbilitySpec {
    Charge(ChargeSpec),
    Burst {
        name: String,
        variants: Vec<BurstVariant>,
    },
    ShadowStep(ShadowStepSpec),
    Pulse(PulseSpec),
    Blink(BlinkSpec),
}

impl AbilitySpec {
    pub fn name(&self) -> &str {
        match self {
            Self::Charge(spec) => &spec.name,
            Self::Burst { name, .. } => name,
            Self::ShadowStep(spec) => &spec.name,
            Self::Pulse(spec) => &spec.name,
            Self::Blink(spec) => &spec.name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChargeSource {
    DefaultAttack,
    Ability(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpawnPolicy {
    pub period_ms: u64,
    pub min_level: u8,
    pub instance_cap: Option<u32>,
    pub burst_min: u32,
    pub burst_max: u32,
    pub initial: u32,
}

#[derive(Debug, Clone)]
pub struct ArchetypeDescriptor {
    pub id: ArchetypeId,
    pub def_name: String,
    pub label: String,
    pub move_speed: f32,
    pub wander_speed: f32,
    pub wander_radius: f32,
    pub attack_range: f32,
    pub health: HealthTable,
    pub attack: AttackSpec,
    // Priority order; the first ready ability wins the tick.
    pub abilities: Vec<AbilitySpec>,
    pub spawn: SpawnPolicy,
}

impl ArchetypeDescriptor {
    pub fn max_health_for_level(&self, level: u8) -> f32 {
        self.health.max_health_for_level(level)
    }

    pub fn charge_spec(&self, source: ChargeSource) -> Option<&ChargeSpec> {
        match source {
            ChargeSource::DefaultAttack => match &self.attack {
                AttackSpec::Charge(spec) => Some(spec),
                AttackSpec::Simple { .. } => None,
            },
            ChargeSource::Ability(slot) => match self.abilities.get(slot) {
                Some(AbilitySpec::Charge(spec)) => Some(spec),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ArchetypeTable {
    descriptors: Vec<ArchetypeDescriptor>,
    ids_by_name: HashMap<String, ArchetypeId>,
    source_hash: String,
}

impl ArchetypeTable {
    pub(crate) fn from_descriptors(
        mut descriptors: Vec<ArchetypeDescriptor>,
        source_hash: String,
    ) -> Self {
        let mut ids_by_name = HashMap::with_capacity(descriptors.len());
        for (idx, descriptor) in descriptors.iter_mut().enumerate() {
            let id = ArchetypeId(idx as u32);
            descriptor.id = id;
            ids_by_name.insert(descriptor.def_name.clone(), id);
        }
        Self {
            descriptors,
            ids_by_name,
            source_hash,
        }
    }

    pub fn id_by_name(&self, name: &str) -> Option<ArchetypeId> {
        self.ids_by_name.get(name).copied()
    }

    pub fn descriptor(&self, id: ArchetypeId) -> Option<&ArchetypeDescriptor> {
        self.descriptors.get(id.0 as usize)
    }

    pub fn descriptor_by_name(&self, name: &str) -> Option<&ArchetypeDescriptor> {
        self.id_by_name(name).and_then(|id| self.descriptor(id))
    }

    pub fn descriptors(&self) -> &[ArchetypeDescriptor] {
        &self.descriptors
    }

    pub fn source_hash(&self) -> &str {
        &self.source_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(base: f32, entries: &[(u8, f32)]) -> HealthTable {
        HealthTable::new(base, entries.iter().copied().collect())
    }

    #[test]
    fn exact_level_entry_wins() {
        let health = table(725.0, &[(1, 725.0), (2, 910.0), (5, 1760.0)]);
        assert_eq!(health.max_health_for_level(2), 910.0);
        assert_eq!(health.max_health_for_level(5), 1760.0);
    }

    #[test]
    fn missing_level_falls_back_to_nearest_lower_entry() {
        let health = table(725.0, &[(1, 725.0), (2, 910.0), (5, 1760.0)]);
        assert_eq!(health.max_health_for_level(3), 910.0);
        assert_eq!(health.max_health_for_level(4), 910.0);
    }

    #[test]
    fn level_below_every_entry_uses_base_health() {
        let health = table(9704.0, &[(5, 9704.0)]);
        assert_eq!(health.max_health_for_level(1), 9704.0);

        let health = table(500.0, &[(3, 800.0)]);
        assert_eq!(health.max_health_for_level(2), 500.0);
    }

    #[test]
    fn increasing_table_is_monotonic_across_levels() {
        let health = table(725.0, &[(1, 725.0), (2, 910.0), (4, 1420.0)]);
        let values = (1..=5)
            .map(|level| health.max_health_for_level(level))
            .collect::<Vec<_>>();
        assert!(values.windows(2).all(|pair| pair[0] <= pair[1]));
    }
}
