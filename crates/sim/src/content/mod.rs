mod compiler;
mod database;

pub use compiler::{
    builtin_archetype_table, compile_archetype_table, load_archetype_table,
    ArchetypeCompileError, ArchetypeErrorCode, SourceLocation, BUILTIN_ARCHETYPES_XML,
};
pub use database::{
    AbilitySpec, ArchetypeDescriptor, ArchetypeId, ArchetypeTable, AttackSpec, BlinkSpec,
    BurstVariant, ChargeShape, ChargeSource, ChargeSpec, HealthTable, PulseSpec, ShadowStepSpec,
    SpawnPolicy,
};
