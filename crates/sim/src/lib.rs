pub mod content;
pub mod math;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod runtime;

pub use content::{
    builtin_archetype_table, compile_archetype_table, load_archetype_table, ArchetypeCompileError,
    ArchetypeDescriptor, ArchetypeErrorCode, ArchetypeId, ArchetypeTable, SourceLocation,
};
pub use math::Position;
pub use protocol::{decode_request, ClientRequest, Outbound, RequestDecodeError, ServerReply};
pub use registry::{Audience, Delivery, RegistryConfig, RoomRegistry};
pub use room::{
    level_for_kill_count, DamageRequest, DamageResult, Enemy, EnemyId, Player, PlayerId, Room,
    RoomConfig, RoomEvent, RoomId, StatusEffectKind,
};
pub use runtime::{
    clamp_frame_delta, fixed_dt_for_hz, plan_sim_steps, LoopMetricsSnapshot, MetricsAccumulator,
    MetricsHandle, PopulationSample, StepPlan,
};

pub const AI_TICK_HZ: u32 = 20;
