mod metrics;
mod stepper;

pub use metrics::{LoopMetricsSnapshot, MetricsAccumulator, MetricsHandle, PopulationSample};
pub use stepper::{
    clamp_frame_delta, fixed_dt_for_hz, normalize_non_zero_duration, plan_sim_steps, StepPlan,
};
