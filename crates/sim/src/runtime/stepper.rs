use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPlan {
    pub ticks_to_run: u32,
    pub remaining_accumulator: Duration,
    pub dropped_backlog: Duration,
}

/// Splits an accumulated frame budget into fixed ticks. Anything still owed after
/// `max_ticks_per_frame` steps is dropped rather than carried forward.
pub fn plan_sim_steps(
    mut accumulator: Duration,
    fixed_dt: Duration,
    max_ticks_per_frame: u32,
) -> StepPlan {
    let mut ticks_to_run = 0u32;

    while accumulator >= fixed_dt && ticks_to_run < max_ticks_per_frame {
        accumulator = accumulator.saturating_sub(fixed_dt);
        ticks_to_run = ticks_to_run.saturating_add(1);
    }

    let dropped_backlog = if accumulator >= fixed_dt {
        std::mem::replace(&mut accumulator, Duration::ZERO)
    } else {
        Duration::ZERO
    };

    StepPlan {
        ticks_to_run,
        remaining_accumulator: accumulator,
        dropped_backlog,
    }
}

pub fn clamp_frame_delta(frame_dt: Duration, max_frame_delta: Duration) -> Duration {
    frame_dt.min(max_frame_delta)
}

pub fn normalize_non_zero_duration(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}

pub fn fixed_dt_for_hz(tick_hz: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / u64::from(tick_hz.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_frame_delta_caps_large_frame() {
        let max_frame_delta = Duration::from_millis(250);
        assert_eq!(
            clamp_frame_delta(Duration::from_millis(600), max_frame_delta),
            max_frame_delta
        );
        assert_eq!(
            clamp_frame_delta(Duration::from_millis(40), max_frame_delta),
            Duration::from_millis(40)
        );
    }

    #[test]
    fn plan_runs_expected_ticks_without_drop() {
        let result = plan_sim_steps(Duration::from_millis(150), Duration::from_millis(50), 5);
        assert_eq!(result.ticks_to_run, 3);
        assert_eq!(result.remaining_accumulator, Duration::ZERO);
        assert_eq!(result.dropped_backlog, Duration::ZERO);
    }

    #[test]
    fn plan_keeps_partial_step_for_next_frame() {
        let result = plan_sim_steps(Duration::from_millis(70), Duration::from_millis(50), 5);
        assert_eq!(result.ticks_to_run, 1);
        assert_eq!(result.remaining_accumulator, Duration::from_millis(20));
        assert_eq!(result.dropped_backlog, Duration::ZERO);
    }

    #[test]
    fn plan_drops_backlog_when_tick_cap_hit() {
        let result = plan_sim_steps(Duration::from_millis(400), Duration::from_millis(50), 3);
        assert_eq!(result.ticks_to_run, 3);
        assert_eq!(result.remaining_accumulator, Duration::ZERO);
        assert_eq!(result.dropped_backlog, Duration::from_millis(250));
    }

    #[test]
    fn zero_duration_normalizes_to_fallback() {
        let fallback = Duration::from_millis(50);
        assert_eq!(normalize_non_zero_duration(Duration::ZERO, fallback), fallback);
        assert_eq!(
            normalize_non_zero_duration(Duration::from_millis(10), fallback),
            Duration::from_millis(10)
        );
    }

    #[test]
    fn twenty_hz_is_fifty_millis() {
        assert_eq!(fixed_dt_for_hz(20), Duration::from_millis(50));
        assert_eq!(fixed_dt_for_hz(0), Duration::from_secs(1));
    }
}
