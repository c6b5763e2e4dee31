use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

const PORT_ENV_VAR: &str = "ARENA_PORT";
const BIND_ALL_ENV_VAR: &str = "ARENA_BIND_ALL";
const TICK_HZ_ENV_VAR: &str = "ARENA_TICK_HZ";
const MAX_TICKS_PER_FRAME_ENV_VAR: &str = "ARENA_MAX_TICKS_PER_FRAME";
const ARCHETYPES_ENV_VAR: &str = "ARENA_ARCHETYPES";
const SEED_ENV_VAR: &str = "ARENA_SEED";
const DEBUG_COMMANDS_ENV_VAR: &str = "ARENA_DEBUG_COMMANDS";
const ROOMPORT_DIAG_ENV_VAR: &str = "ARENA_ROOMPORT_DIAG";

pub(crate) const DEFAULT_PORT: u16 = 46101;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServerConfig {
    pub(crate) port: u16,
    pub(crate) bind_all: bool,
    pub(crate) tick_hz: u32,
    pub(crate) max_ticks_per_frame: u32,
    pub(crate) max_frame_delta: Duration,
    pub(crate) metrics_log_interval: Duration,
    pub(crate) archetypes_path: Option<PathBuf>,
    pub(crate) seed: Option<u64>,
    pub(crate) debug_commands: bool,
    pub(crate) roomport_diag: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_all: false,
            tick_hz: sim::AI_TICK_HZ,
            max_ticks_per_frame: 5,
            max_frame_delta: Duration::from_millis(250),
            metrics_log_interval: Duration::from_secs(1),
            archetypes_path: None,
            seed: None,
            debug_commands: false,
            roomport_diag: false,
        }
    }
}

impl ServerConfig {
    pub(crate) fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let tick_hz = parse_or_default(TICK_HZ_ENV_VAR, lookup(TICK_HZ_ENV_VAR), defaults.tick_hz);
        let max_ticks_per_frame = parse_or_default(
            MAX_TICKS_PER_FRAME_ENV_VAR,
            lookup(MAX_TICKS_PER_FRAME_ENV_VAR),
            defaults.max_ticks_per_frame,
        );

        Self {
            port: parse_or_default(PORT_ENV_VAR, lookup(PORT_ENV_VAR), defaults.port),
            bind_all: parse_enabled_flag(lookup(BIND_ALL_ENV_VAR).as_deref()),
            tick_hz: non_zero_or(TICK_HZ_ENV_VAR, tick_hz, defaults.tick_hz),
            max_ticks_per_frame: non_zero_or(
                MAX_TICKS_PER_FRAME_ENV_VAR,
                max_ticks_per_frame,
                defaults.max_ticks_per_frame,
            ),
            archetypes_path: lookup(ARCHETYPES_ENV_VAR)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
                .map(PathBuf::from),
            seed: lookup(SEED_ENV_VAR).and_then(|raw| match raw.trim().parse::<u64>() {
                Ok(seed) => Some(seed),
                Err(_) => {
                    warn!(value = %raw, "arena_invalid_seed_using_entropy");
                    None
                }
            }),
            debug_commands: parse_enabled_flag(lookup(DEBUG_COMMANDS_ENV_VAR).as_deref()),
            roomport_diag: parse_enabled_flag(lookup(ROOMPORT_DIAG_ENV_VAR).as_deref()),
            ..defaults
        }
    }
}

fn parse_enabled_flag(raw: Option<&str>) -> bool {
    matches!(raw.map(str::trim), Some("1"))
}

fn parse_or_default<T>(name: &'static str, raw: Option<String>, fallback: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    let Some(value) = raw else {
        return fallback;
    };
    match value.trim().parse::<T>() {
        Ok(parsed) => parsed,
        Err(_) => {
            warn!(var = name, value = %value, fallback = %fallback, "arena_invalid_env_using_default");
            fallback
        }
    }
}

fn non_zero_or(name: &'static str, value: u32, fallback: u32) -> u32 {
    if value == 0 {
        warn!(var = name, fallback, "arena_zero_env_using_default");
        fallback
    } else {
        value
    }
}
