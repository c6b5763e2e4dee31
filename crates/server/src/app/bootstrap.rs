use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use sim::{
    fixed_dt_for_hz, load_archetype_table, ArchetypeCompileError, RegistryConfig, RoomConfig,
    RoomRegistry,
};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use super::config::ServerConfig;
use super::roomport::{bind_addr, RoomportTransport};

#[derive(Debug, Error)]
pub(crate) enum StartupError {
    #[error("archetype table failed to compile: {0}")]
    Archetypes(#[from] ArchetypeCompileError),
    #[error("failed to bind roomport on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

pub(crate) struct ServerWiring {
    pub(crate) config: ServerConfig,
    pub(crate) registry: RoomRegistry,
    pub(crate) transport: RoomportTransport,
}

pub(crate) fn build_app() -> Result<ServerWiring, StartupError> {
    init_tracing();
    info!("=== Arena Server Startup ===");

    let config = ServerConfig::from_env();
    info!(
        port = config.port,
        bind_all = config.bind_all,
        tick_hz = config.tick_hz,
        max_ticks_per_frame = config.max_ticks_per_frame,
        seeded = config.seed.is_some(),
        debug_commands = config.debug_commands,
        "server_config"
    );

    let registry = build_registry(&config)?;
    let addr = bind_addr(config.bind_all, config.port);
    let transport = RoomportTransport::bind(addr, config.roomport_diag)
        .map_err(|source| StartupError::Bind { addr, source })?;

    Ok(ServerWiring {
        config,
        registry,
        transport,
    })
}

fn build_registry(config: &ServerConfig) -> Result<RoomRegistry, StartupError> {
    let table = load_archetype_table(config.archetypes_path.as_deref())?;
    info!(
        archetypes = table.descriptors().len(),
        source_hash = table.source_hash(),
        "archetypes_loaded"
    );

    let room = RoomConfig {
        ai_tick_ms: fixed_dt_for_hz(config.tick_hz).as_millis().max(1) as u64,
        ..RoomConfig::default()
    };
    Ok(RoomRegistry::new(
        Arc::new(table),
        RegistryConfig {
            room,
            seed: config.seed,
            allow_debug_commands: config.debug_commands,
        },
    ))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn registry_uses_builtin_table_by_default() {
        let registry = build_registry(&ServerConfig::default()).expect("builtin table compiles");
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn broken_override_file_is_a_startup_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("archetypes.xml");
        fs::write(&path, "<Archetypes><Archetype>").expect("write");

        let config = ServerConfig {
            archetypes_path: Some(path),
            ..ServerConfig::default()
        };
        let err = build_registry(&config).expect_err("malformed xml must fail");
        assert!(matches!(err, StartupError::Archetypes(_)));
        assert!(err.to_string().starts_with("archetype table failed to compile"));
    }

    #[test]
    fn missing_override_file_is_a_startup_error() {
        let config = ServerConfig {
            archetypes_path: Some("/definitely/not/here.xml".into()),
            ..ServerConfig::default()
        };
        assert!(matches!(
            build_registry(&config),
            Err(StartupError::Archetypes(_))
        ));
    }
}
