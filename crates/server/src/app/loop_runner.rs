use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use sim::{
    clamp_frame_delta, fixed_dt_for_hz, plan_sim_steps, MetricsAccumulator, MetricsHandle,
};
use tracing::{info, warn};

use super::bootstrap::ServerWiring;
use super::roomport::{ConnectionId, RoomportTransport};
use super::sessions::{Dispatcher, Outgoing};

pub(crate) fn run(app: ServerWiring) -> ExitCode {
    let ServerWiring {
        config,
        registry,
        mut transport,
    } = app;
    let fixed_dt = fixed_dt_for_hz(config.tick_hz);
    let fixed_dt_ms = fixed_dt.as_millis().max(1) as u64;
    let metrics_handle = MetricsHandle::default();
    let mut dispatcher = Dispatcher::new(registry, metrics_handle.clone());
    let mut metrics_accumulator = MetricsAccumulator::new(config.metrics_log_interval);

    info!(
        port = transport.bound_port(),
        tick_hz = config.tick_hz,
        fixed_dt_ms,
        "server_loop_started"
    );

    let mut sim_now_ms = 0u64;
    let mut accumulator = Duration::ZERO;
    let mut last_frame = Instant::now();
    let mut lines = Vec::new();
    let mut disconnected = Vec::new();

    loop {
        let frame_start = Instant::now();
        let raw_frame_dt = frame_start.saturating_duration_since(last_frame);
        last_frame = frame_start;
        accumulator = accumulator.saturating_add(clamp_frame_delta(
            raw_frame_dt,
            config.max_frame_delta,
        ));

        let plan = plan_sim_steps(accumulator, fixed_dt, config.max_ticks_per_frame);
        accumulator = plan.remaining_accumulator;
        for _ in 0..plan.ticks_to_run {
            let tick_start = Instant::now();
            sim_now_ms = sim_now_ms.saturating_add(fixed_dt_ms);
            step(
                &mut transport,
                &mut dispatcher,
                &mut lines,
                &mut disconnected,
                sim_now_ms,
            );
            metrics_accumulator.record_tick(tick_start.elapsed(), dispatcher.registry().population());
        }

        if !plan.dropped_backlog.is_zero() {
            warn!(
                dropped_backlog_ms = plan.dropped_backlog.as_secs_f64() * 1000.0,
                max_ticks_per_frame = config.max_ticks_per_frame,
                "sim_clamp_triggered"
            );
        }

        if let Some(snapshot) = metrics_accumulator.maybe_snapshot(Instant::now()) {
            metrics_handle.publish(snapshot);
            info!(
                tps = snapshot.tps,
                tick_time_ms = snapshot.tick_time_ms,
                rooms = snapshot.rooms,
                enemies = snapshot.enemies,
                players = snapshot.players,
                clients = transport.client_count(),
                sessions = dispatcher.session_count(),
                "loop_metrics"
            );
        }

        let until_next_tick = fixed_dt.saturating_sub(accumulator);
        let spent = frame_start.elapsed();
        if until_next_tick > spent {
            thread::sleep(until_next_tick - spent);
        }
    }
}

fn step(
    transport: &mut RoomportTransport,
    dispatcher: &mut Dispatcher,
    lines: &mut Vec<(ConnectionId, String)>,
    disconnected: &mut Vec<ConnectionId>,
    now: u64,
) {
    lines.clear();
    disconnected.clear();
    transport.poll(lines, disconnected);

    for (conn, line) in lines.drain(..) {
        let outgoing = dispatcher.handle_line(conn, &line, now);
        deliver(transport, outgoing);
    }
    for conn in disconnected.drain(..) {
        let outgoing = dispatcher.disconnect(conn, now);
        deliver(transport, outgoing);
    }

    let outgoing = dispatcher.tick(now);
    deliver(transport, outgoing);

    transport.flush(disconnected);
    for conn in disconnected.drain(..) {
        let outgoing = dispatcher.disconnect(conn, now);
        deliver(transport, outgoing);
    }
}

fn deliver(transport: &mut RoomportTransport, outgoing: Vec<Outgoing>) {
    for out in outgoing {
        transport.send(out.conn, out.class, &out.line);
    }
}
