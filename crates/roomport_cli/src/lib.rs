use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use thiserror::Error;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 46101;
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_RETRY_MS: u64 = 100;
pub const DEFAULT_QUIET_MS: u64 = 250;
pub const DEFAULT_WATCH_MS: u64 = 3_000;
const MAX_RETRY_BACKOFF_MS: u64 = 1_000;
const READY_PREFIX: &str = "roomport.ready v1 port:";
const SYNC_COMMAND: &str = "sync";
const SYNC_OK_PAYLOAD: &str = "ok: sync";
const METRICS_COMMAND: &str = "metrics";

#[derive(Debug, Error)]
pub enum CliError {
    #[error("timed out waiting for roomport ready on {host}:{port}")]
    ReadyTimeout { host: String, port: u16 },
    #[error("socket setup failed: {0}")]
    Socket(#[source] io::Error),
    #[error("socket disconnected while {0}")]
    Disconnected(&'static str),
    #[error("socket read error while {context}: {source}")]
    Read {
        context: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("failed to send line: {0}")]
    Write(#[source] io::Error),
    #[error("timed out {0}")]
    Timeout(&'static str),
    #[error("failed to read script file '{path}': {source}")]
    Script {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{location}: {reason}")]
    InvalidRequest { location: String, reason: String },
    #[error("join rejected: {0}")]
    JoinRejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineChannel {
    Control,
    Telemetry,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub channel: LineChannel,
    pub payload: String,
}

impl ParsedLine {
    pub fn payload_type(&self) -> Option<String> {
        let value: Value = serde_json::from_str(&self.payload).ok()?;
        value.get("type")?.as_str().map(ToString::to_string)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTarget {
    pub room: String,
    pub player_id: String,
}

impl JoinTarget {
    pub fn parse(raw: &str) -> Option<Self> {
        let (room, player_id) = raw.split_once(':')?;
        let (room, player_id) = (room.trim(), player_id.trim());
        if room.is_empty() || player_id.is_empty() {
            return None;
        }
        Some(Self {
            room: room.to_string(),
            player_id: player_id.to_string(),
        })
    }

    pub fn request_line(&self) -> String {
        json!({
            "type": "join-room",
            "room": self.room,
            "playerId": self.player_id,
        })
        .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct CommonOptions {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
    pub retry_ms: u64,
    pub include_telemetry: bool,
    pub join: Option<JoinTarget>,
}

impl Default for CommonOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_ms: DEFAULT_RETRY_MS,
            include_telemetry: false,
            join: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    WaitReady,
    Send { request: String },
    Script { path: String, barrier: bool },
    Barrier,
    Watch { duration_ms: u64 },
}

struct Session {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

pub fn parse_wire_line(raw: &str) -> ParsedLine {
    let trimmed = raw.trim_end_matches(['\r', '\n']);
    if let Some(payload) = trimmed.strip_prefix("C ") {
        return ParsedLine {
            channel: LineChannel::Control,
            payload: payload.to_string(),
        };
    }
    if let Some(payload) = trimmed.strip_prefix("T ") {
        return ParsedLine {
            channel: LineChannel::Telemetry,
            payload: payload.to_string(),
        };
    }
    ParsedLine {
        channel: LineChannel::Unknown,
        payload: trimmed.to_string(),
    }
}

pub fn should_print_line(line: &ParsedLine, include_telemetry: bool) -> bool {
    match line.channel {
        LineChannel::Control => true,
        LineChannel::Telemetry => include_telemetry,
        LineChannel::Unknown => false,
    }
}

pub fn is_ready_payload(payload: &str) -> bool {
    payload.starts_with(READY_PREFIX)
}

pub fn is_sync_ok_payload(payload: &str) -> bool {
    payload == SYNC_OK_PAYLOAD
}

/// Accepts `sync`, `metrics` or a JSON object with a string `type`. Anything else would only
/// come back as a `request-rejected` reply, so it is refused before it is sent.
pub fn validate_request_line(line: &str) -> Result<(), String> {
    if line == SYNC_COMMAND || line == METRICS_COMMAND {
        return Ok(());
    }
    let value: Value =
        serde_json::from_str(line).map_err(|error| format!("not valid JSON: {error}"))?;
    match value.get("type") {
        Some(Value::String(_)) => Ok(()),
        Some(_) => Err("`type` must be a string".to_string()),
        None => Err("missing `type` field".to_string()),
    }
}

pub fn parse_script_commands(content: &str) -> Vec<(usize, String)> {
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                None
            } else {
                Some((index + 1, trimmed.to_string()))
            }
        })
        .collect()
}

pub fn run<W: Write>(kind: CommandKind, opts: &CommonOptions, stdout: &mut W) -> Result<(), CliError> {
    let timeout = Duration::from_millis(opts.timeout_ms);
    let retry_base = Duration::from_millis(opts.retry_ms.max(1));
    let quiet = Duration::from_millis(DEFAULT_QUIET_MS);
    let include_telemetry = opts.include_telemetry;

    let commands = match &kind {
        CommandKind::Script { path, .. } => Some(load_script(path)?),
        _ => None,
    };
    if let CommandKind::Send { request } = &kind {
        validate_request_line(request).map_err(|reason| CliError::InvalidRequest {
            location: "send".to_string(),
            reason,
        })?;
    }

    let mut session = connect_and_wait_ready(&opts.host, opts.port, timeout, retry_base, |line| {
        emit_line(stdout, line, include_telemetry)
    })?;
    if let Some(target) = &opts.join {
        join_room(&mut session, target, timeout, |line| {
            emit_line(stdout, line, include_telemetry)
        })?;
    }

    match kind {
        CommandKind::WaitReady => Ok(()),
        CommandKind::Send { request } => {
            send_line(&mut session.writer, &request)?;
            read_until_quiet(&mut session.reader, timeout, quiet, |line| {
                emit_line(stdout, line, include_telemetry)
            })
        }
        CommandKind::Script { barrier, .. } => {
            for (_, command) in commands.unwrap_or_default() {
                send_line(&mut session.writer, &command)?;
                read_until_quiet(&mut session.reader, timeout, quiet, |line| {
                    emit_line(stdout, line, include_telemetry)
                })?;
            }
            if barrier {
                send_barrier_and_wait_ack(&mut session, timeout, |line| {
                    emit_line(stdout, line, include_telemetry)
                })?;
            }
            Ok(())
        }
        CommandKind::Barrier => send_barrier_and_wait_ack(&mut session, timeout, |line| {
            emit_line(stdout, line, include_telemetry)
        }),
        CommandKind::Watch { duration_ms } => watch(
            &mut session.reader,
            Duration::from_millis(duration_ms),
            |line| emit_line(stdout, line, include_telemetry),
        ),
    }
}

fn load_script(path: &str) -> Result<Vec<(usize, String)>, CliError> {
    let content = fs::read_to_string(path).map_err(|source| CliError::Script {
        path: path.to_string(),
        source,
    })?;
    let commands = parse_script_commands(&content);
    for (line_number, command) in &commands {
        validate_request_line(command).map_err(|reason| CliError::InvalidRequest {
            location: format!("{path}:{line_number}"),
            reason,
        })?;
    }
    Ok(commands)
}

fn connect_and_wait_ready<F>(
    host: &str,
    port: u16,
    timeout: Duration,
    retry_base: Duration,
    mut on_line: F,
) -> Result<Session, CliError>
where
    F: FnMut(&ParsedLine),
{
    let deadline = Instant::now() + timeout;
    let mut attempt = 0u32;

    while Instant::now() < deadline {
        if let Ok(writer) = TcpStream::connect((host, port)) {
            writer
                .set_read_timeout(Some(Duration::from_millis(100)))
                .map_err(CliError::Socket)?;
            let reader_stream = writer.try_clone().map_err(CliError::Socket)?;
            let mut session = Session {
                writer,
                reader: BufReader::new(reader_stream),
            };

            match wait_for_control(&mut session.reader, deadline, &mut on_line, |line| {
                is_ready_payload(&line.payload)
            }) {
                Ok(()) => return Ok(session),
                Err(CliError::Timeout(_)) => break,
                Err(CliError::Disconnected(_)) => {}
                Err(error) => return Err(error),
            }
        }
        if Instant::now() >= deadline {
            break;
        }

        let shift = attempt.min(8);
        let backoff_ms = (retry_base.as_millis() as u64)
            .saturating_mul(1u64 << shift)
            .min(MAX_RETRY_BACKOFF_MS);
        let sleep_for = Duration::from_millis(backoff_ms.max(1));
        if Instant::now() + sleep_for >= deadline {
            break;
        }
        thread::sleep(sleep_for);
        attempt = attempt.saturating_add(1);
    }

    Err(CliError::ReadyTimeout {
        host: host.to_string(),
        port,
    })
}

fn join_room<F>(
    session: &mut Session,
    target: &JoinTarget,
    timeout: Duration,
    mut on_line: F,
) -> Result<(), CliError>
where
    F: FnMut(&ParsedLine),
{
    send_line(&mut session.writer, &target.request_line())?;
    let deadline = Instant::now() + timeout;
    let mut rejection = None;
    wait_for_control(&mut session.reader, deadline, &mut on_line, |line| {
        match line.payload_type().as_deref() {
            Some("joined") => true,
            Some("request-rejected") => {
                rejection = Some(line.payload.clone());
                true
            }
            _ => false,
        }
    })?;
    match rejection {
        Some(payload) => Err(CliError::JoinRejected(payload)),
        None => Ok(()),
    }
}

fn wait_for_control<F, P>(
    reader: &mut BufReader<TcpStream>,
    deadline: Instant,
    on_line: &mut F,
    mut done: P,
) -> Result<(), CliError>
where
    F: FnMut(&ParsedLine),
    P: FnMut(&ParsedLine) -> bool,
{
    const CONTEXT: &str = "waiting for a control reply";
    loop {
        match read_one_line(reader, deadline) {
            ReadOutcome::Line(raw) => {
                let parsed = parse_wire_line(&raw);
                on_line(&parsed);
                if parsed.channel == LineChannel::Control && done(&parsed) {
                    return Ok(());
                }
            }
            ReadOutcome::NoData => {}
            ReadOutcome::Disconnected => return Err(CliError::Disconnected(CONTEXT)),
            ReadOutcome::DeadlineExceeded => return Err(CliError::Timeout(CONTEXT)),
            ReadOutcome::IoError(source) => {
                return Err(CliError::Read {
                    context: CONTEXT,
                    source,
                })
            }
        }
    }
}

fn send_barrier_and_wait_ack<F>(
    session: &mut Session,
    timeout: Duration,
    mut on_line: F,
) -> Result<(), CliError>
where
    F: FnMut(&ParsedLine),
{
    send_line(&mut session.writer, SYNC_COMMAND)?;
    let deadline = Instant::now() + timeout;
    wait_for_control(&mut session.reader, deadline, &mut on_line, |line| {
        is_sync_ok_payload(&line.payload)
    })
    .map_err(|error| match error {
        CliError::Timeout(_) => CliError::Timeout("waiting for barrier ack (ok: sync)"),
        CliError::Disconnected(_) => CliError::Disconnected("waiting for barrier ack"),
        other => other,
    })
}

fn read_until_quiet<F>(
    reader: &mut BufReader<TcpStream>,
    timeout: Duration,
    quiet_window: Duration,
    mut on_line: F,
) -> Result<(), CliError>
where
    F: FnMut(&ParsedLine),
{
    const CONTEXT: &str = "waiting for command output";
    let deadline = Instant::now() + timeout;
    let mut last_line_at = Instant::now();
    let mut saw_any_line = false;

    loop {
        match read_one_line(reader, deadline) {
            ReadOutcome::Line(raw) => {
                let parsed = parse_wire_line(&raw);
                on_line(&parsed);
                saw_any_line = true;
                last_line_at = Instant::now();
            }
            ReadOutcome::NoData => {
                let now = Instant::now();
                if (saw_any_line && now.saturating_duration_since(last_line_at) >= quiet_window)
                    || (!saw_any_line && now + quiet_window >= deadline)
                {
                    return Ok(());
                }
            }
            ReadOutcome::Disconnected => return Err(CliError::Disconnected(CONTEXT)),
            ReadOutcome::DeadlineExceeded => return Ok(()),
            ReadOutcome::IoError(source) => {
                return Err(CliError::Read {
                    context: CONTEXT,
                    source,
                })
            }
        }
    }
}

fn watch<F>(
    reader: &mut BufReader<TcpStream>,
    duration: Duration,
    mut on_line: F,
) -> Result<(), CliError>
where
    F: FnMut(&ParsedLine),
{
    let deadline = Instant::now() + duration;
    loop {
        match read_one_line(reader, deadline) {
            ReadOutcome::Line(raw) => on_line(&parse_wire_line(&raw)),
            ReadOutcome::NoData => {}
            ReadOutcome::Disconnected | ReadOutcome::DeadlineExceeded => return Ok(()),
            ReadOutcome::IoError(source) => {
                return Err(CliError::Read {
                    context: "watching",
                    source,
                })
            }
        }
    }
}

fn emit_line<W: Write>(stdout: &mut W, line: &ParsedLine, include_telemetry: bool) {
    if should_print_line(line, include_telemetry) {
        let _ = writeln!(stdout, "{}", line.payload);
    }
}

fn send_line(writer: &mut TcpStream, line: &str) -> Result<(), CliError> {
    writer.write_all(line.as_bytes()).map_err(CliError::Write)?;
    writer.write_all(b"\n").map_err(CliError::Write)?;
    writer.flush().map_err(CliError::Write)
}

enum ReadOutcome {
    Line(String),
    NoData,
    Disconnected,
    DeadlineExceeded,
    IoError(io::Error),
}

fn read_one_line(reader: &mut BufReader<TcpStream>, deadline: Instant) -> ReadOutcome {
    if Instant::now() >= deadline {
        return ReadOutcome::DeadlineExceeded;
    }

    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) => ReadOutcome::Disconnected,
        Ok(_) => ReadOutcome::Line(line),
        Err(error)
            if error.kind() == io::ErrorKind::WouldBlock
                || error.kind() == io::ErrorKind::TimedOut =>
        {
            ReadOutcome::NoData
        }
        Err(error) => ReadOutcome::IoError(error),
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn parse_wire_line_handles_channels_and_crlf() {
        assert_eq!(
            parse_wire_line("C ok: sync\r\n"),
            ParsedLine {
                channel: LineChannel::Control,
                payload: "ok: sync".to_string(),
            }
        );
        assert_eq!(
            parse_wire_line("T {\"type\":\"enemies-updated\"}\n"),
            ParsedLine {
                channel: LineChannel::Telemetry,
                payload: "{\"type\":\"enemies-updated\"}".to_string(),
            }
        );
        assert_eq!(parse_wire_line("stray\r\n").channel, LineChannel::Unknown);
    }

    #[test]
    fn output_filter_defaults_to_control_only() {
        let control = parse_wire_line("C {\"type\":\"enemy-died\"}");
        let telemetry = parse_wire_line("T {\"type\":\"enemies-updated\"}");
        let unknown = parse_wire_line("raw");

        assert!(should_print_line(&control, false));
        assert!(!should_print_line(&telemetry, false));
        assert!(!should_print_line(&unknown, true));
        assert!(should_print_line(&telemetry, true));
    }

    #[test]
    fn ready_and_barrier_matchers() {
        assert!(is_ready_payload("roomport.ready v1 port:46101"));
        assert!(!is_ready_payload("ok: sync"));
        assert!(is_sync_ok_payload("ok: sync"));
        assert!(!is_sync_ok_payload("{\"type\":\"joined\"}"));
    }

    #[test]
    fn payload_type_reads_json_lines_only() {
        let line = parse_wire_line("C {\"type\":\"joined\",\"room\":\"r1\"}");
        assert_eq!(line.payload_type().as_deref(), Some("joined"));
        assert_eq!(parse_wire_line("C ok: sync").payload_type(), None);
    }

    #[test]
    fn join_target_parses_room_and_player() {
        let target = JoinTarget::parse("r1:alice").expect("target");
        assert_eq!(target.room, "r1");
        assert_eq!(target.player_id, "alice");
        let request: Value = serde_json::from_str(&target.request_line()).expect("json");
        assert_eq!(request["type"], "join-room");
        assert_eq!(request["playerId"], "alice");

        assert_eq!(JoinTarget::parse("r1"), None);
        assert_eq!(JoinTarget::parse(":alice"), None);
    }

    #[test]
    fn request_validation_accepts_sync_and_typed_objects() {
        assert!(validate_request_line("sync").is_ok());
        assert!(validate_request_line("metrics").is_ok());
        assert!(validate_request_line(r#"{"type":"start-game","room":"r1","initiatorId":"a"}"#).is_ok());
        assert!(validate_request_line("{broken").is_err());
        assert_eq!(
            validate_request_line(r#"{"room":"r1"}"#),
            Err("missing `type` field".to_string())
        );
        assert_eq!(
            validate_request_line(r#"{"type":3}"#),
            Err("`type` must be a string".to_string())
        );
    }

    #[test]
    fn script_commands_keep_line_numbers() {
        let content = "# warmup\n\n{\"type\":\"start-game\",\"room\":\"r1\",\"initiatorId\":\"a\"}\n  sync  \n";
        assert_eq!(
            parse_script_commands(content),
            vec![
                (
                    3,
                    "{\"type\":\"start-game\",\"room\":\"r1\",\"initiatorId\":\"a\"}".to_string()
                ),
                (4, "sync".to_string()),
            ]
        );
    }

    #[test]
    fn invalid_script_line_is_reported_with_location() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.txt");
        fs::write(&path, "sync\nnot json\n").expect("write");
        let path = path.display().to_string();

        let err = load_script(&path).expect_err("invalid line");
        assert!(matches!(err, CliError::InvalidRequest { .. }));
        assert!(err
            .to_string()
            .starts_with(&format!("{path}:2: not valid JSON")));
    }

    #[test]
    fn barrier_against_a_scripted_server() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            stream
                .write_all(format!("C roomport.ready v1 port:{port}\n").as_bytes())
                .expect("ready");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut line = String::new();
            reader.read_line(&mut line).expect("read sync");
            assert_eq!(line, "sync\n");
            stream
                .write_all(b"T {\"type\":\"enemies-updated\"}\nC ok: sync\n")
                .expect("ack");
        });

        let opts = CommonOptions {
            port,
            timeout_ms: 2_000,
            ..CommonOptions::default()
        };
        let mut out = Vec::new();
        run(CommandKind::Barrier, &opts, &mut out).expect("barrier");
        server.join().expect("server thread");

        let printed = String::from_utf8(out).expect("utf8");
        assert_eq!(printed, format!("roomport.ready v1 port:{port}\nok: sync\n"));
    }
}
