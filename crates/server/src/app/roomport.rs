use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use tracing::{info, warn};

const MAX_PENDING_TELEMETRY_BYTES_PER_CLIENT: usize = 256 * 1024;
const MAX_PENDING_CONTROL_BYTES_PER_CLIENT: usize = 256 * 1024;
const MAX_PENDING_READ_BYTES_PER_CLIENT: usize = 64 * 1024;
const REMOTE_CONTROL_PREFIX: &str = "C ";
const REMOTE_TELEMETRY_PREFIX: &str = "T ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutboundClass {
    Control,
    Telemetry,
}

#[derive(Debug)]
struct OutboundChunk {
    class: OutboundClass,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct OutboundChunkState {
    chunk: OutboundChunk,
    written: usize,
}

#[derive(Debug)]
struct ClientConn {
    id: ConnectionId,
    stream: TcpStream,
    read_buf: Vec<u8>,
    active_chunk: Option<OutboundChunkState>,
    queued_chunks: VecDeque<OutboundChunk>,
    queued_control_bytes: usize,
    queued_telemetry_bytes: usize,
    diag: bool,
}

impl ClientConn {
    fn new(id: ConnectionId, stream: TcpStream, diag: bool) -> Self {
        Self {
            id,
            stream,
            read_buf: Vec::new(),
            active_chunk: None,
            queued_chunks: VecDeque::new(),
            queued_control_bytes: 0,
            queued_telemetry_bytes: 0,
            diag,
        }
    }
}

/// Newline-delimited TCP transport. Every client gets byte-capped outbound queues: control
/// lines are never displaced by telemetry, telemetry is evicted oldest-first.
#[derive(Debug)]
pub(crate) struct RoomportTransport {
    listener: TcpListener,
    bound_port: u16,
    clients: Vec<ClientConn>,
    next_connection_id: u64,
    diag: bool,
}

impl RoomportTransport {
    pub(crate) fn bind(addr: SocketAddr, diag: bool) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let bound_port = listener.local_addr()?.port();
        info!(line = %ready_line_text(bound_port), "roomport_ready_bound");
        Ok(Self {
            listener,
            bound_port,
            clients: Vec::new(),
            next_connection_id: 1,
            diag,
        })
    }

    pub(crate) fn bound_port(&self) -> u16 {
        self.bound_port
    }

    pub(crate) fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub(crate) fn poll(
        &mut self,
        lines: &mut Vec<(ConnectionId, String)>,
        disconnected: &mut Vec<ConnectionId>,
    ) {
        self.accept_pending_clients();
        self.poll_client_lines(lines, disconnected);
        self.flush(disconnected);
    }

    pub(crate) fn send(&mut self, conn: ConnectionId, class: OutboundClass, line: &str) {
        let Some(client) = self.clients.iter_mut().find(|client| client.id == conn) else {
            return;
        };
        match class {
            OutboundClass::Control => {
                enqueue_control_line_with_cap(client, line, MAX_PENDING_CONTROL_BYTES_PER_CLIENT)
            }
            OutboundClass::Telemetry => enqueue_telemetry_line_with_cap(
                client,
                line,
                MAX_PENDING_TELEMETRY_BYTES_PER_CLIENT,
            ),
        }
    }

    pub(crate) fn flush(&mut self, disconnected: &mut Vec<ConnectionId>) {
        let mut index = 0usize;
        while index < self.clients.len() {
            let flush_result = {
                let client = &mut self.clients[index];
                let diag = client.diag;
                flush_pending_chunks(
                    &mut client.active_chunk,
                    &mut client.queued_chunks,
                    &mut client.queued_control_bytes,
                    &mut client.queued_telemetry_bytes,
                    diag,
                    |payload| client.stream.write(payload),
                )
            };
            if let Err(err) = flush_result {
                let client = self.clients.swap_remove(index);
                warn!(conn = %client.id, error = %err, "roomport_client_write_failed");
                disconnected.push(client.id);
            } else {
                index += 1;
            }
        }
    }

    fn accept_pending_clients(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(err) = stream.set_nonblocking(true) {
                        warn!(error = %err, "roomport_client_nonblocking_failed");
                        continue;
                    }
                    if let Err(err) = stream.set_nodelay(true) {
                        warn!(error = %err, "roomport_client_nodelay_failed");
                    }
                    let id = ConnectionId(self.next_connection_id);
                    self.next_connection_id += 1;
                    let mut client = ClientConn::new(id, stream, self.diag);
                    enqueue_control_line(&mut client, &ready_line_text(self.bound_port));
                    info!(conn = %id, peer = %addr, "roomport_client_connected");
                    self.clients.push(client);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(error = %err, "roomport_accept_failed");
                    break;
                }
            }
        }
    }

    fn poll_client_lines(
        &mut self,
        lines: &mut Vec<(ConnectionId, String)>,
        disconnected: &mut Vec<ConnectionId>,
    ) {
        let mut index = 0usize;
        while index < self.clients.len() {
            let mut hung_up = false;
            {
                let client = &mut self.clients[index];
                let mut chunk = [0u8; 1024];
                loop {
                    match client.stream.read(&mut chunk) {
                        Ok(0) => {
                            hung_up = true;
                            break;
                        }
                        Ok(bytes_read) => {
                            client.read_buf.extend_from_slice(&chunk[..bytes_read]);
                            let mut complete = Vec::new();
                            drain_complete_lines(&mut client.read_buf, &mut complete, client.diag);
                            lines.extend(complete.into_iter().map(|line| (client.id, line)));
                            if client.read_buf.len() > MAX_PENDING_READ_BYTES_PER_CLIENT {
                                warn!(
                                    conn = %client.id,
                                    pending_bytes = client.read_buf.len(),
                                    cap = MAX_PENDING_READ_BYTES_PER_CLIENT,
                                    "roomport_client_line_over_cap"
                                );
                                hung_up = true;
                                break;
                            }
                        }
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                        Err(err) => {
                            warn!(conn = %client.id, error = %err, "roomport_client_read_failed");
                            hung_up = true;
                            break;
                        }
                    }
                }
            }

            if hung_up {
                let client = self.clients.swap_remove(index);
                info!(conn = %client.id, "roomport_client_disconnected");
                disconnected.push(client.id);
            } else {
                index += 1;
            }
        }
    }
}

pub(crate) fn bind_addr(bind_all: bool, port: u16) -> SocketAddr {
    if bind_all {
        SocketAddr::from(([0, 0, 0, 0], port))
    } else {
        SocketAddr::from(([127, 0, 0, 1], port))
    }
}

pub(crate) fn ready_line_text(port: u16) -> String {
    format!("roomport.ready v1 port:{port}")
}

fn drain_complete_lines(buffer: &mut Vec<u8>, out: &mut Vec<String>, diag: bool) {
    while let Some(newline_index) = buffer.iter().position(|byte| *byte == b'\n') {
        let mut line_bytes = buffer.drain(..=newline_index).collect::<Vec<u8>>();
        line_bytes.pop();
        if line_bytes.last().copied() == Some(b'\r') {
            line_bytes.pop();
        }

        match String::from_utf8(line_bytes) {
            Ok(line) => {
                if diag {
                    info!(line = %line, "roomport_diag_remote_line_read");
                }
                out.push(line)
            }
            Err(err) => warn!(error = %err, "roomport_invalid_utf8_line_dropped"),
        }
    }
}

fn encode_tagged_payload(prefix: &str, line: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(prefix.len() + line.len() + 1);
    payload.extend_from_slice(prefix.as_bytes());
    payload.extend_from_slice(line.as_bytes());
    payload.push(b'\n');
    payload
}

fn enqueue_control_line(client: &mut ClientConn, line: &str) {
    enqueue_control_line_with_cap(client, line, MAX_PENDING_CONTROL_BYTES_PER_CLIENT);
}

// Control lines queue ahead of any telemetry. Over the cap the oldest control line goes.
fn enqueue_control_line_with_cap(client: &mut ClientConn, line: &str, control_cap: usize) {
    let chunk = OutboundChunk {
        class: OutboundClass::Control,
        bytes: encode_tagged_payload(REMOTE_CONTROL_PREFIX, line),
    };
    let chunk_bytes = chunk.bytes.len();
    if chunk_bytes > control_cap {
        warn!(conn = %client.id, chunk_bytes, control_cap, "roomport_control_line_over_cap_dropped");
        return;
    }

    while client.queued_control_bytes.saturating_add(chunk_bytes) > control_cap {
        if !evict_oldest_queued(client, OutboundClass::Control) {
            return;
        }
    }

    client.queued_control_bytes = client.queued_control_bytes.saturating_add(chunk_bytes);
    let insert_at = client
        .queued_chunks
        .iter()
        .position(|existing| existing.class == OutboundClass::Telemetry)
        .unwrap_or(client.queued_chunks.len());
    client.queued_chunks.insert(insert_at, chunk);
    if client.diag {
        info!(
            conn = %client.id,
            line = %line,
            queue_len = client.queued_chunks.len(),
            control_bytes = client.queued_control_bytes,
            telemetry_bytes = client.queued_telemetry_bytes,
            "roomport_diag_enqueued_control_line"
        );
    }
}

fn enqueue_telemetry_line_with_cap(client: &mut ClientConn, line: &str, telemetry_cap: usize) {
    let chunk = OutboundChunk {
        class: OutboundClass::Telemetry,
        bytes: encode_tagged_payload(REMOTE_TELEMETRY_PREFIX, line),
    };
    let chunk_bytes = chunk.bytes.len();
    if chunk_bytes > telemetry_cap {
        if client.diag {
            info!(conn = %client.id, chunk_bytes, telemetry_cap, "roomport_diag_drop_telemetry_over_cap");
        }
        return;
    }

    while client.queued_telemetry_bytes.saturating_add(chunk_bytes) > telemetry_cap {
        if !evict_oldest_queued(client, OutboundClass::Telemetry) {
            return;
        }
    }

    client.queued_telemetry_bytes = client.queued_telemetry_bytes.saturating_add(chunk_bytes);
    client.queued_chunks.push_back(chunk);
}

fn evict_oldest_queued(client: &mut ClientConn, class: OutboundClass) -> bool {
    let Some(index) = client
        .queued_chunks
        .iter()
        .position(|chunk| chunk.class == class)
    else {
        return false;
    };
    let Some(removed) = client.queued_chunks.remove(index) else {
        return false;
    };
    let counter = match class {
        OutboundClass::Control => &mut client.queued_control_bytes,
        OutboundClass::Telemetry => &mut client.queued_telemetry_bytes,
    };
    *counter = counter.saturating_sub(removed.bytes.len());
    if client.diag {
        info!(
            conn = %client.id,
            class = ?class,
            removed_bytes = removed.bytes.len(),
            queue_len = client.queued_chunks.len(),
            "roomport_diag_evicted_oldest"
        );
    }
    true
}

fn flush_pending_chunks<F>(
    active_chunk: &mut Option<OutboundChunkState>,
    queued_chunks: &mut VecDeque<OutboundChunk>,
    queued_control_bytes: &mut usize,
    queued_telemetry_bytes: &mut usize,
    diag: bool,
    mut write_payload: F,
) -> io::Result<()>
where
    F: FnMut(&[u8]) -> io::Result<usize>,
{
    loop {
        let state = match active_chunk {
            Some(state) => state,
            None => {
                let Some(chunk) = queued_chunks.pop_front() else {
                    return Ok(());
                };
                let counter = match chunk.class {
                    OutboundClass::Control => &mut *queued_control_bytes,
                    OutboundClass::Telemetry => &mut *queued_telemetry_bytes,
                };
                *counter = counter.saturating_sub(chunk.bytes.len());
                active_chunk.insert(OutboundChunkState { chunk, written: 0 })
            }
        };

        let remaining = &state.chunk.bytes[state.written..];
        match write_payload(remaining) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "roomport_write_zero",
                ));
            }
            Ok(bytes_written) => {
                state.written = state.written.saturating_add(bytes_written);
                if state.written >= state.chunk.bytes.len() {
                    *active_chunk = None;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                if diag {
                    info!(
                        class = ?state.chunk.class,
                        written = state.written,
                        total = state.chunk.bytes.len(),
                        queued_len = queued_chunks.len(),
                        "roomport_diag_flush_would_block"
                    );
                }
                return Ok(());
            }
            Err(err) => return Err(err),
        }
    }
}
