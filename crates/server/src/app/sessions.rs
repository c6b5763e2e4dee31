use std::collections::BTreeMap;

use sim::protocol::LeaveRoom;
use sim::{
    decode_request, Audience, ClientRequest, Delivery, LoopMetricsSnapshot, MetricsHandle,
    Outbound, PlayerId, RoomId, RoomRegistry, ServerReply,
};
use tracing::{debug, info, warn};

use super::roomport::{ConnectionId, OutboundClass};

const SYNC_COMMAND: &str = "sync";
const SYNC_OK_LINE: &str = "ok: sync";
const METRICS_COMMAND: &str = "metrics";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Session {
    room: RoomId,
    player: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Outgoing {
    pub(crate) conn: ConnectionId,
    pub(crate) class: OutboundClass,
    pub(crate) line: String,
}

#[derive(Debug)]
pub(crate) struct Dispatcher {
    registry: RoomRegistry,
    sessions: BTreeMap<ConnectionId, Session>,
    metrics: MetricsHandle,
}

impl Dispatcher {
    pub(crate) fn new(registry: RoomRegistry, metrics: MetricsHandle) -> Self {
        Self {
            registry,
            sessions: BTreeMap::new(),
            metrics,
        }
    }

    pub(crate) fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub(crate) fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn handle_line(&mut self, conn: ConnectionId, line: &str, now: u64) -> Vec<Outgoing> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }
        if line == SYNC_COMMAND {
            return vec![Outgoing {
                conn,
                class: OutboundClass::Control,
                line: SYNC_OK_LINE.to_string(),
            }];
        }
        if line == METRICS_COMMAND {
            return vec![Outgoing {
                conn,
                class: OutboundClass::Control,
                line: metrics_line(self.metrics.snapshot()),
            }];
        }

        let request = match decode_request(line) {
            Ok(request) => request,
            Err(err) => {
                warn!(conn = %conn, error = %err, "roomport_request_rejected");
                return reject(conn, err.reason());
            }
        };

        match request {
            ClientRequest::JoinRoom(join) => {
                if self.sessions.contains_key(&conn) {
                    return reject(conn, "already-joined".to_string());
                }
                let session = Session {
                    room: join.room.clone(),
                    player: join.player_id.clone(),
                };
                let sender = join.player_id.clone();
                let deliveries =
                    self.registry
                        .handle_request(&sender, ClientRequest::JoinRoom(join), now);
                let joined = deliveries.iter().any(|delivery| {
                    matches!(delivery.payload, Outbound::Reply(ServerReply::Joined { .. }))
                });
                if !joined {
                    return reject(conn, "player-id-taken".to_string());
                }
                info!(conn = %conn, room = %session.room, player = %session.player, "session_bound");
                self.sessions.insert(conn, session);
                self.route(deliveries)
            }
            request => {
                let Some(session) = self.sessions.get(&conn) else {
                    debug!(conn = %conn, request = request.type_name(), "request_before_join");
                    return reject(conn, "not-joined".to_string());
                };
                if request.room() != &session.room {
                    debug!(
                        conn = %conn,
                        bound_room = %session.room,
                        room = %request.room(),
                        "request_room_mismatch"
                    );
                    return reject(conn, "room-mismatch".to_string());
                }
                let leaving = matches!(request, ClientRequest::LeaveRoom(_));
                let sender = session.player.clone();
                let deliveries = self.registry.handle_request(&sender, request, now);
                let outgoing = self.route(deliveries);
                if leaving {
                    self.sessions.remove(&conn);
                    info!(conn = %conn, player = %sender, "session_unbound");
                }
                outgoing
            }
        }
    }

    pub(crate) fn disconnect(&mut self, conn: ConnectionId, now: u64) -> Vec<Outgoing> {
        let Some(session) = self.sessions.remove(&conn) else {
            return Vec::new();
        };
        info!(conn = %conn, room = %session.room, player = %session.player, "session_dropped");
        let leave = ClientRequest::LeaveRoom(LeaveRoom {
            room: session.room.clone(),
        });
        let deliveries = self.registry.handle_request(&session.player, leave, now);
        self.route(deliveries)
    }

    pub(crate) fn tick(&mut self, now: u64) -> Vec<Outgoing> {
        let deliveries = self.registry.tick(now);
        self.route(deliveries)
    }

    fn route(&self, deliveries: Vec<Delivery>) -> Vec<Outgoing> {
        let mut outgoing = Vec::new();
        for delivery in deliveries {
            let line = match delivery.payload.to_json() {
                Ok(line) => line,
                Err(err) => {
                    warn!(
                        payload = delivery.payload.type_name(),
                        error = %err,
                        "roomport_encode_failed"
                    );
                    continue;
                }
            };
            let class = if delivery.payload.is_telemetry() {
                OutboundClass::Telemetry
            } else {
                OutboundClass::Control
            };
            for (conn, session) in &self.sessions {
                if session.room != delivery.room {
                    continue;
                }
                if let Audience::Player(player) = &delivery.audience {
                    if &session.player != player {
                        continue;
                    }
                }
                outgoing.push(Outgoing {
                    conn: *conn,
                    class,
                    line: line.clone(),
                });
            }
        }
        outgoing
    }
}

fn metrics_line(snapshot: LoopMetricsSnapshot) -> String {
    format!(
        "ok: metrics tps:{:.1} tick_ms:{:.3} rooms:{} enemies:{} players:{}",
        snapshot.tps, snapshot.tick_time_ms, snapshot.rooms, snapshot.enemies, snapshot.players
    )
}

fn reject(conn: ConnectionId, reason: String) -> Vec<Outgoing> {
    let reply = Outbound::from(ServerReply::RequestRejected { reason });
    match reply.to_json() {
        Ok(line) => vec![Outgoing {
            conn,
            class: OutboundClass::Control,
            line,
        }],
        Err(err) => {
            warn!(conn = %conn, error = %err, "roomport_encode_failed");
            Vec::new()
        }
    }
}
