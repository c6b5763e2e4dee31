//! Inbound request and outbound reply payloads.
//!
//! Requests are JSON objects discriminated by `type`. Decoding goes through a
//! [`serde_json::Value`] first so that a bad field is reported with its full path
//! (`hitPos.x`, `durationMs`, ...).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::math::Position;
use crate::room::{EnemyId, EnemyView, PlayerId, RoomEvent, RoomId, StatusEffectKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room: RoomId,
    pub player_id: PlayerId,
    pub weapon: Option<String>,
    pub subclass: Option<String>,
    pub position: Option<Position>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoom {
    pub room: RoomId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlayer {
    pub room: RoomId,
    pub position: Position,
    pub rotation: f32,
    pub stealthed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealPlayer {
    pub room: RoomId,
    pub amount: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DamageEnemy {
    pub room: RoomId,
    pub enemy_id: EnemyId,
    pub amount: f32,
    pub hit_pos: Position,
    pub damage_type: Option<String>,
    #[serde(default)]
    pub is_critical: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnemySnapshot {
    pub room: RoomId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyStatusEffect {
    pub room: RoomId,
    pub enemy_id: EnemyId,
    pub effect_type: StatusEffectKind,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGame {
    pub room: RoomId,
    pub initiator_id: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSpawn {
    pub room: RoomId,
    pub archetype: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientRequest {
    JoinRoom(JoinRoom),
    LeaveRoom(LeaveRoom),
    UpdatePlayer(UpdatePlayer),
    HealPlayer(HealPlayer),
    DamageEnemy(DamageEnemy),
    RequestEnemySnapshot(RequestEnemySnapshot),
    ApplyStatusEffect(ApplyStatusEffect),
    StartGame(StartGame),
    DebugSpawn(DebugSpawn),
}

impl ClientRequest {
    pub fn room(&self) -> &RoomId {
        match self {
            Self::JoinRoom(request) => &request.room,
            Self::LeaveRoom(request) => &request.room,
            Self::UpdatePlayer(request) => &request.room,
            Self::HealPlayer(request) => &request.room,
            Self::DamageEnemy(request) => &request.room,
            Self::RequestEnemySnapshot(request) => &request.room,
            Self::ApplyStatusEffect(request) => &request.room,
            Self::StartGame(request) => &request.room,
            Self::DebugSpawn(request) => &request.room,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::JoinRoom(_) => "join-room",
            Self::LeaveRoom(_) => "leave-room",
            Self::UpdatePlayer(_) => "update-player",
            Self::HealPlayer(_) => "heal-player",
            Self::DamageEnemy(_) => "damage-enemy",
            Self::RequestEnemySnapshot(_) => "request-enemy-snapshot",
            Self::ApplyStatusEffect(_) => "apply-status-effect",
            Self::StartGame(_) => "start-game",
            Self::DebugSpawn(_) => "debug-spawn",
        }
    }
}

#[derive(Debug, Error)]
pub enum RequestDecodeError {
    #[error("request is not valid JSON: {0}")]
    Syntax(#[source] serde_json::Error),
    #[error("request has no string `type` field")]
    MissingType,
    #[error("unknown request type `{0}`")]
    UnknownType(String),
    #[error("invalid `{kind}` request at `{path}`: {source}")]
    InvalidField {
        kind: &'static str,
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RequestDecodeError {
    pub fn reason(&self) -> String {
        match self {
            Self::Syntax(_) => "malformed-json".to_string(),
            Self::MissingType => "missing-type".to_string(),
            Self::UnknownType(kind) => format!("unknown-type:{kind}"),
            Self::InvalidField { path, .. } => format!("invalid-field:{path}"),
        }
    }
}

pub fn decode_request(line: &str) -> Result<ClientRequest, RequestDecodeError> {
    let value: Value = serde_json::from_str(line).map_err(RequestDecodeError::Syntax)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(RequestDecodeError::MissingType)?
        .to_string();
    match kind.as_str() {
        "join-room" => decode_body("join-room", value).map(ClientRequest::JoinRoom),
        "leave-room" => decode_body("leave-room", value).map(ClientRequest::LeaveRoom),
        "update-player" => decode_body("update-player", value).map(ClientRequest::UpdatePlayer),
        "heal-player" => decode_body("heal-player", value).map(ClientRequest::HealPlayer),
        "damage-enemy" => decode_body("damage-enemy", value).map(ClientRequest::DamageEnemy),
        "request-enemy-snapshot" => decode_body("request-enemy-snapshot", value)
            .map(ClientRequest::RequestEnemySnapshot),
        "apply-status-effect" => {
            decode_body("apply-status-effect", value).map(ClientRequest::ApplyStatusEffect)
        }
        "start-game" => decode_body("start-game", value).map(ClientRequest::StartGame),
        "debug-spawn" => decode_body("debug-spawn", value).map(ClientRequest::DebugSpawn),
        _ => Err(RequestDecodeError::UnknownType(kind)),
    }
}

fn decode_body<T: DeserializeOwned>(
    kind: &'static str,
    value: Value,
) -> Result<T, RequestDecodeError> {
    serde_path_to_error::deserialize(value).map_err(|err| {
        let path = err.path().to_string();
        RequestDecodeError::InvalidField {
            kind,
            path,
            source: err.into_inner(),
        }
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerReply {
    Joined {
        room: RoomId,
        player_id: PlayerId,
        kill_count: u32,
        game_started: bool,
    },
    DamageConfirmed {
        enemy_id: EnemyId,
        damage: f32,
        new_health: f32,
        was_killed: bool,
        is_critical: bool,
        damage_type: Option<String>,
    },
    EnemySnapshot {
        enemies: Vec<EnemyView>,
    },
    RequestRejected {
        reason: String,
    },
}

impl ServerReply {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Joined { .. } => "joined",
            Self::DamageConfirmed { .. } => "damage-confirmed",
            Self::EnemySnapshot { .. } => "enemy-snapshot",
            Self::RequestRejected { .. } => "request-rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Event(RoomEvent),
    Reply(ServerReply),
}

impl Outbound {
    pub fn is_telemetry(&self) -> bool {
        match self {
            Self::Event(event) => event.is_telemetry(),
            Self::Reply(_) => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Event(event) => event.type_name(),
            Self::Reply(reply) => reply.type_name(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<RoomEvent> for Outbound {
    fn from(event: RoomEvent) -> Self {
        Self::Event(event)
    }
}

impl From<ServerReply> for Outbound {
    fn from(reply: ServerReply) -> Self {
        Self::Reply(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_damage_request_with_defaults() {
        let request = decode_request(
            r#"{"type":"damage-enemy","room":"r1","enemyId":7,"amount":15.5,"hitPos":{"x":1,"y":0,"z":2}}"#,
        )
        .expect("decode");
        let ClientRequest::DamageEnemy(damage) = request else {
            panic!("unexpected {request:?}");
        };
        assert_eq!(damage.room, RoomId::new("r1"));
        assert_eq!(damage.enemy_id, EnemyId(7));
        assert_eq!(damage.amount, 15.5);
        assert_eq!(damage.hit_pos, Position::new(1.0, 0.0, 2.0));
        assert!(!damage.is_critical);
        assert_eq!(damage.damage_type, None);
    }

    #[test]
    fn decodes_status_effect_kind() {
        let request = decode_request(
            r#"{"type":"apply-status-effect","room":"r1","enemyId":3,"effectType":"freeze","durationMs":1500}"#,
        )
        .expect("decode");
        assert_eq!(
            request,
            ClientRequest::ApplyStatusEffect(ApplyStatusEffect {
                room: RoomId::new("r1"),
                enemy_id: EnemyId(3),
                effect_type: StatusEffectKind::Freeze,
                duration_ms: 1500,
            })
        );
        assert_eq!(request.type_name(), "apply-status-effect");
        assert_eq!(request.room().as_str(), "r1");
    }

    #[test]
    fn invalid_field_reports_its_path() {
        let err = decode_request(
            r#"{"type":"damage-enemy","room":"r1","enemyId":7,"amount":5,"hitPos":{"x":"left","y":0,"z":0}}"#,
        )
        .expect_err("bad field");
        match &err {
            RequestDecodeError::InvalidField { kind, path, .. } => {
                assert_eq!(*kind, "damage-enemy");
                assert_eq!(path, "hitPos.x");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.reason(), "invalid-field:hitPos.x");
    }

    #[test]
    fn rejects_unknown_and_untyped_requests() {
        assert!(matches!(
            decode_request(r#"{"type":"fly","room":"r1"}"#),
            Err(RequestDecodeError::UnknownType(kind)) if kind == "fly"
        ));
        assert!(matches!(
            decode_request(r#"{"room":"r1"}"#),
            Err(RequestDecodeError::MissingType)
        ));
        assert!(matches!(
            decode_request("not json"),
            Err(RequestDecodeError::Syntax(_))
        ));
    }

    #[test]
    fn request_serializes_with_type_tag() {
        let request = ClientRequest::StartGame(StartGame {
            room: RoomId::new("r1"),
            initiator_id: PlayerId::new("p1"),
        });
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["type"], "start-game");
        assert_eq!(value["initiatorId"], "p1");
        assert_eq!(decode_request(&value.to_string()).expect("decode"), request);
    }

    #[test]
    fn reply_wire_shape() {
        let reply = Outbound::from(ServerReply::DamageConfirmed {
            enemy_id: EnemyId(4),
            damage: 15.0,
            new_health: 0.0,
            was_killed: true,
            is_critical: true,
            damage_type: Some("fire".to_string()),
        });
        let value: Value = serde_json::from_str(&reply.to_json().expect("json")).expect("value");
        assert_eq!(value["type"], "damage-confirmed");
        assert_eq!(value["enemyId"], 4);
        assert_eq!(value["newHealth"], 0.0);
        assert_eq!(value["wasKilled"], true);
        assert_eq!(value["damageType"], "fire");
        assert!(!reply.is_telemetry());
    }
}
