use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::content::ArchetypeTable;
use crate::protocol::{ClientRequest, JoinRoom, Outbound, ServerReply};
use crate::room::{DamageRequest, PlayerId, PlayerSpawn, Room, RoomConfig, RoomEvent, RoomId};
use crate::runtime::PopulationSample;

#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    pub room: RoomConfig,
    pub seed: Option<u64>,
    pub allow_debug_commands: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    Room,
    Player(PlayerId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub room: RoomId,
    pub audience: Audience,
    pub payload: Outbound,
}

/// Owns every room and the shared archetype table. Rooms are created on the first join and
/// dropped once their last player leaves.
#[derive(Debug)]
pub struct RoomRegistry {
    archetypes: Arc<ArchetypeTable>,
    config: RegistryConfig,
    rooms: BTreeMap<RoomId, Room>,
    rooms_created: u64,
}

impl RoomRegistry {
    pub fn new(archetypes: Arc<ArchetypeTable>, config: RegistryConfig) -> Self {
        Self {
            archetypes,
            config,
            rooms: BTreeMap::new(),
            rooms_created: 0,
        }
    }

    pub fn room(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn population(&self) -> PopulationSample {
        PopulationSample {
            rooms: self.rooms.len(),
            enemies: self.rooms.values().map(Room::enemy_count).sum(),
            players: self.rooms.values().map(Room::player_count).sum(),
        }
    }

    pub fn handle_request(
        &mut self,
        sender: &PlayerId,
        request: ClientRequest,
        now: u64,
    ) -> Vec<Delivery> {
        let request = match request {
            ClientRequest::JoinRoom(join) => return self.join(join, now),
            other => other,
        };
        let room_id = request.room().clone();

        let allow_debug = self.config.allow_debug_commands;
        let Some(room) = self.rooms.get_mut(&room_id) else {
            debug!(room = %room_id, request = request.type_name(), "request_ignored_unknown_room");
            return Vec::new();
        };
        let mut reply = None;
        match request {
            ClientRequest::JoinRoom(_) => {}
            ClientRequest::LeaveRoom(_) => {
                room.remove_player(sender, now);
            }
            ClientRequest::UpdatePlayer(update) => {
                room.update_player(
                    sender,
                    update.position.into(),
                    update.rotation,
                    update.stealthed,
                );
            }
            ClientRequest::HealPlayer(heal) => {
                room.heal_player(sender, heal.amount);
            }
            ClientRequest::DamageEnemy(damage) => {
                let request = DamageRequest {
                    attacker: sender.clone(),
                    enemy_id: damage.enemy_id,
                    amount: damage.amount,
                    hit_position: damage.hit_pos.into(),
                    damage_type: damage.damage_type,
                    is_critical: damage.is_critical,
                };
                if let Some(result) = room.handle_damage_request(&request, now) {
                    reply = Some(ServerReply::DamageConfirmed {
                        enemy_id: result.enemy_id,
                        damage: result.damage,
                        new_health: result.new_health,
                        was_killed: result.was_killed,
                        is_critical: request.is_critical,
                        damage_type: request.damage_type,
                    });
                }
            }
            ClientRequest::RequestEnemySnapshot(_) => {
                reply = Some(ServerReply::EnemySnapshot {
                    enemies: room.enemy_snapshot(),
                });
            }
            ClientRequest::ApplyStatusEffect(status) => {
                room.apply_status_effect(
                    status.enemy_id,
                    status.effect_type,
                    status.duration_ms,
                    now,
                );
            }
            ClientRequest::StartGame(start) => {
                room.start_game(&start.initiator_id, now);
            }
            ClientRequest::DebugSpawn(spawn) => {
                if allow_debug {
                    room.spawn_enemy(&spawn.archetype, now);
                } else {
                    debug!(room = %room_id, player = %sender, "debug_spawn_disabled");
                }
            }
        }

        let mut deliveries = broadcast(&room_id, room.drain_events());
        if let Some(reply) = reply {
            deliveries.push(Delivery {
                room: room_id.clone(),
                audience: Audience::Player(sender.clone()),
                payload: reply.into(),
            });
        }
        self.close_if_empty(&room_id);
        deliveries
    }

    fn join(&mut self, join: JoinRoom, now: u64) -> Vec<Delivery> {
        let room_id = join.room.clone();
        if !self.rooms.contains_key(&room_id) {
            let room = self.create_room(room_id.clone());
            self.rooms.insert(room_id.clone(), room);
        }
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return Vec::new();
        };
        let spawn = PlayerSpawn {
            id: join.player_id.clone(),
            weapon: join.weapon,
            subclass: join.subclass,
            position: join.position.map(Into::into),
        };
        if !room.add_player(spawn, now) {
            return Vec::new();
        }
        let joined = ServerReply::Joined {
            room: room_id.clone(),
            player_id: join.player_id.clone(),
            kill_count: room.kill_count(),
            game_started: room.is_started(),
        };
        let mut deliveries = broadcast(&room_id, room.drain_events());
        deliveries.push(Delivery {
            room: room_id,
            audience: Audience::Player(join.player_id),
            payload: joined.into(),
        });
        deliveries
    }

    pub fn tick(&mut self, now: u64) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        for (room_id, room) in &mut self.rooms {
            room.tick(now);
            deliveries.extend(broadcast(room_id, room.drain_events()));
        }
        deliveries
    }

    fn create_room(&mut self, id: RoomId) -> Room {
        let index = self.rooms_created;
        self.rooms_created += 1;
        let rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ index.wrapping_mul(0x9E37_79B9_7F4A_7C15)),
            None => StdRng::from_entropy(),
        };
        info!(room = %id, index, seeded = self.config.seed.is_some(), "room_created");
        Room::new(
            id,
            Arc::clone(&self.archetypes),
            self.config.room.clone(),
            rng,
        )
    }

    fn close_if_empty(&mut self, id: &RoomId) {
        if self.rooms.get(id).is_some_and(Room::is_empty) {
            self.rooms.remove(id);
            info!(room = %id, "room_closed");
        }
    }
}

fn broadcast(room_id: &RoomId, events: Vec<RoomEvent>) -> Vec<Delivery> {
    events
        .into_iter()
        .map(|event| Delivery {
            room: room_id.clone(),
            audience: Audience::Room,
            payload: event.into(),
        })
        .collect()
}
