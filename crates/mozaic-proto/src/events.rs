//! Event catalogue shared by match clients, servers and log readers.

use serde::{Deserialize, Serialize};

use crate::{
    error::RegistryError,
    event_type::{Correlated, EventType, RequestId},
    registry::{EventRegistry, RegistryBuilder},
};

// ---- Session ----

/// A client announcing itself to the match server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RegisterClient {
    pub client_id: u32,
    pub token: String,
}

/// Ask the server to start a match on a map.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StartGame {
    pub map_path: String,
    pub max_turns: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaderConnected {}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaderDisconnected {}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowerConnected {}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowerDisconnected {}

// ---- Local lifecycle ----
//
// Dispatched by a client on its own bus when its connection comes up or goes
// down. They never cross the wire.

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Connected {}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Disconnected {
    pub reason: String,
}

// ---- Latency probes ----

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Ping {
    pub request_id: RequestId,
    pub t_ms: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Pong {
    pub request_id: RequestId,
    pub t_ms: u32,
}

impl Correlated for Ping {
    fn request_id(&self) -> RequestId {
        self.request_id
    }

    fn set_request_id(&mut self, id: RequestId) {
        self.request_id = id;
    }
}

impl Correlated for Pong {
    fn request_id(&self) -> RequestId {
        self.request_id
    }

    fn set_request_id(&mut self, id: RequestId) {
        self.request_id = id;
    }
}

// ---- Planet wars ----

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Planet {
    pub ship_count: u64,
    pub x: f64,
    pub y: f64,
    pub owner: Option<u64>,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Expedition {
    pub id: u64,
    pub ship_count: u64,
    pub origin: String,
    pub destination: String,
    pub owner: u64,
    pub turns_remaining: u64,
}

/// Full game state as sent to bots each turn.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct State {
    pub planets: Vec<Planet>,
    pub expeditions: Vec<Expedition>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GameStep {
    pub turn_num: u64,
    pub state: State,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GameFinished {
    pub turn_num: u64,
    pub state: State,
}

/// Raw bot output to forward to the server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClientSend {
    pub data: String,
}

pub const REGISTER_CLIENT: EventType<RegisterClient> = EventType::json(1, "register_client");
pub const START_GAME: EventType<StartGame> = EventType::json(3, "start_game");
pub const LEADER_CONNECTED: EventType<LeaderConnected> = EventType::json(10, "leader_connected");
pub const LEADER_DISCONNECTED: EventType<LeaderDisconnected> =
    EventType::json(11, "leader_disconnected");
pub const FOLLOWER_CONNECTED: EventType<FollowerConnected> =
    EventType::json(12, "follower_connected");
pub const FOLLOWER_DISCONNECTED: EventType<FollowerDisconnected> =
    EventType::json(13, "follower_disconnected");
pub const CONNECTED: EventType<Connected> = EventType::json(14, "connected");
pub const DISCONNECTED: EventType<Disconnected> = EventType::json(15, "disconnected");
pub const PING: EventType<Ping> = EventType::binary(30, "ping");
pub const PONG: EventType<Pong> = EventType::binary(31, "pong");
pub const GAME_STEP: EventType<GameStep> = EventType::json(32, "game_step");
pub const GAME_FINISHED: EventType<GameFinished> = EventType::json(33, "game_finished");
pub const CLIENT_SEND: EventType<ClientSend> = EventType::json(34, "client_send");

/// Register every catalogue event type.
pub fn register_standard(builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
    builder
        .register(REGISTER_CLIENT)?
        .register(START_GAME)?
        .register(LEADER_CONNECTED)?
        .register(LEADER_DISCONNECTED)?
        .register(FOLLOWER_CONNECTED)?
        .register(FOLLOWER_DISCONNECTED)?
        .register(CONNECTED)?
        .register(DISCONNECTED)?
        .register(PING)?
        .register(PONG)?
        .register(GAME_STEP)?
        .register(GAME_FINISHED)?
        .register(CLIENT_SEND)?;
    Ok(())
}

/// Registry holding the whole catalogue.
pub fn standard_registry() -> Result<EventRegistry, RegistryError> {
    let mut builder = EventRegistry::builder();
    register_standard(&mut builder)?;
    Ok(builder.build())
}
