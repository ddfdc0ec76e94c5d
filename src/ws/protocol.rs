//! WebSocket protocol message definitions
//! These are the wire types for client-server communication
//!
//! Every frame is a JSON envelope `{type, id, payload}`. The integer `type`
//! selects the payload shape; inbound frames are decoded by reading the
//! discriminant first and then only the matching payload.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::combat::ShotEvent;
use crate::game::vehicle::{Direction, Vehicle, VehicleStatus};

/// Envelope `type` codes
pub mod kind {
    pub const CONNECT_NOTICE: u8 = 0;
    pub const CONFIG: u8 = 1;
    pub const GAME_STATE: u8 = 2;
    pub const SHOT: u8 = 3;
    pub const REJECTED: u8 = 4;
    pub const VEHICLE_CHANGE: u8 = 5;
    pub const NO_CAPACITY: u8 = 6;

    pub const COMMAND: u8 = 15;
    pub const REGISTER: u8 = 16;
    pub const HIT: u8 = 17;
    pub const RESPAWN: u8 = 18;
}

/// Envelope `id` used for server-originated broadcasts
pub const BROADCAST_ID: &str = "broadcast";
/// Envelope `id` sent to map viewers
pub const VIEWER_ID: &str = "viewer";

// ============================================================================
// Inbound
// ============================================================================

/// Envelope as it arrives, payload left undecoded
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type", alias = "Type")]
    kind: i64,
    #[serde(default, alias = "ID")]
    id: String,
    #[serde(default, alias = "Payload")]
    payload: Value,
}

/// Held movement buttons plus an optional action
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CommandPayload {
    #[serde(default, alias = "Up")]
    pub up: bool,
    #[serde(default, alias = "Down")]
    pub down: bool,
    #[serde(default, alias = "Left")]
    pub left: bool,
    #[serde(default, alias = "Right")]
    pub right: bool,
    #[serde(default, alias = "Action")]
    pub action: String,
}

impl CommandPayload {
    pub fn direction(&self) -> Direction {
        Direction::from_buttons(self.up, self.down, self.left, self.right)
    }

    pub fn wants_fire(&self) -> bool {
        self.action == "fire"
    }
}

/// Handle registration (16) and respawn (18) requests share one shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlePayload {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub success: bool,
}

/// A client's report that `username` hit `victim`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitPayload {
    /// Shooter handle
    pub username: String,
    pub victim: String,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMsg {
    /// Movement/fire command
    Command(CommandPayload),
    /// Request to claim a handle
    Register(HandlePayload),
    /// Hit report
    Hit(HitPayload),
    /// Request a fresh vehicle
    Respawn(HandlePayload),
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub id: String,
    pub msg: ClientMsg,
}

impl ClientMsg {
    /// Decode one text frame
    pub fn decode(text: &str) -> Result<Inbound, ProtocolError> {
        let raw: RawEnvelope = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
        let payload = raw.payload;

        let msg = match u8::try_from(raw.kind) {
            Ok(kind::COMMAND) => Self::Command(from_payload(payload)?),
            Ok(kind::REGISTER) => Self::Register(from_payload(payload)?),
            Ok(kind::HIT) => Self::Hit(from_payload(payload)?),
            Ok(kind::RESPAWN) => Self::Respawn(from_payload(payload)?),
            _ => return Err(ProtocolError::UnknownType(raw.kind)),
        };

        Ok(Inbound { id: raw.id, msg })
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Command(_) => "command",
            Self::Register(_) => "register",
            Self::Hit(_) => "hit",
            Self::Respawn(_) => "respawn",
        }
    }
}

fn from_payload<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, ProtocolError> {
    // A missing payload decodes like an empty object
    let payload = if payload.is_null() {
        Value::Object(Default::default())
    } else {
        payload
    };
    serde_json::from_value(payload).map_err(ProtocolError::Malformed)
}

// ============================================================================
// Outbound
// ============================================================================

/// Plain text notice (connect, rejection, no capacity)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticePayload {
    pub notice: String,
}

/// Session configuration sent once a vehicle is assigned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPayload {
    /// Row-major grid, one byte per cell
    #[serde(with = "base64_bytes")]
    pub map: Bytes,
    pub map_size_x: u32,
    pub map_size_y: u32,
    pub tank_coord_x: u32,
    pub tank_coord_y: u32,
    pub tank_facing: Direction,
    /// Broadcast interval
    pub tick_interval_ms: u64,
    /// Simulation interval
    pub map_render_ms: u64,
    pub username: String,
}

/// Public fields of one vehicle in a game-state broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub x: u32,
    pub y: u32,
    pub reload: u32,
    pub trigger: bool,
    #[serde(rename = "gunfacing")]
    pub gun_facing: Direction,
    pub status: VehicleStatus,
    pub orientation: Direction,
    /// Owner handle
    pub id: String,
    #[serde(rename = "point")]
    pub points: u32,
}

impl From<&Vehicle> for VehicleSnapshot {
    fn from(v: &Vehicle) -> Self {
        Self {
            x: v.x,
            y: v.y,
            reload: v.reload,
            trigger: v.trigger,
            gun_facing: v.gun_facing,
            status: v.status,
            orientation: v.orientation,
            id: v.handle.clone(),
            points: v.points,
        }
    }
}

/// Periodic global state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStatePayload {
    pub tanks: Vec<VehicleSnapshot>,
    #[serde(
        rename = "ShotEvents",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub shot_events: Vec<ShotEvent>,
}

/// A vehicle appeared or disappeared
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleChangePayload {
    pub username: String,
    /// Whether the vehicle is alive after the change
    #[serde(rename = "turnto")]
    pub alive: bool,
    pub x: u32,
    pub y: u32,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMsg {
    ConnectNotice(NoticePayload),
    Config(ConfigPayload),
    GameState(GameStatePayload),
    Shot(ShotEvent),
    Rejected(NoticePayload),
    VehicleChange(VehicleChangePayload),
    NoCapacity(NoticePayload),
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: u8,
    id: &'a str,
    payload: &'a T,
}

impl ServerMsg {
    pub fn connect_notice() -> Self {
        Self::ConnectNotice(notice("websocket connect success"))
    }

    pub fn rejected() -> Self {
        Self::Rejected(notice("username is empty or already exists"))
    }

    pub fn no_capacity() -> Self {
        Self::NoCapacity(notice("no free spawn point"))
    }

    /// Envelope `type` code
    pub fn kind(&self) -> u8 {
        match self {
            Self::ConnectNotice(_) => kind::CONNECT_NOTICE,
            Self::Config(_) => kind::CONFIG,
            Self::GameState(_) => kind::GAME_STATE,
            Self::Shot(_) => kind::SHOT,
            Self::Rejected(_) => kind::REJECTED,
            Self::VehicleChange(_) => kind::VEHICLE_CHANGE,
            Self::NoCapacity(_) => kind::NO_CAPACITY,
        }
    }

    /// Serialize into a text frame addressed with `id`
    pub fn encode(&self, id: &str) -> Result<String, ProtocolError> {
        let kind = self.kind();
        let result = match self {
            Self::ConnectNotice(p) | Self::Rejected(p) | Self::NoCapacity(p) => {
                serde_json::to_string(&Envelope { kind, id, payload: p })
            }
            Self::Config(p) => serde_json::to_string(&Envelope { kind, id, payload: p }),
            Self::GameState(p) => serde_json::to_string(&Envelope { kind, id, payload: p }),
            Self::Shot(p) => serde_json::to_string(&Envelope { kind, id, payload: p }),
            Self::VehicleChange(p) => serde_json::to_string(&Envelope { kind, id, payload: p }),
        };
        result.map_err(ProtocolError::Encode)
    }
}

fn notice(text: &str) -> NoticePayload {
    NoticePayload {
        notice: text.to_string(),
    }
}

/// Byte buffers travel as base64 strings
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// Protocol errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(serde_json::Error),

    #[error("Unknown message type: {0}")]
    UnknownType(i64),

    #[error("Failed to encode message: {0}")]
    Encode(serde_json::Error),
}
