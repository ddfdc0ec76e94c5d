//! Vehicle entities and the discrete directions they move and aim in

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Nine discrete directions, coded like a numeric keypad (5 = none)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Direction {
    DownLeft,
    Down,
    DownRight,
    Left,
    None,
    Right,
    UpLeft,
    Up,
    UpRight,
}

impl Default for Direction {
    fn default() -> Self {
        Self::None
    }
}

impl Direction {
    /// Wire code of this direction
    pub fn code(self) -> u8 {
        match self {
            Self::DownLeft => 1,
            Self::Down => 2,
            Self::DownRight => 3,
            Self::Left => 4,
            Self::None => 5,
            Self::Right => 6,
            Self::UpLeft => 7,
            Self::Up => 8,
            Self::UpRight => 9,
        }
    }

    /// Unit grid step for this direction (y grows downwards)
    pub fn delta(self) -> (i64, i64) {
        match self {
            Self::Up => (0, -1),
            Self::UpRight => (1, -1),
            Self::Right => (1, 0),
            Self::DownRight => (1, 1),
            Self::Down => (0, 1),
            Self::DownLeft => (-1, 1),
            Self::Left => (-1, 0),
            Self::UpLeft => (-1, -1),
            Self::None => (0, 0),
        }
    }

    /// Direction from held movement buttons.
    ///
    /// Opposite buttons cancel each other; two perpendicular buttons give a
    /// diagonal.
    pub fn from_buttons(up: bool, down: bool, left: bool, right: bool) -> Self {
        let vertical = match (up, down) {
            (true, false) => -1,
            (false, true) => 1,
            _ => 0,
        };
        let horizontal = match (left, right) {
            (true, false) => -1,
            (false, true) => 1,
            _ => 0,
        };
        match (horizontal, vertical) {
            (-1, -1) => Self::UpLeft,
            (0, -1) => Self::Up,
            (1, -1) => Self::UpRight,
            (-1, 0) => Self::Left,
            (1, 0) => Self::Right,
            (-1, 1) => Self::DownLeft,
            (0, 1) => Self::Down,
            (1, 1) => Self::DownRight,
            _ => Self::None,
        }
    }
}

impl From<Direction> for u8 {
    fn from(dir: Direction) -> Self {
        dir.code()
    }
}

impl TryFrom<u8> for Direction {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            1 => Self::DownLeft,
            2 => Self::Down,
            3 => Self::DownRight,
            4 => Self::Left,
            5 => Self::None,
            6 => Self::Right,
            7 => Self::UpLeft,
            8 => Self::Up,
            9 => Self::UpRight,
            other => return Err(format!("invalid direction code {}", other)),
        })
    }
}

/// Whether a vehicle is on the map or has been released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum VehicleStatus {
    Free,
    Taken,
}

impl From<VehicleStatus> for u8 {
    fn from(status: VehicleStatus) -> Self {
        match status {
            VehicleStatus::Free => 0,
            VehicleStatus::Taken => 1,
        }
    }
}

impl TryFrom<u8> for VehicleStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Free),
            1 => Ok(Self::Taken),
            other => Err(format!("invalid vehicle status {}", other)),
        }
    }
}

/// Stable identity of one vehicle instance.
///
/// A respawn produces a new id, which is how a session tells whether the
/// vehicle it remembers is still the one on the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VehicleId(Uuid);

impl VehicleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for VehicleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Authoritative vehicle state (owned by the world)
#[derive(Debug, Clone)]
pub struct Vehicle {
    pub id: VehicleId,
    /// Handle of the owning session
    pub handle: String,

    // Position (footprint centre)
    pub x: u32,
    pub y: u32,

    // Movement and aim
    pub orientation: Direction,
    pub gun_facing: Direction,

    // Combat
    pub reload: u32,
    pub trigger: bool,

    pub status: VehicleStatus,
    pub points: u32,
}

impl Vehicle {
    pub fn new(handle: &str, x: u32, y: u32, points: u32) -> Self {
        Self {
            id: VehicleId::new(),
            handle: handle.to_string(),
            x,
            y,
            orientation: Direction::None,
            gun_facing: Direction::Down,
            reload: 0,
            trigger: false,
            status: VehicleStatus::Taken,
            points,
        }
    }

    pub fn is_taken(&self) -> bool {
        self.status == VehicleStatus::Taken
    }

    /// Apply a movement command: the vehicle drives towards `dir` from the
    /// next tick on, and the gun follows any real movement direction.
    pub fn steer(&mut self, dir: Direction) {
        self.orientation = dir;
        if dir != Direction::None {
            self.gun_facing = dir;
        }
    }
}
