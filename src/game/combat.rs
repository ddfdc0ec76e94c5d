//! Combat system - reload countdown and shot events

use serde::{Deserialize, Serialize};

use super::vehicle::{Direction, Vehicle};

/// Cells between a vehicle's centre and its muzzle
pub const MUZZLE_DISTANCE: i64 = 2;

/// A single fire action, broadcast once and never stored on the vehicle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShotEvent {
    /// Handle of the shooter
    #[serde(rename = "username")]
    pub shooter: String,
    /// Muzzle cell
    pub x: u32,
    pub y: u32,
    /// Gun facing at the moment of firing
    #[serde(rename = "orientation")]
    pub facing: Direction,
}

/// Combat system for managing reloads and shots
pub struct CombatSystem;

impl CombatSystem {
    /// Check if a vehicle can fire (reload check)
    pub fn can_fire(reload: u32) -> bool {
        reload == 0
    }

    /// Reload remaining after one simulation tick
    pub fn update_reload(reload: u32, step: u32) -> u32 {
        reload.saturating_sub(step)
    }

    /// Muzzle cell for a vehicle at (x, y) aiming `facing`, clamped to a
    /// `width` x `height` map. Facing none fires from the vehicle's own cell.
    pub fn muzzle(x: u32, y: u32, facing: Direction, width: u32, height: u32) -> (u32, u32) {
        let (dx, dy) = facing.delta();
        let mx = (i64::from(x) + dx * MUZZLE_DISTANCE).clamp(0, i64::from(width.max(1)) - 1);
        let my = (i64::from(y) + dy * MUZZLE_DISTANCE).clamp(0, i64::from(height.max(1)) - 1);
        (mx as u32, my as u32)
    }

    /// Fire a vehicle's gun if it is loaded.
    ///
    /// On success the reload countdown restarts at `reload_budget`, the
    /// trigger is released and the shot is returned for broadcast.
    pub fn fire(
        vehicle: &mut Vehicle,
        reload_budget: u32,
        width: u32,
        height: u32,
    ) -> Option<ShotEvent> {
        if !Self::can_fire(vehicle.reload) {
            return None;
        }

        let (x, y) = Self::muzzle(vehicle.x, vehicle.y, vehicle.gun_facing, width, height);
        vehicle.reload = reload_budget;
        vehicle.trigger = false;

        Some(ShotEvent {
            shooter: vehicle.handle.clone(),
            x,
            y,
            facing: vehicle.gun_facing,
        })
    }
}
