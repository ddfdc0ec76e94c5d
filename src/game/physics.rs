//! Vehicle movement and map-collision constraints

use super::map::{Cell, Grid};
use super::vehicle::{Direction, Vehicle};

/// Physics system for stepping vehicles across the grid
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Destination of a single step from (x, y) in `dir`
    pub fn step(x: u32, y: u32, dir: Direction) -> (i64, i64) {
        let (dx, dy) = dir.delta();
        (i64::from(x) + dx, i64::from(y) + dy)
    }

    /// Move a vehicle one cell along its orientation.
    ///
    /// The vehicle's own footprint must already be cleared from `grid`. The
    /// move is all-or-nothing: if the destination footprint would leave the
    /// map or overlap any non-free cell, the vehicle stays where it is.
    /// Returns true when the position changed.
    pub fn try_move(grid: &Grid, vehicle: &mut Vehicle, footprint_radius: u32) -> bool {
        if vehicle.orientation == Direction::None {
            return false;
        }

        let (nx, ny) = Self::step(vehicle.x, vehicle.y, vehicle.orientation);
        if !grid.footprint_clear(nx, ny, footprint_radius) {
            return false;
        }

        vehicle.x = nx as u32;
        vehicle.y = ny as u32;
        true
    }

    /// Remove a vehicle's footprint from the grid
    pub fn lift(grid: &mut Grid, vehicle: &Vehicle, footprint_radius: u32) {
        grid.mark_footprint(
            i64::from(vehicle.x),
            i64::from(vehicle.y),
            footprint_radius,
            Cell::Free,
        );
    }

    /// Stamp a vehicle's footprint onto the grid
    pub fn place(grid: &mut Grid, vehicle: &Vehicle, footprint_radius: u32) {
        grid.mark_footprint(
            i64::from(vehicle.x),
            i64::from(vehicle.y),
            footprint_radius,
            Cell::Vehicle,
        );
    }
}
