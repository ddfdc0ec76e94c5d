//! Authoritative world state: the obstacle grid and every live vehicle
//!
//! The grid and the vehicle collection share one lock. Every mutating
//! operation holds it for its full duration, so a vehicle's recorded
//! position and its footprint on the grid always agree once the call
//! returns, and no two vehicles ever overlap.

use bytes::Bytes;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::config::Config;

use super::combat::{CombatSystem, ShotEvent};
use super::map::{Cell, Grid};
use super::physics::PhysicsSystem;
use super::vehicle::{Direction, Vehicle, VehicleId, VehicleStatus};

/// Fixed rules applied to every vehicle
#[derive(Debug, Clone)]
pub struct WorldRules {
    /// Half-width of a vehicle's square footprint
    pub footprint_radius: u32,
    /// Reload units set when a vehicle fires
    pub reload_budget: u32,
    /// Reload units removed per simulation tick
    pub reload_step: u32,
    /// Random placement attempts once the fixed spawn points are used up
    pub spawn_attempts: u32,
}

impl WorldRules {
    pub fn from_config(config: &Config) -> Self {
        Self {
            footprint_radius: config.footprint_radius,
            reload_budget: config.reload_budget(),
            reload_step: config.reload_step,
            spawn_attempts: config.spawn_attempts,
        }
    }
}

impl Default for WorldRules {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// World errors
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("No free spawn point available")]
    NoSpawnPoint,

    #[error("Unknown vehicle: {0}")]
    UnknownVehicle(VehicleId),
}

/// Everything guarded by the world lock
struct WorldState {
    grid: Grid,
    vehicles: Vec<Vehicle>,
    spawn_points: Vec<(u32, u32)>,
    rng: ChaCha8Rng,
}

impl WorldState {
    fn position(&self, id: VehicleId) -> Option<usize> {
        self.vehicles.iter().position(|v| v.id == id)
    }

    /// Pick a centre whose whole footprint is free: shuffled fixed spawn
    /// points first, then bounded random rejection sampling.
    fn allocate(&mut self, radius: u32, attempts: u32) -> Option<(u32, u32)> {
        let mut points = self.spawn_points.clone();
        points.shuffle(&mut self.rng);
        if let Some(point) = points
            .into_iter()
            .find(|(x, y)| self.grid.footprint_clear(i64::from(*x), i64::from(*y), radius))
        {
            return Some(point);
        }

        let (w, h) = (self.grid.width(), self.grid.height());
        if w <= 2 * radius || h <= 2 * radius {
            return None;
        }
        for _ in 0..attempts {
            let x = self.rng.gen_range(radius..w - radius);
            let y = self.rng.gen_range(radius..h - radius);
            if self.grid.footprint_clear(i64::from(x), i64::from(y), radius) {
                return Some((x, y));
            }
        }
        None
    }

    fn insert(&mut self, vehicle: Vehicle, radius: u32) {
        PhysicsSystem::place(&mut self.grid, &vehicle, radius);
        self.vehicles.push(vehicle);
    }

    fn remove_at(&mut self, idx: usize, radius: u32) -> Vehicle {
        // Order is irrelevant, so swap-with-last is fine
        let mut vehicle = self.vehicles.swap_remove(idx);
        PhysicsSystem::lift(&mut self.grid, &vehicle, radius);
        vehicle.status = VehicleStatus::Free;
        vehicle
    }
}

/// The entity registry
pub struct World {
    state: Mutex<WorldState>,
    /// Shots fired since the last game-state broadcast
    pending_shots: Mutex<Vec<ShotEvent>>,
    rules: WorldRules,
}

impl World {
    /// Wrap a generated map. `seed` fixes spawn placement for reproducible runs.
    pub fn new(grid: Grid, rules: WorldRules, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let spawn_points = fixed_spawn_points(grid.width(), grid.height(), rules.footprint_radius);

        Self {
            state: Mutex::new(WorldState {
                grid,
                vehicles: Vec::new(),
                spawn_points,
                rng,
            }),
            pending_shots: Mutex::new(Vec::new()),
            rules,
        }
    }

    pub fn rules(&self) -> &WorldRules {
        &self.rules
    }

    /// Map width and height in cells
    pub fn dimensions(&self) -> (u32, u32) {
        let state = self.state.lock();
        (state.grid.width(), state.grid.height())
    }

    /// Current grid, including vehicle footprints, as a flat byte buffer
    pub fn map_bytes(&self) -> Bytes {
        self.state.lock().grid.to_bytes()
    }

    pub fn cell(&self, x: i64, y: i64) -> Cell {
        self.state.lock().grid.get(x, y)
    }

    pub fn vehicle_count(&self) -> usize {
        self.state.lock().vehicles.len()
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<Vehicle> {
        self.state.lock().vehicles.iter().find(|v| v.id == id).cloned()
    }

    pub fn vehicle_by_handle(&self, handle: &str) -> Option<Vehicle> {
        self.state
            .lock()
            .vehicles
            .iter()
            .find(|v| v.handle == handle)
            .cloned()
    }

    /// Copy of every taken vehicle
    pub fn vehicles(&self) -> Vec<Vehicle> {
        self.state
            .lock()
            .vehicles
            .iter()
            .filter(|v| v.is_taken())
            .cloned()
            .collect()
    }

    /// Create a vehicle for `handle` at a free spot, starting with `points`
    pub fn spawn_at(&self, handle: &str, points: u32) -> Result<Vehicle, WorldError> {
        let radius = self.rules.footprint_radius;
        let mut state = self.state.lock();

        let Some((x, y)) = state.allocate(radius, self.rules.spawn_attempts) else {
            warn!(handle = %handle, "No spawn point available");
            return Err(WorldError::NoSpawnPoint);
        };

        let vehicle = Vehicle::new(handle, x, y, points);
        state.insert(vehicle.clone(), radius);

        info!(
            handle = %handle,
            vehicle_id = %vehicle.id,
            x,
            y,
            vehicles = state.vehicles.len(),
            "Vehicle spawned"
        );
        Ok(vehicle)
    }

    /// Remove a vehicle and clear its footprint. Returns the released vehicle,
    /// or `None` if it was already gone.
    pub fn free(&self, id: VehicleId) -> Option<Vehicle> {
        let radius = self.rules.footprint_radius;
        let mut state = self.state.lock();
        let idx = state.position(id)?;
        let vehicle = state.remove_at(idx, radius);
        debug!(handle = %vehicle.handle, vehicle_id = %id, "Vehicle freed");
        Some(vehicle)
    }

    /// Replace `previous` with a fresh vehicle that keeps its score.
    ///
    /// The new vehicle is allocated while the old one still occupies the map,
    /// then the old one is freed; both happen under a single lock.
    pub fn respawn(&self, handle: &str, previous: VehicleId) -> Result<Vehicle, WorldError> {
        let radius = self.rules.footprint_radius;
        let mut state = self.state.lock();

        let old_idx = state
            .position(previous)
            .ok_or(WorldError::UnknownVehicle(previous))?;
        let points = state.vehicles[old_idx].points;

        let (x, y) = state
            .allocate(radius, self.rules.spawn_attempts)
            .ok_or(WorldError::NoSpawnPoint)?;
        let vehicle = Vehicle::new(handle, x, y, points);
        state.insert(vehicle.clone(), radius);
        state.remove_at(old_idx, radius);

        info!(handle = %handle, vehicle_id = %vehicle.id, x, y, points, "Vehicle respawned");
        Ok(vehicle)
    }

    /// Step one vehicle along its orientation. Returns whether it moved.
    pub fn move_vehicle(&self, id: VehicleId) -> Result<bool, WorldError> {
        let radius = self.rules.footprint_radius;
        let mut state = self.state.lock();
        let idx = state.position(id).ok_or(WorldError::UnknownVehicle(id))?;

        let WorldState { grid, vehicles, .. } = &mut *state;
        let vehicle = &mut vehicles[idx];
        PhysicsSystem::lift(grid, vehicle, radius);
        let moved = PhysicsSystem::try_move(grid, vehicle, radius);
        PhysicsSystem::place(grid, vehicle, radius);
        Ok(moved)
    }

    /// Apply a movement/fire command from the owning session.
    ///
    /// Orientation and gun facing change immediately. A fire request is only
    /// honoured with a loaded gun; the resulting shot is also queued for the
    /// next game-state broadcast.
    pub fn apply_command(
        &self,
        id: VehicleId,
        dir: Direction,
        fire: bool,
    ) -> Result<Option<ShotEvent>, WorldError> {
        let shot = {
            let mut state = self.state.lock();
            let (w, h) = (state.grid.width(), state.grid.height());
            let idx = state.position(id).ok_or(WorldError::UnknownVehicle(id))?;
            let vehicle = &mut state.vehicles[idx];
            vehicle.steer(dir);
            if fire && CombatSystem::can_fire(vehicle.reload) {
                vehicle.trigger = true;
                CombatSystem::fire(vehicle, self.rules.reload_budget, w, h)
            } else {
                None
            }
        };

        if let Some(shot) = &shot {
            debug!(handle = %shot.shooter, x = shot.x, y = shot.y, "Shot fired");
            self.pending_shots.lock().push(shot.clone());
        }
        Ok(shot)
    }

    /// Fire a vehicle's gun without changing its heading
    pub fn fire(&self, id: VehicleId) -> Result<Option<ShotEvent>, WorldError> {
        let dir = self
            .vehicle(id)
            .map(|v| v.orientation)
            .ok_or(WorldError::UnknownVehicle(id))?;
        self.apply_command(id, dir, true)
    }

    /// Credit one point to the vehicle currently owned by `handle`.
    /// Returns the new score, or `None` if the handle has no vehicle.
    pub fn award_point(&self, handle: &str) -> Option<u32> {
        let mut state = self.state.lock();
        let vehicle = state.vehicles.iter_mut().find(|v| v.handle == handle)?;
        vehicle.points += 1;
        Some(vehicle.points)
    }

    /// One simulation step: move every taken vehicle and count down reloads.
    /// Returns how many vehicles changed position.
    pub fn tick(&self) -> usize {
        let radius = self.rules.footprint_radius;
        let step = self.rules.reload_step;
        let mut state = self.state.lock();
        let WorldState { grid, vehicles, .. } = &mut *state;

        let mut moved = 0;
        for vehicle in vehicles.iter_mut().filter(|v| v.is_taken()) {
            PhysicsSystem::lift(grid, vehicle, radius);
            if PhysicsSystem::try_move(grid, vehicle, radius) {
                moved += 1;
            }
            PhysicsSystem::place(grid, vehicle, radius);
            vehicle.reload = CombatSystem::update_reload(vehicle.reload, step);
        }
        moved
    }

    /// Consistent copy of all taken vehicles plus the shots fired since the
    /// previous call, which are drained.
    pub fn snapshot(&self) -> (Vec<Vehicle>, Vec<ShotEvent>) {
        let state = self.state.lock();
        let vehicles = state
            .vehicles
            .iter()
            .filter(|v| v.is_taken())
            .cloned()
            .collect();
        let shots = std::mem::take(&mut *self.pending_shots.lock());
        (vehicles, shots)
    }
}

/// Eight spawn points around the map border, inset so a footprint fits
fn fixed_spawn_points(width: u32, height: u32, radius: u32) -> Vec<(u32, u32)> {
    if width <= 2 * radius || height <= 2 * radius {
        return Vec::new();
    }
    let (left, top) = (radius, radius);
    let (right, bottom) = (width - 1 - radius, height - 1 - radius);
    let (mid_x, mid_y) = (width / 2, height / 2);
    vec![
        (left, top),
        (mid_x, top),
        (right, top),
        (right, mid_y),
        (right, bottom),
        (mid_x, bottom),
        (left, bottom),
        (left, mid_y),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn rules() -> WorldRules {
        WorldRules {
            footprint_radius: 1,
            reload_budget: 15,
            reload_step: 5,
            spawn_attempts: 500,
        }
    }

    fn world(width: u32, height: u32) -> World {
        World::new(Grid::new(width, height), rules(), Some(1))
    }

    fn footprint_matches(world: &World, vehicle: &Vehicle) -> bool {
        let (x, y) = (i64::from(vehicle.x), i64::from(vehicle.y));
        (y - 1..=y + 1).all(|cy| (x - 1..=x + 1).all(|cx| world.cell(cx, cy) == Cell::Vehicle))
    }

    #[test]
    fn spawned_vehicles_never_overlap() {
        let world = world(40, 30);
        let mut spawned = Vec::new();
        for i in 0..40 {
            match world.spawn_at(&format!("p{}", i), 0) {
                Ok(v) => spawned.push(v),
                Err(WorldError::NoSpawnPoint) => break,
                Err(e) => panic!("unexpected error: {}", e),
            }
            // Free every third vehicle to mix frees into the sequence
            if i % 3 == 2 {
                let gone = spawned.remove(0);
                assert!(world.free(gone.id).is_some());
            }
        }

        assert_eq!(world.vehicle_count(), spawned.len());
        assert_eq!(world.cell(0, 0), Cell::Free);
        for (i, a) in spawned.iter().enumerate() {
            assert!(footprint_matches(&world, a));
            assert_eq!(a.status, VehicleStatus::Taken);
            for b in &spawned[i + 1..] {
                let apart = a.x.abs_diff(b.x) > 2 || a.y.abs_diff(b.y) > 2;
                assert!(apart, "{:?} overlaps {:?}", (a.x, a.y), (b.x, b.y));
            }
        }
        let cells = world.map_bytes().iter().filter(|c| **c == Cell::Vehicle as u8).count();
        assert_eq!(cells, spawned.len() * 9);
    }

    #[test]
    fn fixed_spawn_points_are_used_first() {
        let world = world(40, 30);
        let vehicle = world.spawn_at("alice", 0).unwrap();
        let points = fixed_spawn_points(40, 30, 1);
        assert!(points.contains(&(vehicle.x, vehicle.y)));
        assert_eq!(vehicle.orientation, Direction::None);
        assert_eq!(vehicle.gun_facing, Direction::Down);
    }

    #[test]
    fn spawn_fails_on_a_blocked_map() {
        let mut grid = Grid::new(20, 20);
        grid.mark_footprint(10, 10, 10, Cell::Obstacle);
        let world = World::new(grid, rules(), Some(2));
        assert!(matches!(world.spawn_at("alice", 0), Err(WorldError::NoSpawnPoint)));
        assert_eq!(world.vehicle_count(), 0);
    }

    #[test]
    fn free_clears_footprint_and_marks_vehicle_free() {
        let world = world(30, 30);
        let vehicle = world.spawn_at("alice", 0).unwrap();
        let freed = world.free(vehicle.id).unwrap();

        assert_eq!(freed.status, VehicleStatus::Free);
        assert_eq!(world.vehicle_count(), 0);
        assert_eq!(world.cell(i64::from(vehicle.x), i64::from(vehicle.y)), Cell::Free);
        assert!(world.free(vehicle.id).is_none());
    }

    #[test]
    fn blocked_move_leaves_vehicle_in_place() {
        let mut grid = Grid::new(30, 30);
        grid.set(5, 0, Cell::Obstacle);
        let world = World::new(grid, rules(), Some(3));
        // (1, 1) is the top-left fixed spawn point; others are all further away
        let vehicle = loop {
            let v = world.spawn_at("alice", 0).unwrap();
            if (v.x, v.y) == (1, 1) {
                break v;
            }
            world.free(v.id);
        };

        assert_ok!(world.apply_command(vehicle.id, Direction::Up, false));
        for _ in 0..3 {
            assert!(!world.move_vehicle(vehicle.id).unwrap());
            let now = world.vehicle(vehicle.id).unwrap();
            assert_eq!((now.x, now.y), (1, 1));
            assert!(footprint_matches(&world, &now));
        }

        assert_ok!(world.apply_command(vehicle.id, Direction::Right, false));
        assert!(world.move_vehicle(vehicle.id).unwrap());
        let now = world.vehicle(vehicle.id).unwrap();
        assert_eq!((now.x, now.y), (2, 1));
        assert!(footprint_matches(&world, &now));
        assert_eq!(world.cell(0, 1), Cell::Free);

        // (4, 1) would overlap the rock at (5, 0)
        world.move_vehicle(vehicle.id).unwrap();
        assert!(!world.move_vehicle(vehicle.id).unwrap());
        assert_eq!(world.vehicle(vehicle.id).unwrap().x, 3);
    }

    #[test]
    fn vehicles_block_each_other() {
        let world = world(30, 30);
        let mut vehicles = Vec::new();
        for name in ["a", "b", "c", "d", "e", "f", "g", "h"] {
            vehicles.push(world.spawn_at(name, 0).unwrap());
        }
        for v in &vehicles {
            let dir = if v.x < 15 { Direction::Right } else { Direction::Left };
            world.apply_command(v.id, dir, false).unwrap();
        }
        for _ in 0..40 {
            world.tick();
        }

        let now = world.vehicles();
        assert_eq!(now.len(), 8);
        for (i, a) in now.iter().enumerate() {
            assert!(footprint_matches(&world, a));
            for b in &now[i + 1..] {
                assert!(a.x.abs_diff(b.x) > 2 || a.y.abs_diff(b.y) > 2);
            }
        }
        assert_eq!(world.map_bytes().iter().filter(|c| **c == 1).count(), 8 * 9);
    }

    #[test]
    fn fire_honours_reload_and_queues_shot() {
        let world = world(30, 30);
        let vehicle = world.spawn_at("alice", 0).unwrap();

        let shot = world.apply_command(vehicle.id, Direction::None, true).unwrap().unwrap();
        assert_eq!(shot.shooter, "alice");
        assert_eq!(shot.facing, Direction::Down);
        assert_eq!(world.vehicle(vehicle.id).unwrap().reload, 15);

        // Still reloading
        assert!(world.fire(vehicle.id).unwrap().is_none());

        let (_, shots) = world.snapshot();
        assert_eq!(shots, vec![shot]);
        let (_, shots) = world.snapshot();
        assert!(shots.is_empty());

        for _ in 0..3 {
            world.tick();
        }
        assert_eq!(world.vehicle(vehicle.id).unwrap().reload, 0);
        assert!(world.fire(vehicle.id).unwrap().is_some());
    }

    #[test]
    fn respawn_keeps_points_and_frees_old_vehicle() {
        let world = world(30, 30);
        let old = world.spawn_at("alice", 0).unwrap();
        assert_eq!(world.award_point("alice"), Some(1));
        assert_eq!(world.award_point("alice"), Some(2));

        let new = world.respawn("alice", old.id).unwrap();
        assert_ne!(new.id, old.id);
        assert_eq!(new.points, 2);
        assert_eq!(world.vehicle_count(), 1);
        assert!(world.vehicle(old.id).is_none());
        assert!(footprint_matches(&world, &new));

        assert_err!(world.respawn("alice", old.id));
    }

    #[test]
    fn operations_on_unknown_vehicle_fail() {
        let world = world(30, 30);
        let ghost = VehicleId::new();
        assert!(matches!(world.move_vehicle(ghost), Err(WorldError::UnknownVehicle(_))));
        assert!(matches!(
            world.apply_command(ghost, Direction::Up, true),
            Err(WorldError::UnknownVehicle(_))
        ));
        assert_eq!(world.award_point("nobody"), None);
    }
}
