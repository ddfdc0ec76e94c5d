//! Snapshot building for the game-state broadcast

use tracing::debug;

use crate::ws::protocol::{GameStatePayload, ServerMsg, VehicleSnapshot};

use super::combat::ShotEvent;
use super::vehicle::Vehicle;
use super::world::World;

/// Builds game-state messages from the world
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    stats: SnapshotStats,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a consistent snapshot of the world, draining pending shots
    pub fn capture(&mut self, world: &World) -> ServerMsg {
        let (vehicles, shots) = world.snapshot();
        self.build(&vehicles, shots)
    }

    /// Build a snapshot message
    pub fn build(&mut self, vehicles: &[Vehicle], shots: Vec<ShotEvent>) -> ServerMsg {
        let tanks: Vec<VehicleSnapshot> = vehicles
            .iter()
            .filter(|v| v.is_taken())
            .map(VehicleSnapshot::from)
            .collect();

        self.stats.record(tanks.len(), shots.len());
        debug!(
            snapshot = self.stats.total_snapshots,
            vehicles = tanks.len(),
            shots = shots.len(),
            "Game state built"
        );

        ServerMsg::GameState(GameStatePayload {
            tanks,
            shot_events: shots,
        })
    }

    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }
}

/// Running totals for debugging
#[derive(Debug, Default, Clone)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub total_shots: u64,
    pub avg_vehicles_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, vehicle_count: usize, shot_count: usize) {
        self.total_snapshots += 1;
        self.total_shots += shot_count as u64;

        // Running average
        let n = self.total_snapshots as f32;
        self.avg_vehicles_per_snapshot =
            self.avg_vehicles_per_snapshot * ((n - 1.0) / n) + (vehicle_count as f32 / n);
    }
}
