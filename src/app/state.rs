//! Application state shared across routes

use std::sync::Arc;
use std::time::Instant;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::game::scheduler::{run_broadcast, run_simulation};
use crate::game::{MapGenerator, World, WorldRules};
use crate::ws::protocol::ServerMsg;
use crate::ws::session::{SessionContext, SessionSettings};

/// Game-state messages buffered per map viewer
const VIEWER_CHANNEL_CAPACITY: usize = 16;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub world: Arc<World>,
    pub sessions: SessionContext,
    /// Game-state feed for map viewers
    pub viewers: broadcast::Sender<ServerMsg>,
    pub started_at: Instant,
}

impl AppState {
    /// Generate the map and build the world. CPU bound for large maps.
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let mut rng = match config.map_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let grid = MapGenerator::new(config.map_params()).generate(&mut rng);

        // Spawn placement gets its own stream so it does not shift with map size
        let spawn_seed = config.map_seed.map(|seed| seed.wrapping_add(1));
        let world = Arc::new(World::new(grid, WorldRules::from_config(&config), spawn_seed));

        let sessions = SessionContext::new(world.clone(), SessionSettings::from_config(&config));
        let (viewers, _) = broadcast::channel(VIEWER_CHANNEL_CAPACITY);

        Self {
            config,
            world,
            sessions,
            viewers,
            started_at: Instant::now(),
        }
    }

    /// Start the simulation and broadcast loops
    pub fn spawn_loops(&self) -> (JoinHandle<()>, JoinHandle<()>) {
        let simulation = tokio::spawn(run_simulation(self.world.clone(), self.config.sim_interval()));
        let broadcast = tokio::spawn(run_broadcast(
            self.sessions.clone(),
            self.viewers.clone(),
            self.config.broadcast_interval(),
        ));
        (simulation, broadcast)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
