//! Fixed-interval simulation and broadcast loops
//!
//! Both loops free-run on their own timers. Neither waits on the other.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::ws::protocol::{ServerMsg, BROADCAST_ID};
use crate::ws::session::SessionContext;

use super::snapshot::SnapshotBuilder;
use super::world::World;

/// Advance the world every `period`: move vehicles, count down reloads.
/// Never touches the network.
pub async fn run_simulation(world: Arc<World>, period: Duration) {
    info!(period_ms = period.as_millis() as u64, "Simulation loop started");

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick: u64 = 0;

    loop {
        ticker.tick().await;
        tick += 1;
        let moved = world.tick();
        if moved > 0 {
            debug!(tick, moved, "Simulation tick");
        }
    }
}

/// Push the global game state to every session (and any map viewers)
/// every `period`.
pub async fn run_broadcast(
    sessions: SessionContext,
    viewers: broadcast::Sender<ServerMsg>,
    period: Duration,
) {
    info!(period_ms = period.as_millis() as u64, "Broadcast loop started");

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut builder = SnapshotBuilder::new();

    loop {
        ticker.tick().await;
        broadcast_state(&sessions, &viewers, &mut builder).await;
    }
}

/// One broadcast: snapshot under the world lock, then fan out.
/// Returns how many sessions received it.
pub async fn broadcast_state(
    sessions: &SessionContext,
    viewers: &broadcast::Sender<ServerMsg>,
    builder: &mut SnapshotBuilder,
) -> usize {
    let state = builder.capture(&sessions.world);
    let delivered = sessions.broadcast(&state, BROADCAST_ID).await;
    // No subscribed viewers is not an error
    let _ = viewers.send(state);
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::Grid;
    use crate::game::vehicle::Direction;
    use crate::game::world::WorldRules;
    use crate::ws::clients::{Client, WsSink};
    use crate::ws::session::{SessionError, SessionSettings};
    use axum::extract::ws::Message;
    use futures::channel::mpsc;
    use futures::{SinkExt, StreamExt};

    fn world() -> Arc<World> {
        Arc::new(World::new(Grid::new(40, 40), WorldRules::default(), Some(5)))
    }

    #[tokio::test(start_paused = true)]
    async fn simulation_loop_moves_vehicles_on_its_own_timer() {
        let world = world();
        let vehicle = world.spawn_at("alice", 0).unwrap();
        let dir = if vehicle.x < 20 { Direction::Right } else { Direction::Left };
        world.apply_command(vehicle.id, dir, true).unwrap();

        let task = tokio::spawn(run_simulation(world.clone(), Duration::from_secs(1)));
        tokio::time::sleep(Duration::from_millis(3500)).await;
        task.abort();

        let now = world.vehicle(vehicle.id).unwrap();
        let moved = now.x.abs_diff(vehicle.x);
        assert!((3..=4).contains(&moved), "moved {} cells", moved);
        assert_eq!(now.y, vehicle.y);
        // 15 units of reload at 5 per tick
        assert_eq!(now.reload, 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_sessions_and_viewers() {
        let world = world();
        world.spawn_at("alice", 0).unwrap();
        let sessions = SessionContext::new(
            world,
            SessionSettings {
                handshake_timeout: Duration::from_secs(60),
                input_rate_limit: 30,
                sim_interval_ms: 1000,
                broadcast_interval_ms: 1000,
            },
        );

        let (tx, mut rx) = mpsc::unbounded::<Message>();
        let sink: WsSink = Box::pin(tx.sink_map_err(|e| SessionError::Transport(e.to_string())));
        let client = Arc::new(Client::new(sink));
        sessions.clients.insert(client);

        let (viewers, mut viewer_rx) = broadcast::channel(4);
        let mut builder = SnapshotBuilder::new();
        let delivered = broadcast_state(&sessions, &viewers, &mut builder).await;
        assert_eq!(delivered, 1);

        let Some(Message::Text(text)) = rx.next().await else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], 2);
        assert_eq!(value["payload"]["tanks"][0]["id"], "alice");

        let ServerMsg::GameState(state) = viewer_rx.recv().await.unwrap() else {
            panic!("expected game state");
        };
        assert_eq!(state.tanks.len(), 1);
    }
}
