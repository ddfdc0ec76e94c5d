//! Per-connection session: handshake, command dispatch and cleanup
//!
//! A session moves through `Connected -> AwaitingHandle -> Active -> Closed`.
//! The transport is abstracted as a boxed sink plus a stream of frames so the
//! same code drives axum sockets and in-memory test channels.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::game::vehicle::{Direction, Vehicle};
use crate::game::world::{World, WorldError};
use crate::util::rate_limit::SessionRateLimiter;

use super::clients::{Client, ClientDirectory, HandleRegistry, WsSink};
use super::protocol::{
    ClientMsg, CommandPayload, ConfigPayload, HandlePayload, HitPayload, Inbound, ProtocolError,
    ServerMsg, VehicleChangePayload, BROADCAST_ID, VIEWER_ID,
};

/// Envelope `id` for the connect notice
const SERVER_ID: &str = "server";

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    World(#[from] WorldError),

    #[error("Session already closed")]
    Closed,
}

/// Reasons a handshake ends without a handle
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("No handle registered before the deadline")]
    TimedOut,

    #[error("Connection closed during handshake")]
    Closed,

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Timing and limits every session shares
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub handshake_timeout: Duration,
    pub input_rate_limit: u32,
    pub sim_interval_ms: u64,
    pub broadcast_interval_ms: u64,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            handshake_timeout: config.handshake_timeout(),
            input_rate_limit: config.input_rate_limit,
            sim_interval_ms: config.sim_interval_ms,
            broadcast_interval_ms: config.broadcast_interval_ms,
        }
    }
}

/// Shared state a session works against
#[derive(Clone)]
pub struct SessionContext {
    pub world: Arc<World>,
    pub clients: Arc<ClientDirectory>,
    pub handles: Arc<HandleRegistry>,
    pub settings: SessionSettings,
}

impl SessionContext {
    pub fn new(world: Arc<World>, settings: SessionSettings) -> Self {
        Self {
            world,
            clients: Arc::new(ClientDirectory::new()),
            handles: Arc::new(HandleRegistry::new()),
            settings,
        }
    }

    /// Drive one connection from upgrade to cleanup
    pub async fn run_session<S>(self, sink: WsSink, mut stream: S)
    where
        S: Stream<Item = Result<Message, SessionError>> + Unpin + Send,
    {
        let client = Arc::new(Client::new(sink));
        let session_id = client.session_id;
        info!(session_id = %session_id, "New WebSocket connection");

        if let Err(e) = client.send(&ServerMsg::connect_notice(), SERVER_ID).await {
            warn!(session_id = %session_id, error = %e, "Failed to send connect notice");
            self.close(&client).await;
            return;
        }

        let handle = match self.await_handle(&client, &mut stream).await {
            Ok(handle) => handle,
            Err(e) => {
                info!(session_id = %session_id, reason = %e, "Handshake failed");
                self.close(&client).await;
                return;
            }
        };

        if let Err(e) = self.activate(&client, &handle).await {
            warn!(session_id = %session_id, handle = %handle, error = %e, "Failed to activate session");
            self.close(&client).await;
            return;
        }

        self.active_loop(&client, &mut stream).await;
        self.close(&client).await;
    }

    /// Read until a valid handle is claimed or the overall deadline passes
    pub async fn await_handle<S>(&self, client: &Client, stream: &mut S) -> Result<String, HandshakeError>
    where
        S: Stream<Item = Result<Message, SessionError>> + Unpin + Send,
    {
        let deadline = tokio::time::sleep(self.settings.handshake_timeout);
        tokio::pin!(deadline);

        loop {
            let frame = tokio::select! {
                _ = &mut deadline => return Err(HandshakeError::TimedOut),
                frame = stream.next() => frame,
            };

            let text = match frame {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => return Err(HandshakeError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            };

            match ClientMsg::decode(&text) {
                Ok(Inbound {
                    msg: ClientMsg::Register(req),
                    ..
                }) => {
                    if self.handles.claim(&req.username) {
                        client.set_claimed_handle(&req.username);
                        info!(session_id = %client.session_id, handle = %req.username, "Handle registered");
                        return Ok(req.username);
                    }
                    warn!(session_id = %client.session_id, handle = %req.username, "Handle rejected");
                    client.send(&ServerMsg::rejected(), &req.username).await?;
                }
                Ok(inbound) => {
                    debug!(
                        session_id = %client.session_id,
                        kind = inbound.msg.name(),
                        envelope_id = %inbound.id,
                        "Ignoring message before registration"
                    );
                }
                Err(e) => {
                    warn!(session_id = %client.session_id, error = %e, "Failed to parse client message");
                }
            }
        }
    }

    /// Give a freshly registered session its vehicle and configuration
    async fn activate(&self, client: &Arc<Client>, handle: &str) -> Result<(), SessionError> {
        let vehicle = match self.world.spawn_at(handle, 0) {
            Ok(vehicle) => vehicle,
            Err(e) => {
                let _ = client.send(&ServerMsg::no_capacity(), handle).await;
                self.release_handle(client);
                return Err(e.into());
            }
        };

        if !client.install_vehicle(vehicle.id) {
            self.world.free(vehicle.id);
            return Err(SessionError::Closed);
        }
        client.send(&self.config_for(&vehicle), handle).await?;
        self.clients.insert(client.clone());

        info!(
            session_id = %client.session_id,
            handle = %handle,
            sessions = self.clients.len(),
            "Session active"
        );
        Ok(())
    }

    async fn active_loop<S>(&self, client: &Arc<Client>, stream: &mut S)
    where
        S: Stream<Item = Result<Message, SessionError>> + Unpin + Send,
    {
        let limiter = SessionRateLimiter::new(self.settings.input_rate_limit);
        let session_id = client.session_id;

        while let Some(frame) = stream.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(_)) => {
                    warn!(session_id = %session_id, "Received binary message, ignoring");
                    continue;
                }
                Ok(Message::Close(_)) => {
                    info!(session_id = %session_id, "Client initiated close");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "WebSocket error");
                    break;
                }
            };

            client.touch();
            if !limiter.check_input() {
                warn!(session_id = %session_id, "Rate limited input message");
                continue;
            }

            let inbound = match ClientMsg::decode(&text) {
                Ok(inbound) => inbound,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Failed to parse client message");
                    continue;
                }
            };

            debug!(
                session_id = %session_id,
                kind = inbound.msg.name(),
                envelope_id = %inbound.id,
                "Client message"
            );
            if let Err(e) = self.dispatch(client, inbound.msg).await {
                warn!(session_id = %session_id, error = %e, "Failed to answer client");
                if matches!(e, SessionError::Transport(_) | SessionError::Closed) {
                    break;
                }
            }
        }
    }

    async fn dispatch(&self, client: &Arc<Client>, msg: ClientMsg) -> Result<(), SessionError> {
        match msg {
            ClientMsg::Command(cmd) => {
                self.apply_command(client, &cmd).await;
                Ok(())
            }
            ClientMsg::Hit(hit) => {
                self.report_hit(&hit).await;
                Ok(())
            }
            ClientMsg::Respawn(req) => self.respawn(client, &req).await,
            ClientMsg::Register(req) => {
                debug!(session_id = %client.session_id, handle = %req.username, "Already registered, ignoring");
                Ok(())
            }
        }
    }

    /// Steer the session's vehicle and fire if asked
    async fn apply_command(&self, client: &Client, cmd: &CommandPayload) {
        let Some(id) = client.vehicle() else {
            debug!(session_id = %client.session_id, "Command without a vehicle, ignoring");
            return;
        };

        match self.world.apply_command(id, cmd.direction(), cmd.wants_fire()) {
            Ok(Some(shot)) => {
                debug!(handle = %shot.shooter, "Vehicle fired");
                self.broadcast(&ServerMsg::Shot(shot), BROADCAST_ID).await;
            }
            Ok(None) => {}
            Err(e) => debug!(session_id = %client.session_id, error = %e, "Command for stale vehicle"),
        }
    }

    /// Destroy the victim's vehicle and credit the shooter
    pub async fn report_hit(&self, hit: &HitPayload) {
        let Some(victim) = self.clients.find_by_handle(&hit.victim) else {
            debug!(victim = %hit.victim, "Hit on a handle with no session, ignoring");
            return;
        };
        let Some(vehicle_id) = victim.take_vehicle() else {
            debug!(victim = %hit.victim, "Hit on a session without a vehicle, ignoring");
            return;
        };
        // Respawns replace the slot under its lock, so this is either the old
        // vehicle or its replacement carrying the same score.
        let freed = self.world.free(vehicle_id);
        self.release_handle(&victim);
        let Some(freed) = freed else {
            debug!(victim = %hit.victim, vehicle_id = %vehicle_id, "Victim vehicle already gone");
            return;
        };
        victim.bank_points(freed.points);

        match self.world.award_point(&hit.username) {
            Some(points) => info!(shooter = %hit.username, victim = %hit.victim, points, "Hit registered"),
            None => debug!(shooter = %hit.username, "Shooter has no vehicle, point dropped"),
        }

        let change = VehicleChangePayload {
            username: hit.victim.clone(),
            alive: false,
            x: freed.x,
            y: freed.y,
        };
        self.broadcast(&ServerMsg::VehicleChange(change), BROADCAST_ID).await;
    }

    /// Swap the session's vehicle for a fresh one, keeping its score
    async fn respawn(&self, client: &Arc<Client>, req: &HandlePayload) -> Result<(), SessionError> {
        let Some(handle) = client.handle() else {
            return Ok(());
        };
        if !req.username.is_empty() && req.username != handle {
            debug!(handle = %handle, requested = %req.username, "Respawn for another handle, ignoring");
            return Ok(());
        }

        let respawned = client.respawn_vehicle(|old| self.world.respawn(&handle, old));
        let vehicle = match respawned {
            Some(Ok(vehicle)) => match self.settle_respawn(client, vehicle) {
                Some(vehicle) => vehicle,
                None => return Ok(()),
            },
            Some(Err(WorldError::NoSpawnPoint)) => {
                return client.send(&ServerMsg::no_capacity(), &handle).await;
            }
            Some(Err(e)) => {
                debug!(handle = %handle, error = %e, "Respawn for stale vehicle");
                return Ok(());
            }
            None => match self.revive(client, &handle).await? {
                Some(vehicle) => vehicle,
                None => return Ok(()),
            },
        };

        client.send(&self.config_for(&vehicle), &handle).await?;
        let change = VehicleChangePayload {
            username: handle,
            alive: true,
            x: vehicle.x,
            y: vehicle.y,
        };
        self.broadcast(&ServerMsg::VehicleChange(change), BROADCAST_ID).await;
        Ok(())
    }

    /// Keep a freshly respawned vehicle only while the session still owns it
    /// and is live. A session that closed during the world call gets the
    /// vehicle freed again.
    fn settle_respawn(&self, client: &Client, vehicle: Vehicle) -> Option<Vehicle> {
        if client.vehicle() != Some(vehicle.id) {
            debug!(handle = %vehicle.handle, "Respawned vehicle destroyed before it was announced");
            return None;
        }
        if self.clients.contains(client.session_id) && !client.is_closed() {
            return Some(vehicle);
        }
        if let Some(id) = client.take_vehicle() {
            self.world.free(id);
        }
        self.release_handle(client);
        info!(handle = %vehicle.handle, "Session gone during respawn");
        None
    }

    /// Bring back a session whose vehicle was destroyed
    async fn revive(&self, client: &Arc<Client>, handle: &str) -> Result<Option<Vehicle>, SessionError> {
        if !client.holds_handle() {
            if !self.handles.claim(handle) {
                warn!(handle = %handle, "Handle taken while dead, respawn rejected");
                client.send(&ServerMsg::rejected(), handle).await?;
                return Ok(None);
            }
            client.mark_claimed();
            if client.is_closed() {
                self.release_handle(client);
                return Ok(None);
            }
        }

        let vehicle = match self.world.spawn_at(handle, client.banked_points()) {
            Ok(vehicle) => vehicle,
            Err(e) => {
                warn!(handle = %handle, error = %e, "No capacity for respawn");
                self.release_handle(client);
                client.send(&ServerMsg::no_capacity(), handle).await?;
                return Ok(None);
            }
        };

        if !client.install_vehicle(vehicle.id) {
            self.world.free(vehicle.id);
            return Ok(None);
        }
        Ok(Some(vehicle))
    }

    fn release_handle(&self, client: &Client) {
        if let Some(handle) = client.unclaim() {
            self.handles.release(&handle);
        }
    }

    /// Tear a session down. Safe to call any number of times from any task.
    pub async fn close(&self, client: &Client) {
        if !client.mark_closed() {
            return;
        }

        client.close_transport().await;
        self.clients.remove(client.session_id);
        self.release_handle(client);
        if let Some(id) = client.take_vehicle() {
            self.world.free(id);
        }

        info!(
            session_id = %client.session_id,
            handle = client.handle().as_deref().unwrap_or(""),
            last_active = %client.last_active(),
            sessions = self.clients.len(),
            "Connection closed"
        );
    }

    /// Send one message to every active session. Sessions whose write fails
    /// are closed. Returns how many sessions received it.
    pub async fn broadcast(&self, msg: &ServerMsg, id: &str) -> usize {
        let text = match msg.encode(id) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to encode broadcast");
                return 0;
            }
        };

        let clients = self.clients.all();
        let results = futures::future::join_all(
            clients.iter().map(|client| client.send_text(text.clone())),
        )
        .await;

        let mut delivered = 0;
        for (client, result) in clients.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(session_id = %client.session_id, error = %e, "Broadcast write failed");
                    self.close(client).await;
                }
            }
        }
        delivered
    }

    /// Configuration for a session that owns `vehicle`
    pub fn config_for(&self, vehicle: &Vehicle) -> ServerMsg {
        self.config_message(vehicle.x, vehicle.y, vehicle.gun_facing, &vehicle.handle)
    }

    /// Configuration for a read-only map viewer
    pub fn viewer_config(&self) -> ServerMsg {
        self.config_message(0, 0, Direction::None, VIEWER_ID)
    }

    fn config_message(&self, x: u32, y: u32, facing: Direction, username: &str) -> ServerMsg {
        let (width, height) = self.world.dimensions();
        ServerMsg::Config(ConfigPayload {
            map: self.world.map_bytes(),
            map_size_x: width,
            map_size_y: height,
            tank_coord_x: x,
            tank_coord_y: y,
            tank_facing: facing,
            tick_interval_ms: self.settings.broadcast_interval_ms,
            map_render_ms: self.settings.sim_interval_ms,
            username: username.to_string(),
        })
    }
}
