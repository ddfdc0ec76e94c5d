//! Connected sessions and the handles they claim

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::{Sink, SinkExt};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::game::vehicle::{Vehicle, VehicleId};

use super::protocol::ServerMsg;
use super::session::SessionError;

/// Write half of a session's transport
pub type WsSink = Pin<Box<dyn Sink<Message, Error = SessionError> + Send>>;

/// One connected session
pub struct Client {
    pub session_id: Uuid,
    /// Handle chosen during the handshake; kept after a hit for respawning
    handle: Mutex<Option<String>>,
    /// Whether this session currently holds its handle in the registry
    claimed: AtomicBool,
    vehicle: Mutex<Option<VehicleId>>,
    /// Score carried over from a vehicle destroyed by a hit
    banked_points: AtomicU32,
    last_active: Mutex<DateTime<Utc>>,
    /// Serializes writes from the session task and the broadcast loop
    sink: tokio::sync::Mutex<WsSink>,
    closed: AtomicBool,
}

impl Client {
    pub fn new(sink: WsSink) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            handle: Mutex::new(None),
            claimed: AtomicBool::new(false),
            vehicle: Mutex::new(None),
            banked_points: AtomicU32::new(0),
            last_active: Mutex::new(Utc::now()),
            sink: tokio::sync::Mutex::new(sink),
            closed: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> Option<String> {
        self.handle.lock().clone()
    }

    /// Record a freshly claimed handle
    pub fn set_claimed_handle(&self, handle: &str) {
        *self.handle.lock() = Some(handle.to_string());
        self.claimed.store(true, Ordering::SeqCst);
    }

    pub fn mark_claimed(&self) {
        self.claimed.store(true, Ordering::SeqCst);
    }

    pub fn holds_handle(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }

    /// Give up the claim flag. Returns the handle if this call was the one
    /// that dropped it.
    pub fn unclaim(&self) -> Option<String> {
        if self.claimed.swap(false, Ordering::SeqCst) {
            self.handle()
        } else {
            None
        }
    }

    pub fn vehicle(&self) -> Option<VehicleId> {
        *self.vehicle.lock()
    }

    /// Attach a vehicle to a session that has none. Fails once the session is
    /// closing or if it already owns one.
    pub fn install_vehicle(&self, id: VehicleId) -> bool {
        let mut slot = self.vehicle.lock();
        if self.is_closed() || slot.is_some() {
            return false;
        }
        *slot = Some(id);
        true
    }

    /// Trade the current vehicle for the one `respawn` returns, holding the
    /// slot for the whole call so a hit or a close sees either the old vehicle
    /// or the new one. `None` when the session has no vehicle.
    pub fn respawn_vehicle<E>(
        &self,
        respawn: impl FnOnce(VehicleId) -> Result<Vehicle, E>,
    ) -> Option<Result<Vehicle, E>> {
        let mut slot = self.vehicle.lock();
        let old = (*slot)?;
        let result = respawn(old);
        if let Ok(vehicle) = &result {
            *slot = Some(vehicle.id);
        }
        Some(result)
    }

    pub fn take_vehicle(&self) -> Option<VehicleId> {
        self.vehicle.lock().take()
    }

    pub fn bank_points(&self, points: u32) {
        self.banked_points.store(points, Ordering::SeqCst);
    }

    pub fn banked_points(&self) -> u32 {
        self.banked_points.load(Ordering::SeqCst)
    }

    /// Refresh the last-activity timestamp
    pub fn touch(&self) {
        *self.last_active.lock() = Utc::now();
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        *self.last_active.lock()
    }

    /// Flag the session as closing. Only the first caller gets `true`.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Encode and send one message
    pub async fn send(&self, msg: &ServerMsg, id: &str) -> Result<(), SessionError> {
        let text = msg.encode(id)?;
        self.send_text(text).await
    }

    /// Send an already encoded frame
    pub async fn send_text(&self, text: String) -> Result<(), SessionError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text)).await
    }

    /// Close the write half; errors are irrelevant at this point
    pub async fn close_transport(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.close().await;
    }
}

/// All sessions that reached the active state
#[derive(Default)]
pub struct ClientDirectory {
    clients: DashMap<Uuid, Arc<Client>>,
}

impl ClientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, client: Arc<Client>) {
        self.clients.insert(client.session_id, client);
    }

    pub fn remove(&self, session_id: Uuid) -> Option<Arc<Client>> {
        self.clients.remove(&session_id).map(|(_, c)| c)
    }

    pub fn contains(&self, session_id: Uuid) -> bool {
        self.clients.contains_key(&session_id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// The session currently holding `handle`
    pub fn find_by_handle(&self, handle: &str) -> Option<Arc<Client>> {
        self.clients
            .iter()
            .find(|entry| entry.holds_handle() && entry.handle().as_deref() == Some(handle))
            .map(|entry| entry.value().clone())
    }

    /// Copy of every session, so no map shard stays locked across awaits
    pub fn all(&self) -> Vec<Arc<Client>> {
        self.clients.iter().map(|entry| entry.value().clone()).collect()
    }
}

/// Handles claimed by live sessions
#[derive(Default)]
pub struct HandleRegistry {
    claimed: Mutex<HashSet<String>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a handle. Empty or already claimed handles are refused.
    pub fn claim(&self, handle: &str) -> bool {
        if handle.is_empty() {
            return false;
        }
        self.claimed.lock().insert(handle.to_string())
    }

    pub fn release(&self, handle: &str) -> bool {
        self.claimed.lock().remove(handle)
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.claimed.lock().contains(handle)
    }

    pub fn len(&self) -> usize {
        self.claimed.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::StreamExt;

    fn client() -> (Client, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded();
        let sink: WsSink = Box::pin(tx.sink_map_err(|e| SessionError::Transport(e.to_string())));
        (Client::new(sink), rx)
    }

    #[test]
    fn concurrent_claims_for_one_handle_have_one_winner() {
        let registry = Arc::new(HandleRegistry::new());
        let threads: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.claim("alice"))
            })
            .collect();
        let winners = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn empty_handle_is_refused() {
        let registry = HandleRegistry::new();
        assert!(!registry.claim(""));
        assert!(registry.is_empty());

        assert!(registry.claim("bob"));
        assert!(registry.release("bob"));
        assert!(!registry.release("bob"));
        assert!(registry.claim("bob"));
    }

    #[test]
    fn vehicle_slot_follows_session_lifecycle() {
        let (client, _rx) = client();
        let first = VehicleId::new();
        let second = VehicleId::new();

        assert!(client.install_vehicle(first));
        assert!(!client.install_vehicle(second));
        assert_eq!(client.take_vehicle(), Some(first));
        assert_eq!(client.take_vehicle(), None);

        assert!(client.mark_closed());
        assert!(!client.mark_closed());
        assert!(!client.install_vehicle(first));
    }

    #[test]
    fn respawn_vehicle_swaps_only_on_success() {
        let (client, _rx) = client();
        let none: Option<Result<Vehicle, ()>> = client.respawn_vehicle(|_| Err(()));
        assert!(none.is_none());

        let first = VehicleId::new();
        assert!(client.install_vehicle(first));

        let failed: Result<Vehicle, &str> = client.respawn_vehicle(|_| Err("full")).unwrap();
        assert!(failed.is_err());
        assert_eq!(client.vehicle(), Some(first));

        let next = Vehicle::new("alice", 5, 5, 3);
        let replaced: Result<Vehicle, ()> = client
            .respawn_vehicle(|old| {
                assert_eq!(old, first);
                Ok(next.clone())
            })
            .unwrap();
        let replaced = replaced.unwrap();
        assert_eq!(replaced.id, next.id);
        assert_eq!(client.vehicle(), Some(next.id));
    }

    #[test]
    fn touch_advances_last_activity() {
        let (client, _rx) = client();
        let before = client.last_active();
        std::thread::sleep(std::time::Duration::from_millis(5));
        client.touch();
        assert!(client.last_active() > before);
    }

    #[test]
    fn unclaim_only_releases_once() {
        let (client, _rx) = client();
        assert_eq!(client.unclaim(), None);

        client.set_claimed_handle("alice");
        assert!(client.holds_handle());
        assert_eq!(client.unclaim().as_deref(), Some("alice"));
        assert_eq!(client.unclaim(), None);
        // The name stays for a later respawn
        assert_eq!(client.handle().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn send_writes_one_text_frame() {
        let (client, mut rx) = client();
        client.send(&ServerMsg::connect_notice(), "server").await.unwrap();

        let Some(Message::Text(text)) = rx.next().await else {
            panic!("expected a text frame");
        };
        assert!(text.contains("\"type\":0"));
    }

    #[tokio::test]
    async fn send_fails_once_the_peer_is_gone() {
        let (client, rx) = client();
        drop(rx);
        assert!(client.send(&ServerMsg::rejected(), "x").await.is_err());
    }

    #[test]
    fn directory_finds_only_claimed_handles() {
        let directory = ClientDirectory::new();
        let (alice, _rx) = client();
        alice.set_claimed_handle("alice");
        let alice = Arc::new(alice);
        directory.insert(alice.clone());

        assert!(directory.find_by_handle("alice").is_some());
        alice.unclaim();
        assert!(directory.find_by_handle("alice").is_none());

        assert!(directory.remove(alice.session_id).is_some());
        assert!(directory.is_empty());
    }
}
