//! Room registry and fan-out broadcast.
//!
//! ```text
//!   register ───┐                       ┌──► Room "a" { client, client }
//!               ├──► HubLoop (1 task) ──┤
//! unregister ───┘        │              └──► Room "b" { client }
//!                        ▼
//!            rooms: Mutex<HashMap<room, Room>>
//!                        ▲
//!   broadcast_to_room ───┘  try_send to each member, evict on full queue
//! ```
//!
//! Membership changes are funneled through a single consumer task, so no two
//! registrations or unregistrations interleave. Broadcast takes the same
//! exclusive lock for its whole iteration because it may evict members whose
//! outbound queue is full. Nothing in here ever waits on a slow client:
//! enqueueing is non-blocking and overflow means disconnection.
//!
//! A room exists exactly while it has at least one member.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};

use tokio::sync::{mpsc, oneshot, Mutex};
use uuid::Uuid;

/// Encoded frame as queued for a client. Shared between all recipients.
pub type Payload = Arc<str>;

/// Failure to enqueue onto a client's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("outbound queue of client {0} is full")]
    QueueFull(Uuid),
    #[error("outbound queue of client {0} is closed")]
    Closed(Uuid),
}

/// Server-side state of one connection as seen by the hub.
///
/// The outbound queue is closed by dropping its only sender. That happens
/// once, from the hub (unregister or eviction); later closes are no-ops.
pub struct ClientHandle {
    id: Uuid,
    room_id: String,
    outbound: std::sync::Mutex<Option<mpsc::Sender<Payload>>>,
}

impl ClientHandle {
    /// Create a handle for `room_id` with a bounded outbound queue.
    ///
    /// Returns the receiving end, which belongs to the connection's writer.
    pub fn new(room_id: impl Into<String>, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: Uuid::new_v4(),
            room_id: room_id.into(),
            outbound: std::sync::Mutex::new(Some(tx)),
        };
        (Arc::new(handle), rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Enqueue without waiting.
    pub fn try_send(&self, payload: Payload) -> Result<(), SendError> {
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = outbound.as_ref().ok_or(SendError::Closed(self.id))?;
        tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull(self.id),
            mpsc::error::TrySendError::Closed(_) => SendError::Closed(self.id),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Close the outbound queue. Returns `true` only for the call that closed it.
    pub(crate) fn close(&self) -> bool {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("room_id", &self.room_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A named set of connected clients.
struct Room {
    clients: HashMap<Uuid, Arc<ClientHandle>>,
}

impl Room {
    fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }
}

/// Observational view of one room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomInfo {
    pub member_count: usize,
    pub exists: bool,
}

/// Statistics for monitoring hub health.
#[derive(Debug, Clone, Default)]
pub struct HubStats {
    pub messages_delivered: u64,
    pub clients_evicted: u64,
    pub active_rooms: usize,
}

#[derive(Default)]
struct AtomicHubStats {
    messages_delivered: AtomicU64,
    clients_evicted: AtomicU64,
}

type Rooms = Arc<Mutex<HashMap<String, Room>>>;

struct Membership {
    client: Arc<ClientHandle>,
    done: oneshot::Sender<()>,
}

/// The room registry. Cheap to share behind an `Arc`.
pub struct Hub {
    rooms: Rooms,
    register_tx: mpsc::UnboundedSender<Membership>,
    unregister_tx: mpsc::UnboundedSender<Membership>,
    stats: Arc<AtomicHubStats>,
}

/// The single consumer of membership changes. Runs until the [`Hub`] is dropped.
pub struct HubLoop {
    rooms: Rooms,
    register_rx: mpsc::UnboundedReceiver<Membership>,
    unregister_rx: mpsc::UnboundedReceiver<Membership>,
}

impl Hub {
    /// Create a hub and the loop that must be driven for membership changes
    /// to take effect.
    pub fn new() -> (Self, HubLoop) {
        let rooms: Rooms = Arc::new(Mutex::new(HashMap::new()));
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();

        let hub = Self {
            rooms: rooms.clone(),
            register_tx,
            unregister_tx,
            stats: Arc::new(AtomicHubStats::default()),
        };
        let event_loop = HubLoop {
            rooms,
            register_rx,
            unregister_rx,
        };
        (hub, event_loop)
    }

    /// Create a hub with its loop running on the current tokio runtime.
    pub fn spawn() -> Arc<Self> {
        let (hub, event_loop) = Self::new();
        tokio::spawn(event_loop.run());
        Arc::new(hub)
    }

    /// Add a client to its room, creating the room if needed.
    ///
    /// Resolves once the membership change has been applied.
    pub async fn register(&self, client: Arc<ClientHandle>) {
        Self::submit(&self.register_tx, client).await;
    }

    /// Remove a client from its room and close its outbound queue.
    ///
    /// Safe to call for a client that was already evicted or unregistered.
    pub async fn unregister(&self, client: Arc<ClientHandle>) {
        Self::submit(&self.unregister_tx, client).await;
    }

    async fn submit(tx: &mpsc::UnboundedSender<Membership>, client: Arc<ClientHandle>) {
        let id = client.id();
        let (done, applied) = oneshot::channel();
        if tx.send(Membership { client, done }).is_err() || applied.await.is_err() {
            log::error!("Hub loop is not running; membership change for client {id} dropped");
        }
    }

    /// Deliver `payload` to every member of `room_id` except `exclude`.
    ///
    /// Members whose queue is full (or already closed) are removed from the
    /// room and their queue is closed. Returns the number of deliveries.
    pub async fn broadcast_to_room(&self, room_id: &str, payload: Payload, exclude: Option<Uuid>) -> usize {
        let mut rooms = self.rooms.lock().await;
        let Some(room) = rooms.get_mut(room_id) else {
            log::debug!("Room {room_id} not found for broadcast");
            return 0;
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, client) in &room.clients {
            if Some(*id) == exclude {
                continue;
            }
            match client.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    log::warn!("Failed to send to client {id}, removing: {e}");
                    failed.push(*id);
                }
            }
        }

        for id in &failed {
            if let Some(client) = room.clients.remove(id) {
                client.close();
            }
        }
        if room.clients.is_empty() {
            rooms.remove(room_id);
            log::info!("Room {room_id} removed (empty)");
        }

        self.stats
            .messages_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.stats
            .clients_evicted
            .fetch_add(failed.len() as u64, Ordering::Relaxed);
        delivered
    }

    /// Member count and existence of a room. Best effort.
    pub async fn room_info(&self, room_id: &str) -> RoomInfo {
        let rooms = self.rooms.lock().await;
        match rooms.get(room_id) {
            Some(room) => RoomInfo {
                member_count: room.clients.len(),
                exists: true,
            },
            None => RoomInfo {
                member_count: 0,
                exists: false,
            },
        }
    }

    /// Identifiers of all active rooms, sorted.
    pub async fn room_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rooms.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn stats(&self) -> HubStats {
        HubStats {
            messages_delivered: self.stats.messages_delivered.load(Ordering::Relaxed),
            clients_evicted: self.stats.clients_evicted.load(Ordering::Relaxed),
            active_rooms: self.rooms.lock().await.len(),
        }
    }
}

impl HubLoop {
    /// Apply membership changes one at a time.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(Membership { client, done }) = self.register_rx.recv() => {
                    self.register_client(client).await;
                    let _ = done.send(());
                }
                Some(Membership { client, done }) = self.unregister_rx.recv() => {
                    self.unregister_client(client).await;
                    let _ = done.send(());
                }
                else => break,
            }
        }
        log::debug!("Hub loop stopped");
    }

    async fn register_client(&self, client: Arc<ClientHandle>) {
        let mut rooms = self.rooms.lock().await;
        let room = rooms.entry(client.room_id().to_string()).or_insert_with(|| {
            log::info!("Room {} created", client.room_id());
            Room::new()
        });
        room.clients.insert(client.id(), client.clone());
        log::debug!(
            "Client {} joined room {} ({} members)",
            client.id(),
            client.room_id(),
            room.clients.len()
        );
    }

    async fn unregister_client(&self, client: Arc<ClientHandle>) {
        let mut rooms = self.rooms.lock().await;
        let room_id = client.room_id();

        if let Some(room) = rooms.get_mut(room_id) {
            room.clients.remove(&client.id());
            if room.clients.is_empty() {
                rooms.remove(room_id);
                log::info!("Room {room_id} removed (empty)");
            }
        }

        if client.close() {
            log::debug!("Client {} left room {room_id}", client.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn payload(text: &str) -> Payload {
        Arc::from(text)
    }

    #[tokio::test]
    async fn test_register_creates_room_and_unregister_removes_it() {
        let hub = Hub::spawn();
        let (client, _rx) = ClientHandle::new("lobby", 8);

        assert!(!hub.room_info("lobby").await.exists);
        hub.register(client.clone()).await;
        assert_eq!(
            hub.room_info("lobby").await,
            RoomInfo { member_count: 1, exists: true }
        );

        hub.unregister(client.clone()).await;
        assert!(!hub.room_info("lobby").await.exists);
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_room_survives_until_last_member_leaves() {
        let hub = Hub::spawn();
        let (a, _rx_a) = ClientHandle::new("lobby", 8);
        let (b, _rx_b) = ClientHandle::new("lobby", 8);
        hub.register(a.clone()).await;
        hub.register(b.clone()).await;

        hub.unregister(a).await;
        assert_eq!(hub.room_info("lobby").await.member_count, 1);
        hub.unregister(b).await;
        assert!(hub.room_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let hub = Hub::spawn();
        let (sender, mut sender_rx) = ClientHandle::new("lobby", 8);
        let (peer, mut peer_rx) = ClientHandle::new("lobby", 8);
        hub.register(sender.clone()).await;
        hub.register(peer.clone()).await;

        let delivered = hub
            .broadcast_to_room("lobby", payload("hello"), Some(sender.id()))
            .await;
        assert_eq!(delivered, 1);

        assert_eq!(&*peer_rx.recv().await.unwrap(), "hello");
        assert!(sender_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_to_missing_room() {
        let hub = Hub::spawn();
        assert_eq!(hub.broadcast_to_room("nowhere", payload("x"), None).await, 0);
    }

    #[tokio::test]
    async fn test_full_queue_evicts_client() {
        let hub = Hub::spawn();
        let (slow, mut slow_rx) = ClientHandle::new("lobby", 1);
        let (fast, mut fast_rx) = ClientHandle::new("lobby", 8);
        hub.register(slow.clone()).await;
        hub.register(fast.clone()).await;

        assert_eq!(hub.broadcast_to_room("lobby", payload("one"), None).await, 2);
        assert_eq!(hub.broadcast_to_room("lobby", payload("two"), None).await, 1);

        assert!(slow.is_closed());
        assert_eq!(hub.room_info("lobby").await.member_count, 1);
        assert_eq!(&*fast_rx.recv().await.unwrap(), "one");
        assert_eq!(&*fast_rx.recv().await.unwrap(), "two");

        // The evicted client drains what was queued, then sees the close.
        assert_eq!(&*slow_rx.recv().await.unwrap(), "one");
        assert!(slow_rx.recv().await.is_none());

        let stats = hub.stats().await;
        assert_eq!(stats.clients_evicted, 1);
        assert_eq!(stats.messages_delivered, 3);
    }

    #[tokio::test]
    async fn test_evicting_last_member_removes_room() {
        let hub = Hub::spawn();
        let (sender, _sender_rx) = ClientHandle::new("solo", 8);
        let (slow, _slow_rx) = ClientHandle::new("solo", 1);
        hub.register(slow.clone()).await;

        hub.broadcast_to_room("solo", payload("fill"), None).await;
        hub.broadcast_to_room("solo", payload("overflow"), Some(sender.id())).await;

        assert!(!hub.room_info("solo").await.exists);
    }

    #[tokio::test]
    async fn test_unregister_after_eviction_is_harmless() {
        let hub = Hub::spawn();
        let (slow, _rx) = ClientHandle::new("lobby", 1);
        let (other, _other_rx) = ClientHandle::new("lobby", 8);
        hub.register(slow.clone()).await;
        hub.register(other.clone()).await;

        hub.broadcast_to_room("lobby", payload("a"), None).await;
        hub.broadcast_to_room("lobby", payload("b"), None).await;
        assert!(slow.is_closed());

        hub.unregister(slow.clone()).await;
        hub.unregister(slow).await;
        assert_eq!(hub.room_info("lobby").await.member_count, 1);
    }

    #[tokio::test]
    async fn test_close_happens_once() {
        let (client, mut rx) = ClientHandle::new("r", 4);
        assert!(client.close());
        assert!(!client.close());
        assert!(rx.recv().await.is_none());
        assert_eq!(
            client.try_send(payload("late")),
            Err(SendError::Closed(client.id()))
        );
    }

    #[tokio::test]
    async fn test_delivery_order_per_recipient() {
        let hub = Hub::spawn();
        let (reader, mut rx) = ClientHandle::new("ordered", 512);
        hub.register(reader).await;

        for i in 0..200 {
            hub.broadcast_to_room("ordered", payload(&i.to_string()), None).await;
        }
        for i in 0..200 {
            assert_eq!(&*rx.recv().await.unwrap(), i.to_string());
        }
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let hub = Hub::spawn();
        let (a, mut rx_a) = ClientHandle::new("a", 8);
        let (b, _rx_b) = ClientHandle::new("b", 8);
        hub.register(a).await;
        hub.register(b).await;

        hub.broadcast_to_room("b", payload("for b"), None).await;
        assert!(timeout(Duration::from_millis(50), rx_a.recv()).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_churn_leaves_no_empty_rooms() {
        let hub = Hub::spawn();
        let mut tasks = Vec::new();

        for i in 0..50 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                let room = format!("room-{}", i % 5);
                let (client, _rx) = ClientHandle::new(room.clone(), 4);
                hub.register(client.clone()).await;
                for _ in 0..10 {
                    hub.broadcast_to_room(&room, Arc::from("tick"), Some(client.id()))
                        .await;
                }
                hub.unregister(client).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(hub.room_ids().await.is_empty());
        assert_eq!(hub.stats().await.active_rooms, 0);
    }

    #[tokio::test]
    async fn test_membership_changes_need_running_loop() {
        let (hub, event_loop) = Hub::new();
        let (client, _rx) = ClientHandle::new("lobby", 4);
        drop(event_loop);

        hub.register(client).await;
        assert!(!hub.room_info("lobby").await.exists);
    }
}
