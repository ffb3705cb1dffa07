//! WebSocket server: accept loop and route selection.
//!
//! Architecture:
//! ```text
//! TCP accept ── handshake ──┬── /ws/room?room=<id>     ── Session(Room)
//!                           ├── /ws/document?doc=<id>  ── Session(Document)
//!                           └── anything else          ── 404
//!
//! Session ──► Hub (rooms, broadcast)
//!         └─► DocumentManager ──► Store (RocksDB or in-memory)
//! ```
//!
//! The hub and the manager are built once per server and shared by every
//! connection.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use crate::connection::{Channel, Session};
use crate::hub::Hub;
use crate::manager::DocumentManager;
use crate::storage::{MemoryStore, RocksStore, StoreConfig, StoreError};

pub const ROOM_PATH: &str = "/ws/room";
pub const DOCUMENT_PATH: &str = "/ws/document";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Outbound queue capacity per connection; overflow disconnects
    pub client_queue_capacity: usize,
    /// Persistence storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
    /// Room or document id used when the query names none
    pub default_room: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            client_queue_capacity: 256,
            storage_path: None,
            default_room: "default".to_string(),
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub total_bytes: u64,
}

/// Live counters behind [`ServerStats`].
#[derive(Debug, Default)]
pub struct ServerCounters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    total_frames: AtomicU64,
    total_bytes: AtomicU64,
}

impl ServerCounters {
    pub(crate) fn record_frame(&self, bytes: usize) {
        self.total_frames.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ServerStats {
        ServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_frames: self.total_frames.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Map a handshake path and query to a channel and room id.
///
/// `None` for unknown paths. A missing or empty id falls back to `default_room`.
pub fn parse_route(path: &str, query: Option<&str>, default_room: &str) -> Option<(Channel, String)> {
    let (channel, key) = match path.trim_end_matches('/') {
        ROOM_PATH => (Channel::Room, "room"),
        DOCUMENT_PATH => (Channel::Document, "doc"),
        _ => return None,
    };

    let id = query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| {
            // Form encoding writes spaces as '+'.
            let v = v.replace('+', " ");
            urlencoding::decode(&v)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| v.clone())
        })
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| default_room.to_string());

    Some((channel, id))
}

fn not_found() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("Not Found".to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

/// The collaboration server.
pub struct CollabServer {
    config: ServerConfig,
    hub: Arc<Hub>,
    manager: Arc<DocumentManager>,
    counters: Arc<ServerCounters>,
}

impl CollabServer {
    /// Create a server, opening RocksDB at `storage_path` if set.
    ///
    /// Spawns the hub loop, so it must be called inside a tokio runtime.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let manager = match &config.storage_path {
            Some(path) => {
                let store = RocksStore::open(StoreConfig {
                    path: path.clone(),
                    ..StoreConfig::default()
                })?;
                DocumentManager::with_store(Arc::new(store))
            }
            None => {
                log::info!("No storage path configured, documents live in memory only");
                DocumentManager::with_store(Arc::new(MemoryStore::new()))
            }
        };
        Ok(Self::with_manager(config, Arc::new(manager)))
    }

    /// Create a server around an existing manager.
    pub fn with_manager(config: ServerConfig, manager: Arc<DocumentManager>) -> Self {
        Self {
            config,
            hub: Hub::spawn(),
            manager,
            counters: Arc::new(ServerCounters::default()),
        }
    }

    /// Bind `bind_addr` and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        log::info!("Collab server listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            let manager = self.manager.clone();
            let counters = self.counters.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, hub, manager, counters, config).await {
                    log::warn!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        hub: Arc<Hub>,
        manager: Arc<DocumentManager>,
        counters: Arc<ServerCounters>,
        config: ServerConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut route = None;
        let ws = accept_hdr_async(stream, |req: &Request, resp: Response| {
            let uri = req.uri();
            match parse_route(uri.path(), uri.query(), &config.default_room) {
                Some(found) => {
                    route = Some(found);
                    Ok(resp)
                }
                None => {
                    log::info!("Refusing {addr}: no route for {uri}");
                    Err(not_found())
                }
            }
        })
        .await?;

        let Some((channel, room_id)) = route else {
            return Ok(());
        };
        log::info!("WebSocket connection from {addr} on {channel:?} {room_id}");

        counters.connection_opened();
        let session = Session::new(
            channel,
            room_id,
            config.client_queue_capacity,
            hub,
            manager,
            counters.clone(),
        );
        session.run(ws).await;
        counters.connection_closed();

        Ok(())
    }

    pub fn stats(&self) -> ServerStats {
        self.counters.snapshot()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn manager(&self) -> &Arc<DocumentManager> {
        &self.manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.client_queue_capacity, 256);
        assert_eq!(config.default_room, "default");
        assert!(config.storage_path.is_none());
    }

    #[test]
    fn test_parse_route_room() {
        assert_eq!(
            parse_route("/ws/room", Some("room=lobby"), "default"),
            Some((Channel::Room, "lobby".to_string()))
        );
        assert_eq!(
            parse_route("/ws/room/", Some("x=1&room=two"), "default"),
            Some((Channel::Room, "two".to_string()))
        );
    }

    #[test]
    fn test_parse_route_document() {
        assert_eq!(
            parse_route("/ws/document", Some("doc=design%20notes"), "default"),
            Some((Channel::Document, "design notes".to_string()))
        );
    }

    #[test]
    fn test_parse_route_plus_is_space() {
        assert_eq!(
            parse_route("/ws/document", Some("doc=design+notes"), "default"),
            parse_route("/ws/document", Some("doc=design%20notes"), "default"),
        );
        assert_eq!(
            parse_route("/ws/room", Some("room=c%2B%2B+club"), "default"),
            Some((Channel::Room, "c++ club".to_string()))
        );
    }

    #[test]
    fn test_parse_route_falls_back_to_default() {
        assert_eq!(
            parse_route("/ws/document", None, "main"),
            Some((Channel::Document, "main".to_string()))
        );
        assert_eq!(
            parse_route("/ws/room", Some("room="), "main"),
            Some((Channel::Room, "main".to_string()))
        );
        assert_eq!(
            parse_route("/ws/room", Some("room"), "main"),
            Some((Channel::Room, "main".to_string()))
        );
    }

    #[test]
    fn test_parse_route_unknown_path() {
        assert_eq!(parse_route("/ws/echo", None, "default"), None);
        assert_eq!(parse_route("/", Some("room=a"), "default"), None);
    }

    #[test]
    fn test_not_found_response() {
        let response = not_found();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = CollabServer::new(ServerConfig::default()).unwrap();
        assert_eq!(server.stats(), ServerStats::default());
        assert_eq!(server.bind_addr(), "127.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_server_with_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            storage_path: Some(dir.path().join("db")),
            ..ServerConfig::default()
        };
        let server = CollabServer::new(config).unwrap();
        assert!(server.manager().store().is_some());
        assert!(dir.path().join("db").exists());
    }

    #[test]
    fn test_counters() {
        let counters = ServerCounters::default();
        counters.connection_opened();
        counters.connection_opened();
        counters.connection_closed();
        counters.record_frame(10);
        counters.record_frame(5);
        assert_eq!(
            counters.snapshot(),
            ServerStats {
                total_connections: 2,
                active_connections: 1,
                total_frames: 2,
                total_bytes: 15,
            }
        );
    }
}
