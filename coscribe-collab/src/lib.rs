//! # coscribe-collab — Real-time collaboration server for CoScribe
//!
//! WebSocket rooms with fan-out broadcast, and versioned documents edited
//! by many clients under optimistic concurrency control.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     WebSocket      ┌────────────────────────────┐
//! │ CollabClient  │ ◄────────────────► │ CollabServer               │
//! │ (per user)    │     JSON frames    │  └─ Session (per conn)     │
//! └───────────────┘                    │      ├─ reader ─┐          │
//!                                      │      └─ writer  │          │
//!                                      └─────────────────┼──────────┘
//!                                                        │
//!                            ┌───────────────────────────┴──┐
//!                            ▼                              ▼
//!                     ┌─────────────┐              ┌─────────────────┐
//!                     │ Hub         │              │ DocumentManager │
//!                     │ (rooms,     │              │ (live docs)     │
//!                     │  fan-out)   │              └────────┬────────┘
//!                     └─────────────┘                       ▼
//!                                                  ┌─────────────────┐
//!                                                  │ Store           │
//!                                                  │ (RocksDB / mem) │
//!                                                  └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire messages for room and document channels
//! - [`hub`] — room registry, serialized membership, drop-and-disconnect broadcast
//! - [`connection`] — per-connection reader/writer pumps
//! - [`manager`] — one live document per id, best-effort persistence
//! - [`storage`] — `Store` trait with RocksDB and in-memory backends
//! - [`server`] — accept loop and route selection
//! - [`client`] — WebSocket client

pub mod client;
pub mod connection;
pub mod hub;
pub mod manager;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use client::{ClientEvent, CollabClient, ConnectionState};
pub use connection::{Channel, Session};
pub use hub::{ClientHandle, Hub, HubLoop, HubStats, Payload, RoomInfo, SendError};
pub use manager::DocumentManager;
pub use protocol::{DocumentMessage, DocumentMessageType, ProtocolError, RoomMessage};
pub use server::{parse_route, CollabServer, ServerConfig, ServerStats};
pub use storage::{DocumentMetadata, MemoryStore, RocksStore, Store, StoreConfig, StoreError};
