//! WebSocket client for the collaboration server.
//!
//! Used by tools and by the integration tests. One client speaks one
//! channel: a chat room or a document.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use coscribe_core::Edit;

use crate::connection::Channel;
use crate::protocol::{DocumentMessage, ProtocolError, RoomMessage};
use crate::server::{DOCUMENT_PATH, ROOM_PATH};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connection established
    Connected,
    /// Connection lost or closed by the server
    Disconnected,
    /// A message relayed on a room channel
    Room(RoomMessage),
    /// A message on a document channel
    Document(DocumentMessage),
}

/// The collaboration client.
pub struct CollabClient {
    user: String,
    channel: Channel,
    room_id: String,
    server_url: String,

    state: Arc<RwLock<ConnectionState>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,

    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    event_tx: mpsc::Sender<ClientEvent>,
}

impl CollabClient {
    /// A client for chat room `room` at `server_url` (e.g. `ws://127.0.0.1:8080`).
    pub fn room(server_url: impl Into<String>, room: impl Into<String>, user: impl Into<String>) -> Self {
        Self::new(Channel::Room, server_url, room, user)
    }

    /// A client for document `doc` at `server_url`.
    pub fn document(server_url: impl Into<String>, doc: impl Into<String>, user: impl Into<String>) -> Self {
        Self::new(Channel::Document, server_url, doc, user)
    }

    fn new(
        channel: Channel,
        server_url: impl Into<String>,
        room_id: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            user: user.into(),
            channel,
            room_id: room_id.into(),
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Full URL including route and percent-encoded id.
    pub fn url(&self) -> String {
        let (path, key) = match self.channel {
            Channel::Room => (ROOM_PATH, "room"),
            Channel::Document => (DOCUMENT_PATH, "doc"),
        };
        format!(
            "{}{path}?{key}={}",
            self.server_url.trim_end_matches('/'),
            urlencoding::encode(&self.room_id)
        )
    }

    /// Connect to the server.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let (ws_stream, _) = match tokio_tungstenite::connect_async(self.url()).await {
            Ok(connected) => connected,
            Err(e) => {
                log::warn!("Failed to connect to {}: {e}", self.url());
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::text(text)).await.is_err() {
                    return;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(ClientEvent::Connected).await;

        // Reader task: decode incoming frames into events
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let channel = self.channel;
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let event = match channel {
                            Channel::Room => RoomMessage::decode(text.as_str()).map(ClientEvent::Room),
                            Channel::Document => {
                                DocumentMessage::decode(text.as_str()).map(ClientEvent::Document)
                            }
                        };
                        match event {
                            Ok(event) => {
                                let _ = event_tx.send(event).await;
                            }
                            Err(e) => log::warn!("Undecodable frame from server: {e}"),
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(ClientEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Close the connection. The server sees a close frame.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    async fn send_text(&self, text: String) -> Result<(), ProtocolError> {
        let tx = self.outgoing_tx.as_ref().ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(text).await.map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Send a chat-style message with `content` to the room.
    pub async fn send_chat(&self, msg_type: &str, content: serde_json::Value) -> Result<(), ProtocolError> {
        let msg = RoomMessage::new(msg_type, content, self.user.clone());
        self.send_text(msg.encode()?).await
    }

    /// Submit an edit against the document version it was computed from.
    pub async fn send_edit(&self, edit: Edit) -> Result<(), ProtocolError> {
        let msg = DocumentMessage::edit(edit, self.user.clone());
        self.send_text(msg.encode()?).await
    }

    /// Ask for the current content and version.
    pub async fn request_document(&self) -> Result<(), ProtocolError> {
        let msg = DocumentMessage::request_document(self.user.clone());
        self.send_text(msg.encode()?).await
    }

    /// Overwrite the whole document.
    pub async fn update_document(&self, content: impl Into<String>) -> Result<(), ProtocolError> {
        let msg = DocumentMessage::document_update(content, self.user.clone());
        self.send_text(msg.encode()?).await
    }

    /// Send an arbitrary frame as is.
    pub async fn send_raw(&self, text: impl Into<String>) -> Result<(), ProtocolError> {
        self.send_text(text.into()).await
    }
}
