//! One WebSocket connection: a reader task and a writer task.
//!
//! ```text
//!   socket ──► reader ──► Hub::broadcast_to_room ──► other members' queues
//!                │
//!                └──► DocumentManager (document channel)
//!
//!   own queue ──► writer ──► socket
//! ```
//!
//! The writer ends when the queue is closed or a write fails; the reader
//! ends on a read error, a close frame, or the writer ending. Whichever way,
//! the reader unregisters the client, which closes the queue and lets the
//! writer send a close frame.
//!
//! Room and document channels never share a hub room: `?room=x` and
//! `?doc=x` register under `room:x` and `doc:x`.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::hub::{ClientHandle, Hub, Payload, SendError};
use crate::manager::DocumentManager;
use crate::protocol::{DocumentMessage, DocumentMessageType, RoomMessage};
use crate::server::ServerCounters;

/// Which protocol a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Chat-style messages relayed to the room.
    Room,
    /// Edits and state requests against the document named by the room id.
    Document,
}

impl Channel {
    /// Hub room a connection to `id` on this channel joins.
    pub fn hub_key(self, id: &str) -> String {
        match self {
            Channel::Room => format!("room:{id}"),
            Channel::Document => format!("doc:{id}"),
        }
    }
}

/// Server side of one connection.
pub struct Session {
    channel: Channel,
    /// Room or document id as the client named it.
    name: String,
    client: Arc<ClientHandle>,
    outbound: mpsc::Receiver<Payload>,
    hub: Arc<Hub>,
    manager: Arc<DocumentManager>,
    counters: Arc<ServerCounters>,
}

impl Session {
    pub fn new(
        channel: Channel,
        room_id: impl Into<String>,
        queue_capacity: usize,
        hub: Arc<Hub>,
        manager: Arc<DocumentManager>,
        counters: Arc<ServerCounters>,
    ) -> Self {
        let name: String = room_id.into();
        let (client, outbound) = ClientHandle::new(channel.hub_key(&name), queue_capacity);
        Self {
            channel,
            name,
            client,
            outbound,
            hub,
            manager,
            counters,
        }
    }

    pub fn client(&self) -> &Arc<ClientHandle> {
        &self.client
    }

    /// Register with the hub, then pump frames until the connection ends.
    pub async fn run<S>(self, ws: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Session {
            channel,
            name,
            client,
            outbound,
            hub,
            manager,
            counters,
        } = self;

        hub.register(client.clone()).await;
        log::info!(
            "Client {} connected to {:?} channel {}",
            client.id(),
            channel,
            client.room_id()
        );

        let handler = FrameHandler {
            channel,
            name,
            client: client.clone(),
            hub: hub.clone(),
            manager,
        };
        if channel == Channel::Document {
            handler.send_document_state().await;
        }

        let (sink, source) = ws.split();
        let writer_done = Arc::new(Notify::new());
        let writer = tokio::spawn(write_pump(sink, outbound, client.clone(), writer_done.clone()));

        read_pump(source, &handler, &counters, &writer_done).await;

        hub.unregister(client.clone()).await;
        if let Err(e) = writer.await {
            log::error!("Writer task of client {} failed: {e}", client.id());
        }
        log::info!("Client {} disconnected from {}", client.id(), client.room_id());
    }
}

async fn read_pump<S>(
    mut source: SplitStream<WebSocketStream<S>>,
    handler: &FrameHandler,
    counters: &ServerCounters,
    writer_done: &Notify,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let id = handler.client.id();
    loop {
        let frame = tokio::select! {
            frame = source.next() => frame,
            _ = writer_done.notified() => break,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                counters.record_frame(text.len());
                handler.handle_text(text.as_str()).await;
            }
            Some(Ok(Message::Binary(data))) => {
                counters.record_frame(data.len());
                log::warn!("Ignoring binary frame ({} bytes) from client {id}", data.len());
            }
            Some(Ok(Message::Close(_))) | None => {
                log::debug!("Client {id} closed the connection");
                break;
            }
            // Ping/pong are answered by tungstenite itself.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                log::warn!("Read error from client {id}: {e}");
                break;
            }
        }
    }
}

async fn write_pump<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: mpsc::Receiver<Payload>,
    client: Arc<ClientHandle>,
    done: Arc<Notify>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(payload) = outbound.recv().await {
        if let Err(e) = sink.send(Message::text(payload.to_string())).await {
            log::warn!("Write error to client {}: {e}", client.id());
            done.notify_one();
            return;
        }
    }

    // Queue closed: the hub let go of this client.
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
    done.notify_one();
}

/// Protocol logic shared by every frame of one connection.
struct FrameHandler {
    channel: Channel,
    name: String,
    client: Arc<ClientHandle>,
    hub: Arc<Hub>,
    manager: Arc<DocumentManager>,
}

impl FrameHandler {
    async fn handle_text(&self, text: &str) {
        match self.channel {
            Channel::Room => self.handle_room_frame(text).await,
            Channel::Document => self.handle_document_frame(text).await,
        }
    }

    /// Id stamped on frames and used for the document.
    fn room_id(&self) -> &str {
        &self.name
    }

    fn hub_key(&self) -> &str {
        self.client.room_id()
    }

    async fn handle_room_frame(&self, text: &str) {
        let mut msg = match RoomMessage::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Malformed room frame from client {}: {e}", self.client.id());
                return;
            }
        };
        msg.stamp(self.room_id());

        match msg.encode() {
            Ok(json) => {
                self.hub
                    .broadcast_to_room(self.hub_key(), Payload::from(json), Some(self.client.id()))
                    .await;
            }
            Err(e) => log::error!("Failed to encode room message: {e}"),
        }
    }

    async fn handle_document_frame(&self, text: &str) {
        let mut msg = match DocumentMessage::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Malformed document frame from client {}: {e}", self.client.id());
                return;
            }
        };
        msg.stamp(self.room_id());

        match msg.msg_type {
            DocumentMessageType::Edit => self.handle_edit(msg).await,
            DocumentMessageType::RequestDocument => self.send_document_state().await,
            DocumentMessageType::DocumentUpdate => self.handle_document_update(msg).await,
            other => {
                log::debug!("Ignoring {other:?} frame from client {}", self.client.id());
            }
        }
    }

    async fn handle_edit(&self, mut msg: DocumentMessage) {
        let doc_id = self.room_id();
        let Some(mut edit) = msg.edit.take() else {
            log::debug!("Edit frame without edit from client {}", self.client.id());
            return;
        };
        edit.user = msg.user.clone();

        match self.manager.apply_edit(doc_id, &mut edit).await {
            Ok(version) => {
                msg.edit = Some(edit);
                msg.version = Some(version);
                match msg.encode() {
                    Ok(json) => {
                        self.hub
                            .broadcast_to_room(self.hub_key(), Payload::from(json), Some(self.client.id()))
                            .await;
                    }
                    Err(e) => log::error!("Failed to encode edit broadcast: {e}"),
                }
            }
            Err(e) => {
                log::debug!("Rejected edit from client {} on {doc_id}: {e}", self.client.id());
                self.reply(&DocumentMessage::error(doc_id, e.to_string())).await;
            }
        }
    }

    async fn handle_document_update(&self, msg: DocumentMessage) {
        let doc_id = self.room_id();
        let Some(content) = msg.content else {
            log::warn!("document_update without content from client {}", self.client.id());
            return;
        };

        let doc = self.manager.get_document(doc_id).await;
        doc.set_content(content);
        if let Err(e) = self.manager.save_document(doc_id).await {
            log::error!("Failed to save document {doc_id}: {e}");
        }

        let (content, version) = doc.state();
        self.reply(&DocumentMessage::document_updated(doc_id, content, version))
            .await;
    }

    async fn send_document_state(&self) {
        let doc_id = self.room_id();
        let (content, version) = self.manager.get_document(doc_id).await.state();
        self.reply(&DocumentMessage::document_state(doc_id, content, version))
            .await;
    }

    /// Queue a message for this client only. A full queue disconnects it.
    async fn reply(&self, msg: &DocumentMessage) {
        let json = match msg.encode() {
            Ok(json) => json,
            Err(e) => {
                log::error!("Failed to encode reply: {e}");
                return;
            }
        };

        match self.client.try_send(Payload::from(json)) {
            Ok(()) => {}
            Err(SendError::QueueFull(id)) => {
                log::warn!("Outbound queue of client {id} is full, disconnecting");
                self.hub.unregister(self.client.clone()).await;
            }
            Err(e @ SendError::Closed(_)) => log::debug!("Reply dropped: {e}"),
        }
    }
}
