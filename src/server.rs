use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, warn};
use tokio::sync::{mpsc, RwLock};
use warp::ws::{Message, WebSocket};

use crate::config::SessionConfig;
use crate::messages::{ClientEvent, ServerEvent};
use crate::presence::ConnectionId;
use crate::session::{SessionCoordinator, Transport};

type Outbox = mpsc::UnboundedSender<Message>;
type Connections = Arc<RwLock<HashMap<ConnectionId, Outbox>>>;

/// Fans server events out to WebSocket writer tasks.
#[derive(Clone, Default)]
pub struct WsTransport {
    connections: Connections,
}

impl WsTransport {
    pub async fn register(&self, connection_id: ConnectionId, outbox: Outbox) {
        let mut connections = self.connections.write().await;
        connections.insert(connection_id, outbox);
    }

    pub async fn unregister(&self, connection_id: &ConnectionId) {
        let mut connections = self.connections.write().await;
        connections.remove(connection_id);
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    fn encode(event: &ServerEvent) -> Option<Message> {
        match serde_json::to_string(event) {
            Ok(json) => Some(Message::text(json)),
            Err(e) => {
                warn!("Failed to serialize {}: {}", event.name(), e);
                None
            }
        }
    }

    async fn send_where(&self, event: &ServerEvent, include: impl Fn(&ConnectionId) -> bool + Send) {
        let Some(message) = Self::encode(event) else {
            return;
        };
        let connections = self.connections.read().await;
        for (connection_id, outbox) in connections.iter() {
            if include(connection_id) {
                // A closed outbox means the writer is gone; its disconnect is already queued.
                let _ = outbox.send(message.clone());
            }
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn emit_to(&self, connection_id: &ConnectionId, event: &ServerEvent) {
        let Some(message) = Self::encode(event) else {
            return;
        };
        let connections = self.connections.read().await;
        if let Some(outbox) = connections.get(connection_id) {
            let _ = outbox.send(message);
        }
    }

    async fn emit_to_all_except(&self, connection_id: &ConnectionId, event: &ServerEvent) {
        self.send_where(event, |id| id != connection_id).await;
    }

    async fn emit_to_all(&self, event: &ServerEvent) {
        self.send_where(event, |_| true).await;
    }
}

/// What connection tasks hand to the coordinator task.
#[derive(Debug)]
pub enum Inbound {
    Connect {
        connection_id: ConnectionId,
        outbox: Outbox,
    },
    Event {
        connection_id: ConnectionId,
        event: ClientEvent,
    },
    Disconnect {
        connection_id: ConnectionId,
    },
}

/// Handle shared by all connection tasks. The coordinator itself lives in a
/// single task behind the inbound queue, so events are applied one at a time.
#[derive(Clone)]
pub struct Server {
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl Server {
    pub fn start(config: SessionConfig) -> Self {
        let (inbound, rx) = mpsc::unbounded_channel();
        let transport = WsTransport::default();
        let coordinator = SessionCoordinator::new(config, transport.clone());
        tokio::spawn(run_coordinator(coordinator, transport, rx));
        Server { inbound }
    }

    pub async fn handle_connection(&self, ws: WebSocket) {
        let connection_id = ConnectionId::generate();
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let writer_id = connection_id.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_tx.send(message).await {
                    warn!("Failed to send to {}: {}", writer_id, e);
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        self.enqueue(Inbound::Connect {
            connection_id: connection_id.clone(),
            outbox: tx,
        });

        while let Some(result) = ws_rx.next().await {
            match result {
                Ok(msg) => {
                    if msg.is_close() {
                        break;
                    }
                    let Ok(text) = msg.to_str() else {
                        continue;
                    };
                    match ClientEvent::parse(text) {
                        Ok(event) => self.enqueue(Inbound::Event {
                            connection_id: connection_id.clone(),
                            event,
                        }),
                        Err(e) => warn!("Ignoring frame from {}: {}", connection_id, e),
                    }
                }
                Err(e) => {
                    warn!("WebSocket error on {}: {}", connection_id, e);
                    break;
                }
            }
        }

        self.enqueue(Inbound::Disconnect { connection_id });
    }

    fn enqueue(&self, inbound: Inbound) {
        if self.inbound.send(inbound).is_err() {
            error!("Session coordinator is no longer running");
        }
    }
}

async fn run_coordinator(
    mut coordinator: SessionCoordinator<WsTransport>,
    transport: WsTransport,
    mut rx: mpsc::UnboundedReceiver<Inbound>,
) {
    while let Some(inbound) = rx.recv().await {
        match inbound {
            Inbound::Connect {
                connection_id,
                outbox,
            } => {
                transport.register(connection_id.clone(), outbox).await;
                debug!("{} outboxes registered", transport.connection_count().await);
                coordinator.on_connect(connection_id).await;
            }
            Inbound::Event {
                connection_id,
                event,
            } => coordinator.on_event(&connection_id, event).await,
            Inbound::Disconnect { connection_id } => {
                transport.unregister(&connection_id).await;
                coordinator.on_disconnect(&connection_id).await;
            }
        }
    }
    debug!("Inbound queue closed, session coordinator stopping");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::time::timeout;

    use crate::messages::{JoinPayload, Notice, SendPayload};

    async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Message>) -> Value {
        let message = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("outbox closed");
        serde_json::from_str(message.to_str().unwrap()).unwrap()
    }

    fn connect(server: &Server, id: &str) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
        let connection_id = ConnectionId::from(id);
        let (outbox, rx) = mpsc::unbounded_channel();
        server.enqueue(Inbound::Connect {
            connection_id: connection_id.clone(),
            outbox,
        });
        (connection_id, rx)
    }

    fn join(server: &Server, connection_id: &ConnectionId, id: &str, user_name: &str) {
        server.enqueue(Inbound::Event {
            connection_id: connection_id.clone(),
            event: ClientEvent::Join(JoinPayload {
                id: Some(id.to_string()),
                user_name: Some(user_name.to_string()),
                full_name: None,
            }),
        });
    }

    #[tokio::test]
    async fn transport_respects_exclusion() {
        let transport = WsTransport::default();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = ConnectionId::from("a");
        transport.register(a.clone(), tx_a).await;
        transport.register("b".into(), tx_b).await;
        assert_eq!(transport.connection_count().await, 2);

        let event = ServerEvent::UserJoined(Notice::joined("alice"));
        transport.emit_to_all_except(&a, &event).await;
        assert!(rx_a.try_recv().is_err());
        assert_eq!(next_frame(&mut rx_b).await["event"], "user:joined");

        transport.emit_to(&a, &event).await;
        assert_eq!(next_frame(&mut rx_a).await["data"]["userName"], "alice");
        assert!(rx_b.try_recv().is_err());

        transport.unregister(&a).await;
        transport.emit_to_all(&event).await;
        assert!(rx_a.try_recv().is_err());
        assert_eq!(next_frame(&mut rx_b).await["event"], "user:joined");
    }

    #[tokio::test]
    async fn emit_to_closed_outbox_is_harmless() {
        let transport = WsTransport::default();
        let (tx, rx) = mpsc::unbounded_channel();
        transport.register("gone".into(), tx).await;
        drop(rx);
        transport
            .emit_to_all(&ServerEvent::UsersList(Vec::new()))
            .await;
    }

    #[tokio::test]
    async fn join_and_leave_through_the_queue() {
        let server = Server::start(SessionConfig::default());

        let (a, mut rx_a) = connect(&server, "a");
        assert_eq!(next_frame(&mut rx_a).await, json!({"event": "users:list", "data": []}));
        join(&server, &a, "1", "alice");
        assert_eq!(next_frame(&mut rx_a).await["data"][0]["userName"], "alice");

        let (b, mut rx_b) = connect(&server, "b");
        assert_eq!(next_frame(&mut rx_b).await["data"][0]["userName"], "alice");
        join(&server, &b, "2", "bob");

        let joined = next_frame(&mut rx_a).await;
        assert_eq!(joined["event"], "user:joined");
        assert_eq!(joined["data"]["userName"], "bob");
        let list = next_frame(&mut rx_a).await;
        assert_eq!(list["data"].as_array().unwrap().len(), 2);
        assert_eq!(next_frame(&mut rx_b).await["event"], "users:list");

        server.enqueue(Inbound::Disconnect { connection_id: b });
        let left = next_frame(&mut rx_a).await;
        assert_eq!(left["event"], "user:left");
        assert_eq!(left["data"]["message"], "bob dejó el chat");
        let list = next_frame(&mut rx_a).await;
        assert_eq!(list["data"], json!([{"id": "1", "userName": "alice", "connectionId": "a"}]));

        // b's outbox was dropped on unregister.
        assert!(timeout(Duration::from_secs(1), rx_b.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn late_joiner_receives_history_first() {
        let server = Server::start(SessionConfig {
            max_messages: 2,
            ..SessionConfig::default()
        });

        let (a, mut rx_a) = connect(&server, "a");
        next_frame(&mut rx_a).await;
        for text in ["m1", "m2", "m3"] {
            server.enqueue(Inbound::Event {
                connection_id: a.clone(),
                event: ClientEvent::SendMessage(SendPayload::new(text)),
            });
            let frame = next_frame(&mut rx_a).await;
            assert_eq!(frame["event"], "message:new");
            assert_eq!(frame["data"]["author"], "Usuario");
        }

        let (_c, mut rx_c) = connect(&server, "c");
        let history = next_frame(&mut rx_c).await;
        assert_eq!(history["event"], "message:history");
        let texts: Vec<&str> = history["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["text"].as_str().unwrap())
            .collect();
        assert_eq!(texts, vec!["m2", "m3"]);
        assert_eq!(next_frame(&mut rx_c).await["event"], "users:list");
    }
}
