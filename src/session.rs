use std::collections::HashSet;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};

use crate::config::SessionConfig;
use crate::history::{HistoryRing, Message};
use crate::messages::{ClientEvent, JoinPayload, Notice, SendPayload, ServerEvent, TypingStatus};
use crate::presence::{ConnectionId, Participant, PresenceTable};

/// Outbound delivery the coordinator needs from whatever carries the bytes.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn emit_to(&self, connection_id: &ConnectionId, event: &ServerEvent);
    async fn emit_to_all_except(&self, connection_id: &ConnectionId, event: &ServerEvent);
    async fn emit_to_all(&self, event: &ServerEvent);
}

/// Millisecond ids, bumped past the previous one when the clock has not moved.
#[derive(Debug, Default)]
struct MessageIds {
    last: Option<i64>,
}

impl MessageIds {
    fn next(&mut self, now_millis: i64) -> String {
        let id = match self.last {
            Some(last) if now_millis <= last => last + 1,
            _ => now_millis,
        };
        self.last = Some(id);
        id.to_string()
    }
}

/// Owns presence and history for one chat and decides who hears about what.
///
/// Every method takes `&mut self`: callers feed it one event at a time, which
/// is what keeps eviction order and presence consistent.
pub struct SessionCoordinator<T> {
    config: SessionConfig,
    transport: T,
    history: HistoryRing,
    presence: PresenceTable,
    live: HashSet<ConnectionId>,
    ids: MessageIds,
}

impl<T: Transport> SessionCoordinator<T> {
    pub fn new(config: SessionConfig, transport: T) -> Self {
        SessionCoordinator {
            history: HistoryRing::new(config.max_messages),
            presence: PresenceTable::new(),
            live: HashSet::new(),
            ids: MessageIds::default(),
            config,
            transport,
        }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[cfg(test)]
    pub fn history(&self) -> &HistoryRing {
        &self.history
    }

    #[cfg(test)]
    pub fn participants(&self) -> Vec<Participant> {
        self.presence.list()
    }

    #[cfg(test)]
    pub fn is_live(&self, connection_id: &ConnectionId) -> bool {
        self.live.contains(connection_id)
    }

    pub async fn on_connect(&mut self, connection_id: ConnectionId) {
        if !self.live.insert(connection_id.clone()) {
            debug!("Connection {} already open, ignoring connect", connection_id);
            return;
        }
        info!("Connection {} opened ({} live)", connection_id, self.live.len());

        if !self.history.is_empty() {
            let history = self.history.recent(self.config.max_messages);
            self.transport
                .emit_to(&connection_id, &ServerEvent::MessageHistory(history))
                .await;
        }
        self.transport
            .emit_to(&connection_id, &ServerEvent::UsersList(self.presence.list()))
            .await;
    }

    pub async fn on_event(&mut self, connection_id: &ConnectionId, event: ClientEvent) {
        if !self.live.contains(connection_id) {
            debug!("Dropping {} from unknown connection {}", event.name(), connection_id);
            return;
        }
        match event {
            ClientEvent::Join(payload) => self.join(connection_id, payload).await,
            ClientEvent::SendMessage(payload) => self.send_message(connection_id, payload).await,
            ClientEvent::TypingStart => self.typing(connection_id, true).await,
            ClientEvent::TypingStop => self.typing(connection_id, false).await,
        }
    }

    pub async fn on_disconnect(&mut self, connection_id: &ConnectionId) {
        if !self.live.remove(connection_id) {
            debug!("Disconnect for unknown connection {}", connection_id);
            return;
        }
        let Some(participant) = self.presence.remove(connection_id) else {
            info!("Connection {} closed before joining", connection_id);
            return;
        };
        info!("{} left ({} remaining)", participant.user_name, self.presence.len());
        if self.presence.is_empty() {
            debug!("No participants left in the chat");
        }

        self.transport
            .emit_to_all_except(
                connection_id,
                &ServerEvent::UserLeft(Notice::left(&participant.user_name)),
            )
            .await;
        self.broadcast_users().await;
    }

    async fn join(&mut self, connection_id: &ConnectionId, payload: JoinPayload) {
        let participant = Participant {
            id: payload.id.unwrap_or_default(),
            user_name: payload.user_name.unwrap_or_default(),
            full_name: payload.full_name,
            connection_id: connection_id.clone(),
        };
        let notice = Notice::joined(&participant.user_name);
        self.presence.upsert(connection_id.clone(), participant);
        info!("{} joined on {} ({} present)", notice.user_name, connection_id, self.presence.len());

        self.transport
            .emit_to_all_except(connection_id, &ServerEvent::UserJoined(notice))
            .await;
        self.broadcast_users().await;
    }

    async fn send_message(&mut self, connection_id: &ConnectionId, payload: SendPayload) {
        let known = self.presence.get(connection_id);
        let author = payload
            .author()
            .map(str::to_string)
            .or_else(|| known.map(|p| p.user_name.clone()).filter(|name| !name.is_empty()))
            .unwrap_or_else(|| self.config.default_author.clone());
        let author_id = payload
            .author_id()
            .map(str::to_string)
            .or_else(|| known.map(|p| p.id.clone()).filter(|id| !id.is_empty()));

        let now: DateTime<Utc> = Utc::now();
        let message = Message {
            id: self.ids.next(now.timestamp_millis()),
            text: payload.text.unwrap_or_default(),
            author,
            author_id,
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        self.history.append(message.clone());
        debug!(
            "Message {} from {} on {} (history {}/{})",
            message.id,
            message.author,
            connection_id,
            self.history.len(),
            self.history.capacity()
        );
        self.transport.emit_to_all(&ServerEvent::MessageNew(message)).await;
    }

    async fn typing(&self, connection_id: &ConnectionId, is_typing: bool) {
        let Some(participant) = self.presence.get(connection_id) else {
            debug!("Ignoring typing from {} before join", connection_id);
            return;
        };
        let status = TypingStatus {
            user_id: participant.id.clone(),
            user_name: participant.user_name.clone(),
            full_name: participant.full_name.clone(),
            is_typing,
        };
        self.transport
            .emit_to_all_except(connection_id, &ServerEvent::TypingStatus(status))
            .await;
    }

    async fn broadcast_users(&self) {
        self.transport
            .emit_to_all(&ServerEvent::UsersList(self.presence.list()))
            .await;
    }
}
