use std::collections::HashMap;
use std::fmt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transport-level identity of one live connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn generate() -> Self {
        ConnectionId(Uuid::new_v4().to_string())
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        ConnectionId(id.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    pub connection_id: ConnectionId,
}

#[derive(Debug)]
struct Entry {
    order: u64,
    participant: Participant,
}

/// Who is in the chat, keyed by connection. One entry per connection at most.
#[derive(Debug, Default)]
pub struct PresenceTable {
    entries: HashMap<ConnectionId, Entry>,
    next_order: u64,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces. A replaced entry keeps its place in [`list`](Self::list).
    pub fn upsert(&mut self, connection_id: ConnectionId, participant: Participant) {
        if let Some(entry) = self.entries.get_mut(&connection_id) {
            entry.participant = participant;
            return;
        }
        let order = self.next_order;
        self.next_order += 1;
        self.entries.insert(connection_id, Entry { order, participant });
    }

    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<Participant> {
        self.entries.remove(connection_id).map(|entry| entry.participant)
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<&Participant> {
        self.entries.get(connection_id).map(|entry| &entry.participant)
    }

    /// Snapshot of every participant, in join order.
    pub fn list(&self) -> Vec<Participant> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.order);
        entries.into_iter().map(|entry| entry.participant.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
