use std::collections::VecDeque;
use serde::{Deserialize, Serialize};

// The bound comes from configuration and may be huge; the deque grows on demand past this.
const PREALLOCATE_LIMIT: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub text: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    /// RFC 3339, assigned by the server on receipt.
    pub timestamp: String,
}

/// Bounded chat history, oldest first. Once full, each append evicts the
/// oldest message.
#[derive(Debug)]
pub struct HistoryRing {
    messages: VecDeque<Message>,
    capacity: usize,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        HistoryRing {
            messages: VecDeque::with_capacity(capacity.min(PREALLOCATE_LIMIT)),
            capacity,
        }
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push_back(message);
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
    }

    /// The last `min(n, len)` messages in arrival order.
    pub fn recent(&self, n: usize) -> Vec<Message> {
        let skip = self.messages.len().saturating_sub(n);
        self.messages.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: u32) -> Message {
        Message {
            id: id.to_string(),
            text: format!("message {id}"),
            author: "alice".to_string(),
            author_id: None,
            timestamp: "2026-01-01T00:00:00.000Z".to_string(),
        }
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut ring = HistoryRing::new(3);
        for i in 0..10 {
            ring.append(message(i));
            assert!(ring.len() <= 3);
        }
        assert_eq!(ids(&ring.recent(3)), vec!["7", "8", "9"]);
    }

    #[test]
    fn evicts_oldest_first() {
        let mut ring = HistoryRing::new(2);
        ring.append(message(1));
        ring.append(message(2));
        ring.append(message(3));
        assert_eq!(ids(&ring.recent(2)), vec!["2", "3"]);
    }

    #[test]
    fn recent_returns_tail_in_arrival_order() {
        let mut ring = HistoryRing::new(100);
        for i in 1..=5 {
            ring.append(message(i));
        }
        assert_eq!(ids(&ring.recent(2)), vec!["4", "5"]);
        assert!(ring.recent(0).is_empty());
    }

    #[test]
    fn recent_larger_than_bound_is_safe() {
        let mut ring = HistoryRing::new(2);
        ring.append(message(1));
        assert_eq!(ids(&ring.recent(50)), vec!["1"]);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut ring = HistoryRing::new(0);
        ring.append(message(1));
        assert!(ring.is_empty());
        assert_eq!(ring.capacity(), 0);
    }

    #[test]
    fn huge_capacity_allocates_lazily() {
        let mut ring = HistoryRing::new(usize::MAX);
        ring.append(message(1));
        ring.append(message(2));
        assert_eq!(ring.capacity(), usize::MAX);
        assert_eq!(ids(&ring.recent(usize::MAX)), vec!["1", "2"]);
    }

    #[test]
    fn message_wire_shape() {
        let json = serde_json::to_value(message(7)).unwrap();
        assert_eq!(json["author"], "alice");
        assert!(json.get("authorId").is_none());

        let with_id = Message {
            author_id: Some("42".to_string()),
            ..message(8)
        };
        assert_eq!(serde_json::to_value(with_id).unwrap()["authorId"], "42");
    }
}
