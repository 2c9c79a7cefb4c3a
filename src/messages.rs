use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::history::Message;
use crate::presence::Participant;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),
    #[error("unknown event {0:?}")]
    UnknownEvent(String),
}

/// Accepts strings, stringifies numbers, treats anything else as absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub user_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    author: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    user: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    author_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    user_id: Option<String>,
}

impl SendPayload {
    #[cfg(test)]
    pub fn new(text: &str) -> Self {
        SendPayload {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_author(mut self, author: &str, author_id: &str) -> Self {
        self.author = Some(author.to_string());
        self.author_id = Some(author_id.to_string());
        self
    }

    /// Author as given by the client, under either field name. Empty means absent.
    pub fn author(&self) -> Option<&str> {
        non_empty(self.author.as_deref()).or_else(|| non_empty(self.user.as_deref()))
    }

    pub fn author_id(&self) -> Option<&str> {
        non_empty(self.author_id.as_deref()).or_else(|| non_empty(self.user_id.as_deref()))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Join(JoinPayload),
    SendMessage(SendPayload),
    TypingStart,
    TypingStop,
}

#[derive(Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ClientEvent {
    /// Parses one `{"event", "data"}` text frame. A payload that is missing or
    /// has the wrong shape falls back to defaults instead of failing.
    ///
    /// # Errors
    ///
    /// Fails when the frame itself is not JSON with a string `event`, or names
    /// an event this server does not handle.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let frame: Frame = serde_json::from_str(text)?;
        match frame.event.as_str() {
            "user:join" => Ok(ClientEvent::Join(payload(frame.data))),
            "message:send" => Ok(ClientEvent::SendMessage(payload(frame.data))),
            "typing:start" => Ok(ClientEvent::TypingStart),
            "typing:stop" => Ok(ClientEvent::TypingStop),
            _ => Err(ProtocolError::UnknownEvent(frame.event)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join(_) => "user:join",
            ClientEvent::SendMessage(_) => "message:send",
            ClientEvent::TypingStart => "typing:start",
            ClientEvent::TypingStop => "typing:stop",
        }
    }
}

fn payload<T: DeserializeOwned + Default>(data: Value) -> T {
    if !data.is_object() {
        return T::default();
    }
    serde_json::from_value(data).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub user_name: String,
    pub message: String,
}

impl Notice {
    pub fn joined(user_name: &str) -> Self {
        Notice {
            user_name: user_name.to_string(),
            message: format!("{user_name} se unió al chat"),
        }
    }

    pub fn left(user_name: &str) -> Self {
        Notice {
            user_name: user_name.to_string(),
            message: format!("{user_name} dejó el chat"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStatus {
    pub user_id: String,
    pub user_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "message:history")]
    MessageHistory(Vec<Message>),
    #[serde(rename = "users:list")]
    UsersList(Vec<Participant>),
    #[serde(rename = "user:joined")]
    UserJoined(Notice),
    #[serde(rename = "user:left")]
    UserLeft(Notice),
    #[serde(rename = "message:new")]
    MessageNew(Message),
    #[serde(rename = "typing:status")]
    TypingStatus(TypingStatus),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::MessageHistory(_) => "message:history",
            ServerEvent::UsersList(_) => "users:list",
            ServerEvent::UserJoined(_) => "user:joined",
            ServerEvent::UserLeft(_) => "user:left",
            ServerEvent::MessageNew(_) => "message:new",
            ServerEvent::TypingStatus(_) => "typing:status",
        }
    }
}
