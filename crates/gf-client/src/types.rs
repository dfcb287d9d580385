//! Core types shared with the chat backend

use serde::{Deserialize, Serialize};

/// Conversation used when the caller does not name one
pub const DEFAULT_CONVERSATION_ID: &str = "global";

/// Presence status of a user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Online,
    Busy,
    #[default]
    #[serde(other)]
    Offline,
}

/// Whether a participant is a person or an automated agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserKind {
    #[default]
    Human,
    Agent,
}

/// A chat participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub status: UserStatus,
    #[serde(rename = "type", default)]
    pub kind: UserKind,
    #[serde(rename = "isLLM", default)]
    pub is_llm: bool,
}

impl User {
    /// Create a human user with the given id and display name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar: None,
            status: UserStatus::default(),
            kind: UserKind::default(),
            is_llm: false,
        }
    }

    /// Name to show for this user, falling back to the id
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// An emoji reaction aggregated over users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub user_ids: Vec<String>,
}

/// A chat message as stored by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default = "default_conversation_id")]
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub content: String,
    /// Server-assigned epoch milliseconds; the only ordering key
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<Reaction>,
    /// Opaque key/value bag (attachment descriptors and the like)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_conversation_id() -> String {
    DEFAULT_CONVERSATION_ID.to_string()
}

impl Message {
    /// Create a plain text message
    pub fn text(
        id: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            conversation_id: default_conversation_id(),
            sender_id: sender_id.into(),
            content: content.into(),
            timestamp,
            reply_to_id: None,
            reactions: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// Query for the message listing endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub conversation_id: String,
    pub limit: u32,
    /// When set, only messages with `timestamp > since` are requested
    pub since: Option<i64>,
}

impl MessageQuery {
    /// Most recent `limit` messages of a conversation
    pub fn full(conversation_id: impl Into<String>, limit: u32) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            limit,
            since: None,
        }
    }

    /// Messages strictly newer than `since`
    pub fn since(conversation_id: impl Into<String>, limit: u32, since: i64) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            limit,
            since: Some(since),
        }
    }

    /// Whether this is an incremental query
    pub fn is_incremental(&self) -> bool {
        self.since.is_some()
    }
}

/// One page of messages, plus any users they reference
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePage {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub users: Vec<User>,
}

impl MessagePage {
    /// Largest timestamp in the page
    pub fn max_timestamp(&self) -> Option<i64> {
        self.messages.iter().map(|m| m.timestamp).max()
    }
}

/// A new message to post
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub conversation_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
}

/// Request body for summary generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRequest {
    /// Conversation lines, oldest first
    pub messages: Vec<String>,
    /// Output language code (e.g. "en")
    pub language: String,
}

impl SummaryRequest {
    pub fn new(messages: Vec<String>, language: impl Into<String>) -> Self {
        Self {
            messages,
            language: language.into(),
        }
    }
}
