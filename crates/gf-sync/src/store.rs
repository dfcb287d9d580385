//! Local chat state: session status, users, messages and typing indicators.

use gf_client::{Message, User};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Session lifecycle: `idle → loading → {authenticated, unauthenticated}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Loading,
    Authenticated,
    Unauthenticated,
}

/// Local chat state owned by the sync engine.
///
/// Messages are unique by id and kept in ascending timestamp order. Users are
/// unique by id; lookup order is irrelevant.
#[derive(Debug, Clone, Default)]
pub struct ChatStore {
    /// Session status
    pub status: SessionStatus,
    /// Last session error, for display with a retry affordance
    pub error: Option<String>,
    /// The authenticated user
    pub current_user: Option<User>,
    /// Known users keyed by id
    pub users: HashMap<String, User>,
    /// Messages of the default conversation, oldest first
    pub messages: Vec<Message>,
    /// Users currently typing (server snapshot)
    pub typing_user_ids: Vec<String>,
}

impl ChatStore {
    /// Look up a user by id
    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.get(id)
    }

    /// Display name for a sender id, falling back to the id itself
    pub fn sender_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.users.get(id).map(|u| u.display_name()).unwrap_or(id)
    }

    /// Look up a message by id
    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Insert or replace messages by id, keeping timestamp order.
    /// Returns whether the list changed.
    pub fn upsert_messages(&mut self, incoming: impl IntoIterator<Item = Message>) -> bool {
        let mut index: HashMap<String, usize> = self
            .messages
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id.clone(), i))
            .collect();

        let mut changed = false;
        for message in incoming {
            match index.get(&message.id) {
                Some(&i) => {
                    if self.messages[i] != message {
                        self.messages[i] = message;
                        changed = true;
                    }
                }
                None => {
                    index.insert(message.id.clone(), self.messages.len());
                    self.messages.push(message);
                    changed = true;
                }
            }
        }

        if changed {
            self.messages.sort_by_key(|m| m.timestamp);
        }
        changed
    }

    /// Replace the whole message list. Returns whether the list changed.
    pub fn replace_messages(&mut self, messages: Vec<Message>) -> bool {
        let messages = normalize(messages);
        if messages == self.messages {
            return false;
        }
        self.messages = messages;
        true
    }

    /// Add or refresh users. Returns the users that were not known before.
    pub fn merge_users(&mut self, users: impl IntoIterator<Item = User>) -> Vec<User> {
        let mut added = Vec::new();
        for user in users {
            if self.users.insert(user.id.clone(), user.clone()).is_none() {
                added.push(user);
            }
        }
        added
    }

    /// Replace the typing snapshot. Returns whether it changed.
    pub fn set_typing(&mut self, user_ids: Vec<String>) -> bool {
        if self.typing_user_ids == user_ids {
            return false;
        }
        self.typing_user_ids = user_ids;
        true
    }

    /// Drop all session data
    pub fn clear(&mut self) {
        self.current_user = None;
        self.users.clear();
        self.messages.clear();
        self.typing_user_ids.clear();
        self.error = None;
    }
}

/// Deduplicate by id (last occurrence wins) and sort by timestamp
pub(crate) fn normalize(messages: Vec<Message>) -> Vec<Message> {
    let mut store = ChatStore::default();
    store.upsert_messages(messages);
    store.messages
}
