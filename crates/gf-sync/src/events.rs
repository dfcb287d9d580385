//! Sync event types

use gf_client::{Message, User};
use serde::{Deserialize, Serialize};

use crate::cursor::FetchMode;

/// Events published by the sync engine to rendering consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Bootstrap started
    Loading,

    /// Bootstrap succeeded; the store now holds this state
    Hydrated {
        current_user: User,
        users: Vec<User>,
        messages: Vec<Message>,
    },

    /// Session is not (or no longer) authenticated
    Unauthenticated { error: Option<String> },

    /// A poll result was applied. `messages` is the complete list after the
    /// apply, so consumers never observe a partial update.
    MessagesSynced {
        mode: FetchMode,
        messages: Vec<Message>,
        new_users: Vec<User>,
    },

    /// Typing snapshot changed
    TypingChanged { user_ids: Vec<String> },

    /// A message posted by this client was stored
    MessagePosted { message: Message },
}

impl SyncEvent {
    /// Check if this event ends the session
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncEvent::Unauthenticated { .. })
    }
}
