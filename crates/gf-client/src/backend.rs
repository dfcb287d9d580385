//! Collaborator traits consumed by the sync engine and the summary parser

use async_trait::async_trait;

use crate::{
    Message, MessagePage, MessageQuery, NewMessage, Result, SummaryEventStream, SummaryRequest,
    User,
};

/// The chat backend as seen by the sync engine
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Identity of the authenticated user
    async fn current_user(&self) -> Result<User>;

    /// Full user directory
    async fn list_users(&self) -> Result<Vec<User>>;

    /// A page of messages; incremental when `query.since` is set
    async fn list_messages(&self, query: &MessageQuery) -> Result<MessagePage>;

    /// Ids of users currently typing in a conversation
    async fn list_typing_users(&self, conversation_id: &str) -> Result<Vec<String>>;

    /// Post a message and return the stored representation
    async fn send_message(&self, message: &NewMessage) -> Result<Message>;

    /// Report whether the current user is typing
    async fn set_typing(&self, conversation_id: &str, is_typing: bool) -> Result<()>;

    /// End the server-side session
    async fn logout(&self) -> Result<()>;
}

/// Streaming summary generation
#[async_trait]
pub trait SummaryBackend: Send + Sync {
    /// Open a summary stream. Open failures (bad status, JSON error body,
    /// missing endpoint) are reported here rather than inside the stream.
    async fn stream_summary(&self, request: &SummaryRequest) -> Result<SummaryEventStream>;
}
