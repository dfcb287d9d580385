//! Conversation sync engine: bootstrap, interval polling and reconciliation.

use gf_client::{ChatBackend, Message, MessagePage, MessageQuery, NewMessage, User};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    cursor::{FetchMode, SyncCursor},
    error::{Error, Result},
    events::SyncEvent,
    handle::SessionHandle,
    store::{self, ChatStore, SessionStatus},
};

/// Sync engine configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Conversation to keep in sync
    pub conversation_id: String,
    /// Page size for full fetches
    pub message_limit: u32,
    /// Delay between message polls
    pub message_poll_interval: Duration,
    /// Delay between typing polls
    pub typing_poll_interval: Duration,
    /// Maximum age of the last full sync before the next poll forces one
    pub full_sync_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            conversation_id: gf_client::DEFAULT_CONVERSATION_ID.to_string(),
            message_limit: 100,
            message_poll_interval: Duration::from_millis(4_000),
            typing_poll_interval: Duration::from_millis(2_500),
            full_sync_interval: Duration::from_millis(30_000),
        }
    }
}

/// What a message poll applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub mode: FetchMode,
    /// Messages in the applied response
    pub fetched: usize,
    /// Users seen for the first time
    pub new_users: usize,
    /// Whether the local message list changed
    pub changed: bool,
}

/// Background polling tasks of one session
pub struct PollingTasks {
    pub messages: JoinHandle<()>,
    pub typing: JoinHandle<()>,
}

impl PollingTasks {
    /// Wait for both loops to exit
    pub async fn join(self) {
        let _ = self.messages.await;
        let _ = self.typing.await;
    }

    /// Whether both loops have exited
    pub fn is_finished(&self) -> bool {
        self.messages.is_finished() && self.typing.is_finished()
    }
}

#[derive(Debug, Clone, Copy)]
enum PollKind {
    Messages,
    Typing,
}

/// Store and cursor change together, under one lock
#[derive(Default)]
struct SessionState {
    store: ChatStore,
    cursor: Option<SyncCursor>,
}

/// Clears an in-flight flag when dropped
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keeps the local chat state eventually consistent with the backend
pub struct SyncEngine {
    config: SyncConfig,
    backend: Arc<dyn ChatBackend>,
    state: RwLock<SessionState>,
    event_tx: broadcast::Sender<SyncEvent>,
    session: SessionHandle,
    message_poll_busy: AtomicBool,
    typing_poll_busy: AtomicBool,
    polling_epoch: Mutex<Option<u64>>,
}

impl SyncEngine {
    /// Create an engine in the `idle` state
    pub fn new(config: SyncConfig, backend: Arc<dyn ChatBackend>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            backend,
            state: RwLock::new(SessionState::default()),
            event_tx,
            session: SessionHandle::new(),
            message_poll_busy: AtomicBool::new(false),
            typing_poll_busy: AtomicBool::new(false),
            polling_epoch: Mutex::new(None),
        }
    }

    /// Subscribe to sync events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    /// Current session status
    pub fn status(&self) -> SessionStatus {
        self.state.read().store.status
    }

    /// A copy of the local store
    pub fn snapshot(&self) -> ChatStore {
        self.state.read().store.clone()
    }

    /// Local messages, oldest first
    pub fn messages(&self) -> Vec<Message> {
        self.state.read().store.messages.clone()
    }

    /// A copy of the sync cursor, if a session is live
    pub fn cursor(&self) -> Option<SyncCursor> {
        self.state.read().cursor.clone()
    }

    /// Load identity, users and the latest messages, then mark the session
    /// authenticated. Not retried on failure; call again to retry.
    pub async fn bootstrap(&self) -> Result<()> {
        let epoch = {
            let mut state = self.state.write();
            let epoch = self.session.renew();
            state.store.clear();
            state.store.status = SessionStatus::Loading;
            state.cursor = None;
            epoch
        };
        self.emit(SyncEvent::Loading);

        let query = self.full_query();
        let fetched = tokio::try_join!(
            self.backend.current_user(),
            self.backend.list_users(),
            self.backend.list_messages(&query),
        );

        let (current_user, users, page) = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!("Bootstrap failed: {}", e);
                let message = e.to_string();
                {
                    let mut state = self.state.write();
                    if !self.session.is_current(epoch) {
                        return Err(e.into());
                    }
                    state.store.status = SessionStatus::Unauthenticated;
                    state.store.error = Some(message.clone());
                }
                self.emit(SyncEvent::Unauthenticated {
                    error: Some(message),
                });
                return Err(e.into());
            }
        };

        let users = merge_user_sources(users, page.users, current_user.clone());
        let messages = store::normalize(page.messages);
        let max_timestamp = messages.iter().map(|m| m.timestamp).max();

        {
            let mut state = self.state.write();
            if !self.session.is_current(epoch) {
                tracing::debug!("Discarding superseded bootstrap result");
                return Err(Error::Other("bootstrap superseded".to_string()));
            }
            state.cursor = Some(SyncCursor::hydrated(max_timestamp, &users));
            let store = &mut state.store;
            store.status = SessionStatus::Authenticated;
            store.error = None;
            store.current_user = Some(current_user.clone());
            store.users = users.iter().map(|u| (u.id.clone(), u.clone())).collect();
            store.messages = messages.clone();
            store.typing_user_ids.clear();
        }

        tracing::info!(
            user = %current_user.id,
            users = users.len(),
            messages = messages.len(),
            "Session hydrated"
        );
        self.emit(SyncEvent::Hydrated {
            current_user,
            users,
            messages,
        });
        Ok(())
    }

    /// Spawn the message and typing poll loops for the current session.
    /// Both stop when the session ends.
    pub fn start_polling(self: &Arc<Self>) -> Result<PollingTasks> {
        let epoch = self.require_authenticated()?;
        {
            let mut polling = self.polling_epoch.lock();
            if *polling == Some(epoch) {
                return Err(Error::Other(
                    "polling already running for this session".to_string(),
                ));
            }
            *polling = Some(epoch);
        }

        let token = self.session.child_token();
        let messages = tokio::spawn(run_poll_loop(
            Arc::clone(self),
            token.clone(),
            PollKind::Messages,
            self.config.message_poll_interval,
        ));
        let typing = tokio::spawn(run_poll_loop(
            Arc::clone(self),
            token,
            PollKind::Typing,
            self.config.typing_poll_interval,
        ));
        tracing::debug!(epoch, "Polling started");
        Ok(PollingTasks { messages, typing })
    }

    /// Fetch messages once, choosing between a full and an incremental
    /// fetch. Returns `None` when nothing was applied (another poll in
    /// flight, or the result arrived after the session ended).
    pub async fn poll_messages(&self) -> Result<Option<PollOutcome>> {
        let Some(_in_flight) = InFlight::acquire(&self.message_poll_busy) else {
            tracing::debug!("Message poll already in flight, skipping");
            return Ok(None);
        };

        let (epoch, mode, since) = {
            let state = self.state.read();
            let cursor = match (&state.store.status, &state.cursor) {
                (SessionStatus::Authenticated, Some(cursor)) => cursor,
                _ => return Err(Error::NotAuthenticated),
            };
            (
                self.session.epoch(),
                cursor.next_mode(Instant::now(), self.config.full_sync_interval),
                cursor.last_fetched_timestamp,
            )
        };

        let (mode, page) = match (mode, since) {
            (FetchMode::Incremental, Some(since)) => {
                let query = MessageQuery::since(
                    self.config.conversation_id.as_str(),
                    self.config.message_limit,
                    since,
                );
                let page = self.backend.list_messages(&query).await?;
                if page.messages.is_empty() {
                    // An empty diff may hide server-side deletions
                    tracing::debug!(since, "Incremental poll empty, reconciling");
                    let mut full = self.backend.list_messages(&self.full_query()).await?;
                    full.users.extend(page.users);
                    (FetchMode::Reconciled, full)
                } else {
                    (FetchMode::Incremental, page)
                }
            }
            _ => {
                let page = self.backend.list_messages(&self.full_query()).await?;
                (FetchMode::Full, page)
            }
        };

        Ok(self.apply_page(epoch, mode, page))
    }

    /// Fetch the typing snapshot once and replace the local one.
    /// Returns `None` when nothing was applied.
    pub async fn poll_typing(&self) -> Result<Option<Vec<String>>> {
        let Some(_in_flight) = InFlight::acquire(&self.typing_poll_busy) else {
            return Ok(None);
        };
        let epoch = self.require_authenticated()?;

        let user_ids = self
            .backend
            .list_typing_users(&self.config.conversation_id)
            .await?;

        let changed = {
            let mut state = self.state.write();
            if !self.is_live(&state, epoch) {
                return Ok(None);
            }
            state.store.set_typing(user_ids.clone())
        };
        if changed {
            self.emit(SyncEvent::TypingChanged {
                user_ids: user_ids.clone(),
            });
        }
        Ok(Some(user_ids))
    }

    /// Post a message and add the stored copy to the local list
    pub async fn send_message(
        &self,
        content: &str,
        reply_to_id: Option<String>,
    ) -> Result<Message> {
        let epoch = self.require_authenticated()?;
        let content = content.trim();
        if content.is_empty() {
            return Err(Error::Other("message is empty".to_string()));
        }

        let new_message = NewMessage {
            conversation_id: self.config.conversation_id.clone(),
            content: content.to_string(),
            reply_to_id,
        };
        let message = self.backend.send_message(&new_message).await?;

        let applied = {
            let mut state = self.state.write();
            if self.is_live(&state, epoch) {
                state.store.upsert_messages([message.clone()]);
                true
            } else {
                false
            }
        };
        if applied {
            self.emit(SyncEvent::MessagePosted {
                message: message.clone(),
            });
        }
        Ok(message)
    }

    /// Tell the backend whether the current user is typing
    pub async fn set_typing(&self, is_typing: bool) -> Result<()> {
        self.require_authenticated()?;
        self.backend
            .set_typing(&self.config.conversation_id, is_typing)
            .await?;
        Ok(())
    }

    /// End the session: stop polling, drop local state and notify the
    /// backend. Server-side logout failures are logged, not returned.
    pub async fn logout(&self) {
        let was_authenticated = self.status() == SessionStatus::Authenticated;
        {
            let mut state = self.state.write();
            self.session.renew();
            state.store.clear();
            state.store.status = SessionStatus::Unauthenticated;
            state.cursor = None;
        }
        self.emit(SyncEvent::Unauthenticated { error: None });

        if was_authenticated {
            if let Err(e) = self.backend.logout().await {
                tracing::warn!("Server logout failed: {}", e);
            }
        }
        tracing::info!("Session ended");
    }

    async fn poll(&self, kind: PollKind) -> Result<()> {
        match kind {
            PollKind::Messages => {
                if let Some(outcome) = self.poll_messages().await? {
                    tracing::debug!(
                        mode = ?outcome.mode,
                        fetched = outcome.fetched,
                        new_users = outcome.new_users,
                        changed = outcome.changed,
                        "Message poll applied"
                    );
                }
            }
            PollKind::Typing => {
                self.poll_typing().await?;
            }
        }
        Ok(())
    }

    fn apply_page(&self, epoch: u64, mode: FetchMode, page: MessagePage) -> Option<PollOutcome> {
        let fetched_at = Instant::now();
        let (outcome, event) = {
            let mut state = self.state.write();
            if !self.is_live(&state, epoch) {
                tracing::debug!("Discarding stale poll result");
                return None;
            }
            let SessionState { store, cursor } = &mut *state;
            let cursor = cursor.as_mut()?;

            cursor.advance(page.max_timestamp());
            if mode != FetchMode::Incremental {
                cursor.mark_full_sync(fetched_at);
            }
            let new_users = cursor.take_new_users(page.users);
            store.merge_users(new_users.iter().cloned());

            let fetched = page.messages.len();
            let changed = match mode {
                FetchMode::Incremental => store.upsert_messages(page.messages),
                FetchMode::Full | FetchMode::Reconciled => store.replace_messages(page.messages),
            };

            let outcome = PollOutcome {
                mode,
                fetched,
                new_users: new_users.len(),
                changed,
            };
            let event = (changed || !new_users.is_empty()).then(|| SyncEvent::MessagesSynced {
                mode,
                messages: store.messages.clone(),
                new_users,
            });
            (outcome, event)
        };

        if let Some(event) = event {
            self.emit(event);
        }
        Some(outcome)
    }

    fn full_query(&self) -> MessageQuery {
        MessageQuery::full(self.config.conversation_id.as_str(), self.config.message_limit)
    }

    fn require_authenticated(&self) -> Result<u64> {
        let state = self.state.read();
        if state.store.status != SessionStatus::Authenticated {
            return Err(Error::NotAuthenticated);
        }
        Ok(self.session.epoch())
    }

    fn is_live(&self, state: &SessionState, epoch: u64) -> bool {
        state.store.status == SessionStatus::Authenticated && self.session.is_current(epoch)
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Explicit user list first, then users referenced by messages fill gaps,
/// then the current user overrides.
fn merge_user_sources(listed: Vec<User>, referenced: Vec<User>, current: User) -> Vec<User> {
    let mut merged: HashMap<String, User> = HashMap::new();
    for user in listed {
        merged.insert(user.id.clone(), user);
    }
    for user in referenced {
        merged.entry(user.id.clone()).or_insert(user);
    }
    merged.insert(current.id.clone(), current);

    let mut users: Vec<User> = merged.into_values().collect();
    users.sort_by(|a, b| a.id.cmp(&b.id));
    users
}

/// One poll per tick; the next tick is only awaited after the poll settles,
/// so polls of the same loop never overlap.
async fn run_poll_loop(
    engine: Arc<SyncEngine>,
    token: CancellationToken,
    kind: PollKind,
    period: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = engine.poll(kind) => {
                match result {
                    Err(e) if e.is_transient() => {
                        tracing::debug!("{:?} poll failed, retrying next tick: {}", kind, e);
                    }
                    Err(e) => tracing::warn!("{:?} poll failed: {}", kind, e),
                    Ok(_) => {}
                }
            }
        }
    }
    tracing::debug!("{:?} polling stopped", kind);
}
