//! Sync cursor: what the engine has already seen, and when it last did a full sync.

use gf_client::User;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

/// How a message poll fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// The most recent page, replacing local state wholesale
    Full,
    /// Only messages newer than the cursor, upserted
    Incremental,
    /// An empty incremental result followed by a corrective full fetch
    Reconciled,
}

/// Per-session sync bookkeeping. Process-local and never persisted.
#[derive(Debug, Clone, Default)]
pub struct SyncCursor {
    /// Largest message timestamp seen across all fetches
    pub last_fetched_timestamp: Option<i64>,
    /// When the last full (non-incremental) fetch completed
    pub last_full_sync_at: Option<Instant>,
    /// Users already merged into the store
    pub known_user_ids: HashSet<String>,
}

impl SyncCursor {
    /// Cursor for a freshly hydrated session
    pub fn hydrated(max_timestamp: Option<i64>, users: &[User]) -> Self {
        Self {
            last_fetched_timestamp: max_timestamp,
            last_full_sync_at: None,
            known_user_ids: users.iter().map(|u| u.id.clone()).collect(),
        }
    }

    /// Pick the fetch mode for the next poll. A full sync is due when there is
    /// no incremental cursor yet, or more than `full_sync_interval` has passed
    /// since the last one.
    pub fn next_mode(&self, now: Instant, full_sync_interval: Duration) -> FetchMode {
        if self.last_fetched_timestamp.is_none() {
            return FetchMode::Full;
        }
        match self.last_full_sync_at {
            Some(at) if now.saturating_duration_since(at) <= full_sync_interval => {
                FetchMode::Incremental
            }
            _ => FetchMode::Full,
        }
    }

    /// Move the timestamp cursor forward. Never moves it back.
    pub fn advance(&mut self, max_timestamp: Option<i64>) {
        if let Some(ts) = max_timestamp {
            self.last_fetched_timestamp = Some(match self.last_fetched_timestamp {
                Some(current) => current.max(ts),
                None => ts,
            });
        }
    }

    /// Record a completed full sync
    pub fn mark_full_sync(&mut self, at: Instant) {
        self.last_full_sync_at = Some(at);
    }

    /// Keep users not seen before, remembering their ids
    pub fn take_new_users(&mut self, users: impl IntoIterator<Item = User>) -> Vec<User> {
        users
            .into_iter()
            .filter(|u| self.known_user_ids.insert(u.id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_SYNC: Duration = Duration::from_millis(30_000);

    #[test]
    fn test_first_poll_is_full() {
        let cursor = SyncCursor::default();
        assert_eq!(cursor.next_mode(Instant::now(), FULL_SYNC), FetchMode::Full);
    }

    #[test]
    fn test_hydrated_cursor_still_needs_first_full_sync() {
        let cursor = SyncCursor::hydrated(Some(100), &[]);
        assert_eq!(cursor.next_mode(Instant::now(), FULL_SYNC), FetchMode::Full);
    }

    #[test]
    fn test_incremental_within_window() {
        let t0 = Instant::now();
        let mut cursor = SyncCursor::hydrated(Some(100), &[]);
        cursor.mark_full_sync(t0);
        assert_eq!(
            cursor.next_mode(t0 + Duration::from_millis(4_000), FULL_SYNC),
            FetchMode::Incremental
        );
        assert_eq!(cursor.next_mode(t0 + FULL_SYNC, FULL_SYNC), FetchMode::Incremental);
    }

    #[test]
    fn test_full_sync_due_after_interval() {
        let t0 = Instant::now();
        let mut cursor = SyncCursor::hydrated(Some(100), &[]);
        cursor.mark_full_sync(t0);
        assert_eq!(
            cursor.next_mode(t0 + Duration::from_millis(30_001), FULL_SYNC),
            FetchMode::Full
        );
    }

    #[test]
    fn test_no_timestamp_means_full_even_after_recent_sync() {
        let t0 = Instant::now();
        let mut cursor = SyncCursor::default();
        cursor.mark_full_sync(t0);
        assert_eq!(cursor.next_mode(t0, FULL_SYNC), FetchMode::Full);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut cursor = SyncCursor::default();
        cursor.advance(None);
        assert_eq!(cursor.last_fetched_timestamp, None);
        cursor.advance(Some(50));
        cursor.advance(Some(20));
        assert_eq!(cursor.last_fetched_timestamp, Some(50));
        cursor.advance(Some(80));
        assert_eq!(cursor.last_fetched_timestamp, Some(80));
    }

    #[test]
    fn test_take_new_users() {
        let mut cursor = SyncCursor::hydrated(None, &[User::new("u1", "Ada")]);
        let new = cursor.take_new_users(vec![
            User::new("u1", "Ada"),
            User::new("u2", "Bob"),
            User::new("u2", "Bob again"),
        ]);
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].id, "u2");
        assert!(cursor.known_user_ids.contains("u2"));
    }
}
