//! A cloneable handle tying background work to one session.

use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio_util::sync::CancellationToken;

/// Session identity for the sync engine.
///
/// Every bootstrap and every logout starts a new epoch and cancels the token
/// of the previous one, so polling loops and in-flight requests that belong
/// to an older session can tell they are stale.
#[derive(Clone)]
pub struct SessionHandle {
    cancel: Arc<Mutex<CancellationToken>>,
    epoch: Arc<AtomicU64>,
}

impl SessionHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// End the current epoch and start a new one. Returns the new epoch.
    pub(crate) fn renew(&self) -> u64 {
        let mut cancel = self.cancel.lock();
        cancel.cancel();
        *cancel = CancellationToken::new();
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Current epoch
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Whether `epoch` is still the live one
    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    /// A token cancelled when the current epoch ends
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.lock().child_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renew_cancels_previous_children() {
        let handle = SessionHandle::new();
        let first = handle.child_token();
        let epoch = handle.renew();
        assert!(first.is_cancelled());
        assert!(handle.is_current(epoch));

        let second = handle.child_token();
        assert!(!second.is_cancelled());
        handle.renew();
        assert!(second.is_cancelled());
        assert!(!handle.is_current(epoch));
    }

    #[test]
    fn test_clones_share_state() {
        let handle = SessionHandle::new();
        let clone = handle.clone();
        let token = clone.child_token();
        let epoch = handle.renew();
        assert!(token.is_cancelled());
        assert!(clone.is_current(epoch));
    }
}
