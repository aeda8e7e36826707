//! In-flight request table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

/// Request-id to cancellation token for every call awaiting a response.
///
/// Tokens are children of the session's root token, so closing the session
/// cancels all of them at once.
#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    root: CancellationToken,
    entries: Mutex<HashMap<i32, CancellationToken>>,
}

impl PendingTable {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<i32, CancellationToken>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `request_id`. `None` if the id is already in flight.
    pub(crate) fn register(self: &Arc<Self>, request_id: i32) -> Option<PendingGuard> {
        let mut entries = self.entries();
        if entries.contains_key(&request_id) {
            return None;
        }
        let token = self.root.child_token();
        entries.insert(request_id, token.clone());
        Some(PendingGuard {
            table: Arc::clone(self),
            request_id,
            token,
        })
    }

    pub(crate) fn cancel(&self, request_id: i32) -> bool {
        match self.entries().get(&request_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every current call. Later calls are unaffected.
    pub(crate) fn cancel_all(&self) -> usize {
        let entries = self.entries();
        for token in entries.values() {
            token.cancel();
        }
        entries.len()
    }

    /// Cancel every current and future call.
    pub(crate) fn close(&self) {
        self.root.cancel();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.root.is_cancelled()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries().len()
    }
}

/// Removes its id from the table when the call finishes or is dropped.
#[derive(Debug)]
pub(crate) struct PendingGuard {
    table: Arc<PendingTable>,
    request_id: i32,
    token: CancellationToken,
}

impl PendingGuard {
    pub(crate) fn request_id(&self) -> i32 {
        self.request_id
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.entries().remove(&self.request_id);
    }
}
