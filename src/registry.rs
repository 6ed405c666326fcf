//! Session Registry & Lifecycle
//!
//! Handle-to-session lookup plus the fan-out hangup path used both for a
//! single explicit `hangup` request and for tearing everything down on
//! plugin shutdown (spec §4.6).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::session::{Session, SessionState};

/// Shared map of live sessions, keyed by the host's handle id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<u64, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly created session.
    pub async fn insert(&self, session: Arc<Session>) {
        let id = session.id;
        self.sessions.write().await.insert(id, session);
        debug!(session = id, "session registered");
    }

    /// Look up a session by handle id.
    pub async fn get(&self, id: u64) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Remove a session from the registry without tearing it down; used
    /// once [`Session::transition`] has already moved it to `Destroyed`.
    pub async fn remove(&self, id: u64) -> Option<Arc<Session>> {
        let removed = self.sessions.write().await.remove(&id);
        if removed.is_some() {
            debug!(session = id, "session removed from registry");
        }
        removed
    }

    /// Number of sessions currently tracked.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drive every currently registered session to `HangingUp`, e.g. on
    /// plugin shutdown. Sessions already hanging up or destroyed are
    /// skipped. Returns the ids that were transitioned, so the caller can
    /// join their relay tasks and actually free ports/crypto.
    pub async fn hangup_all(&self) -> Vec<u64> {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut moved = Vec::new();
        for session in sessions {
            if matches!(session.state().await, SessionState::HangingUp | SessionState::Destroyed) {
                continue;
            }
            if session.transition(SessionState::HangingUp).await.is_ok() {
                moved.push(session.id);
            }
        }
        info!(count = moved.len(), "hanging up all sessions");
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let registry = SessionRegistry::new();
        let session = Arc::new(Session::new(7, false));
        registry.insert(session.clone()).await;
        let found = registry.get(7).await.unwrap();
        assert_eq!(found.id, 7);
    }

    #[tokio::test]
    async fn remove_drops_from_map() {
        let registry = SessionRegistry::new();
        registry.insert(Arc::new(Session::new(1, false))).await;
        assert_eq!(registry.len().await, 1);
        registry.remove(1).await;
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn hangup_all_skips_already_destroyed() {
        let registry = SessionRegistry::new();
        let s1 = Arc::new(Session::new(1, false));
        let s2 = Arc::new(Session::new(2, false));
        registry.insert(s1.clone()).await;
        registry.insert(s2.clone()).await;

        let moved = registry.hangup_all().await;
        assert_eq!(moved.len(), 2);

        // Second call: both already HangingUp, nothing left to move.
        let moved_again = registry.hangup_all().await;
        assert!(moved_again.is_empty());
    }
}
