//! Per-session state and the registry that serializes turns.
//!
//! Each chat session owns at most one pending preview and at most one
//! wallet. The manager hands out one mutex-guarded state per session id;
//! a turn holds that lock end to end, so two racing messages in the same
//! session can never both resolve the same pending preview.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::agent::engine::PendingPreview;
use crate::chain::address::Address;
use crate::chain::wallet::Wallet;

/// Everything the agent remembers about one conversation.
#[derive(Debug)]
pub struct SessionState {
    pub id: String,
    pub pending: Option<PendingPreview>,
    pub wallet: Option<Wallet>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl SessionState {
    fn new(id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            pending: None,
            wallet: None,
            created_at: now,
            last_active: now,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_active = now;
    }

    /// Snapshot handed to the router for the current turn.
    pub fn turn_context(&self) -> TurnContext {
        TurnContext {
            session_id: self.id.clone(),
            wallet_address: self.wallet.as_ref().map(|w| w.address()),
        }
    }
}

/// Read-only view of the session a turn runs in.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub session_id: String,
    pub wallet_address: Option<Address>,
}

/// Session registry. The outer lock only guards the map; each session has
/// its own mutex that a turn holds for its full duration.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionState>>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the session for `id`, creating it on first contact.
    pub async fn get_or_create(&self, id: &str) -> Arc<Mutex<SessionState>> {
        if let Some(session) = self.sessions.read().await.get(id) {
            return Arc::clone(session);
        }
        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(id.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(SessionState::new(id.to_string(), Utc::now())))
        }))
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_same_id_shares_state() {
        let manager = SessionManager::new();
        let a = manager.get_or_create("alice").await;
        let b = manager.get_or_create("alice").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.count().await, 1);
    }

    #[tokio::test]
    async fn test_distinct_ids_do_not_share() {
        let manager = SessionManager::new();
        let a = manager.get_or_create("alice").await;
        let b = manager.get_or_create("bob").await;
        assert!(!Arc::ptr_eq(&a, &b));

        a.lock().await.wallet = Some(Wallet::generate());
        assert!(b.lock().await.wallet.is_none());
    }

    #[tokio::test]
    async fn test_turn_holds_exclusive_lock() {
        let manager = SessionManager::new();
        let session = manager.get_or_create("alice").await;

        let guard = session.lock().await;
        assert!(session.try_lock().is_err());
        drop(guard);
        assert!(session.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_remove() {
        let manager = SessionManager::new();
        manager.get_or_create("alice").await;
        assert!(manager.remove("alice").await);
        assert!(!manager.remove("alice").await);
        assert_eq!(manager.count().await, 0);
    }

    #[tokio::test]
    async fn test_turn_context_reflects_wallet() {
        let manager = SessionManager::new();
        let session = manager.get_or_create("alice").await;

        let mut state = session.lock().await;
        assert!(state.turn_context().wallet_address.is_none());

        let wallet = Wallet::generate();
        let address = wallet.address();
        state.wallet = Some(wallet);
        assert_eq!(state.turn_context().wallet_address, Some(address));
    }
}
