//! Per-session ledgers.
//!
//! A host that serves several conversations at once (tabs, chat ids,
//! webhook senders) keeps one [`Ledger`] per [`SessionId`]. Each ledger sits
//! behind its own async mutex, so mutations of one session are serialized
//! while different sessions proceed independently.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use turnledger_config::LedgerConfig;
use turnledger_core::error::LedgerError;
use turnledger_core::ledger::Ledger;
use turnledger_core::message::SessionId;

/// A ledger shared between tasks. Lock it to mutate.
pub type SharedLedger = Arc<Mutex<Ledger>>;

/// Registry of live sessions, each with its own ledger.
pub struct SessionRegistry {
    template: LedgerConfig,
    sessions: RwLock<HashMap<SessionId, SharedLedger>>,
}

impl SessionRegistry {
    /// Create a registry whose new sessions are built from `template`.
    ///
    /// Fails if the template cannot produce a valid ledger.
    pub fn new(template: LedgerConfig) -> Result<Self, LedgerError> {
        template.build()?;
        Ok(Self {
            template,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Get the ledger for `id`, creating a fresh one on first use.
    pub async fn open(&self, id: &SessionId) -> Result<SharedLedger, LedgerError> {
        if let Some(ledger) = self.sessions.read().await.get(id) {
            return Ok(ledger.clone());
        }

        let mut sessions = self.sessions.write().await;
        // Another task may have created it between the two locks.
        if let Some(ledger) = sessions.get(id) {
            return Ok(ledger.clone());
        }

        let ledger = Arc::new(Mutex::new(self.template.build()?));
        sessions.insert(id.clone(), ledger.clone());
        debug!(session = %id, "Opened session");
        Ok(ledger)
    }

    /// Get the ledger for `id` without creating one.
    pub async fn get(&self, id: &SessionId) -> Option<SharedLedger> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Install an existing ledger (e.g. a restored transcript) for `id`,
    /// replacing any current one.
    pub async fn insert(&self, id: SessionId, ledger: Ledger) -> SharedLedger {
        let shared = Arc::new(Mutex::new(ledger));
        self.sessions.write().await.insert(id, shared.clone());
        shared
    }

    /// Forget a session. Returns its ledger if it existed.
    pub async fn close(&self, id: &SessionId) -> Option<SharedLedger> {
        let removed = self.sessions.write().await.remove(id);
        if removed.is_some() {
            debug!(session = %id, "Closed session");
        }
        removed
    }

    /// Ids of all open sessions.
    pub async fn ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(max_turns: usize) -> LedgerConfig {
        LedgerConfig {
            max_turns,
            system_prompt: "S".into(),
        }
    }

    #[test]
    fn invalid_template_is_rejected() {
        assert!(matches!(
            SessionRegistry::new(template(0)),
            Err(LedgerError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn same_id_same_ledger() {
        let registry = SessionRegistry::new(template(2)).unwrap();
        let id = SessionId::from("tab-1");

        let a = registry.open(&id).await.unwrap();
        let b = registry.open(&id).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        a.lock().await.append_user("hello").unwrap();
        assert_eq!(b.lock().await.pending().unwrap().content(), "hello");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let registry = SessionRegistry::new(template(2)).unwrap();
        let first = registry.open(&SessionId::from("a")).await.unwrap();
        let second = registry.open(&SessionId::from("b")).await.unwrap();

        {
            let mut ledger = first.lock().await;
            ledger.append_user("q").unwrap();
            ledger.append_assistant("a").unwrap();
        }

        assert_eq!(first.lock().await.turn_count(), 1);
        assert_eq!(second.lock().await.turn_count(), 0);
        assert_eq!(second.lock().await.system().unwrap().content(), "S");
    }

    #[tokio::test]
    async fn concurrent_opens_share_one_ledger() {
        let registry = Arc::new(SessionRegistry::new(template(8)).unwrap());
        let id = SessionId::from("shared");

        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = registry.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                let ledger = registry.open(&id).await.unwrap();
                let mut ledger = ledger.lock().await;
                ledger.append_user(format!("q{i}")).unwrap();
                ledger.append_assistant(format!("a{i}")).unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let ledger = registry.get(&id).await.unwrap();
        let ledger = ledger.lock().await;
        assert_eq!(ledger.turn_count(), 8);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn insert_and_close() {
        let registry = SessionRegistry::new(template(2)).unwrap();
        let id = SessionId::new();

        let mut restored = Ledger::new(5).unwrap();
        restored.append_user("from disk").unwrap();
        registry.insert(id.clone(), restored).await;

        let ledger = registry.get(&id).await.unwrap();
        assert_eq!(ledger.lock().await.max_turns(), 5);
        assert_eq!(registry.ids().await, vec![id.clone()]);

        assert!(registry.close(&id).await.is_some());
        assert!(registry.close(&id).await.is_none());
        assert!(registry.get(&id).await.is_none());
        assert!(registry.is_empty().await);
    }
}
