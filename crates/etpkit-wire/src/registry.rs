//! Session registry — tracks the active sessions of a server.
//!
//! The [`SessionRegistry`] is created once at server start and cloned into
//! every accepted session. A session adds itself when it opens and removes
//! itself when it closes, so iteration always sees open (or closing) sessions.

use crate::session::Session;
use etpkit_types::{EtpError, MessageHeader};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Thread-safe map from session id to session.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a session under its id.
    pub fn add(&self, session: Arc<Session>) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        debug!(session_id = %session.id(), "Session registered");
        sessions.insert(session.id().to_string(), session);
    }

    /// Remove a session by id.
    pub fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id)
    }

    /// Remove `session` only if the entry under its id is that same session.
    pub fn remove_session(&self, session: &Session) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let same = sessions
            .get(session.id())
            .is_some_and(|entry| std::ptr::eq(Arc::as_ptr(entry), session));
        if same {
            sessions.remove(session.id());
            debug!(session_id = %session.id(), "Session deregistered");
        }
        same
    }

    /// Look up a session by id.
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).cloned()
    }

    /// Whether a session with this id is registered.
    pub fn contains(&self, session_id: &str) -> bool {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.contains_key(session_id)
    }

    /// Ids of all registered sessions.
    pub fn session_ids(&self) -> Vec<String> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.keys().cloned().collect()
    }

    /// Snapshot of all registered sessions.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.values().cloned().collect()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.len()
    }

    /// Whether no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send the same message to every registered session.
    ///
    /// Each session assigns its own message id. Sessions that fail are
    /// reported with their error; the others are unaffected.
    pub async fn broadcast<T>(&self, header: &MessageHeader, body: &T) -> Vec<(String, EtpError)>
    where
        T: Serialize + Sync + ?Sized,
    {
        let mut failures = Vec::new();
        for session in self.sessions() {
            if let Err(e) = session.send_message(header.clone(), body).await {
                warn!(session_id = %session.id(), error = %e, "Broadcast failed");
                failures.push((session.id().to_string(), e));
            }
        }
        failures
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Frame;
    use crate::transport::TransportSender;
    use async_trait::async_trait;
    use etpkit_types::config::SessionConfig;
    use etpkit_types::message::Acknowledge;
    use etpkit_types::protocol::common;
    use etpkit_types::{EtpResult, MessageFlags};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSender {
        sent: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TransportSender for CountingSender {
        async fn send(&mut self, _frame: Frame) -> EtpResult<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&mut self, _reason: &str) -> EtpResult<()> {
            Ok(())
        }
    }

    fn make_session(registry: &SessionRegistry, sent: &Arc<AtomicUsize>) -> Arc<Session> {
        Session::builder(SessionConfig::default())
            .registry(registry.clone())
            .build(Box::new(CountingSender {
                sent: Arc::clone(sent),
            }))
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_registers_and_close_deregisters() {
        let registry = SessionRegistry::new();
        let sent = Arc::new(AtomicUsize::new(0));
        let session = make_session(&registry, &sent);
        assert!(registry.is_empty());

        session.open().unwrap();
        assert!(registry.contains(session.id()));
        assert_eq!(registry.len(), 1);

        session.close("bye").await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_remove_session_ignores_other_instance() {
        let registry = SessionRegistry::new();
        let sent = Arc::new(AtomicUsize::new(0));
        let a = make_session(&registry, &sent);
        let b = make_session(&registry, &sent);
        a.open().unwrap();

        assert!(!registry.remove_session(&b));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove_session(&a));
        assert!(registry.get(a.id()).is_none());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_session() {
        let registry = SessionRegistry::new();
        let sent = Arc::new(AtomicUsize::new(0));
        let sessions: Vec<_> = (0..3).map(|_| make_session(&registry, &sent)).collect();
        for s in &sessions {
            s.open().unwrap();
        }
        assert_eq!(registry.session_ids().len(), 3);

        let header = MessageHeader::new(0, common::ACKNOWLEDGE, 0, MessageFlags::NONE);
        let failures = registry.broadcast(&header, &Acknowledge {}).await;
        assert!(failures.is_empty());
        assert_eq!(sent.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_broadcast_reports_closed_session() {
        let registry = SessionRegistry::new();
        let sent = Arc::new(AtomicUsize::new(0));
        let open = make_session(&registry, &sent);
        let stale = make_session(&registry, &sent);
        open.open().unwrap();
        // Registered by hand so it stays listed without being open.
        registry.add(Arc::clone(&stale));

        let header = MessageHeader::new(0, common::ACKNOWLEDGE, 0, MessageFlags::NONE);
        let failures = registry.broadcast(&header, &Acknowledge {}).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, stale.id());
        assert!(matches!(failures[0].1, EtpError::SessionClosed));
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }
}
