//! Connection registry and chat fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use relay_core::{ChatId, ConnectionId, UserId};
use relay_store::MembershipDirectory;

use crate::connection::{SendOutcome, Session};
use crate::metrics::{
    BROADCAST_DELIVERIES_TOTAL, BROADCASTS_TOTAL, MEMBERSHIP_ERRORS_TOTAL,
    WS_BROADCAST_DROPS_TOTAL,
};

/// Live sessions indexed by user, with chat fan-out.
///
/// A user key exists only while the user has at least one live session.
/// Delivery never happens under the lock: `broadcast` snapshots the
/// recipient sessions and enqueues after releasing it.
pub struct Registry {
    sessions: RwLock<HashMap<UserId, HashMap<ConnectionId, Arc<Session>>>>,
    directory: Arc<dyn MembershipDirectory>,
}

impl Registry {
    /// Create a registry resolving chat members through `directory`.
    pub fn new(directory: Arc<dyn MembershipDirectory>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            directory,
        }
    }

    /// Add a session under its owning user.
    pub async fn register(&self, session: Arc<Session>) {
        let mut sessions = self.sessions.write().await;
        let user = sessions.entry(session.user_id.clone()).or_default();
        let _ = user.insert(session.id.clone(), session.clone());
        debug!(
            user_id = %session.user_id,
            connection_id = %session.id,
            connections = user.len(),
            "session registered"
        );
    }

    /// Remove a session and close its outbound queue.
    ///
    /// Idempotent: unknown sessions are ignored, and the queue close is
    /// exactly-once regardless of how many teardown paths race here. The
    /// user key is removed when its last session goes.
    pub async fn unregister(&self, user_id: &UserId, connection_id: &ConnectionId) {
        let removed = {
            let mut sessions = self.sessions.write().await;
            let Some(user) = sessions.get_mut(user_id) else {
                return;
            };
            let removed = user.remove(connection_id);
            if user.is_empty() {
                let _ = sessions.remove(user_id);
            }
            removed
        };
        if let Some(session) = removed {
            let _ = session.close();
            debug!(user_id = %user_id, connection_id = %connection_id, "session unregistered");
        }
    }

    /// Fan a serialized payload out to every live session of every member
    /// of the chat.
    ///
    /// Returns the number of sessions the payload was queued for. A full
    /// queue drops the payload for that session only; a membership lookup
    /// failure aborts this broadcast and nothing else.
    pub async fn broadcast(&self, chat_id: &ChatId, payload: Arc<str>) -> usize {
        counter!(BROADCASTS_TOTAL).increment(1);

        let members = match self.directory.members(chat_id).await {
            Ok(members) => members,
            Err(e) => {
                counter!(MEMBERSHIP_ERRORS_TOTAL).increment(1);
                warn!(chat_id = %chat_id, error = %e, "membership lookup failed, broadcast aborted");
                return 0;
            }
        };

        let recipients: Vec<Arc<Session>> = {
            let sessions = self.sessions.read().await;
            members
                .iter()
                .filter_map(|user_id| sessions.get(user_id))
                .flat_map(|user| user.values().cloned())
                .collect()
        };

        let mut delivered = 0;
        for session in &recipients {
            match session.send(payload.clone()) {
                SendOutcome::Delivered => delivered += 1,
                SendOutcome::QueueFull => {
                    counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                    warn!(
                        user_id = %session.user_id,
                        connection_id = %session.id,
                        drops = session.drop_count(),
                        "outbound queue full, payload dropped"
                    );
                }
                SendOutcome::Closed => {
                    debug!(connection_id = %session.id, "skipped closed session");
                }
            }
        }
        counter!(BROADCAST_DELIVERIES_TOTAL).increment(delivered as u64);
        debug!(
            chat_id = %chat_id,
            members = members.len(),
            sessions = recipients.len(),
            delivered,
            "broadcast complete"
        );
        delivered
    }

    /// Total live sessions across all users.
    pub async fn connection_count(&self) -> usize {
        self.sessions.read().await.values().map(HashMap::len).sum()
    }

    /// Number of users with at least one live session.
    pub async fn user_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Live sessions of one user. Empty if the user is not connected.
    pub async fn user_sessions(&self, user_id: &UserId) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(user_id)
            .map(|user| user.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_store::MemoryDirectory;
    use tokio::sync::mpsc;

    fn make_session(user: &str, capacity: usize) -> (Arc<Session>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Session::new(user.into(), tx)), rx)
    }

    fn registry_with_chat(chat: &str, members: &[&str]) -> Registry {
        let directory = MemoryDirectory::new();
        for member in members {
            directory.add_member(&chat.into(), &(*member).into());
        }
        Registry::new(Arc::new(directory))
    }

    #[tokio::test]
    async fn register_then_unregister_leaves_no_trace() {
        let registry = registry_with_chat("x", &["alice"]);
        let (session, _rx) = make_session("alice", 8);

        registry.register(session.clone()).await;
        assert_eq!(registry.connection_count().await, 1);
        assert_eq!(registry.user_count().await, 1);

        registry.unregister(&session.user_id, &session.id).await;
        assert_eq!(registry.connection_count().await, 0);
        assert_eq!(registry.user_count().await, 0);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn second_unregister_is_noop() {
        let registry = registry_with_chat("x", &["alice"]);
        let (session, _rx) = make_session("alice", 8);

        registry.register(session.clone()).await;
        registry.unregister(&session.user_id, &session.id).await;
        registry.unregister(&session.user_id, &session.id).await;
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn unregister_unknown_session_is_noop() {
        let registry = registry_with_chat("x", &["alice"]);
        registry
            .unregister(&"ghost".into(), &ConnectionId::new())
            .await;
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_members_only() {
        let registry = registry_with_chat("x", &["alice", "bob"]);
        let (alice, mut alice_rx) = make_session("alice", 8);
        let (bob, mut bob_rx) = make_session("bob", 8);
        let (carol, mut carol_rx) = make_session("carol", 8);
        registry.register(alice).await;
        registry.register(bob).await;
        registry.register(carol).await;

        let delivered = registry.broadcast(&"x".into(), Arc::from("hello")).await;
        assert_eq!(delivered, 2);
        assert!(alice_rx.try_recv().is_ok());
        assert!(bob_rx.try_recv().is_ok());
        assert!(carol_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn multi_device_user_gets_one_copy_per_session() {
        let registry = registry_with_chat("x", &["alice"]);
        let (a1, mut rx1) = make_session("alice", 8);
        let (a2, mut rx2) = make_session("alice", 8);
        let (a3, mut rx3) = make_session("alice", 8);
        registry.register(a1).await;
        registry.register(a2).await;
        registry.register(a3).await;

        let delivered = registry.broadcast(&"x".into(), Arc::from("fan")).await;
        assert_eq!(delivered, 3);
        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            assert_eq!(&*rx.try_recv().unwrap(), "fan");
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn saturated_queue_drops_for_that_session_only() {
        let registry = registry_with_chat("x", &["alice", "bob"]);
        let (alice, _alice_rx) = make_session("alice", 1);
        let (bob, mut bob_rx) = make_session("bob", 8);
        registry.register(alice.clone()).await;
        registry.register(bob).await;

        // Saturate alice's queue.
        assert_eq!(alice.send(Arc::from("filler")), SendOutcome::Delivered);

        let delivered = registry.broadcast(&"x".into(), Arc::from("hello")).await;
        assert_eq!(delivered, 1);
        assert_eq!(alice.drop_count(), 1);
        assert_eq!(&*bob_rx.try_recv().unwrap(), "hello");
        // Alice's connection survives.
        assert_eq!(registry.connection_count().await, 2);
    }

    #[tokio::test]
    async fn removing_last_session_removes_user_from_fanout() {
        let registry = registry_with_chat("x", &["alice"]);
        let (session, _rx) = make_session("alice", 8);
        registry.register(session.clone()).await;
        registry.unregister(&session.user_id, &session.id).await;

        let delivered = registry.broadcast(&"x".into(), Arc::from("nobody")).await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn two_users_three_sessions_three_deliveries() {
        let registry = registry_with_chat("x", &["alice", "bob"]);
        let (a1, mut a1_rx) = make_session("alice", 8);
        let (a2, mut a2_rx) = make_session("alice", 8);
        let (b1, mut b1_rx) = make_session("bob", 8);
        registry.register(a1).await;
        registry.register(a2).await;
        registry.register(b1).await;

        let delivered = registry.broadcast(&"x".into(), Arc::from("hello")).await;
        assert_eq!(delivered, 3);
        for rx in [&mut a1_rx, &mut a2_rx, &mut b1_rx] {
            assert_eq!(&*rx.try_recv().unwrap(), "hello");
        }
    }

    #[tokio::test]
    async fn broadcast_to_unknown_chat_delivers_zero() {
        let registry = registry_with_chat("x", &["alice"]);
        let (session, mut rx) = make_session("alice", 8);
        registry.register(session).await;

        let delivered = registry.broadcast(&"other".into(), Arc::from("x")).await;
        assert_eq!(delivered, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn membership_failure_aborts_broadcast_only() {
        struct FailingDirectory;

        #[async_trait::async_trait]
        impl MembershipDirectory for FailingDirectory {
            async fn members(
                &self,
                _chat_id: &ChatId,
            ) -> relay_store::Result<Vec<UserId>> {
                Err(relay_store::StoreError::Internal("down".into()))
            }
        }

        let registry = Registry::new(Arc::new(FailingDirectory));
        let (session, mut rx) = make_session("alice", 8);
        registry.register(session).await;

        let delivered = registry.broadcast(&"x".into(), Arc::from("hello")).await;
        assert_eq!(delivered, 0);
        assert!(rx.try_recv().is_err());
        // Registry still intact.
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn user_sessions_lookup() {
        let registry = registry_with_chat("x", &["alice"]);
        let (a1, _rx1) = make_session("alice", 8);
        let (a2, _rx2) = make_session("alice", 8);
        registry.register(a1).await;
        registry.register(a2).await;

        assert_eq!(registry.user_sessions(&"alice".into()).await.len(), 2);
        assert!(registry.user_sessions(&"bob".into()).await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_registration_from_many_tasks() {
        let registry = Arc::new(registry_with_chat("x", &["alice"]));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let (session, _rx) = {
                    let (tx, rx) = mpsc::channel(4);
                    (Arc::new(Session::new("alice".into(), tx)), rx)
                };
                registry.register(session.clone()).await;
                registry.unregister(&session.user_id, &session.id).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(registry.connection_count().await, 0);
        assert_eq!(registry.user_count().await, 0);
    }
}
