use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use parley_types::events::GatewayEvent;

/// Per-session delivery queue depth. A session that stops draining loses
/// events once the queue fills; it must recover via pagination on reconnect.
pub const SESSION_QUEUE_DEPTH: usize = 256;

struct Session {
    user_id: Uuid,
    tx: mpsc::Sender<GatewayEvent>,
    joined: HashSet<Uuid>,
}

/// Maps connected sessions to users and to the conversations they joined.
/// Supports multiple concurrent sessions per user (multi-device).
///
/// Sessions are weak from the registry's point of view: losing one drops
/// its subscriptions and nothing else. Subscriber sets are guarded per
/// conversation; the outer map is locked only long enough to clone the
/// per-conversation `Arc`, so traffic in one conversation never serializes
/// behind another.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    sessions: RwLock<HashMap<Uuid, Session>>,
    by_user: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
    rooms: RwLock<HashMap<Uuid, Arc<RwLock<HashSet<Uuid>>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connected session. Returns the session id and the
    /// receiving end of its delivery queue.
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::Receiver<GatewayEvent>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
        self.inner.sessions.write().await.insert(
            session_id,
            Session {
                user_id,
                tx,
                joined: HashSet::new(),
            },
        );
        self.inner
            .by_user
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(session_id);
        (session_id, rx)
    }

    /// Drop a session and all of its conversation subscriptions.
    pub async fn unregister(&self, session_id: Uuid) {
        let session = self.inner.sessions.write().await.remove(&session_id);
        let Some(session) = session else { return };

        {
            let mut by_user = self.inner.by_user.write().await;
            if let Some(set) = by_user.get_mut(&session.user_id) {
                set.remove(&session_id);
                if set.is_empty() {
                    by_user.remove(&session.user_id);
                }
            }
        }

        for conversation_id in session.joined {
            if let Some(room) = self.room(&conversation_id).await {
                room.write().await.remove(&session_id);
            }
        }
    }

    /// Subscribe a session to a conversation's events. Returns false for an
    /// unknown session.
    pub async fn join(&self, session_id: Uuid, conversation_id: Uuid) -> bool {
        {
            let mut sessions = self.inner.sessions.write().await;
            let Some(session) = sessions.get_mut(&session_id) else {
                return false;
            };
            session.joined.insert(conversation_id);
        }
        let room = self.room_or_create(&conversation_id).await;
        room.write().await.insert(session_id);
        true
    }

    pub async fn leave(&self, session_id: Uuid, conversation_id: Uuid) {
        if let Some(session) = self.inner.sessions.write().await.get_mut(&session_id) {
            session.joined.remove(&conversation_id);
        }
        if let Some(room) = self.room(&conversation_id).await {
            room.write().await.remove(&session_id);
        }
    }

    /// Live sessions joined to a conversation.
    pub async fn sessions_for(
        &self,
        conversation_id: Uuid,
    ) -> Vec<(Uuid, mpsc::Sender<GatewayEvent>)> {
        let Some(room) = self.room(&conversation_id).await else {
            return vec![];
        };
        let ids: Vec<Uuid> = room.read().await.iter().copied().collect();
        let sessions = self.inner.sessions.read().await;
        ids.into_iter()
            .filter_map(|id| sessions.get(&id).map(|s| (id, s.tx.clone())))
            .collect()
    }

    /// Every session a user currently has open, independent of join state.
    pub async fn sessions_for_user(
        &self,
        user_id: Uuid,
    ) -> Vec<(Uuid, mpsc::Sender<GatewayEvent>)> {
        let ids: Vec<Uuid> = self
            .inner
            .by_user
            .read()
            .await
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        let sessions = self.inner.sessions.read().await;
        ids.into_iter()
            .filter_map(|id| sessions.get(&id).map(|s| (id, s.tx.clone())))
            .collect()
    }

    pub async fn has_live_session(&self, user_id: Uuid) -> bool {
        self.inner
            .by_user
            .read()
            .await
            .get(&user_id)
            .is_some_and(|set| !set.is_empty())
    }

    pub async fn is_joined(&self, session_id: Uuid, conversation_id: Uuid) -> bool {
        self.inner
            .sessions
            .read()
            .await
            .get(&session_id)
            .is_some_and(|s| s.joined.contains(&conversation_id))
    }

    /// Force a user's sessions out of a conversation's subscriber set, e.g.
    /// after the user was removed from the conversation.
    pub async fn evict_user(&self, conversation_id: Uuid, user_id: Uuid) {
        let ids: Vec<Uuid> = self
            .inner
            .by_user
            .read()
            .await
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        if ids.is_empty() {
            return;
        }

        if let Some(room) = self.room(&conversation_id).await {
            let mut room = room.write().await;
            for id in &ids {
                room.remove(id);
            }
        }
        let mut sessions = self.inner.sessions.write().await;
        for id in &ids {
            if let Some(session) = sessions.get_mut(id) {
                session.joined.remove(&conversation_id);
            }
        }
    }

    /// Drop a conversation's whole subscriber set (soft-removed group).
    pub async fn drop_conversation(&self, conversation_id: Uuid) {
        let room = self.inner.rooms.write().await.remove(&conversation_id);
        let Some(room) = room else { return };
        let ids: Vec<Uuid> = room.read().await.iter().copied().collect();
        let mut sessions = self.inner.sessions.write().await;
        for id in ids {
            if let Some(session) = sessions.get_mut(&id) {
                session.joined.remove(&conversation_id);
            }
        }
    }

    async fn room(&self, conversation_id: &Uuid) -> Option<Arc<RwLock<HashSet<Uuid>>>> {
        self.inner.rooms.read().await.get(conversation_id).cloned()
    }

    async fn room_or_create(&self, conversation_id: &Uuid) -> Arc<RwLock<HashSet<Uuid>>> {
        if let Some(room) = self.room(conversation_id).await {
            return room;
        }
        self.inner
            .rooms
            .write()
            .await
            .entry(*conversation_id)
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn multi_device_register_and_lookup() {
        let registry = Registry::new();
        let user = Uuid::new_v4();

        let (s1, _rx1) = registry.register(user).await;
        let (s2, _rx2) = registry.register(user).await;
        assert_ne!(s1, s2);

        let sessions = registry.sessions_for_user(user).await;
        assert_eq!(sessions.len(), 2);
        assert!(registry.has_live_session(user).await);

        registry.unregister(s1).await;
        assert_eq!(registry.sessions_for_user(user).await.len(), 1);
        registry.unregister(s2).await;
        assert!(!registry.has_live_session(user).await);
    }

    #[tokio::test]
    async fn join_scopes_conversation_delivery() {
        let registry = Registry::new();
        let conv = Uuid::new_v4();
        let (s1, _rx1) = registry.register(Uuid::new_v4()).await;
        let (s2, _rx2) = registry.register(Uuid::new_v4()).await;

        assert!(registry.join(s1, conv).await);
        assert_eq!(registry.sessions_for(conv).await.len(), 1);

        assert!(registry.join(s2, conv).await);
        assert_eq!(registry.sessions_for(conv).await.len(), 2);

        registry.leave(s1, conv).await;
        let remaining = registry.sessions_for(conv).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, s2);
    }

    #[tokio::test]
    async fn unregister_drops_all_subscriptions() {
        let registry = Registry::new();
        let conv_a = Uuid::new_v4();
        let conv_b = Uuid::new_v4();
        let (s, _rx) = registry.register(Uuid::new_v4()).await;
        registry.join(s, conv_a).await;
        registry.join(s, conv_b).await;

        registry.unregister(s).await;
        assert!(registry.sessions_for(conv_a).await.is_empty());
        assert!(registry.sessions_for(conv_b).await.is_empty());
    }

    #[tokio::test]
    async fn evict_user_clears_every_device() {
        let registry = Registry::new();
        let conv = Uuid::new_v4();
        let user = Uuid::new_v4();
        let (s1, _rx1) = registry.register(user).await;
        let (s2, _rx2) = registry.register(user).await;
        let (other, _rx3) = registry.register(Uuid::new_v4()).await;
        registry.join(s1, conv).await;
        registry.join(s2, conv).await;
        registry.join(other, conv).await;

        registry.evict_user(conv, user).await;

        let remaining = registry.sessions_for(conv).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, other);
        assert!(!registry.is_joined(s1, conv).await);
        assert!(!registry.is_joined(s2, conv).await);
    }

    #[tokio::test]
    async fn join_unknown_session_is_rejected() {
        let registry = Registry::new();
        assert!(!registry.join(Uuid::new_v4(), Uuid::new_v4()).await);
    }
}
