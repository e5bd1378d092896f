use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;
use uuid::Uuid;

use parley_types::events::GatewayEvent;

use crate::registry::Registry;

/// Where an event goes: every session joined to a conversation, or every
/// session a user has open (independent of join state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Conversation(Uuid),
    User(Uuid),
}

/// Pure dispatch layer: resolves a target to live sessions and pushes the
/// event into each session's own queue. No persistence, no content
/// transformation — a fan-out failure can never corrupt stored state.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Registry,
}

impl Dispatcher {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Best-effort, at-least-once per live session. Each session has its
    /// own bounded queue: a full or broken queue never delays delivery to
    /// other sessions. A broken push channel drops the session from the
    /// registry; it is never surfaced to the sender.
    pub async fn publish(&self, event: GatewayEvent, target: Target) {
        let sessions = match target {
            Target::Conversation(id) => self.registry.sessions_for(id).await,
            Target::User(id) => self.registry.sessions_for_user(id).await,
        };

        for (session_id, tx) in sessions {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Session {} queue full, dropping event", session_id);
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("Session {} push channel broken, unregistering", session_id);
                    self.registry.unregister(session_id).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::events::GatewayEvent;

    fn typing(conversation_id: Uuid, user_id: Uuid) -> GatewayEvent {
        GatewayEvent::TypingStarted {
            conversation_id,
            user_id,
        }
    }

    #[tokio::test]
    async fn conversation_publish_reaches_only_joined_sessions() {
        let registry = Registry::new();
        let dispatcher = Dispatcher::new(registry.clone());
        let conv = Uuid::new_v4();
        let user = Uuid::new_v4();

        let (joined, mut rx_joined) = registry.register(user).await;
        let (_stranger, mut rx_stranger) = registry.register(Uuid::new_v4()).await;
        registry.join(joined, conv).await;

        dispatcher
            .publish(typing(conv, user), Target::Conversation(conv))
            .await;

        assert!(rx_joined.try_recv().is_ok());
        assert!(rx_stranger.try_recv().is_err());
    }

    #[tokio::test]
    async fn user_publish_reaches_every_device_without_join() {
        let registry = Registry::new();
        let dispatcher = Dispatcher::new(registry.clone());
        let conv = Uuid::new_v4();
        let user = Uuid::new_v4();

        let (_s1, mut rx1) = registry.register(user).await;
        let (_s2, mut rx2) = registry.register(user).await;

        dispatcher.publish(typing(conv, user), Target::User(user)).await;

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn closed_session_is_dropped_not_fatal() {
        let registry = Registry::new();
        let dispatcher = Dispatcher::new(registry.clone());
        let conv = Uuid::new_v4();
        let user = Uuid::new_v4();

        let (dead, rx_dead) = registry.register(user).await;
        let (alive, mut rx_alive) = registry.register(user).await;
        registry.join(dead, conv).await;
        registry.join(alive, conv).await;
        drop(rx_dead);

        dispatcher
            .publish(typing(conv, user), Target::Conversation(conv))
            .await;

        // The live session still got the event; the dead one is gone.
        assert!(rx_alive.try_recv().is_ok());
        assert!(!registry.is_joined(dead, conv).await);
        assert_eq!(registry.sessions_for_user(user).await.len(), 1);
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let registry = Registry::new();
        let dispatcher = Dispatcher::new(registry.clone());
        let conv = Uuid::new_v4();
        let (s, mut rx) = registry.register(Uuid::new_v4()).await;
        registry.join(s, conv).await;

        let users: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for user in &users {
            dispatcher
                .publish(typing(conv, *user), Target::Conversation(conv))
                .await;
        }

        for user in &users {
            match rx.try_recv().unwrap() {
                GatewayEvent::TypingStarted { user_id, .. } => assert_eq!(user_id, *user),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }
}
