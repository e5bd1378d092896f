use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

use parley_types::events::GatewayEvent;

use crate::dispatcher::{Dispatcher, Target};

/// A typing signal that isn't renewed within this window auto-expires.
pub const TYPING_TTL: Duration = Duration::from_secs(6);

const SWEEP_PERIOD: Duration = Duration::from_secs(2);

/// Soft, time-boxed typing state. Never persisted — the server only relays
/// it live, and entries silently lapse when a client stops renewing.
#[derive(Clone, Default)]
pub struct TypingTracker {
    entries: Arc<Mutex<HashMap<(Uuid, Uuid), Instant>>>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or renew) a typing signal. Returns true when this user was
    /// not already marked as typing in the conversation.
    pub fn start(&self, conversation_id: Uuid, user_id: Uuid, now: Instant) -> bool {
        self.entries
            .lock()
            .expect("typing lock poisoned")
            .insert((conversation_id, user_id), now + TYPING_TTL)
            .is_none()
    }

    /// Explicit stop. Returns true when an entry was actually cleared.
    pub fn stop(&self, conversation_id: Uuid, user_id: Uuid) -> bool {
        self.entries
            .lock()
            .expect("typing lock poisoned")
            .remove(&(conversation_id, user_id))
            .is_some()
    }

    /// Remove and return every entry whose deadline has passed.
    pub fn sweep(&self, now: Instant) -> Vec<(Uuid, Uuid)> {
        let mut entries = self.entries.lock().expect("typing lock poisoned");
        let expired: Vec<(Uuid, Uuid)> = entries
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            entries.remove(key);
        }
        expired
    }
}

/// Background sweep: publishes `TypingStopped` for lapsed signals.
pub async fn run_expiry(tracker: TypingTracker, dispatcher: Dispatcher) {
    let mut tick = tokio::time::interval(SWEEP_PERIOD);
    loop {
        tick.tick().await;
        for (conversation_id, user_id) in tracker.sweep(Instant::now()) {
            dispatcher
                .publish(
                    GatewayEvent::TypingStopped {
                        conversation_id,
                        user_id,
                    },
                    Target::Conversation(conversation_id),
                )
                .await;
        }
    }
}
