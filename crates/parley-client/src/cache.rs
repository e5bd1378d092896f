use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use parley_types::events::GatewayEvent;
use parley_types::models::{DeleteScope, MessageView};

/// Confirmed-create matching falls back to sender + content inside this
/// window when the event carries no client tag.
fn reconcile_window() -> Duration {
    Duration::seconds(30)
}

/// A locally-materialized message awaiting server acknowledgment. The
/// server knows nothing about it; it exists only in this overlay.
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub local_id: i64,
    pub client_tag: String,
    pub sender_id: Uuid,
    pub content: String,
    pub submitted_at: DateTime<Utc>,
}

/// One row of the merged timeline.
#[derive(Debug)]
pub enum CacheEntry<'a> {
    Confirmed(&'a MessageView),
    Pending(&'a PendingSend),
}

/// Derived view of one conversation. Server events are the single source
/// of truth; optimistic placeholders live apart and are removed on the
/// first matching confirmation or an explicit failure.
pub struct ConversationCache {
    conversation_id: Uuid,
    confirmed: BTreeMap<i64, MessageView>,
    pending: Vec<PendingSend>,
    next_local_id: i64,
    typing: HashSet<Uuid>,
    read_markers: HashMap<Uuid, i64>,
}

impl ConversationCache {
    pub fn new(conversation_id: Uuid) -> Self {
        Self {
            conversation_id,
            confirmed: BTreeMap::new(),
            pending: Vec::new(),
            next_local_id: -1,
            typing: HashSet::new(),
            read_markers: HashMap::new(),
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    /// Materialize a send immediately. Returns the temporary negative local
    /// id the UI can render under until the authoritative record arrives.
    pub fn stage(
        &mut self,
        sender_id: Uuid,
        content: String,
        client_tag: String,
        submitted_at: DateTime<Utc>,
    ) -> i64 {
        let local_id = self.next_local_id;
        self.next_local_id -= 1;
        self.pending.push(PendingSend {
            local_id,
            client_tag,
            sender_id,
            content,
            submitted_at,
        });
        local_id
    }

    /// The submission was rejected: drop the placeholder, nothing else
    /// changes (a rejected create leaves no trace in the shared view).
    pub fn fail(&mut self, local_id: i64) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.local_id != local_id);
        self.pending.len() != before
    }

    /// Replace the confirmed view after a reconnect. The local list is
    /// possibly stale across the gap; the fetched page wins. Pending sends
    /// survive until individually confirmed or failed.
    pub fn reset(&mut self, messages: Vec<MessageView>) {
        self.confirmed.clear();
        self.typing.clear();
        for message in messages {
            if message.conversation_id == self.conversation_id {
                self.confirmed.insert(message.id, message);
            }
        }
    }

    /// Fold one authoritative event into the cache. Events scoped to other
    /// conversations are ignored; events for unknown ids are dropped (a
    /// later page fetch recovers them).
    pub fn apply(&mut self, event: &GatewayEvent) {
        if event.conversation_id() != Some(self.conversation_id) {
            return;
        }

        match event {
            GatewayEvent::MessageCreated { message, client_tag } => {
                self.reconcile(message, client_tag.as_deref());
                self.confirmed.insert(message.id, message.clone());
                self.typing.remove(&message.sender_id);
            }

            GatewayEvent::MessageEdited {
                message_id,
                content,
                edited_at,
                ..
            } => {
                if let Some(message) = self.confirmed.get_mut(message_id) {
                    message.content = content.clone();
                    message.edited_at = Some(*edited_at);
                }
            }

            GatewayEvent::MessageDeleted {
                message_id, scope, ..
            } => match scope {
                // Hidden only for this user: gone from the local view.
                DeleteScope::Me => {
                    self.confirmed.remove(message_id);
                }
                DeleteScope::Everyone => {
                    if let Some(message) = self.confirmed.get_mut(message_id) {
                        message.deleted = true;
                        message.content.clear();
                        message.attachment_url = None;
                        message.pinned = false;
                        message.pinned_by = None;
                    }
                }
            },

            GatewayEvent::ReactionChanged {
                message_id,
                reactions,
                ..
            } => {
                if let Some(message) = self.confirmed.get_mut(message_id) {
                    message.reactions = reactions.clone();
                }
            }

            GatewayEvent::PinChanged {
                message_id,
                pinned,
                pinned_by,
                ..
            } => {
                if let Some(message) = self.confirmed.get_mut(message_id) {
                    message.pinned = *pinned;
                    message.pinned_by = *pinned_by;
                }
            }

            GatewayEvent::ReadMarkerUpdated {
                message_id,
                user_id,
                ..
            } => {
                let marker = self.read_markers.entry(*user_id).or_insert(*message_id);
                if *message_id > *marker {
                    *marker = *message_id;
                }
            }

            GatewayEvent::TypingStarted { user_id, .. } => {
                self.typing.insert(*user_id);
            }

            GatewayEvent::TypingStopped { user_id, .. } => {
                self.typing.remove(user_id);
            }

            // Membership and conversation-level events are handled by the
            // conversation-list layer, not the per-conversation timeline.
            _ => {}
        }
    }

    /// Merged timeline: confirmed messages in commit order, then the
    /// pending overlay in submission order.
    pub fn entries(&self) -> Vec<CacheEntry<'_>> {
        let mut entries: Vec<CacheEntry<'_>> =
            self.confirmed.values().map(CacheEntry::Confirmed).collect();
        entries.extend(self.pending.iter().map(CacheEntry::Pending));
        entries
    }

    pub fn confirmed(&self, message_id: i64) -> Option<&MessageView> {
        self.confirmed.get(&message_id)
    }

    pub fn pending(&self) -> &[PendingSend] {
        &self.pending
    }

    pub fn typing_users(&self) -> &HashSet<Uuid> {
        &self.typing
    }

    pub fn read_marker(&self, user_id: Uuid) -> Option<i64> {
        self.read_markers.get(&user_id).copied()
    }

    /// Remove the placeholder this authoritative record confirms, matching
    /// by client tag first, then by sender + content in a narrow window.
    fn reconcile(&mut self, message: &MessageView, client_tag: Option<&str>) {
        if let Some(tag) = client_tag {
            if !tag.is_empty() {
                self.pending.retain(|p| p.client_tag != tag);
                return;
            }
        }
        let position = self.pending.iter().position(|p| {
            p.sender_id == message.sender_id
                && p.content == message.content
                && (message.created_at - p.submitted_at).abs() <= reconcile_window()
        });
        if let Some(position) = position {
            self.pending.remove(position);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::models::MessageKind;

    fn view(conversation_id: Uuid, id: i64, sender_id: Uuid, content: &str) -> MessageView {
        MessageView {
            id,
            conversation_id,
            sender_id,
            kind: MessageKind::Text,
            content: content.to_string(),
            attachment_url: None,
            parent: None,
            reactions: vec![],
            mentions: vec![],
            pinned: false,
            pinned_by: None,
            deleted: false,
            edited_at: None,
            scheduled_at: None,
            self_destruct_at: None,
            created_at: Utc::now(),
        }
    }

    fn created(message: MessageView, client_tag: Option<&str>) -> GatewayEvent {
        GatewayEvent::MessageCreated {
            message,
            client_tag: client_tag.map(str::to_string),
        }
    }

    #[test]
    fn placeholder_replaced_on_tag_match() {
        let conv = Uuid::new_v4();
        let me = Uuid::new_v4();
        let mut cache = ConversationCache::new(conv);

        let local = cache.stage(me, "hello".into(), "tag-1".into(), Utc::now());
        assert!(local < 0);
        assert_eq!(cache.pending().len(), 1);

        cache.apply(&created(view(conv, 7, me, "hello"), Some("tag-1")));

        assert!(cache.pending().is_empty());
        assert_eq!(cache.confirmed(7).unwrap().content, "hello");
    }

    #[test]
    fn placeholder_replaced_on_content_window_match() {
        let conv = Uuid::new_v4();
        let me = Uuid::new_v4();
        let mut cache = ConversationCache::new(conv);

        cache.stage(me, "hello".into(), "tag-lost".into(), Utc::now());
        // Event arrives without the tag; sender + content within the window
        // still reconciles.
        cache.apply(&created(view(conv, 7, me, "hello"), None));

        assert!(cache.pending().is_empty());
    }

    #[test]
    fn stale_placeholder_outside_window_is_kept() {
        let conv = Uuid::new_v4();
        let me = Uuid::new_v4();
        let mut cache = ConversationCache::new(conv);

        cache.stage(me, "hello".into(), "tag-old".into(), Utc::now() - Duration::minutes(10));
        cache.apply(&created(view(conv, 7, me, "hello"), None));

        // Same content, but too old to be this submission.
        assert_eq!(cache.pending().len(), 1);
        assert!(cache.confirmed(7).is_some());
    }

    #[test]
    fn failed_submission_leaves_no_trace() {
        let conv = Uuid::new_v4();
        let me = Uuid::new_v4();
        let mut cache = ConversationCache::new(conv);

        let local = cache.stage(me, "nope".into(), "tag-2".into(), Utc::now());
        assert!(cache.fail(local));
        assert!(!cache.fail(local));
        assert!(cache.entries().is_empty());
    }

    #[test]
    fn other_conversations_are_ignored() {
        let conv = Uuid::new_v4();
        let mut cache = ConversationCache::new(conv);

        cache.apply(&created(view(Uuid::new_v4(), 3, Uuid::new_v4(), "elsewhere"), None));
        assert!(cache.entries().is_empty());
    }

    #[test]
    fn delete_scopes_differ() {
        let conv = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let mut cache = ConversationCache::new(conv);
        cache.apply(&created(view(conv, 1, sender, "hello"), None));
        cache.apply(&created(view(conv, 2, sender, "world"), None));

        cache.apply(&GatewayEvent::MessageDeleted {
            conversation_id: conv,
            message_id: 1,
            scope: DeleteScope::Everyone,
        });
        cache.apply(&GatewayEvent::MessageDeleted {
            conversation_id: conv,
            message_id: 2,
            scope: DeleteScope::Me,
        });

        let tombstone = cache.confirmed(1).unwrap();
        assert!(tombstone.deleted);
        assert!(tombstone.content.is_empty());
        assert!(cache.confirmed(2).is_none());
    }

    #[test]
    fn events_mutate_confirmed_entries_in_place() {
        let conv = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let mut cache = ConversationCache::new(conv);
        cache.apply(&created(view(conv, 1, sender, "draft"), None));

        let edited_at = Utc::now();
        cache.apply(&GatewayEvent::MessageEdited {
            conversation_id: conv,
            message_id: 1,
            content: "final".into(),
            edited_at,
        });
        cache.apply(&GatewayEvent::PinChanged {
            conversation_id: conv,
            message_id: 1,
            pinned: true,
            pinned_by: Some(sender),
        });

        let message = cache.confirmed(1).unwrap();
        assert_eq!(message.content, "final");
        assert_eq!(message.edited_at, Some(edited_at));
        assert!(message.pinned);
    }

    #[test]
    fn unknown_ids_are_dropped_not_fatal() {
        let conv = Uuid::new_v4();
        let mut cache = ConversationCache::new(conv);
        cache.apply(&GatewayEvent::ReactionChanged {
            conversation_id: conv,
            message_id: 42,
            reactions: vec![],
        });
        assert!(cache.entries().is_empty());
    }

    #[test]
    fn reset_replaces_stale_view_but_keeps_pending() {
        let conv = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let mut cache = ConversationCache::new(conv);
        cache.apply(&created(view(conv, 1, sender, "stale"), None));
        cache.stage(sender, "unsent".into(), "tag-3".into(), Utc::now());

        cache.reset(vec![
            view(conv, 2, sender, "fresh"),
            view(conv, 3, sender, "fresher"),
        ]);

        assert!(cache.confirmed(1).is_none());
        assert!(cache.confirmed(2).is_some());
        assert_eq!(cache.pending().len(), 1);
    }

    #[test]
    fn read_markers_never_regress() {
        let conv = Uuid::new_v4();
        let reader = Uuid::new_v4();
        let mut cache = ConversationCache::new(conv);

        cache.apply(&GatewayEvent::ReadMarkerUpdated {
            conversation_id: conv,
            message_id: 5,
            user_id: reader,
        });
        cache.apply(&GatewayEvent::ReadMarkerUpdated {
            conversation_id: conv,
            message_id: 3,
            user_id: reader,
        });

        assert_eq!(cache.read_marker(reader), Some(5));
    }

    #[test]
    fn typing_set_follows_start_stop_and_send() {
        let conv = Uuid::new_v4();
        let typist = Uuid::new_v4();
        let mut cache = ConversationCache::new(conv);

        cache.apply(&GatewayEvent::TypingStarted {
            conversation_id: conv,
            user_id: typist,
        });
        assert!(cache.typing_users().contains(&typist));

        // A delivered message implies typing ended.
        cache.apply(&created(view(conv, 1, typist, "done"), None));
        assert!(!cache.typing_users().contains(&typist));
    }
}
