//! Database row types — these map directly to SQLite rows.
//! Distinct from parley-types API views to keep the DB layer independent;
//! conversions into views live here so id/timestamp parsing happens once.

use tracing::warn;
use uuid::Uuid;

use parley_types::models::{
    ConversationKind, ConversationView, MemberView, MessageKind, MessageView, ParentPreview,
    PermissionFlags, ReactionGroup,
};

use crate::parse_ts;

pub struct ConversationRow {
    pub id: String,
    pub kind: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub creator_id: String,
    pub slow_mode_seconds: u32,
    pub removed: bool,
    pub created_at: String,
}

pub struct MemberRow {
    pub conversation_id: String,
    pub user_id: String,
    pub flags: PermissionFlags,
    pub pinned: bool,
    pub archived: bool,
    pub joined_at: String,
}

pub struct MessageRow {
    pub id: i64,
    pub conversation_id: String,
    pub sender_id: String,
    pub kind: String,
    pub content: String,
    pub attachment_url: Option<String>,
    pub parent_id: Option<i64>,
    pub scheduled_at: Option<String>,
    pub published: bool,
    pub self_destruct_at: Option<String>,
    pub deleted: bool,
    pub edited_at: Option<String>,
    pub pinned: bool,
    pub pinned_by: Option<String>,
    pub created_at: String,
}

pub struct ReactionRow {
    pub message_id: i64,
    pub user_id: String,
    pub emoji: String,
    pub created_at: String,
}

pub(crate) fn parse_uuid(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

impl ConversationRow {
    pub fn into_view(self, members: Vec<MemberRow>) -> ConversationView {
        let creator_id = parse_uuid(&self.creator_id, "creator_id");
        ConversationView {
            id: parse_uuid(&self.id, "conversation id"),
            kind: ConversationKind::parse(&self.kind).unwrap_or(ConversationKind::Group),
            name: self.name,
            description: self.description,
            creator_id,
            slow_mode_seconds: self.slow_mode_seconds,
            members: members.into_iter().map(|m| m.into_view(creator_id)).collect(),
            created_at: parse_ts(&self.created_at),
        }
    }
}

impl MemberRow {
    pub fn into_view(self, creator_id: Uuid) -> MemberView {
        let user_id = parse_uuid(&self.user_id, "member user_id");
        MemberView {
            user_id,
            is_creator: user_id == creator_id,
            flags: self.flags,
            joined_at: parse_ts(&self.joined_at),
        }
    }
}

impl MessageRow {
    pub fn into_view(
        self,
        reactions: Vec<ReactionGroup>,
        mentions: Vec<Uuid>,
        parent: Option<ParentPreview>,
    ) -> MessageView {
        MessageView {
            id: self.id,
            conversation_id: parse_uuid(&self.conversation_id, "conversation_id"),
            sender_id: parse_uuid(&self.sender_id, "sender_id"),
            kind: MessageKind::parse(&self.kind).unwrap_or(MessageKind::Text),
            content: self.content,
            attachment_url: self.attachment_url,
            parent,
            reactions,
            mentions,
            pinned: self.pinned,
            pinned_by: self.pinned_by.as_deref().map(|s| parse_uuid(s, "pinned_by")),
            deleted: self.deleted,
            edited_at: self.edited_at.as_deref().map(parse_ts),
            scheduled_at: self.scheduled_at.as_deref().map(parse_ts),
            self_destruct_at: self.self_destruct_at.as_deref().map(parse_ts),
            created_at: parse_ts(&self.created_at),
        }
    }
}
