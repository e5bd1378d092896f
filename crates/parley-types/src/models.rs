use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
    Voice,
    Poll,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
            Self::Voice => "voice",
            Self::Poll => "poll",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "file" => Some(Self::File),
            "voice" => Some(Self::Voice),
            "poll" => Some(Self::Poll),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Whether a deletion applies to everyone or only to the acting user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteScope {
    Me,
    Everyone,
}

/// The six independent permission flags a member can hold.
///
/// The creator's effective permissions are always full regardless of these
/// flags; authorization paths check creator-ness first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionFlags {
    pub change_info: bool,
    pub add_members: bool,
    pub remove_members: bool,
    pub delete_messages: bool,
    pub pin_messages: bool,
    pub change_permissions: bool,
}

impl PermissionFlags {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            change_info: true,
            add_members: true,
            remove_members: true,
            delete_messages: true,
            pin_messages: true,
            change_permissions: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberView {
    pub user_id: Uuid,
    pub is_creator: bool,
    pub flags: PermissionFlags,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationView {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub description: Option<String>,
    pub creator_id: Uuid,
    pub slow_mode_seconds: u32,
    pub members: Vec<MemberView>,
    pub created_at: DateTime<Utc>,
}

/// One emoji's worth of reactions on a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<Uuid>,
}

/// Shortened view of a replied-to message, embedded in its replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentPreview {
    pub id: i64,
    pub sender_id: Uuid,
    pub content: String,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: i64,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub kind: MessageKind,
    /// Empty string on tombstones (delete-for-everyone / self-destructed).
    pub content: String,
    pub attachment_url: Option<String>,
    pub parent: Option<ParentPreview>,
    pub reactions: Vec<ReactionGroup>,
    pub mentions: Vec<Uuid>,
    pub pinned: bool,
    pub pinned_by: Option<Uuid>,
    pub deleted: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub self_destruct_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
