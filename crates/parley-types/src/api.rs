use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ConversationKind, ConversationView, MessageKind, MessageView, PermissionFlags};

// -- JWT Claims --

/// JWT claims shared across parley-api (REST middleware) and parley-gateway
/// (WebSocket authentication). Canonical definition lives here in
/// parley-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    pub kind: ConversationKind,
    /// Required for groups, ignored for direct conversations.
    pub name: Option<String>,
    pub description: Option<String>,
    /// Initial members besides the creator. Exactly one for direct.
    pub members: Vec<Uuid>,
    #[serde(default)]
    pub slow_mode_seconds: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateConversationRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub slow_mode_seconds: Option<u32>,
}

/// Conversation list entry: the shared view plus the requester's private
/// pin/archive display state.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation: ConversationView,
    pub pinned: bool,
    pub archived: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemberDisplayRequest {
    pub pinned: bool,
    pub archived: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePermissionsRequest {
    pub flags: PermissionFlags,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferCreatorRequest {
    pub new_creator_id: Uuid,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default = "default_kind")]
    pub kind: MessageKind,
    pub attachment_url: Option<String>,
    pub parent_id: Option<i64>,
    /// Persist now, become visible at this future instant.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Become permanently inaccessible this many seconds after creation.
    pub self_destruct_seconds: Option<u32>,
    #[serde(default)]
    pub mentions: Vec<Uuid>,
    /// Client-generated correlation token, echoed in `MessageCreated` so the
    /// sender's optimistic placeholder can be reconciled.
    pub client_tag: Option<String>,
}

fn default_kind() -> MessageKind {
    MessageKind::Text
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditMessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForwardRequest {
    pub conversation_ids: Vec<Uuid>,
}

/// Per-target outcome of a forward. Authorization is evaluated per target,
/// so some targets may succeed while others are rejected.
#[derive(Debug, Serialize, Deserialize)]
pub struct ForwardOutcome {
    pub conversation_id: Uuid,
    pub message: Option<MessageView>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub message_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page_size() -> u32 {
    50
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    /// Omit to search across every conversation the requester belongs to.
    pub conversation_id: Option<Uuid>,
    #[serde(default = "default_search_limit")]
    pub limit: u32,
}

fn default_search_limit() -> u32 {
    50
}
