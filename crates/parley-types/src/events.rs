use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    ConversationView, DeleteScope, MemberView, MessageView, PermissionFlags, ReactionGroup,
};

/// Events pushed to sessions over the WebSocket gateway.
///
/// Each carries the conversation id and the minimal payload a client needs
/// to update its local cache without a refetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication.
    Ready { session_id: Uuid, user_id: Uuid },

    /// A message became visible: sent immediately, or promoted from a
    /// schedule by the sweeper. `client_tag` echoes the sender's optimistic
    /// correlation token when one was supplied on create.
    MessageCreated {
        message: MessageView,
        client_tag: Option<String>,
    },

    MessageEdited {
        conversation_id: Uuid,
        message_id: i64,
        content: String,
        edited_at: DateTime<Utc>,
    },

    /// `scope: Everyone` is broadcast to the conversation; `scope: Me` is
    /// delivered only to the acting user's own sessions (multi-device sync).
    MessageDeleted {
        conversation_id: Uuid,
        message_id: i64,
        scope: DeleteScope,
    },

    /// Carries the message's full resulting reaction set after a toggle.
    ReactionChanged {
        conversation_id: Uuid,
        message_id: i64,
        reactions: Vec<ReactionGroup>,
    },

    PinChanged {
        conversation_id: Uuid,
        message_id: i64,
        pinned: bool,
        pinned_by: Option<Uuid>,
    },

    MemberAdded {
        conversation_id: Uuid,
        member: MemberView,
    },

    MemberRemoved {
        conversation_id: Uuid,
        user_id: Uuid,
    },

    PermissionsChanged {
        conversation_id: Uuid,
        user_id: Uuid,
        flags: PermissionFlags,
    },

    AdminTransferred {
        conversation_id: Uuid,
        old_creator_id: Uuid,
        new_creator_id: Uuid,
    },

    ReadMarkerUpdated {
        conversation_id: Uuid,
        message_id: i64,
        user_id: Uuid,
    },

    /// Conversation info / slow mode changed, or the recipient was just
    /// added to it (user-directed, carries the full view).
    ConversationUpdated { conversation: ConversationView },

    ConversationRemoved { conversation_id: Uuid },

    TypingStarted {
        conversation_id: Uuid,
        user_id: Uuid,
    },

    TypingStopped {
        conversation_id: Uuid,
        user_id: Uuid,
    },
}

impl GatewayEvent {
    /// The conversation this event is scoped to, if any. `Ready` and the
    /// user-directed conversation views have no single scope.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::Ready { .. } => None,
            Self::MessageCreated { message, .. } => Some(message.conversation_id),
            Self::MessageEdited { conversation_id, .. }
            | Self::MessageDeleted { conversation_id, .. }
            | Self::ReactionChanged { conversation_id, .. }
            | Self::PinChanged { conversation_id, .. }
            | Self::MemberAdded { conversation_id, .. }
            | Self::MemberRemoved { conversation_id, .. }
            | Self::PermissionsChanged { conversation_id, .. }
            | Self::AdminTransferred { conversation_id, .. }
            | Self::ReadMarkerUpdated { conversation_id, .. }
            | Self::ConversationRemoved { conversation_id }
            | Self::TypingStarted { conversation_id, .. }
            | Self::TypingStopped { conversation_id, .. } => Some(*conversation_id),
            Self::ConversationUpdated { conversation } => Some(conversation.id),
        }
    }
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection.
    Identify { token: String },

    /// Subscribe this session to a conversation's events. Membership is
    /// checked server-side; a session receives a conversation's events only
    /// after joining it.
    Join { conversation_id: Uuid },

    /// Drop this session's subscription to a conversation.
    Leave { conversation_id: Uuid },

    /// Indicate typing. Renew by sending again before the TTL elapses.
    StartTyping { conversation_id: Uuid },

    /// Explicitly clear the typing indicator.
    StopTyping { conversation_id: Uuid },
}
