use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_db::models::{ConversationRow, MemberRow};
use parley_db::{Database, parse_ts};

use crate::error::{CoreError, CoreResult};

/// The named permission flags a member can hold. The creator is checked
/// first in every authorization path and overrides all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionFlag {
    ChangeInfo,
    AddMembers,
    RemoveMembers,
    DeleteMessages,
    PinMessages,
    ChangePermissions,
}

/// Membership, permission, block, and slow-mode checks over the store.
#[derive(Clone)]
pub struct Policy {
    db: Arc<Database>,
}

impl Policy {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// The conversation, rejecting unknown and soft-removed ids alike.
    pub fn require_conversation(&self, id: &Uuid) -> CoreResult<ConversationRow> {
        let conv = self
            .db
            .get_conversation(id)?
            .ok_or(CoreError::NotFound("conversation"))?;
        if conv.removed {
            return Err(CoreError::NotFound("conversation"));
        }
        Ok(conv)
    }

    pub fn require_member(&self, conversation_id: &Uuid, user_id: &Uuid) -> CoreResult<MemberRow> {
        self.db
            .get_member(conversation_id, user_id)?
            .ok_or(CoreError::Authorization("not a member"))
    }

    pub fn is_member(&self, conversation_id: &Uuid, user_id: &Uuid) -> CoreResult<bool> {
        Ok(self.db.is_member(conversation_id, user_id)?)
    }

    /// Effective permission: creator first, then the member's named flag.
    pub fn has_permission(
        &self,
        conversation: &ConversationRow,
        user_id: &Uuid,
        flag: PermissionFlag,
    ) -> CoreResult<bool> {
        if conversation.creator_id == user_id.to_string() {
            return Ok(true);
        }
        let Some(member) = self.db.get_member(&conversation_id(conversation), user_id)? else {
            return Ok(false);
        };
        let flags = member.flags;
        Ok(match flag {
            PermissionFlag::ChangeInfo => flags.change_info,
            PermissionFlag::AddMembers => flags.add_members,
            PermissionFlag::RemoveMembers => flags.remove_members,
            PermissionFlag::DeleteMessages => flags.delete_messages,
            PermissionFlag::PinMessages => flags.pin_messages,
            PermissionFlag::ChangePermissions => flags.change_permissions,
        })
    }

    pub fn require_permission(
        &self,
        conversation: &ConversationRow,
        user_id: &Uuid,
        flag: PermissionFlag,
        what: &'static str,
    ) -> CoreResult<()> {
        if self.has_permission(conversation, user_id, flag)? {
            Ok(())
        } else {
            Err(CoreError::Authorization(what))
        }
    }

    pub fn is_blocked_pair(&self, a: &Uuid, b: &Uuid) -> CoreResult<bool> {
        Ok(self.db.is_blocked_pair(a, b)?)
    }

    /// Slow mode is bypassed for the creator and for change-info holders
    /// (group admins).
    pub fn bypasses_slow_mode(
        &self,
        conversation: &ConversationRow,
        user_id: &Uuid,
    ) -> CoreResult<bool> {
        self.has_permission(conversation, user_id, PermissionFlag::ChangeInfo)
    }

    /// Whole seconds until the user may send again; zero when clear.
    /// Measured from the user's most recent successful create in the
    /// conversation — advisory, never a queue.
    pub fn slow_mode_remaining(
        &self,
        conversation: &ConversationRow,
        user_id: &Uuid,
        now: DateTime<Utc>,
    ) -> CoreResult<i64> {
        if conversation.slow_mode_seconds == 0 {
            return Ok(0);
        }
        let Some(last) = self
            .db
            .last_create_time(&conversation_id(conversation), user_id)?
        else {
            return Ok(0);
        };
        let elapsed = now.signed_duration_since(parse_ts(&last)).num_seconds();
        Ok((conversation.slow_mode_seconds as i64 - elapsed).max(0))
    }
}

fn conversation_id(conversation: &ConversationRow) -> Uuid {
    conversation.id.parse().unwrap_or_default()
}
