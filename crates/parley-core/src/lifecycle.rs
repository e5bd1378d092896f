use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use parley_db::models::{ConversationRow, MessageRow};
use parley_db::{Database, format_ts, reactions};
use parley_gateway::dispatcher::{Dispatcher, Target};
use parley_types::api::ForwardOutcome;
use parley_types::events::GatewayEvent;
use parley_types::models::{
    ConversationKind, ConversationView, DeleteScope, MessageKind, MessageView, PermissionFlags,
    ReactionGroup,
};

use crate::error::{CoreError, CoreResult};
use crate::notify::Notifier;
use crate::policy::{PermissionFlag, Policy};

/// Input to a message create, straight off the request surface.
#[derive(Debug, Clone)]
pub struct CreateMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub attachment_url: Option<String>,
    pub parent_id: Option<i64>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub self_destruct_seconds: Option<u32>,
    pub mentions: Vec<Uuid>,
    pub client_tag: Option<String>,
}

/// Per-conversation commit locks. Holding the lock across persist + publish
/// makes fan-out order equal commit order within a conversation without
/// serializing unrelated conversations behind each other.
#[derive(Default)]
struct CommitLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl CommitLocks {
    async fn acquire(&self, conversation_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(conversation_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// The state machine behind every mutation: validate, authorize, persist,
/// then hand the resulting event to the fan-out router. Persistence
/// failures abort the whole operation; fan-out failures are per-session
/// and never roll anything back.
pub struct Lifecycle {
    db: Arc<Database>,
    policy: Policy,
    dispatcher: Dispatcher,
    notifier: Arc<dyn Notifier>,
    commit_locks: CommitLocks,
}

impl Lifecycle {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            policy: Policy::new(db.clone()),
            db,
            dispatcher,
            notifier,
            commit_locks: CommitLocks::default(),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    // -- Messages --

    pub async fn create_message(&self, req: CreateMessage) -> CoreResult<MessageView> {
        validate_content(req.kind, &req.content, req.attachment_url.as_deref())?;

        let conv = self.policy.require_conversation(&req.conversation_id)?;
        self.policy.require_member(&req.conversation_id, &req.sender_id)?;
        self.check_direct_blocks(&conv, &req.sender_id)?;

        let now = Utc::now();

        if let Some(at) = req.scheduled_at {
            if at <= now {
                return Err(CoreError::Validation("scheduled_at must be in the future"));
            }
        }
        if req.self_destruct_seconds == Some(0) {
            return Err(CoreError::Validation("self_destruct_seconds"));
        }

        if conv.slow_mode_seconds > 0 && !self.policy.bypasses_slow_mode(&conv, &req.sender_id)? {
            let remaining = self
                .policy
                .slow_mode_remaining(&conv, &req.sender_id, now)?;
            if remaining > 0 {
                return Err(CoreError::RateLimited {
                    remaining_seconds: remaining,
                });
            }
        }

        if let Some(parent_id) = req.parent_id {
            let parent = self
                .db
                .get_visible_message(parent_id, &req.sender_id, &format_ts(now))?
                .ok_or(CoreError::NotFound("parent message"))?;
            if parent.conversation_id != req.conversation_id.to_string() {
                return Err(CoreError::Validation("parent message in another conversation"));
            }
        }

        // Mentions are denormalized at write time, restricted to members.
        let members = self.db.member_user_ids(&req.conversation_id)?;
        let member_set: HashSet<Uuid> = members.iter().copied().collect();
        let mut mentions: Vec<Uuid> = Vec::new();
        for user in req.mentions {
            if member_set.contains(&user) && !mentions.contains(&user) {
                mentions.push(user);
            }
        }

        let published = req.scheduled_at.is_none();
        let scheduled_at = req.scheduled_at.map(format_ts);
        let self_destruct_at = req
            .self_destruct_seconds
            .map(|s| format_ts(now + Duration::seconds(s as i64)));

        let _guard = self.commit_locks.acquire(req.conversation_id).await;

        let id = self.db.insert_message(
            &req.conversation_id,
            &req.sender_id,
            req.kind.as_str(),
            &req.content,
            req.attachment_url.as_deref(),
            req.parent_id,
            scheduled_at.as_deref(),
            published,
            self_destruct_at.as_deref(),
            &format_ts(now),
            &mentions,
        )?;

        let row = self
            .db
            .get_message(id)?
            .ok_or_else(|| CoreError::Storage(anyhow::anyhow!("inserted message vanished")))?;
        let view = self.assemble_view(row)?;

        // Scheduled messages stay silent until the sweeper promotes them.
        if published {
            self.dispatcher
                .publish(
                    GatewayEvent::MessageCreated {
                        message: view.clone(),
                        client_tag: req.client_tag,
                    },
                    Target::Conversation(req.conversation_id),
                )
                .await;
            self.notify_offline(&members, &view).await;
        }

        Ok(view)
    }

    pub async fn edit_message(
        &self,
        message_id: i64,
        editor: Uuid,
        content: String,
    ) -> CoreResult<MessageView> {
        let row = self.require_message(message_id)?;
        let conversation_id = parse_conv(&row)?;
        self.policy.require_member(&conversation_id, &editor)?;

        if row.deleted {
            return Err(CoreError::Validation("message deleted"));
        }
        if row.sender_id != editor.to_string() {
            return Err(CoreError::Authorization("only the sender may edit"));
        }
        if content.trim().is_empty() {
            return Err(CoreError::Validation("content"));
        }

        let now = Utc::now();
        let _guard = self.commit_locks.acquire(conversation_id).await;
        self.db.apply_edit(message_id, &content, &format_ts(now))?;

        if row.published {
            self.dispatcher
                .publish(
                    GatewayEvent::MessageEdited {
                        conversation_id,
                        message_id,
                        content: content.clone(),
                        edited_at: now,
                    },
                    Target::Conversation(conversation_id),
                )
                .await;
        }

        let row = self.require_message(message_id)?;
        self.assemble_view(row)
    }

    /// Replace content with a tombstone, keep the row for ordering/history.
    pub async fn delete_for_everyone(&self, message_id: i64, caller: Uuid) -> CoreResult<()> {
        let row = self.require_message(message_id)?;
        let conversation_id = parse_conv(&row)?;
        let conv = self.policy.require_conversation(&conversation_id)?;
        self.policy.require_member(&conversation_id, &caller)?;

        if row.deleted {
            return Err(CoreError::Validation("message already deleted"));
        }
        let own = row.sender_id == caller.to_string();
        if !own {
            self.policy.require_permission(
                &conv,
                &caller,
                PermissionFlag::DeleteMessages,
                "may not delete others' messages",
            )?;
        }

        let _guard = self.commit_locks.acquire(conversation_id).await;
        self.db.tombstone_message(message_id)?;

        self.dispatcher
            .publish(
                GatewayEvent::MessageDeleted {
                    conversation_id,
                    message_id,
                    scope: DeleteScope::Everyone,
                },
                Target::Conversation(conversation_id),
            )
            .await;
        Ok(())
    }

    /// Hide for the caller only. Other members see nothing; the caller's
    /// own other sessions are told so multi-device state converges.
    pub async fn delete_for_me(&self, message_id: i64, caller: Uuid) -> CoreResult<()> {
        let row = self.require_message(message_id)?;
        let conversation_id = parse_conv(&row)?;
        self.policy.require_member(&conversation_id, &caller)?;

        self.db.hide_message(message_id, &caller)?;

        self.dispatcher
            .publish(
                GatewayEvent::MessageDeleted {
                    conversation_id,
                    message_id,
                    scope: DeleteScope::Me,
                },
                Target::User(caller),
            )
            .await;
        Ok(())
    }

    /// Toggle (message, user, emoji); publishes the resulting reaction set.
    pub async fn toggle_reaction(
        &self,
        message_id: i64,
        caller: Uuid,
        emoji: String,
    ) -> CoreResult<Vec<ReactionGroup>> {
        if emoji.is_empty() {
            return Err(CoreError::Validation("emoji"));
        }
        let now = Utc::now();
        let row = self
            .db
            .get_visible_message(message_id, &caller, &format_ts(now))?
            .ok_or(CoreError::NotFound("message"))?;
        let conversation_id = parse_conv(&row)?;
        self.policy.require_member(&conversation_id, &caller)?;

        let _guard = self.commit_locks.acquire(conversation_id).await;
        self.db
            .toggle_reaction(message_id, &caller, &emoji, &format_ts(now))?;
        let groups =
            reactions::group_one(&self.db.reactions_for_message(message_id)?, message_id);

        self.dispatcher
            .publish(
                GatewayEvent::ReactionChanged {
                    conversation_id,
                    message_id,
                    reactions: groups.clone(),
                },
                Target::Conversation(conversation_id),
            )
            .await;
        Ok(groups)
    }

    /// Conversation-global pin toggle. Returns the new pinned state.
    pub async fn toggle_pin(&self, message_id: i64, caller: Uuid) -> CoreResult<bool> {
        let row = self.require_message(message_id)?;
        let conversation_id = parse_conv(&row)?;
        let conv = self.policy.require_conversation(&conversation_id)?;
        self.policy.require_member(&conversation_id, &caller)?;
        self.policy.require_permission(
            &conv,
            &caller,
            PermissionFlag::PinMessages,
            "may not pin messages",
        )?;
        if row.deleted {
            return Err(CoreError::Validation("message deleted"));
        }

        let pinned = !row.pinned;
        let _guard = self.commit_locks.acquire(conversation_id).await;
        if pinned {
            let pinned_at = format_ts(Utc::now());
            self.db
                .set_pin(message_id, true, Some(&caller), Some(&pinned_at))?;
        } else {
            self.db.set_pin(message_id, false, None, None)?;
        }

        self.dispatcher
            .publish(
                GatewayEvent::PinChanged {
                    conversation_id,
                    message_id,
                    pinned,
                    pinned_by: pinned.then_some(caller),
                },
                Target::Conversation(conversation_id),
            )
            .await;
        Ok(pinned)
    }

    /// Copy a message's content (not identity) into each target as a fresh
    /// create, authorized per target. Partial success is reported per
    /// target rather than failing the batch.
    pub async fn forward(
        &self,
        message_id: i64,
        caller: Uuid,
        targets: Vec<Uuid>,
    ) -> CoreResult<Vec<ForwardOutcome>> {
        if targets.is_empty() {
            return Err(CoreError::Validation("conversation_ids"));
        }
        let now = format_ts(Utc::now());
        let source = self
            .db
            .get_visible_message(message_id, &caller, &now)?
            .ok_or(CoreError::NotFound("message"))?;
        let source_conv = parse_conv(&source)?;
        self.policy.require_member(&source_conv, &caller)?;
        if source.deleted {
            return Err(CoreError::Validation("cannot forward a deleted message"));
        }
        let kind = MessageKind::parse(&source.kind).unwrap_or(MessageKind::Text);

        let mut outcomes = Vec::with_capacity(targets.len());
        for target in targets {
            let result = self
                .create_message(CreateMessage {
                    conversation_id: target,
                    sender_id: caller,
                    content: source.content.clone(),
                    kind,
                    attachment_url: source.attachment_url.clone(),
                    parent_id: None,
                    scheduled_at: None,
                    self_destruct_seconds: None,
                    mentions: vec![],
                    client_tag: None,
                })
                .await;
            outcomes.push(match result {
                Ok(message) => ForwardOutcome {
                    conversation_id: target,
                    message: Some(message),
                    error: None,
                },
                Err(e) => ForwardOutcome {
                    conversation_id: target,
                    message: None,
                    error: Some(e.to_string()),
                },
            });
        }
        Ok(outcomes)
    }

    /// Insert-once read marker. Returns false when the pair already existed
    /// (read time never regresses, and no event is re-emitted).
    pub async fn mark_read(
        &self,
        conversation_id: Uuid,
        caller: Uuid,
        message_id: i64,
    ) -> CoreResult<bool> {
        self.policy.require_conversation(&conversation_id)?;
        self.policy.require_member(&conversation_id, &caller)?;
        let now = format_ts(Utc::now());
        let row = self
            .db
            .get_visible_message(message_id, &caller, &now)?
            .ok_or(CoreError::NotFound("message"))?;
        if row.conversation_id != conversation_id.to_string() {
            return Err(CoreError::NotFound("message"));
        }

        let inserted = self.db.insert_read_marker(message_id, &caller, &now)?;
        if inserted {
            self.dispatcher
                .publish(
                    GatewayEvent::ReadMarkerUpdated {
                        conversation_id,
                        message_id,
                        user_id: caller,
                    },
                    Target::Conversation(conversation_id),
                )
                .await;
        }
        Ok(inserted)
    }

    // -- Reads --

    /// One newest-first page of visible messages with reactions, mentions,
    /// and parent previews attached.
    pub fn history_page(
        &self,
        conversation_id: Uuid,
        caller: Uuid,
        page: u32,
        page_size: u32,
    ) -> CoreResult<Vec<MessageView>> {
        self.policy.require_conversation(&conversation_id)?;
        self.policy.require_member(&conversation_id, &caller)?;
        let rows = self.db.visible_page(
            &conversation_id,
            &caller,
            page,
            page_size.min(200),
            &format_ts(Utc::now()),
        )?;
        self.assemble_views(rows)
    }

    pub fn search(
        &self,
        caller: Uuid,
        conversation_id: Option<Uuid>,
        query: &str,
        limit: u32,
    ) -> CoreResult<Vec<MessageView>> {
        if query.trim().is_empty() {
            return Err(CoreError::Validation("query"));
        }
        if let Some(conversation_id) = conversation_id {
            self.policy.require_conversation(&conversation_id)?;
            self.policy.require_member(&conversation_id, &caller)?;
        }
        let rows = self.db.search_messages(
            &caller,
            conversation_id.as_ref(),
            query,
            limit.min(200),
            &format_ts(Utc::now()),
        )?;
        self.assemble_views(rows)
    }

    // -- Conversations & membership --

    pub async fn create_conversation(
        &self,
        creator: Uuid,
        kind: ConversationKind,
        name: Option<String>,
        description: Option<String>,
        members: Vec<Uuid>,
        slow_mode_seconds: u32,
    ) -> CoreResult<ConversationView> {
        let mut others: Vec<Uuid> = Vec::new();
        for user in members {
            if user != creator && !others.contains(&user) {
                others.push(user);
            }
        }

        match kind {
            ConversationKind::Direct => {
                if others.len() != 1 {
                    return Err(CoreError::Validation("direct conversations have exactly two members"));
                }
                if self.policy.is_blocked_pair(&creator, &others[0])? {
                    return Err(CoreError::Authorization("blocked"));
                }
            }
            ConversationKind::Group => {
                if name.as_deref().map(str::trim).unwrap_or_default().is_empty() {
                    return Err(CoreError::Validation("group name"));
                }
            }
        }

        let id = Uuid::new_v4();
        let mut all_members = vec![creator];
        all_members.extend(others);
        self.db.create_conversation(
            &id,
            kind.as_str(),
            name.as_deref(),
            description.as_deref(),
            &creator,
            slow_mode_seconds,
            &all_members,
        )?;

        let view = self.conversation_view(&id)?;
        for user in &all_members {
            self.dispatcher
                .publish(
                    GatewayEvent::ConversationUpdated {
                        conversation: view.clone(),
                    },
                    Target::User(*user),
                )
                .await;
        }
        Ok(view)
    }

    pub fn get_conversation(&self, conversation_id: Uuid, caller: Uuid) -> CoreResult<ConversationView> {
        self.policy.require_conversation(&conversation_id)?;
        self.policy.require_member(&conversation_id, &caller)?;
        self.conversation_view(&conversation_id)
    }

    pub fn conversations_for(&self, caller: Uuid) -> CoreResult<Vec<(ConversationView, bool, bool)>> {
        let rows = self.db.conversations_for_user(&caller)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.id.parse().unwrap_or_default();
            let member = self
                .db
                .get_member(&id, &caller)?
                .ok_or(CoreError::NotFound("member"))?;
            let members = self.db.conversation_members(&id)?;
            out.push((row.into_view(members), member.pinned, member.archived));
        }
        Ok(out)
    }

    pub async fn add_member(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        user: Uuid,
    ) -> CoreResult<()> {
        let conv = self.policy.require_conversation(&conversation_id)?;
        if conv.kind != ConversationKind::Group.as_str() {
            return Err(CoreError::Validation("direct conversations are fixed-size"));
        }
        self.policy.require_member(&conversation_id, &actor)?;
        self.policy.require_permission(
            &conv,
            &actor,
            PermissionFlag::AddMembers,
            "may not add members",
        )?;
        if self.db.is_member(&conversation_id, &user)? {
            return Err(CoreError::Validation("already a member"));
        }

        self.db.add_member(&conversation_id, &user)?;
        let member = self
            .db
            .get_member(&conversation_id, &user)?
            .ok_or(CoreError::NotFound("member"))?;
        let creator: Uuid = conv.creator_id.parse().unwrap_or_default();

        self.dispatcher
            .publish(
                GatewayEvent::MemberAdded {
                    conversation_id,
                    member: member.into_view(creator),
                },
                Target::Conversation(conversation_id),
            )
            .await;
        // The new member's sessions are not joined yet; hand them the view.
        self.dispatcher
            .publish(
                GatewayEvent::ConversationUpdated {
                    conversation: self.conversation_view(&conversation_id)?,
                },
                Target::User(user),
            )
            .await;
        Ok(())
    }

    /// Remove a member (or leave, when actor == user). The removed user's
    /// live sessions are evicted after the event is queued, so they see
    /// `MemberRemoved` and then nothing further for this conversation.
    pub async fn remove_member(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        user: Uuid,
    ) -> CoreResult<()> {
        let conv = self.policy.require_conversation(&conversation_id)?;
        self.policy.require_member(&conversation_id, &actor)?;
        if actor != user {
            self.policy.require_permission(
                &conv,
                &actor,
                PermissionFlag::RemoveMembers,
                "may not remove members",
            )?;
        }
        if conv.creator_id == user.to_string() {
            return Err(CoreError::Authorization("the creator cannot be removed"));
        }

        if !self.db.remove_member(&conversation_id, &user)? {
            return Err(CoreError::NotFound("member"));
        }

        let event = GatewayEvent::MemberRemoved {
            conversation_id,
            user_id: user,
        };
        self.dispatcher
            .publish(event.clone(), Target::Conversation(conversation_id))
            .await;
        self.dispatcher.publish(event, Target::User(user)).await;
        self.dispatcher
            .registry()
            .evict_user(conversation_id, user)
            .await;
        Ok(())
    }

    /// Atomic creator handoff: the old creator's implicit rights end the
    /// instant the new id is committed.
    pub async fn transfer_creator(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        new_creator: Uuid,
    ) -> CoreResult<()> {
        let conv = self.policy.require_conversation(&conversation_id)?;
        if conv.creator_id != actor.to_string() {
            return Err(CoreError::Authorization("only the creator may transfer the role"));
        }
        if new_creator == actor {
            return Err(CoreError::Validation("already the creator"));
        }
        if !self.db.is_member(&conversation_id, &new_creator)? {
            return Err(CoreError::NotFound("member"));
        }

        self.db.set_creator(&conversation_id, &new_creator)?;

        self.dispatcher
            .publish(
                GatewayEvent::AdminTransferred {
                    conversation_id,
                    old_creator_id: actor,
                    new_creator_id: new_creator,
                },
                Target::Conversation(conversation_id),
            )
            .await;
        Ok(())
    }

    pub async fn set_permissions(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        user: Uuid,
        flags: PermissionFlags,
    ) -> CoreResult<()> {
        let conv = self.policy.require_conversation(&conversation_id)?;
        self.policy.require_member(&conversation_id, &actor)?;
        self.policy.require_permission(
            &conv,
            &actor,
            PermissionFlag::ChangePermissions,
            "may not change permissions",
        )?;
        if conv.creator_id == user.to_string() {
            return Err(CoreError::Validation("creator permissions are implicit"));
        }
        if !self.db.is_member(&conversation_id, &user)? {
            return Err(CoreError::NotFound("member"));
        }

        self.db.set_member_flags(&conversation_id, &user, &flags)?;

        let event = GatewayEvent::PermissionsChanged {
            conversation_id,
            user_id: user,
            flags,
        };
        self.dispatcher
            .publish(event.clone(), Target::Conversation(conversation_id))
            .await;
        self.dispatcher.publish(event, Target::User(user)).await;
        Ok(())
    }

    /// Group info / slow-mode update. `None` fields are left unchanged.
    pub async fn update_info(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        name: Option<String>,
        description: Option<String>,
        slow_mode_seconds: Option<u32>,
    ) -> CoreResult<ConversationView> {
        let conv = self.policy.require_conversation(&conversation_id)?;
        self.policy.require_member(&conversation_id, &actor)?;
        self.policy.require_permission(
            &conv,
            &actor,
            PermissionFlag::ChangeInfo,
            "may not change conversation info",
        )?;
        if conv.kind == ConversationKind::Direct.as_str()
            && (name.is_some() || description.is_some())
        {
            return Err(CoreError::Validation("direct conversations have no info"));
        }

        if name.is_some() || description.is_some() {
            let new_name = name.or(conv.name);
            let new_description = description.or(conv.description);
            self.db.update_conversation_info(
                &conversation_id,
                new_name.as_deref(),
                new_description.as_deref(),
            )?;
        }
        if let Some(seconds) = slow_mode_seconds {
            self.db.set_slow_mode(&conversation_id, seconds)?;
        }

        let view = self.conversation_view(&conversation_id)?;
        self.dispatcher
            .publish(
                GatewayEvent::ConversationUpdated {
                    conversation: view.clone(),
                },
                Target::Conversation(conversation_id),
            )
            .await;
        Ok(view)
    }

    /// Creator-only soft removal of a group for all members.
    pub async fn remove_conversation(&self, conversation_id: Uuid, actor: Uuid) -> CoreResult<()> {
        let conv = self.policy.require_conversation(&conversation_id)?;
        if conv.kind != ConversationKind::Group.as_str() {
            return Err(CoreError::Validation("direct conversations cannot be removed"));
        }
        if conv.creator_id != actor.to_string() {
            return Err(CoreError::Authorization("only the creator may remove the group"));
        }

        self.db.mark_conversation_removed(&conversation_id)?;

        self.dispatcher
            .publish(
                GatewayEvent::ConversationRemoved { conversation_id },
                Target::Conversation(conversation_id),
            )
            .await;
        self.dispatcher
            .registry()
            .drop_conversation(conversation_id)
            .await;
        Ok(())
    }

    /// Per-member pin/archive display state; private, so no event beyond
    /// the caller's own record.
    pub fn set_member_display(
        &self,
        conversation_id: Uuid,
        caller: Uuid,
        pinned: bool,
        archived: bool,
    ) -> CoreResult<()> {
        self.policy.require_conversation(&conversation_id)?;
        self.policy.require_member(&conversation_id, &caller)?;
        self.db
            .set_member_display(&conversation_id, &caller, pinned, archived)?;
        Ok(())
    }

    // -- Sweeper entry points --

    /// Promote due scheduled messages and announce each exactly once.
    pub async fn promote_scheduled(&self, now: DateTime<Utc>) -> CoreResult<usize> {
        let promoted = self.db.promote_due(&format_ts(now))?;
        let count = promoted.len();
        for row in promoted {
            let conversation_id = parse_conv(&row)?;
            let members = self.db.member_user_ids(&conversation_id)?;
            let view = self.assemble_view(row)?;
            let _guard = self.commit_locks.acquire(conversation_id).await;
            self.dispatcher
                .publish(
                    GatewayEvent::MessageCreated {
                        message: view.clone(),
                        client_tag: None,
                    },
                    Target::Conversation(conversation_id),
                )
                .await;
            self.notify_offline(&members, &view).await;
        }
        Ok(count)
    }

    /// Purge expired self-destruct messages and announce each exactly once.
    pub async fn purge_self_destructed(&self, now: DateTime<Utc>) -> CoreResult<usize> {
        let purged = self.db.purge_expired(&format_ts(now))?;
        let count = purged.len();
        for (message_id, conversation_id) in purged {
            let conversation_id: Uuid = conversation_id
                .parse()
                .map_err(|_| CoreError::Storage(anyhow::anyhow!("corrupt conversation id")))?;
            let _guard = self.commit_locks.acquire(conversation_id).await;
            self.dispatcher
                .publish(
                    GatewayEvent::MessageDeleted {
                        conversation_id,
                        message_id,
                        scope: DeleteScope::Everyone,
                    },
                    Target::Conversation(conversation_id),
                )
                .await;
        }
        Ok(count)
    }

    // -- Internal --

    fn require_message(&self, id: i64) -> CoreResult<MessageRow> {
        self.db.get_message(id)?.ok_or(CoreError::NotFound("message"))
    }

    fn conversation_view(&self, id: &Uuid) -> CoreResult<ConversationView> {
        let conv = self
            .db
            .get_conversation(id)?
            .ok_or(CoreError::NotFound("conversation"))?;
        let members = self.db.conversation_members(id)?;
        Ok(conv.into_view(members))
    }

    fn assemble_view(&self, row: MessageRow) -> CoreResult<MessageView> {
        let reaction_rows = self.db.reactions_for_message(row.id)?;
        let groups = reactions::group_one(&reaction_rows, row.id);
        let mentions = self.db.mentions_for_message(row.id)?;
        let parent = match row.parent_id {
            Some(parent_id) => self.db.parent_preview(parent_id)?,
            None => None,
        };
        Ok(row.into_view(groups, mentions, parent))
    }

    fn assemble_views(&self, rows: Vec<MessageRow>) -> CoreResult<Vec<MessageView>> {
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut reaction_map = reactions::group_by_message(&self.db.reactions_for_messages(&ids)?);
        let mut mention_map: HashMap<i64, Vec<Uuid>> = HashMap::new();
        for (id, user) in self.db.mentions_for_messages(&ids)? {
            mention_map.entry(id).or_default().push(user);
        }

        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            let parent = match row.parent_id {
                Some(parent_id) => self.db.parent_preview(parent_id)?,
                None => None,
            };
            let id = row.id;
            views.push(row.into_view(
                reaction_map.remove(&id).unwrap_or_default(),
                mention_map.remove(&id).unwrap_or_default(),
                parent,
            ));
        }
        Ok(views)
    }

    fn check_direct_blocks(&self, conv: &ConversationRow, sender: &Uuid) -> CoreResult<()> {
        if conv.kind != ConversationKind::Direct.as_str() {
            return Ok(());
        }
        let id: Uuid = conv.id.parse().unwrap_or_default();
        for member in self.db.member_user_ids(&id)? {
            if member != *sender && self.policy.is_blocked_pair(sender, &member)? {
                return Err(CoreError::Authorization("blocked"));
            }
        }
        Ok(())
    }

    async fn notify_offline(&self, members: &[Uuid], message: &MessageView) {
        let registry = self.dispatcher.registry();
        for user in members {
            if *user == message.sender_id || registry.has_live_session(*user).await {
                continue;
            }
            if message.mentions.contains(user) {
                self.notifier.mentioned(*user, message);
            } else {
                self.notifier.message_created(*user, message);
            }
        }
    }
}

fn parse_conv(row: &MessageRow) -> CoreResult<Uuid> {
    row.conversation_id
        .parse()
        .map_err(|_| CoreError::Storage(anyhow::anyhow!("corrupt conversation id")))
}

fn validate_content(
    kind: MessageKind,
    content: &str,
    attachment_url: Option<&str>,
) -> CoreResult<()> {
    match kind {
        MessageKind::Text | MessageKind::Poll | MessageKind::System => {
            if content.trim().is_empty() {
                return Err(CoreError::Validation("content"));
            }
        }
        MessageKind::Image | MessageKind::File | MessageKind::Voice => {
            if attachment_url.unwrap_or_default().is_empty() {
                return Err(CoreError::Validation("attachment_url"));
            }
        }
    }
    Ok(())
}
