use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use parley_core::CoreError;
use parley_core::lifecycle::{CreateMessage, Lifecycle};
use parley_core::notify::LogNotifier;
use parley_core::sweeper::Sweeper;
use parley_db::Database;
use parley_gateway::dispatcher::Dispatcher;
use parley_gateway::registry::Registry;
use parley_types::events::GatewayEvent;
use parley_types::models::{ConversationKind, DeleteScope, MessageKind, PermissionFlags};

fn harness() -> (Arc<Lifecycle>, Registry, Arc<Database>) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let registry = Registry::new();
    let dispatcher = Dispatcher::new(registry.clone());
    let lifecycle = Arc::new(Lifecycle::new(db.clone(), dispatcher, Arc::new(LogNotifier)));
    (lifecycle, registry, db)
}

async fn group(lifecycle: &Lifecycle, creator: Uuid, others: &[Uuid], slow_mode: u32) -> Uuid {
    lifecycle
        .create_conversation(
            creator,
            ConversationKind::Group,
            Some("test group".into()),
            None,
            others.to_vec(),
            slow_mode,
        )
        .await
        .unwrap()
        .id
}

async fn direct(lifecycle: &Lifecycle, a: Uuid, b: Uuid) -> Uuid {
    lifecycle
        .create_conversation(a, ConversationKind::Direct, None, None, vec![b], 0)
        .await
        .unwrap()
        .id
}

fn text(conversation_id: Uuid, sender_id: Uuid, content: &str) -> CreateMessage {
    CreateMessage {
        conversation_id,
        sender_id,
        content: content.to_string(),
        kind: MessageKind::Text,
        attachment_url: None,
        parent_id: None,
        scheduled_at: None,
        self_destruct_seconds: None,
        mentions: vec![],
        client_tag: None,
    }
}

/// Open a live session for a user and join it to a conversation.
async fn session(
    registry: &Registry,
    user: Uuid,
    conversation: Uuid,
) -> (Uuid, mpsc::Receiver<GatewayEvent>) {
    let (session_id, rx) = registry.register(user).await;
    assert!(registry.join(session_id, conversation).await);
    (session_id, rx)
}

fn drain(rx: &mut mpsc::Receiver<GatewayEvent>) -> Vec<GatewayEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn creates_are_assigned_strictly_increasing_order() {
    let (lifecycle, _registry, _db) = harness();
    let alice = Uuid::new_v4();
    let conv = group(&lifecycle, alice, &[Uuid::new_v4()], 0).await;

    let first = lifecycle.create_message(text(conv, alice, "one")).await.unwrap();
    let second = lifecycle.create_message(text(conv, alice, "two")).await.unwrap();
    assert!(second.id > first.id);

    // Newest-first page.
    let page = lifecycle.history_page(conv, alice, 0, 50).unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].id, second.id);
    assert_eq!(page[1].id, first.id);
}

#[tokio::test]
async fn reaction_toggle_round_trips_to_no_reaction() {
    let (lifecycle, _registry, _db) = harness();
    let alice = Uuid::new_v4();
    let conv = group(&lifecycle, alice, &[], 0).await;
    let message = lifecycle.create_message(text(conv, alice, "react to me")).await.unwrap();

    let after_add = lifecycle
        .toggle_reaction(message.id, alice, "👍".into())
        .await
        .unwrap();
    assert_eq!(after_add.len(), 1);
    assert_eq!(after_add[0].count, 1);

    let after_remove = lifecycle
        .toggle_reaction(message.id, alice, "👍".into())
        .await
        .unwrap();
    assert!(after_remove.is_empty());
}

#[tokio::test]
async fn delete_for_me_never_affects_the_other_member() {
    let (lifecycle, _registry, _db) = harness();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let conv = direct(&lifecycle, alice, bob).await;
    let message = lifecycle.create_message(text(conv, alice, "only alice hides this")).await.unwrap();

    lifecycle.delete_for_me(message.id, alice).await.unwrap();

    let alice_page = lifecycle.history_page(conv, alice, 0, 50).unwrap();
    assert!(alice_page.iter().all(|m| m.id != message.id));

    let bob_page = lifecycle.history_page(conv, bob, 0, 50).unwrap();
    let bobs_copy = bob_page.iter().find(|m| m.id == message.id).unwrap();
    assert_eq!(bobs_copy.content, "only alice hides this");
    assert!(!bobs_copy.deleted);
}

#[tokio::test]
async fn scheduled_message_is_silent_until_promoted_exactly_once() {
    let (lifecycle, registry, _db) = harness();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let conv = group(&lifecycle, alice, &[bob], 0).await;
    let (_sid, mut rx) = session(&registry, bob, conv).await;

    let mut req = text(conv, alice, "from the future");
    req.scheduled_at = Some(Utc::now() + Duration::hours(1));
    let message = lifecycle.create_message(req).await.unwrap();

    // No fan-out and no history visibility before promotion.
    assert!(drain(&mut rx).is_empty());
    let page = lifecycle.history_page(conv, bob, 0, 50).unwrap();
    assert!(page.iter().all(|m| m.id != message.id));

    let sweeper = Sweeper::new(lifecycle.clone(), StdDuration::from_secs(5));
    let stats = sweeper.sweep_once(Utc::now() + Duration::hours(2)).await.unwrap();
    assert_eq!(stats.promoted, 1);

    let events = drain(&mut rx);
    let created: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, GatewayEvent::MessageCreated { .. }))
        .collect();
    assert_eq!(created.len(), 1);

    // Idempotent: a second sweep over the same instant announces nothing.
    let stats = sweeper.sweep_once(Utc::now() + Duration::hours(2)).await.unwrap();
    assert_eq!(stats.promoted, 0);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn self_destruct_clears_content_for_everyone_after_expiry() {
    let (lifecycle, registry, db) = harness();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let conv = group(&lifecycle, alice, &[bob], 0).await;
    let (_sid, mut rx) = session(&registry, bob, conv).await;

    let mut req = text(conv, alice, "burn after reading");
    req.self_destruct_seconds = Some(5);
    let message = lifecycle.create_message(req).await.unwrap();

    // Fetchable during its lifetime.
    let page = lifecycle.history_page(conv, bob, 0, 50).unwrap();
    assert!(page.iter().any(|m| m.id == message.id));

    // Past expiry the store refuses it even before the sweeper runs,
    // including for members who never opened the conversation.
    let later = parley_db::format_ts(Utc::now() + Duration::seconds(10));
    assert!(db.get_visible_message(message.id, &bob, &later).unwrap().is_none());

    drain(&mut rx);
    let sweeper = Sweeper::new(lifecycle.clone(), StdDuration::from_secs(5));
    let stats = sweeper.sweep_once(Utc::now() + Duration::seconds(10)).await.unwrap();
    assert_eq!(stats.purged, 1);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        GatewayEvent::MessageDeleted { message_id, scope: DeleteScope::Everyone, .. }
            if *message_id == message.id
    )));

    // Content is gone permanently.
    let row = db.get_message(message.id).unwrap().unwrap();
    assert!(row.deleted);
    assert!(row.content.is_empty());

    // Purging twice produces no duplicate events.
    let stats = sweeper.sweep_once(Utc::now() + Duration::seconds(10)).await.unwrap();
    assert_eq!(stats.purged, 0);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn hello_react_delete_scenario_reaches_both_members() {
    let (lifecycle, registry, _db) = harness();
    let u1 = Uuid::new_v4();
    let u2 = Uuid::new_v4();
    let conv = direct(&lifecycle, u1, u2).await;
    let (_s1, mut rx1) = session(&registry, u1, conv).await;
    let (_s2, mut rx2) = session(&registry, u2, conv).await;

    let sent = lifecycle.create_message(text(conv, u1, "hello")).await.unwrap();

    for rx in [&mut rx1, &mut rx2] {
        let events = drain(rx);
        let matched = events.iter().any(|e| matches!(
            e,
            GatewayEvent::MessageCreated { message, .. }
                if message.id == sent.id && message.content == "hello"
        ));
        assert!(matched, "both members see the identical create");
    }

    lifecycle.toggle_reaction(sent.id, u2, "👍".into()).await.unwrap();
    for rx in [&mut rx1, &mut rx2] {
        let events = drain(rx);
        let matched = events.iter().any(|e| match e {
            GatewayEvent::ReactionChanged { message_id, reactions, .. } => {
                *message_id == sent.id
                    && reactions.len() == 1
                    && reactions[0].count == 1
                    && reactions[0].user_ids == vec![u2]
            }
            _ => false,
        });
        assert!(matched, "both members see the single reaction from u2");
    }

    lifecycle.delete_for_everyone(sent.id, u1).await.unwrap();
    for rx in [&mut rx1, &mut rx2] {
        let events = drain(rx);
        assert!(events.iter().any(|e| matches!(
            e,
            GatewayEvent::MessageDeleted { message_id, scope: DeleteScope::Everyone, .. }
                if *message_id == sent.id
        )));
    }

    let page = lifecycle.history_page(conv, u2, 0, 50).unwrap();
    let tombstone = page.iter().find(|m| m.id == sent.id).unwrap();
    assert!(tombstone.deleted);
    assert_eq!(tombstone.content, "");
}

#[tokio::test]
async fn slow_mode_rejects_with_remaining_seconds_hint() {
    let (lifecycle, _registry, _db) = harness();
    let creator = Uuid::new_v4();
    let u3 = Uuid::new_v4();
    let conv = group(&lifecycle, creator, &[u3], 30).await;

    lifecycle.create_message(text(conv, u3, "first")).await.unwrap();
    let err = lifecycle.create_message(text(conv, u3, "second")).await.unwrap_err();

    match err {
        CoreError::RateLimited { remaining_seconds } => {
            assert!(
                (25..=30).contains(&remaining_seconds),
                "remaining {} out of range",
                remaining_seconds
            );
        }
        other => panic!("expected RateLimited, got {:?}", other),
    }
}

#[tokio::test]
async fn slow_mode_is_bypassed_for_the_creator() {
    let (lifecycle, _registry, _db) = harness();
    let creator = Uuid::new_v4();
    let conv = group(&lifecycle, creator, &[Uuid::new_v4()], 30).await;

    lifecycle.create_message(text(conv, creator, "first")).await.unwrap();
    lifecycle.create_message(text(conv, creator, "second")).await.unwrap();
}

#[tokio::test]
async fn blocked_pair_cannot_message_directly() {
    let (lifecycle, _registry, db) = harness();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let conv = direct(&lifecycle, alice, bob).await;

    db.set_block(&bob, &alice).unwrap();

    let err = lifecycle.create_message(text(conv, alice, "hello?")).await.unwrap_err();
    assert!(matches!(err, CoreError::Authorization(_)));

    // The block applies in both directions.
    let err = lifecycle.create_message(text(conv, bob, "hi")).await.unwrap_err();
    assert!(matches!(err, CoreError::Authorization(_)));
}

#[tokio::test]
async fn removed_member_stops_receiving_events() {
    let (lifecycle, registry, _db) = harness();
    let admin = Uuid::new_v4();
    let u4 = Uuid::new_v4();
    let conv = group(&lifecycle, admin, &[u4], 0).await;
    let (_sid, mut rx) = session(&registry, u4, conv).await;
    let (_aid, mut admin_rx) = session(&registry, admin, conv).await;

    lifecycle.remove_member(conv, admin, u4).await.unwrap();

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        GatewayEvent::MemberRemoved { user_id, .. } if *user_id == u4
    )));

    // Without any explicit leave, the removed member's session is out.
    lifecycle.create_message(text(conv, admin, "after removal")).await.unwrap();
    assert!(drain(&mut rx).is_empty());
    assert!(!drain(&mut admin_rx).is_empty());
}

#[tokio::test]
async fn only_the_sender_may_edit() {
    let (lifecycle, _registry, _db) = harness();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let conv = group(&lifecycle, alice, &[bob], 0).await;
    let message = lifecycle.create_message(text(conv, alice, "draft")).await.unwrap();

    let err = lifecycle.edit_message(message.id, bob, "hijacked".into()).await.unwrap_err();
    assert!(matches!(err, CoreError::Authorization(_)));

    let edited = lifecycle.edit_message(message.id, alice, "final".into()).await.unwrap();
    assert_eq!(edited.content, "final");
    assert!(edited.edited_at.is_some());
}

#[tokio::test]
async fn delete_others_requires_the_permission_flag() {
    let (lifecycle, _registry, _db) = harness();
    let creator = Uuid::new_v4();
    let sender = Uuid::new_v4();
    let moderator = Uuid::new_v4();
    let conv = group(&lifecycle, creator, &[sender, moderator], 0).await;
    let message = lifecycle.create_message(text(conv, sender, "target")).await.unwrap();

    let err = lifecycle.delete_for_everyone(message.id, moderator).await.unwrap_err();
    assert!(matches!(err, CoreError::Authorization(_)));

    let mut flags = PermissionFlags::none();
    flags.delete_messages = true;
    lifecycle
        .set_permissions(conv, creator, moderator, flags)
        .await
        .unwrap();

    lifecycle.delete_for_everyone(message.id, moderator).await.unwrap();
}

#[tokio::test]
async fn pinning_requires_permission_or_creator() {
    let (lifecycle, _registry, _db) = harness();
    let creator = Uuid::new_v4();
    let member = Uuid::new_v4();
    let conv = group(&lifecycle, creator, &[member], 0).await;
    let message = lifecycle.create_message(text(conv, member, "pin me")).await.unwrap();

    let err = lifecycle.toggle_pin(message.id, member).await.unwrap_err();
    assert!(matches!(err, CoreError::Authorization(_)));

    assert!(lifecycle.toggle_pin(message.id, creator).await.unwrap());
    assert!(!lifecycle.toggle_pin(message.id, creator).await.unwrap());
}

#[tokio::test]
async fn transfer_revokes_the_old_creators_implicit_rights() {
    let (lifecycle, _registry, _db) = harness();
    let old_creator = Uuid::new_v4();
    let new_creator = Uuid::new_v4();
    let conv = group(&lifecycle, old_creator, &[new_creator], 0).await;
    let message = lifecycle
        .create_message(text(conv, new_creator, "anchor"))
        .await
        .unwrap();

    lifecycle.transfer_creator(conv, old_creator, new_creator).await.unwrap();

    // The old creator now has only their explicit flags: none.
    let err = lifecycle.toggle_pin(message.id, old_creator).await.unwrap_err();
    assert!(matches!(err, CoreError::Authorization(_)));
    assert!(lifecycle.toggle_pin(message.id, new_creator).await.unwrap());
}

#[tokio::test]
async fn forward_copies_content_with_per_target_authorization() {
    let (lifecycle, _registry, _db) = harness();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let source = group(&lifecycle, alice, &[bob], 0).await;
    let mine = group(&lifecycle, alice, &[], 0).await;
    let not_mine = group(&lifecycle, bob, &[], 0).await;

    let message = lifecycle.create_message(text(source, alice, "pass it on")).await.unwrap();
    let outcomes = lifecycle
        .forward(message.id, alice, vec![mine, not_mine])
        .await
        .unwrap();

    let ok = outcomes.iter().find(|o| o.conversation_id == mine).unwrap();
    let forwarded = ok.message.as_ref().unwrap();
    assert_eq!(forwarded.content, "pass it on");
    assert_ne!(forwarded.id, message.id);

    let denied = outcomes.iter().find(|o| o.conversation_id == not_mine).unwrap();
    assert!(denied.message.is_none());
    assert!(denied.error.is_some());
}

#[tokio::test]
async fn read_markers_are_recorded_once() {
    let (lifecycle, registry, _db) = harness();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let conv = direct(&lifecycle, alice, bob).await;
    let message = lifecycle.create_message(text(conv, alice, "read me")).await.unwrap();
    let (_sid, mut rx) = session(&registry, alice, conv).await;

    assert!(lifecycle.mark_read(conv, bob, message.id).await.unwrap());
    assert!(!lifecycle.mark_read(conv, bob, message.id).await.unwrap());

    let events = drain(&mut rx);
    let markers: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, GatewayEvent::ReadMarkerUpdated { .. }))
        .collect();
    assert_eq!(markers.len(), 1);
}

#[tokio::test]
async fn membership_changes_emit_events_and_respect_flags() {
    let (lifecycle, registry, _db) = harness();
    let creator = Uuid::new_v4();
    let member = Uuid::new_v4();
    let newcomer = Uuid::new_v4();
    let conv = group(&lifecycle, creator, &[member], 0).await;
    let (_sid, mut rx) = session(&registry, creator, conv).await;

    let err = lifecycle.add_member(conv, member, newcomer).await.unwrap_err();
    assert!(matches!(err, CoreError::Authorization(_)));

    let mut flags = PermissionFlags::none();
    flags.add_members = true;
    lifecycle.set_permissions(conv, creator, member, flags).await.unwrap();
    lifecycle.add_member(conv, member, newcomer).await.unwrap();

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        GatewayEvent::PermissionsChanged { user_id, .. } if *user_id == member
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        GatewayEvent::MemberAdded { member, .. } if member.user_id == newcomer
    )));

    // Members may always remove themselves.
    lifecycle.remove_member(conv, newcomer, newcomer).await.unwrap();
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        GatewayEvent::MemberRemoved { user_id, .. } if *user_id == newcomer
    )));
}

#[tokio::test]
async fn group_removal_is_creator_only_and_soft() {
    let (lifecycle, registry, _db) = harness();
    let creator = Uuid::new_v4();
    let member = Uuid::new_v4();
    let conv = group(&lifecycle, creator, &[member], 0).await;
    let (_sid, mut rx) = session(&registry, member, conv).await;

    let err = lifecycle.remove_conversation(conv, member).await.unwrap_err();
    assert!(matches!(err, CoreError::Authorization(_)));

    lifecycle.remove_conversation(conv, creator).await.unwrap();
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        GatewayEvent::ConversationRemoved { conversation_id } if *conversation_id == conv
    )));

    // Gone for everyone afterwards.
    let err = lifecycle.create_message(text(conv, creator, "too late")).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
    assert!(lifecycle.conversations_for(member).unwrap().is_empty());
}

#[tokio::test]
async fn scheduled_in_the_past_and_empty_content_are_rejected() {
    let (lifecycle, _registry, _db) = harness();
    let alice = Uuid::new_v4();
    let conv = group(&lifecycle, alice, &[], 0).await;

    let err = lifecycle.create_message(text(conv, alice, "   ")).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let mut req = text(conv, alice, "late");
    req.scheduled_at = Some(Utc::now() - Duration::hours(1));
    let err = lifecycle.create_message(req).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let err = lifecycle
        .create_message(text(conv, Uuid::new_v4(), "stranger"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Authorization(_)));
}

#[tokio::test]
async fn search_is_scoped_to_visible_messages() {
    let (lifecycle, _registry, _db) = harness();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let ours = group(&lifecycle, alice, &[bob], 0).await;
    let theirs = group(&lifecycle, bob, &[], 0).await;

    lifecycle.create_message(text(ours, alice, "the quick brown fox")).await.unwrap();
    lifecycle.create_message(text(theirs, bob, "quick but private")).await.unwrap();

    // Global scope covers only the requester's conversations.
    let hits = lifecycle.search(alice, None, "quick", 50).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].conversation_id, ours);

    // Tombstones drop out of search.
    lifecycle.delete_for_everyone(hits[0].id, alice).await.unwrap();
    assert!(lifecycle.search(alice, Some(ours), "quick", 50).unwrap().is_empty());
}

#[tokio::test]
async fn mentions_are_restricted_to_members() {
    let (lifecycle, _registry, _db) = harness();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let outsider = Uuid::new_v4();
    let conv = group(&lifecycle, alice, &[bob], 0).await;

    let mut req = text(conv, alice, "hey @bob");
    req.mentions = vec![bob, outsider, bob];
    let message = lifecycle.create_message(req).await.unwrap();

    assert_eq!(message.mentions, vec![bob]);
}

#[tokio::test]
async fn replies_carry_a_parent_preview() {
    let (lifecycle, _registry, _db) = harness();
    let alice = Uuid::new_v4();
    let conv = group(&lifecycle, alice, &[], 0).await;
    let parent = lifecycle.create_message(text(conv, alice, "original")).await.unwrap();

    let mut req = text(conv, alice, "reply");
    req.parent_id = Some(parent.id);
    let reply = lifecycle.create_message(req).await.unwrap();

    let preview = reply.parent.unwrap();
    assert_eq!(preview.id, parent.id);
    assert_eq!(preview.content, "original");

    // Replying across conversations is rejected.
    let elsewhere = group(&lifecycle, alice, &[], 0).await;
    let mut req = text(elsewhere, alice, "cross reply");
    req.parent_id = Some(parent.id);
    let err = lifecycle.create_message(req).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}
