//! End-to-end flows through the messaging facade on in-memory stores.
//!
//! Run: cargo test --test conversation_flow_test

mod common;

use chat_core::error::AppError;
use chat_core::models::{ParticipantRole, Page, ReactionAction, ReactionKind};
use chat_core::services::{EditMessage, NotificationEventType};
use common::{direct_with, group_of, reply, text, TestApp};
use uuid::Uuid;

#[tokio::test]
async fn direct_message_is_counted_then_read() {
    let app = TestApp::new();
    let messaging = &app.state.messaging;
    let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());

    let (conv, created) = messaging.create_conversation(u1, direct_with(u2)).await.unwrap();
    assert!(created);

    let sent = messaging.send_message(u1, conv.id, text("hi")).await.unwrap();
    let seen_by_u2 = messaging.get_conversation(conv.id, u2).await.unwrap();
    assert_eq!(seen_by_u2.unread_count, 1);
    let seen_by_u1 = messaging.get_conversation(conv.id, u1).await.unwrap();
    assert_eq!(seen_by_u1.unread_count, 0);

    let outcome = messaging.mark_read(conv.id, u2, sent.message.id).await.unwrap();
    assert_eq!(outcome.message_ids, vec![sent.message.id]);

    let seen_by_u2 = messaging.get_conversation(conv.id, u2).await.unwrap();
    assert_eq!(seen_by_u2.unread_count, 0);
    let message = messaging.get_message(sent.message.id, u2).await.unwrap();
    assert!(message.message.has_read(u2));
    assert!(!message.message.has_read(u1));
}

#[tokio::test]
async fn concurrent_admin_departures_keep_one_admin() {
    let app = TestApp::new();
    let messaging = &app.state.messaging;
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let (conv, _) = messaging
        .create_conversation(a, group_of(&[b, c], "team"))
        .await
        .unwrap();
    messaging
        .update_role(conv.id, a, b, ParticipantRole::Admin)
        .await
        .unwrap();

    let (left_a, left_b) = tokio::join!(
        messaging.leave_conversation(conv.id, a),
        messaging.leave_conversation(conv.id, b),
    );

    let results = [left_a, left_b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(AppError::InvariantViolation(_)))));

    let view = messaging.get_conversation(conv.id, c).await.unwrap();
    assert_eq!(view.participants.len(), 2);
    assert_eq!(
        view.participants
            .iter()
            .filter(|p| p.role == ParticipantRole::Admin)
            .count(),
        1
    );
}

#[tokio::test]
async fn concurrent_demotions_keep_one_admin() {
    let app = TestApp::new();
    let messaging = &app.state.messaging;
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let (conv, _) = messaging
        .create_conversation(a, group_of(&[b, c], "team"))
        .await
        .unwrap();
    messaging
        .update_role(conv.id, a, b, ParticipantRole::Admin)
        .await
        .unwrap();

    let (demote_a, demote_b) = tokio::join!(
        messaging.update_role(conv.id, a, a, ParticipantRole::Member),
        messaging.update_role(conv.id, b, b, ParticipantRole::Member),
    );

    let results = [demote_a.is_ok(), demote_b.is_ok()];
    assert_eq!(results.iter().filter(|ok| **ok).count(), 1);

    let view = messaging.get_conversation(conv.id, c).await.unwrap();
    assert_eq!(
        view.participants
            .iter()
            .filter(|p| p.role == ParticipantRole::Admin)
            .count(),
        1
    );
}

#[tokio::test]
async fn lone_admin_cannot_demote_self_after_others_leave() {
    let app = TestApp::new();
    let messaging = &app.state.messaging;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let (conv, _) = messaging
        .create_conversation(a, group_of(&[b], "team"))
        .await
        .unwrap();
    messaging.leave_conversation(conv.id, b).await.unwrap();

    let err = messaging
        .update_role(conv.id, a, a, ParticipantRole::Member)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvariantViolation(_)));

    let view = messaging.get_conversation(conv.id, a).await.unwrap();
    assert_eq!(view.role, Some(ParticipantRole::Admin));
}

#[tokio::test]
async fn direct_pair_is_created_once() {
    let app = TestApp::new();
    let messaging = &app.state.messaging;
    let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());

    let (first, created) = messaging.create_conversation(u1, direct_with(u2)).await.unwrap();
    assert!(created);
    let (second, created) = messaging.create_conversation(u2, direct_with(u1)).await.unwrap();
    assert!(!created);
    assert_eq!(first.id, second.id);

    let listed = messaging.list_conversations(u1, Page::default()).await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn sole_admin_cannot_leave_until_someone_is_promoted() {
    let app = TestApp::new();
    let messaging = &app.state.messaging;
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let (conv, _) = messaging
        .create_conversation(a, group_of(&[b, c], "team"))
        .await
        .unwrap();

    let removed = messaging.remove_participant(conv.id, a, b).await.unwrap();
    assert!(!removed.conversation_deleted);

    let err = messaging.leave_conversation(conv.id, a).await.unwrap_err();
    assert!(matches!(err, AppError::InvariantViolation(_)));

    messaging
        .update_role(conv.id, a, c, ParticipantRole::Admin)
        .await
        .unwrap();
    messaging.leave_conversation(conv.id, a).await.unwrap();

    let view = messaging.get_conversation(conv.id, c).await.unwrap();
    assert_eq!(view.participants.len(), 1);
    assert_eq!(view.role, Some(ParticipantRole::Admin));
    assert_eq!(
        messaging.get_conversation(conv.id, a).await.unwrap_err(),
        AppError::NotFound
    );
}

#[tokio::test]
async fn last_participant_leaving_deletes_the_group() {
    let app = TestApp::new();
    let messaging = &app.state.messaging;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let (conv, _) = messaging
        .create_conversation(a, group_of(&[b], "pair"))
        .await
        .unwrap();
    messaging.leave_conversation(conv.id, b).await.unwrap();
    let outcome = messaging.leave_conversation(conv.id, a).await.unwrap();
    assert!(outcome.conversation_deleted);

    let listed = messaging.list_conversations(a, Page::default()).await.unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn edit_rules_and_deleted_message_noop() {
    let app = TestApp::new();
    let messaging = &app.state.messaging;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let (conv, _) = messaging
        .create_conversation(a, group_of(&[b], "edits"))
        .await
        .unwrap();
    let sent = messaging.send_message(a, conv.id, text("draft")).await.unwrap();

    let edited = messaging
        .edit_message(
            sent.message.id,
            a,
            EditMessage {
                content: Some("final".into()),
                media: None,
            },
        )
        .await
        .unwrap();
    assert!(edited.message.is_edited);
    assert_eq!(edited.message.content, "final");

    let err = messaging
        .edit_message(
            sent.message.id,
            b,
            EditMessage {
                content: Some("hijack".into()),
                media: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied(_)));

    let deleted = messaging.delete_message(sent.message.id, a).await.unwrap();
    assert!(deleted.message.is_deleted());

    let after = messaging
        .edit_message(
            sent.message.id,
            a,
            EditMessage {
                content: Some("again".into()),
                media: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(after.message, deleted.message);
}

#[tokio::test]
async fn group_admin_may_delete_others_messages() {
    let app = TestApp::new();
    let messaging = &app.state.messaging;
    let (admin, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (conv, _) = messaging
        .create_conversation(admin, group_of(&[b, c], "mods"))
        .await
        .unwrap();
    let sent = messaging.send_message(b, conv.id, text("spam")).await.unwrap();

    let err = messaging.delete_message(sent.message.id, c).await.unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied(_)));

    let deleted = messaging.delete_message(sent.message.id, admin).await.unwrap();
    assert!(deleted.message.is_deleted());

    // Second delete is a no-op that returns the same state.
    let again = messaging.delete_message(sent.message.id, admin).await.unwrap();
    assert_eq!(again.message, deleted.message);
}

#[tokio::test]
async fn concurrent_likes_are_all_counted() {
    let app = TestApp::new();
    let messaging = app.state.messaging.clone();
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (conv, _) = messaging
        .create_conversation(a, group_of(&[b, c], "likes"))
        .await
        .unwrap();
    let sent = messaging.send_message(a, conv.id, text("vote")).await.unwrap();
    let id = sent.message.id;

    let (m1, m2) = (messaging.clone(), messaging.clone());
    let first = tokio::spawn(async move {
        m1.react(id, b, ReactionKind::Like, ReactionAction::Add).await
    });
    let second = tokio::spawn(async move {
        m2.react(id, c, ReactionKind::Like, ReactionAction::Add).await
    });
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let view = messaging.get_message(id, a).await.unwrap();
    assert_eq!(view.message.reactions_count[&ReactionKind::Like], 2);
}

#[tokio::test]
async fn reacting_to_deleted_message_is_not_found() {
    let app = TestApp::new();
    let messaging = &app.state.messaging;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let (conv, _) = messaging.create_conversation(a, direct_with(b)).await.unwrap();
    let sent = messaging.send_message(a, conv.id, text("gone")).await.unwrap();
    messaging.delete_message(sent.message.id, a).await.unwrap();

    let err = messaging
        .react(sent.message.id, b, ReactionKind::Love, ReactionAction::Add)
        .await
        .unwrap_err();
    assert_eq!(err, AppError::NotFound);
}

#[tokio::test]
async fn send_then_list_returns_newest_with_reply() {
    let app = TestApp::new();
    let messaging = &app.state.messaging;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let (conv, _) = messaging.create_conversation(a, direct_with(b)).await.unwrap();

    let parent = messaging.send_message(a, conv.id, text("question?")).await.unwrap();
    let answer = messaging
        .send_message(b, conv.id, reply("answer", parent.message.id))
        .await
        .unwrap();

    let page = messaging
        .list_messages(conv.id, a, Page::default())
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].message.id, answer.message.id);
    let reply_to = page[0].reply_to.as_ref().expect("reply summary");
    assert_eq!(reply_to.id, parent.message.id);
    assert_eq!(reply_to.preview, "question?");
    assert!(page[0].message.sequence_number > page[1].message.sequence_number);
}

#[tokio::test]
async fn reply_must_stay_in_conversation() {
    let app = TestApp::new();
    let messaging = &app.state.messaging;
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (first, _) = messaging.create_conversation(a, direct_with(b)).await.unwrap();
    let (second, _) = messaging.create_conversation(a, direct_with(c)).await.unwrap();
    let elsewhere = messaging.send_message(a, first.id, text("one")).await.unwrap();

    let err = messaging
        .send_message(a, second.id, reply("two", elsewhere.message.id))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn mark_read_twice_changes_nothing_more() {
    let app = TestApp::new();
    let messaging = &app.state.messaging;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let (conv, _) = messaging.create_conversation(a, direct_with(b)).await.unwrap();
    messaging.send_message(a, conv.id, text("1")).await.unwrap();
    let upto = messaging.send_message(a, conv.id, text("2")).await.unwrap();

    let first = messaging.mark_read(conv.id, b, upto.message.id).await.unwrap();
    assert_eq!(first.message_ids.len(), 2);
    let after_first = messaging
        .list_messages(conv.id, b, Page::default())
        .await
        .unwrap();

    let second = messaging.mark_read(conv.id, b, upto.message.id).await.unwrap();
    assert!(second.message_ids.is_empty());
    let after_second = messaging
        .list_messages(conv.id, b, Page::default())
        .await
        .unwrap();

    for (x, y) in after_first.iter().zip(after_second.iter()) {
        assert_eq!(x.message.read_by, y.message.read_by);
    }
    assert_eq!(
        messaging.get_conversation(conv.id, b).await.unwrap().unread_count,
        0
    );
}

#[tokio::test]
async fn receipts_survive_later_operations() {
    let app = TestApp::new();
    let messaging = &app.state.messaging;
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (conv, _) = messaging
        .create_conversation(a, group_of(&[b, c], "receipts"))
        .await
        .unwrap();
    let first = messaging.send_message(a, conv.id, text("first")).await.unwrap();
    messaging.mark_read(conv.id, b, first.message.id).await.unwrap();

    let second = messaging.send_message(c, conv.id, text("second")).await.unwrap();
    messaging
        .edit_message(
            first.message.id,
            a,
            EditMessage {
                content: Some("first, edited".into()),
                media: None,
            },
        )
        .await
        .unwrap();
    messaging
        .react(first.message.id, c, ReactionKind::Wow, ReactionAction::Add)
        .await
        .unwrap();
    // Reading up to an earlier message again does not retract anything.
    messaging.mark_read(conv.id, b, first.message.id).await.unwrap();
    messaging.mark_read(conv.id, b, second.message.id).await.unwrap();

    let view = messaging.get_message(first.message.id, a).await.unwrap();
    assert!(view.message.has_read(b));
    assert_eq!(view.message.read_by.len(), 1);
}

#[tokio::test]
async fn muted_participant_unread_is_not_bumped() {
    let app = TestApp::new();
    let messaging = &app.state.messaging;
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (conv, _) = messaging
        .create_conversation(a, group_of(&[b, c], "quiet"))
        .await
        .unwrap();
    messaging.set_muted(conv.id, c, true, None).await.unwrap();

    messaging.send_message(a, conv.id, text("ping")).await.unwrap();

    let counts_b = messaging.unread_counts(b).await.unwrap();
    let counts_c = messaging.unread_counts(c).await.unwrap();
    assert_eq!(counts_b.get(&conv.id).copied().unwrap_or(0), 1);
    assert_eq!(counts_c.get(&conv.id).copied().unwrap_or(0), 0);
}

#[tokio::test]
async fn outsiders_see_nothing() {
    let app = TestApp::new();
    let messaging = &app.state.messaging;
    let (a, b, outsider) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (conv, _) = messaging.create_conversation(a, direct_with(b)).await.unwrap();
    let sent = messaging.send_message(a, conv.id, text("secret")).await.unwrap();

    assert_eq!(
        messaging.get_conversation(conv.id, outsider).await.unwrap_err(),
        AppError::NotFound
    );
    assert_eq!(
        messaging.get_message(sent.message.id, outsider).await.unwrap_err(),
        AppError::NotFound
    );
    assert_eq!(
        messaging
            .send_message(outsider, conv.id, text("hello?"))
            .await
            .unwrap_err(),
        AppError::NotFound
    );
    let found = messaging
        .search_messages(outsider, "secret", None, Page::default())
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn direct_roster_is_fixed() {
    let app = TestApp::new();
    let messaging = &app.state.messaging;
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (conv, _) = messaging.create_conversation(a, direct_with(b)).await.unwrap();

    let add = messaging.add_participants(conv.id, a, vec![c]).await.unwrap_err();
    assert!(matches!(add, AppError::BadRequest(_)));
    let leave = messaging.leave_conversation(conv.id, b).await.unwrap_err();
    assert!(matches!(leave, AppError::BadRequest(_)));
}

#[tokio::test]
async fn notifications_follow_sends_and_invites() {
    let mut app = TestApp::new();
    let messaging = app.state.messaging.clone();
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (conv, _) = messaging
        .create_conversation(a, group_of(&[b], "notify"))
        .await
        .unwrap();
    messaging.add_participants(conv.id, a, vec![c]).await.unwrap();
    messaging.send_message(a, conv.id, text("hello all")).await.unwrap();

    app.drain().await;
    let sent = app.notifier.sent.lock().await;

    let invites: Vec<Uuid> = sent
        .iter()
        .filter(|n| n.event_type == NotificationEventType::ConversationInvite)
        .map(|n| n.recipient_id)
        .collect();
    assert_eq!(invites.len(), 2);
    assert!(invites.contains(&b) && invites.contains(&c));

    let messages: Vec<_> = sent
        .iter()
        .filter(|n| n.event_type == NotificationEventType::Message)
        .collect();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|n| n.recipient_id != a && n.body == "hello all"));
}
