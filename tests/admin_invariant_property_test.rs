//! Random roster operations never leave a populated group without an admin.

use std::sync::Arc;

use chat_core::config::{MessagingLimits, StorageDeadlines};
use chat_core::error::AppError;
use chat_core::models::{ConversationKind, ParticipantRole};
use chat_core::repository::MemoryConversationRepository;
use chat_core::services::{ConversationService, CreateConversation, InMemoryUserDirectory};
use proptest::prelude::*;
use uuid::Uuid;

const POOL: usize = 6;

#[derive(Debug, Clone)]
enum RosterOp {
    Add { actor: usize, target: usize },
    Remove { actor: usize, target: usize },
    Promote { actor: usize, target: usize },
    Demote { actor: usize, target: usize },
    Leave { user: usize },
}

fn roster_op() -> impl Strategy<Value = RosterOp> {
    let idx = || 0..POOL;
    prop_oneof![
        (idx(), idx()).prop_map(|(actor, target)| RosterOp::Add { actor, target }),
        (idx(), idx()).prop_map(|(actor, target)| RosterOp::Remove { actor, target }),
        (idx(), idx()).prop_map(|(actor, target)| RosterOp::Promote { actor, target }),
        (idx(), idx()).prop_map(|(actor, target)| RosterOp::Demote { actor, target }),
        idx().prop_map(|user| RosterOp::Leave { user }),
    ]
}

async fn apply(
    service: &ConversationService,
    id: Uuid,
    users: &[Uuid],
    op: &RosterOp,
) -> Result<(), AppError> {
    match *op {
        RosterOp::Add { actor, target } => service
            .add_participants(id, users[actor], vec![users[target]])
            .await
            .map(|_| ()),
        RosterOp::Remove { actor, target } => service
            .remove_participant(id, users[actor], users[target])
            .await
            .map(|_| ()),
        RosterOp::Promote { actor, target } => service
            .update_role(id, users[actor], users[target], ParticipantRole::Admin)
            .await
            .map(|_| ()),
        RosterOp::Demote { actor, target } => service
            .update_role(id, users[actor], users[target], ParticipantRole::Member)
            .await
            .map(|_| ()),
        RosterOp::Leave { user } => service.leave(id, users[user]).await.map(|_| ()),
    }
}

/// Empties the group down to its creator, then has the creator demote themselves.
fn lone_admin_prefix() -> Vec<RosterOp> {
    vec![
        RosterOp::Leave { user: 1 },
        RosterOp::Leave { user: 2 },
        RosterOp::Demote { actor: 0, target: 0 },
    ]
}

fn roster_ops() -> impl Strategy<Value = Vec<RosterOp>> {
    (any::<bool>(), prop::collection::vec(roster_op(), 1..40)).prop_map(|(seeded, ops)| {
        if seeded {
            lone_admin_prefix().into_iter().chain(ops).collect()
        } else {
            ops
        }
    })
}

fn check_sequence(ops: &[RosterOp]) -> Result<(), TestCaseError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let service = ConversationService::new(
            Arc::new(MemoryConversationRepository::new()),
            Arc::new(InMemoryUserDirectory::open()),
            StorageDeadlines::default(),
            MessagingLimits::default(),
        );
        let users: Vec<Uuid> = (0..POOL).map(|_| Uuid::new_v4()).collect();
        let (conversation, _) = service
            .create(
                users[0],
                CreateConversation {
                    kind: ConversationKind::Group,
                    participant_ids: vec![users[1], users[2]],
                    title: Some("property".into()),
                    description: None,
                },
            )
            .await
            .unwrap();

        for op in ops {
            let _ = apply(&service, conversation.id, &users, op).await;

            match service.load(conversation.id).await {
                Ok(current) => {
                    prop_assert!(!current.participants.is_empty());
                    prop_assert!(
                        current.admin_count() >= 1,
                        "no admin left after {:?}: {:?}",
                        op,
                        current.participants
                    );
                }
                // Emptied and soft-deleted; nothing more can change.
                Err(AppError::NotFound) => break,
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }
        Ok(())
    })
}

#[test]
fn lone_admin_self_demotion_keeps_admin() {
    check_sequence(&lone_admin_prefix()).unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn populated_group_always_has_an_admin(ops in roster_ops()) {
        check_sequence(&ops)?;
    }
}
