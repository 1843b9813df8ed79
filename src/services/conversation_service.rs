use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{MessagingLimits, StorageDeadlines};
use crate::error::{AppError, AppResult};
use crate::middleware::guards::{self, ConversationMember};
use crate::models::{
    Conversation, ConversationKind, ConversationView, LastMessageRef, Lifecycle, Message, Page,
    Participant, ParticipantRole, UserSummary,
};
use crate::repository::{with_deadline, AddStatus, ConversationRepository, RosterWrite};
use crate::services::user_directory::{summaries_or_empty, UserDirectory};

/// Attempts for a roster write before giving up with `Conflict`.
const ROSTER_WRITE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct CreateConversation {
    pub kind: ConversationKind,
    pub participant_ids: Vec<Uuid>,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantOutcome {
    pub user_id: Uuid,
    pub status: AddStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddParticipantsReport {
    pub conversation_id: Uuid,
    pub results: Vec<ParticipantOutcome>,
}

impl AddParticipantsReport {
    pub fn added(&self) -> Vec<Uuid> {
        self.results
            .iter()
            .filter(|r| r.status == AddStatus::Added)
            .map(|r| r.user_id)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemovalOutcome {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    /// The roster became empty and the conversation was soft-deleted.
    pub conversation_deleted: bool,
}

/// Conversation store operations with their authorization and invariants.
pub struct ConversationService {
    repo: Arc<dyn ConversationRepository>,
    users: Arc<dyn UserDirectory>,
    deadlines: StorageDeadlines,
    limits: MessagingLimits,
}

impl ConversationService {
    pub fn new(
        repo: Arc<dyn ConversationRepository>,
        users: Arc<dyn UserDirectory>,
        deadlines: StorageDeadlines,
        limits: MessagingLimits,
    ) -> Self {
        Self {
            repo,
            users,
            deadlines,
            limits,
        }
    }

    /// Active conversation by id.
    pub async fn load(&self, id: Uuid) -> AppResult<Conversation> {
        let conversation = with_deadline(self.deadlines.lookup, "load conversation", self.repo.get(id))
            .await?
            .ok_or(AppError::NotFound)?;
        if conversation.is_deleted() {
            return Err(AppError::NotFound);
        }
        Ok(conversation)
    }

    /// Active conversation the user participates in; anything else is `NotFound`.
    pub async fn load_for(&self, id: Uuid, user_id: Uuid) -> AppResult<Conversation> {
        let conversation = self.load(id).await?;
        if !guards::is_participant(&conversation, user_id) {
            return Err(AppError::NotFound);
        }
        Ok(conversation)
    }

    fn check_text(&self, field: &str, value: &Option<String>, max: usize) -> AppResult<()> {
        match value {
            Some(v) if v.trim().is_empty() => Err(AppError::BadRequest(format!(
                "{field} must not be blank"
            ))),
            Some(v) if v.chars().count() > max => Err(AppError::BadRequest(format!(
                "{field} exceeds {max} characters"
            ))),
            _ => Ok(()),
        }
    }

    /// Creates a conversation with the creator as admin. For a direct pair that
    /// already exists, the existing conversation is returned with `created = false`.
    pub async fn create(
        &self,
        creator: Uuid,
        request: CreateConversation,
    ) -> AppResult<(Conversation, bool)> {
        if request.participant_ids.len() > self.limits.create_max_participants {
            return Err(AppError::BadRequest(format!(
                "at most {} participants per request",
                self.limits.create_max_participants
            )));
        }

        let mut seen = HashSet::new();
        let others: Vec<Uuid> = request
            .participant_ids
            .iter()
            .copied()
            .filter(|id| *id != creator && seen.insert(*id))
            .collect();

        if others.is_empty() {
            return Err(AppError::BadRequest(
                "at least one other participant is required".into(),
            ));
        }

        match request.kind {
            ConversationKind::Direct => {
                if others.len() != 1 {
                    return Err(AppError::BadRequest(
                        "a direct conversation has exactly two participants".into(),
                    ));
                }
                if request.title.is_some() || request.description.is_some() {
                    return Err(AppError::BadRequest(
                        "direct conversations have no title or description".into(),
                    ));
                }
            }
            ConversationKind::Group => {
                if others.len() + 1 > self.limits.group_max_participants {
                    return Err(AppError::BadRequest(format!(
                        "a group holds at most {} participants",
                        self.limits.group_max_participants
                    )));
                }
                self.check_text("title", &request.title, self.limits.max_title_length)?;
                self.check_text(
                    "description",
                    &request.description,
                    self.limits.max_description_length,
                )?;
            }
        }

        let known = with_deadline(
            self.deadlines.lookup,
            "lookup participants",
            self.users.lookup_many(&others),
        )
        .await?;
        let unknown: Vec<String> = others
            .iter()
            .filter(|id| !known.contains_key(*id))
            .map(Uuid::to_string)
            .collect();
        if !unknown.is_empty() {
            return Err(AppError::BadRequest(format!(
                "unknown participant(s): {}",
                unknown.join(", ")
            )));
        }

        let now = Utc::now();
        let mut participants = Vec::with_capacity(others.len() + 1);
        participants.push(Participant::new(creator, ParticipantRole::Admin, now));
        participants.extend(
            others
                .iter()
                .map(|id| Participant::new(*id, ParticipantRole::Member, now)),
        );

        let candidate = Conversation {
            id: Uuid::new_v4(),
            kind: request.kind,
            title: request.title,
            description: request.description,
            participants,
            last_message: None,
            message_count: 0,
            created_by: creator,
            created_at: now,
            updated_at: now,
            lifecycle: Lifecycle::Active,
            roster_version: 0,
        };
        let candidate_id = candidate.id;

        let stored = with_deadline(
            self.deadlines.write,
            "create conversation",
            self.repo.insert(candidate),
        )
        .await?;
        let created = stored.id == candidate_id;

        if created {
            tracing::info!(
                conversation_id = %stored.id,
                kind = stored.kind.to_db(),
                participants = stored.participants.len(),
                "conversation created"
            );
        } else {
            tracing::debug!(conversation_id = %stored.id, "direct conversation already exists");
        }
        Ok((stored, created))
    }

    pub async fn list(&self, user_id: Uuid, page: Page) -> AppResult<Vec<Conversation>> {
        with_deadline(
            self.deadlines.write,
            "list conversations",
            self.repo.list_for_user(user_id, page.normalized()),
        )
        .await
    }

    pub async fn ids_for_user(&self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        with_deadline(
            self.deadlines.lookup,
            "conversation ids",
            self.repo.ids_for_user(user_id),
        )
        .await
    }

    pub async fn search(&self, user_id: Uuid, query: &str, page: Page) -> AppResult<Vec<Conversation>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::BadRequest("search query must not be empty".into()));
        }
        with_deadline(
            self.deadlines.scan,
            "search conversations",
            self.repo.search_for_user(user_id, query, page.normalized()),
        )
        .await
    }

    /// Group admins only.
    pub async fn update_details(
        &self,
        id: Uuid,
        actor: Uuid,
        title: Option<String>,
        description: Option<String>,
    ) -> AppResult<Conversation> {
        let conversation = self.load_for(id, actor).await?;
        let member = ConversationMember::verify(&conversation, actor)?;
        member.require_group()?;
        member.require_admin()?;

        if title.is_none() && description.is_none() {
            return Err(AppError::BadRequest("nothing to update".into()));
        }
        self.check_text("title", &title, self.limits.max_title_length)?;
        self.check_text("description", &description, self.limits.max_description_length)?;

        with_deadline(
            self.deadlines.write,
            "update conversation",
            self.repo.update_details(id, title, description, Utc::now()),
        )
        .await?;
        self.load(id).await
    }

    /// Adds a batch of users to a group. Every id gets its own outcome.
    pub async fn add_participants(
        &self,
        id: Uuid,
        actor: Uuid,
        user_ids: Vec<Uuid>,
    ) -> AppResult<AddParticipantsReport> {
        if user_ids.is_empty() {
            return Err(AppError::BadRequest("no participants given".into()));
        }
        if user_ids.len() > self.limits.participant_batch_limit {
            return Err(AppError::BadRequest(format!(
                "at most {} participants per request",
                self.limits.participant_batch_limit
            )));
        }

        let conversation = self.load_for(id, actor).await?;
        let member = ConversationMember::verify(&conversation, actor)?;
        member.require_group()?;
        member.require_admin()?;

        let mut seen = HashSet::new();
        let unique: Vec<Uuid> = user_ids.into_iter().filter(|u| seen.insert(*u)).collect();

        let known = with_deadline(
            self.deadlines.lookup,
            "lookup participants",
            self.users.lookup_many(&unique),
        )
        .await?;

        let now = Utc::now();
        let candidates: Vec<Participant> = unique
            .iter()
            .filter(|u| known.contains_key(*u))
            .map(|u| Participant::new(*u, ParticipantRole::Member, now))
            .collect();

        let written: HashMap<Uuid, AddStatus> = if candidates.is_empty() {
            HashMap::new()
        } else {
            with_deadline(
                self.deadlines.write,
                "add participants",
                self.repo
                    .add_participants(id, candidates, self.limits.group_max_participants),
            )
            .await?
            .into_iter()
            .collect()
        };

        let results = unique
            .into_iter()
            .map(|user_id| ParticipantOutcome {
                user_id,
                status: written
                    .get(&user_id)
                    .copied()
                    .unwrap_or(AddStatus::UnknownUser),
            })
            .collect();

        let report = AddParticipantsReport {
            conversation_id: id,
            results,
        };
        tracing::info!(
            conversation_id = %id,
            actor = %actor,
            added = report.added().len(),
            "participants added"
        );
        Ok(report)
    }

    /// Removes `target` from a group. `actor == target` is a leave. Re-reads and
    /// retries when the roster moved underneath.
    pub async fn remove_participant(
        &self,
        id: Uuid,
        actor: Uuid,
        target: Uuid,
    ) -> AppResult<RemovalOutcome> {
        for attempt in 1..=ROSTER_WRITE_ATTEMPTS {
            let conversation = self.load_for(id, actor).await?;
            let member = ConversationMember::verify(&conversation, actor)?;
            member.require_group()?;
            if target != actor {
                member.require_admin()?;
            }
            if conversation.participant(target).is_none() {
                return Err(AppError::NotFound);
            }
            guards::assert_admin_invariant_holds(&conversation, target)?;

            let write = with_deadline(
                self.deadlines.write,
                "remove participant",
                self.repo
                    .remove_participant(id, target, conversation.roster_version),
            )
            .await?;

            match write {
                RosterWrite::Applied => {
                    let emptied = conversation.participants.len() == 1;
                    if emptied {
                        with_deadline(
                            self.deadlines.write,
                            "delete conversation",
                            self.repo.soft_delete(id, Utc::now()),
                        )
                        .await?;
                    }
                    tracing::info!(
                        conversation_id = %id,
                        actor = %actor,
                        target = %target,
                        conversation_deleted = emptied,
                        "participant removed"
                    );
                    return Ok(RemovalOutcome {
                        conversation_id: id,
                        user_id: target,
                        conversation_deleted: emptied,
                    });
                }
                RosterWrite::Stale => {
                    tracing::debug!(conversation_id = %id, attempt, "roster changed, retrying removal");
                }
                RosterWrite::Missing => return Err(AppError::NotFound),
            }
        }
        Err(AppError::Conflict(
            "roster changed concurrently, retry the request".into(),
        ))
    }

    pub async fn leave(&self, id: Uuid, user_id: Uuid) -> AppResult<RemovalOutcome> {
        self.remove_participant(id, user_id, user_id).await
    }

    /// Promotes or demotes a group participant. Setting the current role is a no-op.
    pub async fn update_role(
        &self,
        id: Uuid,
        actor: Uuid,
        target: Uuid,
        role: ParticipantRole,
    ) -> AppResult<Conversation> {
        for attempt in 1..=ROSTER_WRITE_ATTEMPTS {
            let conversation = self.load_for(id, actor).await?;
            let member = ConversationMember::verify(&conversation, actor)?;
            member.require_group()?;
            member.require_admin()?;

            let current = conversation
                .participant(target)
                .map(|p| p.role)
                .ok_or(AppError::NotFound)?;
            if current == role {
                return Ok(conversation);
            }
            if role == ParticipantRole::Member {
                guards::assert_admin_remains_after_demotion(&conversation, target)?;
            }

            let write = with_deadline(
                self.deadlines.write,
                "update role",
                self.repo
                    .update_role(id, target, role, conversation.roster_version),
            )
            .await?;

            match write {
                RosterWrite::Applied => {
                    tracing::info!(
                        conversation_id = %id,
                        actor = %actor,
                        target = %target,
                        role = %role,
                        "participant role updated"
                    );
                    return self.load(id).await;
                }
                RosterWrite::Stale => {
                    tracing::debug!(conversation_id = %id, attempt, "roster changed, retrying role update");
                }
                RosterWrite::Missing => return Err(AppError::NotFound),
            }
        }
        Err(AppError::Conflict(
            "roster changed concurrently, retry the request".into(),
        ))
    }

    pub async fn set_muted(
        &self,
        id: Uuid,
        user_id: Uuid,
        muted: bool,
        until: Option<DateTime<Utc>>,
    ) -> AppResult<Conversation> {
        self.load_for(id, user_id).await?;
        let until = if muted { until } else { None };
        let updated = with_deadline(
            self.deadlines.write,
            "set muted",
            self.repo.set_muted(id, user_id, muted, until),
        )
        .await?;
        if !updated {
            return Err(AppError::NotFound);
        }
        self.load(id).await
    }

    pub async fn set_archived(&self, id: Uuid, user_id: Uuid, archived: bool) -> AppResult<Conversation> {
        self.load_for(id, user_id).await?;
        let updated = with_deadline(
            self.deadlines.write,
            "set archived",
            self.repo.set_archived(id, user_id, archived),
        )
        .await?;
        if !updated {
            return Err(AppError::NotFound);
        }
        self.load(id).await
    }

    /// Moves the conversation's message pointer forward and bumps unread counters
    /// of every participant except the sender and those currently muted.
    /// Returns the recipients that were counted.
    pub async fn record_message(
        &self,
        conversation: &Conversation,
        message: &Message,
    ) -> AppResult<Vec<Uuid>> {
        let now = Utc::now();
        let recipients: Vec<Uuid> = conversation
            .participants
            .iter()
            .filter(|p| p.user_id != message.sender_id && !p.is_muted_at(now))
            .map(|p| p.user_id)
            .collect();

        let last = LastMessageRef {
            message_id: message.id,
            sender_id: message.sender_id,
            preview: message.preview(),
            sent_at: message.sent_at,
            sequence_number: message.sequence_number,
        };

        with_deadline(
            self.deadlines.write,
            "record message",
            self.repo.record_message(conversation.id, &last, &recipients),
        )
        .await?;
        Ok(recipients)
    }

    pub async fn reset_unread(
        &self,
        id: Uuid,
        user_id: Uuid,
        upto_message_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        with_deadline(
            self.deadlines.write,
            "reset unread",
            self.repo.reset_unread(id, user_id, upto_message_id, at),
        )
        .await
    }

    pub async fn unread_counts(&self, user_id: Uuid) -> AppResult<HashMap<Uuid, i64>> {
        with_deadline(
            self.deadlines.lookup,
            "unread counts",
            self.repo.unread_counts(user_id),
        )
        .await
    }

    pub async fn user_summaries(&self, ids: &[Uuid]) -> HashMap<Uuid, UserSummary> {
        match tokio::time::timeout(
            self.deadlines.lookup,
            summaries_or_empty(self.users.as_ref(), ids),
        )
        .await
        {
            Ok(found) => found,
            Err(_) => {
                tracing::warn!(count = ids.len(), "user enrichment timed out");
                HashMap::new()
            }
        }
    }

    pub async fn view(&self, conversation: &Conversation, viewer: Uuid) -> ConversationView {
        let users = self.user_summaries(&conversation.participant_ids()).await;
        conversation.to_view(viewer, &users)
    }

    /// One directory lookup for a whole page of conversations.
    pub async fn views(&self, conversations: &[Conversation], viewer: Uuid) -> Vec<ConversationView> {
        let ids: Vec<Uuid> = conversations
            .iter()
            .flat_map(|c| c.participants.iter().map(|p| p.user_id))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let users = self.user_summaries(&ids).await;
        conversations
            .iter()
            .map(|c| c.to_view(viewer, &users))
            .collect()
    }
}
