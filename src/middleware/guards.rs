//! Authorization guards.
//!
//! Every check works on a roster the caller already loaded; nothing here does I/O.
//! Non-participants get `NotFound` so that conversation ids do not leak.

use std::future::Future;
use std::pin::Pin;

use actix_middleware::UserId;
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Conversation, Participant, ParticipantRole};

/// Represents an authenticated user extracted from JWT claims
#[derive(Debug, Clone, Copy)]
pub struct User {
    pub id: Uuid,
}

impl FromRequest for User {
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        let user_id = req.extensions().get::<UserId>().map(|u| u.0);

        Box::pin(async move {
            let user_id = user_id.ok_or(AppError::Unauthorized)?;
            Ok(User { id: user_id })
        })
    }
}

pub fn is_participant(conversation: &Conversation, user_id: Uuid) -> bool {
    !conversation.is_deleted() && conversation.participant(user_id).is_some()
}

pub fn role(conversation: &Conversation, user_id: Uuid) -> Option<ParticipantRole> {
    if conversation.is_deleted() {
        return None;
    }
    conversation.participant(user_id).map(|p| p.role)
}

pub fn assert_can_administer(conversation: &Conversation, user_id: Uuid) -> Result<(), AppError> {
    match role(conversation, user_id) {
        Some(ParticipantRole::Admin) => Ok(()),
        Some(ParticipantRole::Member) => Err(AppError::PermissionDenied(
            "admin role required".into(),
        )),
        None => Err(AppError::NotFound),
    }
}

/// Fails when taking `excluding` out of the admin set would leave the remaining
/// participants of a group without any admin.
pub fn assert_admin_invariant_holds(
    conversation: &Conversation,
    excluding: Uuid,
) -> Result<(), AppError> {
    if !conversation.is_group() {
        return Ok(());
    }

    let mut remaining = conversation
        .participants
        .iter()
        .filter(|p| p.user_id != excluding)
        .peekable();

    if remaining.peek().is_none() {
        return Ok(());
    }

    if remaining.any(|p| p.role.is_admin()) {
        Ok(())
    } else {
        Err(AppError::InvariantViolation(
            "conversation must keep at least one admin; promote another participant first".into(),
        ))
    }
}

/// Fails when demoting `target` would leave a group without any admin. A demoted
/// user stays on the roster, so a lone participant cannot demote themselves.
pub fn assert_admin_remains_after_demotion(
    conversation: &Conversation,
    target: Uuid,
) -> Result<(), AppError> {
    if !conversation.is_group() {
        return Ok(());
    }

    let other_admin = conversation
        .participants
        .iter()
        .any(|p| p.user_id != target && p.role.is_admin());

    if other_admin {
        Ok(())
    } else {
        Err(AppError::InvariantViolation(
            "conversation must keep at least one admin; promote another participant first".into(),
        ))
    }
}

/// A verified participant of a loaded conversation.
#[derive(Debug, Clone, Copy)]
pub struct ConversationMember<'a> {
    pub conversation: &'a Conversation,
    pub participant: &'a Participant,
}

impl<'a> ConversationMember<'a> {
    pub fn verify(conversation: &'a Conversation, user_id: Uuid) -> Result<Self, AppError> {
        if conversation.is_deleted() {
            return Err(AppError::NotFound);
        }
        let participant = conversation
            .participant(user_id)
            .ok_or(AppError::NotFound)?;
        Ok(Self {
            conversation,
            participant,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.participant.role.is_admin()
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        assert_can_administer(self.conversation, self.participant.user_id)
    }

    pub fn require_group(&self) -> Result<(), AppError> {
        if !self.conversation.is_group() {
            return Err(AppError::BadRequest(
                "direct conversations have a fixed roster".into(),
            ));
        }
        Ok(())
    }
}
