//! Roster endpoints
//!
//! Only group rosters change; on a direct conversation these return 400.

use crate::{
    error::AppError, middleware::guards::User, models::ParticipantRole, state::AppState,
};
use actix_web::{delete, patch, post, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct AddParticipantsRequest {
    pub user_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct UpdateRoleRequest {
    pub role: ParticipantRole,
}

/// POST /conversations/{id}/participants
/// Per-item results; a partially successful batch is still 200
#[post("/conversations/{id}/participants")]
pub async fn add_participants(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<AddParticipantsRequest>,
) -> Result<HttpResponse, AppError> {
    let report = state
        .messaging
        .add_participants(conversation_id.into_inner(), user.id, body.into_inner().user_ids)
        .await?;
    Ok(HttpResponse::Ok().json(report))
}

/// DELETE /conversations/{id}/participants/{user_id}
#[delete("/conversations/{id}/participants/{user_id}")]
pub async fn remove_participant(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, target) = path.into_inner();
    let outcome = state
        .messaging
        .remove_participant(conversation_id, user.id, target)
        .await?;
    Ok(HttpResponse::Ok().json(outcome))
}

/// PATCH /conversations/{id}/participants/{user_id}
#[patch("/conversations/{id}/participants/{user_id}")]
pub async fn update_participant_role(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, Uuid)>,
    body: web::Json<UpdateRoleRequest>,
) -> Result<HttpResponse, AppError> {
    let (conversation_id, target) = path.into_inner();
    let view = state
        .messaging
        .update_role(conversation_id, user.id, target, body.role)
        .await?;
    Ok(HttpResponse::Ok().json(view))
}

/// POST /conversations/{id}/leave
#[post("/conversations/{id}/leave")]
pub async fn leave_conversation(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let outcome = state
        .messaging
        .leave_conversation(conversation_id.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(outcome))
}
