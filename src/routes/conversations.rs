//! Conversation endpoints
//!
//! Non-participants get 404 on every conversation-scoped route.

use crate::{
    error::AppError,
    middleware::guards::User,
    models::{ConversationKind, Page},
    services::CreateConversation,
    state::AppState,
};
use actix_web::{get, patch, post, web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

// ============================================
// Request DTOs
// ============================================

#[derive(Deserialize)]
pub struct CreateConversationRequest {
    pub kind: ConversationKind,
    pub participant_ids: Vec<Uuid>,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct ConversationSettings {
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateConversationRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub settings: Option<ConversationSettings>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    crate::models::DEFAULT_PAGE_SIZE
}

#[derive(Deserialize)]
pub struct MuteRequest {
    pub muted: bool,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct ArchiveRequest {
    pub archived: bool,
}

// ============================================
// Endpoints
// ============================================

/// POST /conversations
/// 201 for a new conversation, 200 when an existing direct pair is returned
#[post("/conversations")]
pub async fn create_conversation(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateConversationRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let (view, created) = state
        .messaging
        .create_conversation(
            user.id,
            CreateConversation {
                kind: body.kind,
                participant_ids: body.participant_ids,
                title: body.title,
                description: body.description,
            },
        )
        .await?;

    if created {
        Ok(HttpResponse::Created().json(view))
    } else {
        Ok(HttpResponse::Ok().json(view))
    }
}

/// GET /conversations
#[get("/conversations")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    user: User,
    page: web::Query<Page>,
) -> Result<HttpResponse, AppError> {
    let conversations = state
        .messaging
        .list_conversations(user.id, page.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(conversations))
}

/// GET /conversations/search?q=
#[get("/conversations/search")]
pub async fn search_conversations(
    state: web::Data<AppState>,
    user: User,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, AppError> {
    let query = query.into_inner();
    let conversations = state
        .messaging
        .search_conversations(user.id, &query.q, Page::new(query.limit, query.offset))
        .await?;
    Ok(HttpResponse::Ok().json(conversations))
}

/// GET /conversations/unread-counts
#[get("/conversations/unread-counts")]
pub async fn unread_counts(
    state: web::Data<AppState>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let counts = state.messaging.unread_counts(user.id).await?;
    Ok(HttpResponse::Ok().json(counts))
}

/// GET /conversations/{id}
#[get("/conversations/{id}")]
pub async fn get_conversation(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let view = state
        .messaging
        .get_conversation(conversation_id.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(view))
}

/// PATCH /conversations/{id}
/// Group admins only
#[patch("/conversations/{id}")]
pub async fn update_conversation(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<UpdateConversationRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let description = body
        .description
        .or_else(|| body.settings.and_then(|s| s.description));
    let view = state
        .messaging
        .update_conversation(conversation_id.into_inner(), user.id, body.title, description)
        .await?;
    Ok(HttpResponse::Ok().json(view))
}

/// GET /conversations/{id}/stats
#[get("/conversations/{id}/stats")]
pub async fn conversation_stats(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let stats = state
        .messaging
        .conversation_stats(conversation_id.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(stats))
}

/// POST /conversations/{id}/mute
#[post("/conversations/{id}/mute")]
pub async fn mute_conversation(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<MuteRequest>,
) -> Result<HttpResponse, AppError> {
    let view = state
        .messaging
        .set_muted(conversation_id.into_inner(), user.id, body.muted, body.until)
        .await?;
    Ok(HttpResponse::Ok().json(view))
}

/// POST /conversations/{id}/archive
#[post("/conversations/{id}/archive")]
pub async fn archive_conversation(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<ArchiveRequest>,
) -> Result<HttpResponse, AppError> {
    let view = state
        .messaging
        .set_archived(conversation_id.into_inner(), user.id, body.archived)
        .await?;
    Ok(HttpResponse::Ok().json(view))
}
