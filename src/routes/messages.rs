use crate::{
    error::AppError,
    middleware::guards::User,
    models::{ContentType, MediaInfo, Page, ReactionAction, ReactionKind},
    services::{EditMessage, SendMessage},
    state::AppState,
};
use actix_web::{delete, get, patch, post, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

fn default_content_type() -> ContentType {
    ContentType::Text
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_content_type")]
    pub content_type: ContentType,
    #[serde(default)]
    pub media: Vec<MediaInfo>,
    pub reply_to_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct EditMessageRequest {
    pub content: Option<String>,
    pub media: Option<Vec<MediaInfo>>,
}

#[derive(Deserialize)]
pub struct MarkReadRequest {
    pub last_message_id: Uuid,
}

#[derive(Deserialize)]
pub struct ReactRequest {
    pub reaction: ReactionKind,
    #[serde(default = "default_reaction_action")]
    pub action: ReactionAction,
}

fn default_reaction_action() -> ReactionAction {
    ReactionAction::Add
}

#[derive(Deserialize)]
pub struct SearchMessagesQuery {
    pub q: String,
    pub conversation_id: Option<Uuid>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    crate::models::DEFAULT_PAGE_SIZE
}

/// POST /conversations/{id}/messages
#[post("/conversations/{id}/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let view = state
        .messaging
        .send_message(
            user.id,
            conversation_id.into_inner(),
            SendMessage {
                content: body.content,
                content_type: body.content_type,
                media: body.media,
                reply_to_id: body.reply_to_id,
            },
        )
        .await?;
    Ok(HttpResponse::Created().json(view))
}

/// GET /conversations/{id}/messages
/// Newest first
#[get("/conversations/{id}/messages")]
pub async fn list_messages(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    page: web::Query<Page>,
) -> Result<HttpResponse, AppError> {
    let messages = state
        .messaging
        .list_messages(conversation_id.into_inner(), user.id, page.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(messages))
}

/// POST /conversations/{id}/read
#[post("/conversations/{id}/read")]
pub async fn mark_read(
    state: web::Data<AppState>,
    user: User,
    conversation_id: web::Path<Uuid>,
    body: web::Json<MarkReadRequest>,
) -> Result<HttpResponse, AppError> {
    let outcome = state
        .messaging
        .mark_read(conversation_id.into_inner(), user.id, body.last_message_id)
        .await?;
    Ok(HttpResponse::Ok().json(outcome))
}

/// GET /messages/search?q=&conversation_id=
#[get("/messages/search")]
pub async fn search_messages(
    state: web::Data<AppState>,
    user: User,
    query: web::Query<SearchMessagesQuery>,
) -> Result<HttpResponse, AppError> {
    let query = query.into_inner();
    let messages = state
        .messaging
        .search_messages(
            user.id,
            &query.q,
            query.conversation_id,
            Page::new(query.limit, query.offset),
        )
        .await?;
    Ok(HttpResponse::Ok().json(messages))
}

/// GET /messages/{id}
#[get("/messages/{id}")]
pub async fn get_message(
    state: web::Data<AppState>,
    user: User,
    message_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let view = state
        .messaging
        .get_message(message_id.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(view))
}

/// PATCH /messages/{id}
/// Sender only
#[patch("/messages/{id}")]
pub async fn edit_message(
    state: web::Data<AppState>,
    user: User,
    message_id: web::Path<Uuid>,
    body: web::Json<EditMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let view = state
        .messaging
        .edit_message(
            message_id.into_inner(),
            user.id,
            EditMessage {
                content: body.content,
                media: body.media,
            },
        )
        .await?;
    Ok(HttpResponse::Ok().json(view))
}

/// DELETE /messages/{id}
/// Sender or group admin; soft delete
#[delete("/messages/{id}")]
pub async fn delete_message(
    state: web::Data<AppState>,
    user: User,
    message_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let view = state
        .messaging
        .delete_message(message_id.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(view))
}

/// POST /messages/{id}/react
#[post("/messages/{id}/react")]
pub async fn react_to_message(
    state: web::Data<AppState>,
    user: User,
    message_id: web::Path<Uuid>,
    body: web::Json<ReactRequest>,
) -> Result<HttpResponse, AppError> {
    let view = state
        .messaging
        .react(message_id.into_inner(), user.id, body.reaction, body.action)
        .await?;
    Ok(HttpResponse::Ok().json(view))
}
