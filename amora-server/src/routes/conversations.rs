use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use amora_core::conversations;
use amora_core::model::{Conversation, ConversationSummary, Message, MessageType};
use amora_core::store::ViewDeletion;
use amora_shared::types::api::ApiResponse;
use amora_shared::types::auth::AuthUser;
use amora_shared::types::pagination::CursorParams;
use amora_shared::AppResult;

use super::{validate, RequestContext};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default = "default_message_type")]
    pub message_type: MessageType,
    pub content: String,
    pub attachment_ref: Option<Uuid>,
}

fn default_message_type() -> MessageType {
    MessageType::Text
}

#[derive(Debug, Deserialize, Validate)]
pub struct SearchQuery {
    #[validate(length(min = 1, max = 100, message = "search term must be 1-100 characters"))]
    pub q: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub total_unread: u64,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub marked: u64,
}

#[derive(Debug, Serialize)]
pub struct DeleteViewResponse {
    pub purged: bool,
}

pub async fn send_message(
    auth_user: AuthUser,
    RequestContext(cx): RequestContext,
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<Json<ApiResponse<Message>>> {
    let message = conversations::send_message(
        &state.core,
        &cx,
        auth_user.id,
        match_id,
        req.message_type,
        req.content,
        req.attachment_ref,
    )
    .await?;
    Ok(Json(ApiResponse::ok(message)))
}

pub async fn list_conversations(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<ConversationSummary>>>> {
    let list = conversations::list_conversations(&state.core, auth_user.id).await?;
    Ok(Json(ApiResponse::ok(list)))
}

pub async fn get_conversation(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Conversation>>> {
    let conversation = conversations::get_conversation(&state.core, auth_user.id, id).await?;
    Ok(Json(ApiResponse::ok(conversation)))
}

/// `?before=` pages back through history, `?after=` catches up; `?q=` filters by text.
pub async fn list_messages(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(cursor): Query<CursorParams>,
    Query(search): Query<SearchQuery>,
) -> AppResult<Json<ApiResponse<Vec<Message>>>> {
    validate(&search)?;
    let messages =
        conversations::list_messages(&state.core, auth_user.id, id, &cursor, search.q.as_deref()).await?;
    Ok(Json(ApiResponse::ok(messages)))
}

pub async fn mark_read(
    auth_user: AuthUser,
    RequestContext(cx): RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<MarkReadResponse>>> {
    let marked = conversations::mark_read(&state.core, &cx, auth_user.id, id).await?;
    Ok(Json(ApiResponse::ok(MarkReadResponse { marked })))
}

pub async fn unread_count(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<UnreadCountResponse>>> {
    let total_unread = conversations::unread_count(&state.core, auth_user.id).await?;
    Ok(Json(ApiResponse::ok(UnreadCountResponse { total_unread })))
}

pub async fn unread_in_conversation(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<UnreadCountResponse>>> {
    let total_unread = conversations::unread_in_conversation(&state.core, auth_user.id, id).await?;
    Ok(Json(ApiResponse::ok(UnreadCountResponse { total_unread })))
}

pub async fn delete_conversation(
    auth_user: AuthUser,
    RequestContext(cx): RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<DeleteViewResponse>>> {
    let outcome = conversations::delete_conversation_view(&state.core, &cx, auth_user.id, id).await?;
    Ok(Json(ApiResponse::ok(DeleteViewResponse {
        purged: outcome == ViewDeletion::Purged,
    })))
}
