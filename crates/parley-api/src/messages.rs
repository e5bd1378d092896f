use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use parley_core::lifecycle::CreateMessage;
use parley_types::api::{
    Claims, EditMessageRequest, ForwardRequest, MarkReadRequest, PageQuery, SendMessageRequest,
    ToggleReactionRequest,
};
use parley_types::models::DeleteScope;

use crate::AppState;
use crate::error::ApiError;

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .lifecycle
        .create_message(CreateMessage {
            conversation_id,
            sender_id: claims.sub,
            content: req.content,
            kind: req.kind,
            attachment_url: req.attachment_url,
            parent_id: req.parent_id,
            scheduled_at: req.scheduled_at,
            self_destruct_seconds: req.self_destruct_seconds,
            mentions: req.mentions,
            client_tag: req.client_tag,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state.lifecycle.history_page(
        conversation_id,
        claims.sub,
        query.page,
        query.page_size,
    )?;
    Ok(Json(messages))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Path((_conversation_id, message_id)): Path<(Uuid, i64)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<EditMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .lifecycle
        .edit_message(message_id, claims.sub, req.content)
        .await?;
    Ok(Json(message))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default = "default_scope")]
    pub scope: DeleteScope,
}

fn default_scope() -> DeleteScope {
    DeleteScope::Me
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path((_conversation_id, message_id)): Path<(Uuid, i64)>,
    Query(query): Query<DeleteQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    match query.scope {
        DeleteScope::Everyone => {
            state
                .lifecycle
                .delete_for_everyone(message_id, claims.sub)
                .await?
        }
        DeleteScope::Me => state.lifecycle.delete_for_me(message_id, claims.sub).await?,
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path((_conversation_id, message_id)): Path<(Uuid, i64)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let reactions = state
        .lifecycle
        .toggle_reaction(message_id, claims.sub, req.emoji)
        .await?;
    Ok(Json(serde_json::json!({ "reactions": reactions })))
}

pub async fn toggle_pin(
    State(state): State<AppState>,
    Path((_conversation_id, message_id)): Path<(Uuid, i64)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let pinned = state.lifecycle.toggle_pin(message_id, claims.sub).await?;
    Ok(Json(serde_json::json!({ "pinned": pinned })))
}

pub async fn forward_message(
    State(state): State<AppState>,
    Path((_conversation_id, message_id)): Path<(Uuid, i64)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ForwardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcomes = state
        .lifecycle
        .forward(message_id, claims.sub, req.conversation_ids)
        .await?;
    Ok(Json(outcomes))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let recorded = state
        .lifecycle
        .mark_read(conversation_id, claims.sub, req.message_id)
        .await?;
    Ok(Json(serde_json::json!({ "recorded": recorded })))
}
