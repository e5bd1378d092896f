use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_types::api::{
    AddMemberRequest, Claims, ConversationSummary, CreateConversationRequest, MemberDisplayRequest,
    TransferCreatorRequest, UpdateConversationRequest, UpdatePermissionsRequest,
};

use crate::AppState;
use crate::error::ApiError;

pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .lifecycle
        .create_conversation(
            claims.sub,
            req.kind,
            req.name,
            req.description,
            req.members,
            req.slow_mode_seconds,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let summaries: Vec<ConversationSummary> = state
        .lifecycle
        .conversations_for(claims.sub)?
        .into_iter()
        .map(|(conversation, pinned, archived)| ConversationSummary {
            conversation,
            pinned,
            archived,
        })
        .collect();
    Ok(Json(summaries))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state.lifecycle.get_conversation(conversation_id, claims.sub)?;
    Ok(Json(conversation))
}

pub async fn update_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .lifecycle
        .update_info(
            conversation_id,
            claims.sub,
            req.name,
            req.description,
            req.slow_mode_seconds,
        )
        .await?;
    Ok(Json(conversation))
}

pub async fn remove_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .lifecycle
        .remove_conversation(conversation_id, claims.sub)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_member_display(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MemberDisplayRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .lifecycle
        .set_member_display(conversation_id, claims.sub, req.pinned, req.archived)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_member(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .lifecycle
        .add_member(conversation_id, claims.sub, req.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_member(
    State(state): State<AppState>,
    Path((conversation_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .lifecycle
        .remove_member(conversation_id, claims.sub, user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_permissions(
    State(state): State<AppState>,
    Path((conversation_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdatePermissionsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .lifecycle
        .set_permissions(conversation_id, claims.sub, user_id, req.flags)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn transfer_creator(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TransferCreatorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .lifecycle
        .transfer_creator(conversation_id, claims.sub, req.new_creator_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
