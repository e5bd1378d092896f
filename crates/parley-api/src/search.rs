use axum::{
    Extension, Json,
    extract::{Query, State},
    response::IntoResponse,
};

use parley_types::api::{Claims, SearchQuery};

use crate::AppState;
use crate::error::ApiError;

/// Free-text search over visible messages, scoped to one conversation or
/// to every conversation the requester belongs to.
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state.lifecycle.search(
        claims.sub,
        query.conversation_id,
        &query.q,
        query.limit,
    )?;
    Ok(Json(messages))
}
