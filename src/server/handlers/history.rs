use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::core::errors::{ApiError, ApiErrorKind};
use crate::models::ConversationHistoryResponse;
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
}

/// Stored exchanges for a session, oldest first. Unknown sessions are a
/// not-found error.
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = Uuid::new_v4();

    state
        .auth
        .verify_bearer(&headers)
        .await
        .map_err(|failure| failure.to_api_error(request_id))?;

    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let session = state
        .history
        .get_session(session_id)
        .await
        .map_err(|err| ApiError::with_request_id(ApiErrorKind::Internal(err.to_string()), request_id))?;

    if session.is_none() {
        return Err(ApiError::with_request_id(
            ApiErrorKind::NotFound(format!("Session {} not found", session_id)),
            request_id,
        ));
    }

    let entries = state
        .history
        .get_history(session_id, limit)
        .await
        .map_err(|err| ApiError::with_request_id(ApiErrorKind::Internal(err.to_string()), request_id))?;

    Ok(Json(ConversationHistoryResponse {
        session_id,
        total_entries: entries.len(),
        entries,
    }))
}
