//! Chat endpoints: synchronous and streaming.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

use crate::core::errors::{ApiError, ApiErrorKind};
use crate::grounding;
use crate::llm::ChatMessage;
use crate::models::{ChatRequestBody, ChatResponseBody, ResponseMetadata};
use crate::state::AppState;

const MAX_QUERY_CHARS: usize = 32_000;
const MAX_SELECTED_TEXT_CHARS: usize = 64_000;
const HISTORY_CONTEXT_EXCHANGES: i64 = 5;

/// Ask a question about the documentation corpus.
///
/// Default mode searches the corpus through the agent's retrieval tool;
/// when `selected_text` is present the answer is grounded only in that
/// text.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ChatRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = Uuid::new_v4();
    let started = Instant::now();

    // Credentials are checked before any retrieval or generation work.
    state
        .auth
        .verify_bearer(&headers)
        .await
        .map_err(|failure| failure.to_api_error(request_id))?;

    // Slot released on every exit path when the permit drops.
    let _permit = state
        .limiter
        .try_acquire()
        .ok_or_else(|| ApiError::with_request_id(ApiErrorKind::RateLimited, request_id))?;

    validate_request(&body, request_id)?;
    let session_id = body.session_id.unwrap_or_else(Uuid::new_v4);
    let selected_text_present = body.selected_text.is_some();

    tracing::info!(
        stage = "chat",
        request_id = %request_id,
        query_length = body.query.chars().count(),
        mode = if selected_text_present { "selected_text" } else { "full" },
        "processing chat request"
    );

    let session = match state.history.get_or_create_session(session_id).await {
        Ok(session) => Some(session),
        Err(err) => {
            // History is an enhancement; the chat continues without it.
            tracing::warn!(request_id = %request_id, error = %err, "session operation failed");
            None
        }
    };

    let history_context = load_history_context(&state, session_id, selected_text_present).await;

    let outcome = state
        .agent
        .run(
            &body.query,
            body.selected_text.as_deref(),
            &history_context,
            body.filters.as_ref(),
        )
        .await;

    let (low_confidence, mode) = grounding::resolve_mode(
        selected_text_present,
        outcome.error.is_some(),
        &outcome.tool_results,
        &state.thresholds,
    );
    let retrieval_count = if selected_text_present {
        0
    } else {
        outcome.tool_results.len()
    };
    let sources = grounding::citations_for(body.selected_text.as_deref(), &outcome.tool_results);

    let fallback_message = if outcome.error.is_some() || outcome.answer.is_none() {
        grounding::fallback_answer(&outcome.tool_results, outcome.error.as_deref())
    } else {
        None
    };

    if let Some(error) = outcome.error.as_deref() {
        tracing::warn!(request_id = %request_id, error, "generation failed, responding with fallback");
    }

    let metadata = ResponseMetadata {
        query_time_ms: started.elapsed().as_secs_f64() * 1_000.0,
        retrieval_count,
        mode,
        low_confidence,
        request_id,
    };

    let response = ChatResponseBody {
        answer: outcome.answer.clone(),
        fallback_message,
        sources,
        metadata,
        session_id,
    };

    if session.is_some() {
        if let Some(answer) = outcome.answer.as_deref() {
            let sources_json =
                serde_json::to_value(&response.sources).unwrap_or(serde_json::Value::Array(vec![]));
            let metadata_json =
                serde_json::to_value(&response.metadata).unwrap_or(serde_json::Value::Null);
            if let Err(err) = state
                .history
                .save_conversation(session_id, &body.query, answer, &sources_json, &metadata_json)
                .await
            {
                tracing::warn!(request_id = %request_id, error = %err, "failed to save conversation");
            }
        }
    }

    tracing::info!(
        stage = "chat",
        request_id = %request_id,
        latency_ms = response.metadata.query_time_ms,
        retrieval_count,
        "chat request completed"
    );

    Ok((
        [("x-request-id", request_id.to_string())],
        Json(response),
    ))
}

/// Stream answer generation as `data: <json>` events tagged
/// `delta|tool_call|sources|done|error`.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ChatRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = Uuid::new_v4();

    state
        .auth
        .verify_bearer(&headers)
        .await
        .map_err(|failure| failure.to_api_error(request_id))?;

    let permit = state
        .limiter
        .try_acquire()
        .ok_or_else(|| ApiError::with_request_id(ApiErrorKind::RateLimited, request_id))?;

    validate_request(&body, request_id)?;
    let session_id = body.session_id.unwrap_or_else(Uuid::new_v4);
    let selected_text_present = body.selected_text.is_some();

    if let Err(err) = state.history.get_or_create_session(session_id).await {
        tracing::warn!(request_id = %request_id, error = %err, "session operation failed");
    }

    let history_context = load_history_context(&state, session_id, selected_text_present).await;

    tracing::info!(
        stage = "chat_stream",
        request_id = %request_id,
        query_length = body.query.chars().count(),
        mode = if selected_text_present { "selected_text" } else { "full" },
        "starting stream"
    );

    let receiver = state.agent.run_streamed(
        body.query.clone(),
        body.selected_text.clone(),
        history_context,
        body.filters.clone(),
    );

    // The permit rides along in the stream state so the slot is held for
    // the stream's lifetime and released when it is dropped or exhausted.
    let stream = futures_util::stream::unfold(
        (receiver, permit),
        |(mut receiver, permit)| async move {
            let event = receiver.recv().await?;
            let payload = serde_json::to_string(&event).unwrap_or_else(|_| {
                r#"{"type":"error","message":"event serialization failed"}"#.to_string()
            });
            Some((
                Ok::<Event, Infallible>(Event::default().data(payload)),
                (receiver, permit),
            ))
        },
    );

    Ok((
        [("x-request-id", request_id.to_string())],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    ))
}

fn validate_request(body: &ChatRequestBody, request_id: Uuid) -> Result<(), ApiError> {
    if body.query.trim().is_empty() {
        return Err(ApiError::bad_request(
            "EMPTY_QUERY",
            "Query cannot be empty",
            request_id,
        ));
    }

    let query_chars = body.query.chars().count();
    if query_chars > MAX_QUERY_CHARS {
        return Err(ApiError::bad_request(
            "QUERY_TOO_LONG",
            format!(
                "Query exceeds maximum length of {} characters (got {})",
                MAX_QUERY_CHARS, query_chars
            ),
            request_id,
        ));
    }

    if let Some(selected_text) = body.selected_text.as_deref() {
        let selection_chars = selected_text.chars().count();
        if selection_chars > MAX_SELECTED_TEXT_CHARS {
            return Err(ApiError::bad_request(
                "SELECTION_TOO_LONG",
                format!(
                    "Selected text exceeds maximum length of {} characters (got {})",
                    MAX_SELECTED_TEXT_CHARS, selection_chars
                ),
                request_id,
            ));
        }
    }

    Ok(())
}

async fn load_history_context(
    state: &AppState,
    session_id: Uuid,
    selected_text_present: bool,
) -> Vec<ChatMessage> {
    if selected_text_present {
        return Vec::new();
    }
    match state
        .history
        .recent_context(session_id, HISTORY_CONTEXT_EXCHANGES)
        .await
    {
        Ok(context) => context,
        Err(err) => {
            tracing::warn!(error = %err, "failed to load conversation context");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequestFilters;

    fn request(query: &str, selected_text: Option<String>) -> ChatRequestBody {
        ChatRequestBody {
            query: query.to_string(),
            selected_text,
            session_id: None,
            filters: None::<RequestFilters>,
        }
    }

    #[test]
    fn empty_query_is_rejected() {
        let err = validate_request(&request("   ", None), Uuid::new_v4()).unwrap_err();
        assert!(matches!(
            err.kind,
            ApiErrorKind::BadRequest { code: "EMPTY_QUERY", .. }
        ));
    }

    #[test]
    fn oversized_query_is_rejected_at_the_api_boundary() {
        let long = "q".repeat(MAX_QUERY_CHARS + 1);
        let err = validate_request(&request(&long, None), Uuid::new_v4()).unwrap_err();
        assert!(matches!(
            err.kind,
            ApiErrorKind::BadRequest { code: "QUERY_TOO_LONG", .. }
        ));
    }

    #[test]
    fn oversized_selection_is_rejected() {
        let selection = "s".repeat(MAX_SELECTED_TEXT_CHARS + 1);
        let err =
            validate_request(&request("ok", Some(selection)), Uuid::new_v4()).unwrap_err();
        assert!(matches!(
            err.kind,
            ApiErrorKind::BadRequest { code: "SELECTION_TOO_LONG", .. }
        ));
    }

    #[test]
    fn boundary_lengths_are_accepted() {
        let query = "q".repeat(MAX_QUERY_CHARS);
        assert!(validate_request(&request(&query, None), Uuid::new_v4()).is_ok());

        let selection = "s".repeat(MAX_SELECTED_TEXT_CHARS);
        assert!(validate_request(&request("ok", Some(selection)), Uuid::new_v4()).is_ok());
    }
}
