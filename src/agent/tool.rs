//! The retrieval capability exposed to the generation model.
//!
//! This boundary clamps parameters to a tighter range than the retrieval
//! service itself and never raises: failures come back as an error payload
//! the model can read.

use serde_json::{json, Value};

use crate::models::RequestFilters;
use crate::retrieval::{RetrievalService, SearchResult};

pub const SEARCH_TOOL_NAME: &str = "search_textbook";
pub const DEFAULT_TOOL_LIMIT: usize = 5;
pub const MAX_TOOL_LIMIT: usize = 10;
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;

/// One executed tool call: the JSON payload handed back to the model, plus
/// the raw results captured for citation derivation.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub output: Value,
    pub results: Vec<SearchResult>,
}

/// Executes the search capability with model-supplied arguments.
///
/// Request-level filters act as defaults the model's own arguments can
/// override.
pub async fn run_search_tool(
    retrieval: &RetrievalService,
    args: &Value,
    request_filters: Option<&RequestFilters>,
) -> ToolInvocation {
    let query = args
        .get("query")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let limit = args
        .get("limit")
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(DEFAULT_TOOL_LIMIT)
        .clamp(1, MAX_TOOL_LIMIT);

    let score_threshold = args
        .get("score_threshold")
        .and_then(Value::as_f64)
        .map(|v| v as f32)
        .unwrap_or(DEFAULT_SCORE_THRESHOLD)
        .clamp(0.0, 1.0);

    let source_url_prefix = args
        .get("source_url_prefix")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            request_filters.and_then(|f| f.source_url_prefix.clone())
        });

    let section = args
        .get("section")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| request_filters.and_then(|f| f.section.clone()));

    match retrieval
        .search(
            query,
            limit,
            score_threshold,
            source_url_prefix.as_deref(),
            section.as_deref(),
        )
        .await
    {
        Ok(response) => {
            let message = if response.results.is_empty() {
                "No relevant passages found".to_string()
            } else {
                format!("Found {} relevant passages", response.total_results)
            };
            let results = response.results.clone();
            ToolInvocation {
                output: json!({
                    "results": response.results,
                    "total_results": response.total_results,
                    "query_time_ms": response.query_time_ms,
                    "message": message,
                }),
                results,
            }
        }
        Err(err) => ToolInvocation {
            output: json!({
                "results": [],
                "total_results": 0,
                "error": err.to_string(),
                "message": format!("Search failed: {}", err),
            }),
            results: Vec::new(),
        },
    }
}
