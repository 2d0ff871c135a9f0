//! Wire types for the HTTP API: chat request/response, citations, response
//! metadata, health and history payloads.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Response mode recorded in [`ResponseMetadata`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    Full,
    SelectedText,
    RetrievalOnly,
    NoResults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequestBody {
    pub query: String,
    #[serde(default)]
    pub selected_text: Option<String>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub filters: Option<RequestFilters>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestFilters {
    #[serde(default)]
    pub source_url_prefix: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
}

/// Citation tied to a retrieved chunk. Built only from captured tool
/// outputs, never from the model's free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCitation {
    pub source_url: String,
    pub title: String,
    pub section: String,
    pub chunk_position: u32,
    pub similarity_score: f32,
    pub snippet: String,
}

/// Citation for selected-text mode responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedTextCitation {
    pub source_type: String,
    pub selection_length: usize,
    pub snippet: String,
    pub relevance_note: String,
}

/// Either citation shape; the `source_type` marker on the selected-text
/// variant keeps the serialized forms distinguishable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Citation {
    Source(SourceCitation),
    SelectedText(SelectedTextCitation),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub query_time_ms: f64,
    pub retrieval_count: usize,
    pub mode: ResponseMode,
    pub low_confidence: bool,
    pub request_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponseBody {
    pub answer: Option<String>,
    pub fallback_message: Option<String>,
    pub sources: Vec<Citation>,
    pub metadata: ResponseMetadata,
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error_code: String,
    pub message: String,
    pub request_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub status: String,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub services: BTreeMap<String, ServiceStatus>,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntryBody {
    pub timestamp: String,
    pub query: String,
    pub response: String,
    pub sources: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationHistoryResponse {
    pub session_id: Uuid,
    pub entries: Vec<HistoryEntryBody>,
    pub total_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn citation_shapes_serialize_distinguishably() {
        let source = Citation::Source(SourceCitation {
            source_url: "/docs/module1/chapter2".to_string(),
            title: "Kinematics".to_string(),
            section: "module1".to_string(),
            chunk_position: 3,
            similarity_score: 0.62,
            snippet: "Inverse kinematics maps end-effector poses to joint angles".to_string(),
        });
        let selected = Citation::SelectedText(SelectedTextCitation {
            source_type: "selected_text".to_string(),
            selection_length: 42,
            snippet: "the provided selection".to_string(),
            relevance_note: "Answer derived from provided selection".to_string(),
        });

        let source_json = serde_json::to_value(&source).unwrap();
        let selected_json = serde_json::to_value(&selected).unwrap();

        assert!(source_json.get("source_url").is_some());
        assert!(source_json.get("source_type").is_none());
        assert_eq!(
            selected_json.get("source_type").and_then(Value::as_str),
            Some("selected_text")
        );
    }

    #[test]
    fn response_mode_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(ResponseMode::SelectedText).unwrap(),
            Value::String("selected_text".to_string())
        );
        assert_eq!(
            serde_json::to_value(ResponseMode::RetrievalOnly).unwrap(),
            Value::String("retrieval_only".to_string())
        );
    }

    #[test]
    fn chat_request_optional_fields_default() {
        let body: ChatRequestBody =
            serde_json::from_str(r#"{"query": "What is inverse kinematics?"}"#).unwrap();
        assert!(body.selected_text.is_none());
        assert!(body.session_id.is_none());
        assert!(body.filters.is_none());
    }
}
