//! Generation agent: a two-phase protocol over a chat-completion model.
//!
//! In full mode the model first decides tool calls against the single
//! registered capability (the documentation search); the runtime executes
//! each call and captures its raw output. The model's first non-tool-call
//! response is the final answer. In selected-text mode the capability is
//! not offered and the model answers from the supplied text only.
//!
//! Citation integrity: the runtime, not the model, records which passages
//! were retrieved. Citations are derived from those captured outputs.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::retry::ClientError;
use crate::grounding;
use crate::llm::{ChatMessage, ChatProvider, ChatRequest};
use crate::models::{Citation, RequestFilters};
use crate::retrieval::{RetrievalService, SearchResult};

use super::instructions::{full_mode_instructions, selected_text_instructions};
use super::tool::{run_search_tool, SEARCH_TOOL_NAME};

/// Typed events emitted on the streaming path. The sequence is finite and
/// ends in exactly one `Done` or `Error`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Delta { content: String },
    ToolCall { name: String, output: Value },
    Sources { data: Vec<Citation> },
    Done { answer: String },
    Error { message: String },
}

/// Result of a non-streaming agent run. A failure reaching the model is
/// reported in `error`, never raised; tool results captured before the
/// failure are preserved for fallback rendering.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub answer: Option<String>,
    pub tool_results: Vec<SearchResult>,
    pub error: Option<String>,
}

enum AgentDecision {
    Final(String),
    ToolCall { name: String, args: Value },
}

#[derive(Clone)]
pub struct GenerationAgent {
    provider: Arc<dyn ChatProvider>,
    retrieval: RetrievalService,
    max_tool_rounds: usize,
}

impl GenerationAgent {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        retrieval: RetrievalService,
        max_tool_rounds: usize,
    ) -> Self {
        Self {
            provider,
            retrieval,
            max_tool_rounds: max_tool_rounds.max(1),
        }
    }

    fn build_messages(
        query: &str,
        selected_text: Option<&str>,
        history: &[ChatMessage],
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        match selected_text {
            Some(text) => messages.push(ChatMessage::system(selected_text_instructions(text))),
            None => messages.push(ChatMessage::system(full_mode_instructions())),
        }
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(query));
        messages
    }

    /// Runs the agent to completion and returns a structured outcome.
    pub async fn run(
        &self,
        query: &str,
        selected_text: Option<&str>,
        history: &[ChatMessage],
        filters: Option<&RequestFilters>,
    ) -> AgentOutcome {
        let mut messages = Self::build_messages(query, selected_text, history);

        if selected_text.is_some() {
            // Tool table is empty in this mode; one generation call.
            return match self.provider.chat(ChatRequest::new(messages)).await {
                Ok(answer) => AgentOutcome {
                    answer: Some(answer),
                    tool_results: Vec::new(),
                    error: None,
                },
                Err(err) => AgentOutcome {
                    answer: None,
                    tool_results: Vec::new(),
                    error: Some(err.to_string()),
                },
            };
        }

        let mut tool_results: Vec<SearchResult> = Vec::new();
        let mut rounds = 0usize;

        loop {
            let response = match self.provider.chat(ChatRequest::new(messages.clone())).await {
                Ok(response) => response,
                Err(err) => {
                    return AgentOutcome {
                        answer: None,
                        tool_results,
                        error: Some(err.to_string()),
                    }
                }
            };

            match parse_agent_decision(&response) {
                AgentDecision::Final(content) => {
                    return AgentOutcome {
                        answer: Some(content),
                        tool_results,
                        error: None,
                    };
                }
                AgentDecision::ToolCall { name, args } => {
                    rounds += 1;
                    self.execute_tool(&name, &args, filters, &mut tool_results, &mut messages, None)
                        .await;

                    if rounds >= self.max_tool_rounds {
                        messages.push(ChatMessage::system(
                            "Provide your final answer now as plain prose based on the \
                             retrieved passages. Do not call the tool again.",
                        ));
                        return match self.provider.chat(ChatRequest::new(messages)).await {
                            Ok(response) => AgentOutcome {
                                answer: Some(final_text(&response)),
                                tool_results,
                                error: None,
                            },
                            Err(err) => AgentOutcome {
                                answer: None,
                                tool_results,
                                error: Some(err.to_string()),
                            },
                        };
                    }
                }
            }
        }
    }

    /// Streaming variant. Tool decisions and answer text come from the same
    /// conversation as [`run`]; only delivery differs. The final citation
    /// set is derived from the identical captured tool outputs.
    pub fn run_streamed(
        &self,
        query: String,
        selected_text: Option<String>,
        history: Vec<ChatMessage>,
        filters: Option<RequestFilters>,
    ) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(64);
        let agent = self.clone();

        tokio::spawn(async move {
            agent
                .stream_task(query, selected_text, history, filters, tx)
                .await;
        });

        rx
    }

    async fn stream_task(
        &self,
        query: String,
        selected_text: Option<String>,
        history: Vec<ChatMessage>,
        filters: Option<RequestFilters>,
        tx: mpsc::Sender<AgentEvent>,
    ) {
        let mut messages = Self::build_messages(&query, selected_text.as_deref(), &history);
        let mut tool_results: Vec<SearchResult> = Vec::new();
        let mut rounds = 0usize;

        let answer = loop {
            let streamed = if selected_text.is_some() {
                self.stream_prose(&messages, &tx).await
            } else {
                self.stream_decision(&messages, &tx).await
            };

            let decision = match streamed {
                Ok(decision) => decision,
                Err(err) => {
                    let _ = tx
                        .send(AgentEvent::Error {
                            message: err.to_string(),
                        })
                        .await;
                    return;
                }
            };

            match decision {
                AgentDecision::Final(content) => break content,
                AgentDecision::ToolCall { name, args } => {
                    rounds += 1;
                    self.execute_tool(
                        &name,
                        &args,
                        filters.as_ref(),
                        &mut tool_results,
                        &mut messages,
                        Some(&tx),
                    )
                    .await;

                    if rounds >= self.max_tool_rounds {
                        messages.push(ChatMessage::system(
                            "Provide your final answer now as plain prose based on the \
                             retrieved passages. Do not call the tool again.",
                        ));
                        match self.stream_prose(&messages, &tx).await {
                            Ok(AgentDecision::Final(content)) => break content,
                            Ok(AgentDecision::ToolCall { .. }) => break String::new(),
                            Err(err) => {
                                let _ = tx
                                    .send(AgentEvent::Error {
                                        message: err.to_string(),
                                    })
                                    .await;
                                return;
                            }
                        }
                    }
                }
            }
        };

        let citations = grounding::citations_for(selected_text.as_deref(), &tool_results);
        if !citations.is_empty() {
            let _ = tx.send(AgentEvent::Sources { data: citations }).await;
        }

        let _ = tx.send(AgentEvent::Done { answer }).await;
    }

    async fn execute_tool(
        &self,
        name: &str,
        args: &Value,
        filters: Option<&RequestFilters>,
        tool_results: &mut Vec<SearchResult>,
        messages: &mut Vec<ChatMessage>,
        tx: Option<&mpsc::Sender<AgentEvent>>,
    ) {
        if name != SEARCH_TOOL_NAME {
            tracing::warn!(tool = name, "model requested unknown tool");
            messages.push(ChatMessage::system(format!(
                "Unknown tool `{}`; only `{}` is available.",
                name, SEARCH_TOOL_NAME
            )));
            return;
        }

        let invocation = run_search_tool(&self.retrieval, args, filters).await;
        tool_results.extend(invocation.results.iter().cloned());

        if let Some(tx) = tx {
            let _ = tx
                .send(AgentEvent::ToolCall {
                    name: name.to_string(),
                    output: invocation.output.clone(),
                })
                .await;
        }

        messages.push(ChatMessage::system(format!(
            "Tool `{}` result:\n{}",
            name, invocation.output
        )));
    }

    /// Streams one model turn, forwarding deltas as soon as the output is
    /// recognizably prose. A JSON-shaped response is buffered whole and
    /// parsed as a tool-call decision instead.
    async fn stream_decision(
        &self,
        messages: &[ChatMessage],
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<AgentDecision, ClientError> {
        let mut receiver = self
            .provider
            .stream_chat(ChatRequest::new(messages.to_vec()))
            .await?;

        let mut full = String::new();
        let mut prose_mode = false;

        while let Some(item) = receiver.recv().await {
            let chunk = item?;
            full.push_str(&chunk);

            if prose_mode {
                let _ = tx.send(AgentEvent::Delta { content: chunk }).await;
                continue;
            }

            let leading = full.trim_start();
            if !leading.is_empty() && !leading.starts_with('{') {
                prose_mode = true;
                let _ = tx
                    .send(AgentEvent::Delta {
                        content: full.clone(),
                    })
                    .await;
            }
        }

        if prose_mode {
            return Ok(AgentDecision::Final(full.trim().to_string()));
        }

        let decision = parse_agent_decision(&full);
        if let AgentDecision::Final(content) = &decision {
            // JSON-wrapped final answer: deliver it as a single delta so the
            // caller still sees the text before the terminal event.
            if !content.is_empty() {
                let _ = tx
                    .send(AgentEvent::Delta {
                        content: content.clone(),
                    })
                    .await;
            }
        }
        Ok(decision)
    }

    /// Streams one model turn as prose unconditionally.
    async fn stream_prose(
        &self,
        messages: &[ChatMessage],
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<AgentDecision, ClientError> {
        let mut receiver = self
            .provider
            .stream_chat(ChatRequest::new(messages.to_vec()))
            .await?;

        let mut full = String::new();
        while let Some(item) = receiver.recv().await {
            let chunk = item?;
            full.push_str(&chunk);
            let _ = tx.send(AgentEvent::Delta { content: chunk }).await;
        }

        Ok(AgentDecision::Final(full.trim().to_string()))
    }
}

/// Extracts a final answer from a possibly JSON-wrapped model response.
fn final_text(response: &str) -> String {
    match parse_agent_decision(response) {
        AgentDecision::Final(content) => content,
        AgentDecision::ToolCall { .. } => response.trim().to_string(),
    }
}

fn parse_agent_decision(text: &str) -> AgentDecision {
    if let Some(value) = parse_json_from_text(text) {
        if let Some(decision) = decision_from_value(&value) {
            return decision;
        }
    }
    AgentDecision::Final(text.trim().to_string())
}

fn decision_from_value(value: &Value) -> Option<AgentDecision> {
    let action = value
        .get("type")
        .or_else(|| value.get("action"))
        .and_then(Value::as_str)
        .unwrap_or("");

    if action == "tool_call" {
        let name = value
            .get("tool_name")
            .or_else(|| value.get("name"))
            .or_else(|| value.get("tool"))
            .and_then(Value::as_str)?;
        let args = value
            .get("tool_args")
            .or_else(|| value.get("args"))
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        return Some(AgentDecision::ToolCall {
            name: name.to_string(),
            args,
        });
    }

    if action == "final" {
        let content = value
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        return Some(AgentDecision::Final(content));
    }

    None
}

fn parse_json_from_text(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end]).ok()
}
