//! OpenAI-compatible chat completions client.
//!
//! The reference deployment points this at Gemini's OpenAI-compatible
//! endpoint, but any server speaking the same protocol works.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::core::config::GenerationConfig;
use crate::core::retry::ClientError;
use super::provider::ChatProvider;
use super::types::ChatRequest;

pub struct OpenAiChatProvider {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiChatProvider {
    pub fn new(config: &GenerationConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ClientError::Permanent(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            client,
        })
    }

    fn request_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
            "stream": stream,
        });
        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(t) = request.max_tokens {
                obj.insert("max_tokens".to_string(), json!(t));
            }
        }
        body
    }
}

#[async_trait]
impl ChatProvider for OpenAiChatProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn chat(&self, request: ChatRequest) -> Result<String, ClientError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request, false);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ClientError::from_status(status, text));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ClientError::Permanent(format!("malformed chat response: {}", e)))?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        if content.is_empty() {
            return Err(ClientError::Permanent(
                "chat response contained no content".to_string(),
            ));
        }

        Ok(content)
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<String, ClientError>>, ClientError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request, true);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ClientError::from_status(status, text));
        }

        let (tx, rx) = mpsc::channel(32);
        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = String::new();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        // Process complete lines; a partial line stays buffered.
                        while let Some(newline) = buffer.find('\n') {
                            let line = buffer[..newline].trim().to_string();
                            buffer.drain(..=newline);

                            if line.is_empty() {
                                continue;
                            }
                            if line == "data: [DONE]" {
                                return;
                            }
                            if let Some(data) = line.strip_prefix("data: ") {
                                if let Ok(event) = serde_json::from_str::<Value>(data) {
                                    if let Some(content) =
                                        event["choices"][0]["delta"]["content"].as_str()
                                    {
                                        if !content.is_empty()
                                            && tx.send(Ok(content.to_string())).await.is_err()
                                        {
                                            return;
                                        }
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(ClientError::from_reqwest(e))).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}
