//! Client for the hosted embedding API.
//!
//! Documents and queries are encoded asymmetrically: ingestion uses
//! `search_document`, query time uses `search_query`. Cosine relevance
//! depends on using the matching mode on each side.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::core::config::EmbeddingConfig;
use crate::core::retry::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    SearchDocument,
    SearchQuery,
}

impl InputMode {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            InputMode::SearchDocument => "search_document",
            InputMode::SearchQuery => "search_query",
        }
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String], mode: InputMode)
        -> Result<Vec<Vec<f32>>, ClientError>;

    fn dimensions(&self) -> usize;
}

/// Cohere-compatible embedding client over REST.
pub struct CohereEmbedder {
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl CohereEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ClientError::Permanent(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            client,
        })
    }
}

#[async_trait]
impl Embedder for CohereEmbedder {
    async fn embed(
        &self,
        texts: &[String],
        mode: InputMode,
    ) -> Result<Vec<Vec<f32>>, ClientError> {
        let url = format!("{}/v1/embed", self.base_url);

        let body = json!({
            "texts": texts,
            "model": self.model,
            "input_type": mode.as_api_str(),
        });

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
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::from_status(status, body));
        }

        let payload: EmbedResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Permanent(format!("malformed embed response: {}", e)))?;

        if payload.embeddings.len() != texts.len() {
            return Err(ClientError::Permanent(format!(
                "embedding count mismatch: sent {} texts, got {} vectors",
                texts.len(),
                payload.embeddings.len()
            )));
        }

        Ok(payload.embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_modes_match_api_strings() {
        assert_eq!(InputMode::SearchDocument.as_api_str(), "search_document");
        assert_eq!(InputMode::SearchQuery.as_api_str(), "search_query");
    }
}
