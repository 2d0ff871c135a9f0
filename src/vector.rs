//! Client for the hosted vector index (Qdrant), driven over its REST API.
//!
//! The index stores one point per chunk with the chunk metadata as payload.
//! Point ids are deterministic UUIDs derived from (source_url, position), so
//! re-ingestion overwrites in place.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::config::VectorIndexConfig;
use crate::core::retry::ClientError;

/// Payload stored alongside each vector. Fields default to empty so that
/// points with incomplete metadata still deserialize; the retrieval layer
/// reports the gaps as warnings instead of dropping results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkPayload {
    #[serde(default)]
    pub chunk_text: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub chunk_position: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Metadata filters combined with logical AND. An empty filter searches the
/// whole collection.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub source_url_prefix: Option<String>,
    pub section: Option<String>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.source_url_prefix.is_none() && self.section.is_none()
    }

    fn to_request_json(&self) -> Option<Value> {
        let mut must = Vec::new();
        if let Some(prefix) = self.source_url_prefix.as_deref() {
            must.push(json!({"key": "source_url", "match": {"text": prefix}}));
        }
        if let Some(section) = self.section.as_deref() {
            must.push(json!({"key": "section", "match": {"value": section}}));
        }
        if must.is_empty() {
            None
        } else {
            Some(json!({"must": must}))
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub vector_count: u64,
    pub dimensions: usize,
    pub index_status: String,
    pub points_count: u64,
    pub segments_count: u64,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Filtered top-k similarity search. The engine enforces the score
    /// threshold and returns hits in descending score order.
    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredPoint>, ClientError>;

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<(), ClientError>;

    async fn collection_stats(&self) -> Result<CollectionStats, ClientError>;

    /// Creates the collection when missing; an existing collection is fine.
    async fn ensure_collection(&self, dimensions: usize) -> Result<(), ClientError>;

    async fn create_payload_indexes(&self) -> Result<(), ClientError>;

    /// Samples stored payloads, optionally filtered.
    async fn scroll_payloads(
        &self,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ChunkPayload>, ClientError>;
}

pub struct QdrantIndex {
    base_url: String,
    api_key: String,
    collection: String,
    client: reqwest::Client,
}

impl QdrantIndex {
    pub fn new(config: &VectorIndexConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ClientError::Permanent(e.to_string()))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            collection: config.collection.clone(),
            client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.request(method, url);
        if !self.api_key.is_empty() {
            builder = builder.header("api-key", &self.api_key);
        }
        builder
    }

    async fn send_json(&self, builder: reqwest::RequestBuilder) -> Result<Value, ClientError> {
        let response = builder.send().await.map_err(ClientError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::from_status(status, body));
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::Permanent(format!("malformed index response: {}", e)))
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredPoint>, ClientError> {
        let path = format!("/collections/{}/points/query", self.collection);

        let mut body = json!({
            "query": vector,
            "limit": limit,
            "score_threshold": score_threshold,
            "with_payload": true,
        });
        if let Some(filter_json) = filter.to_request_json() {
            body["filter"] = filter_json;
        }

        let payload = self
            .send_json(self.request(reqwest::Method::POST, &path).json(&body))
            .await?;

        let points = payload
            .pointer("/result/points")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut results = Vec::with_capacity(points.len());
        for point in points {
            let score = point
                .get("score")
                .and_then(Value::as_f64)
                .unwrap_or_default() as f32;
            let chunk = point
                .get("payload")
                .cloned()
                .map(|p| serde_json::from_value(p).unwrap_or_default())
                .unwrap_or_default();
            results.push(ScoredPoint {
                score,
                payload: chunk,
            });
        }

        Ok(results)
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<(), ClientError> {
        if points.is_empty() {
            return Ok(());
        }
        let path = format!("/collections/{}/points?wait=true", self.collection);
        let body = json!({ "points": points });
        self.send_json(self.request(reqwest::Method::PUT, &path).json(&body))
            .await?;
        Ok(())
    }

    async fn collection_stats(&self) -> Result<CollectionStats, ClientError> {
        let path = format!("/collections/{}", self.collection);
        let payload = self
            .send_json(self.request(reqwest::Method::GET, &path))
            .await?;
        let result = payload.get("result").cloned().unwrap_or_default();

        let points_count = result
            .get("points_count")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let vector_count = result
            .get("indexed_vectors_count")
            .and_then(Value::as_u64)
            .filter(|count| *count > 0)
            .unwrap_or(points_count);
        let index_status = result
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_lowercase();
        let dimensions = result
            .pointer("/config/params/vectors/size")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        let segments_count = result
            .get("segments_count")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        Ok(CollectionStats {
            vector_count,
            dimensions,
            index_status,
            points_count,
            segments_count,
        })
    }

    async fn ensure_collection(&self, dimensions: usize) -> Result<(), ClientError> {
        let path = format!("/collections/{}", self.collection);
        let body = json!({
            "vectors": { "size": dimensions, "distance": "Cosine" }
        });

        match self
            .send_json(self.request(reqwest::Method::PUT, &path).json(&body))
            .await
        {
            Ok(_) => Ok(()),
            // Already-exists conflicts are fine; the collection is there.
            Err(ClientError::Permanent(message)) if message.contains("already exists") => Ok(()),
            Err(ClientError::Permanent(message)) if message.starts_with("HTTP 409") => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn create_payload_indexes(&self) -> Result<(), ClientError> {
        let path = format!("/collections/{}/index?wait=true", self.collection);
        let fields = [
            ("source_url", "text"),
            ("section", "keyword"),
            ("chunk_position", "integer"),
        ];

        for (field_name, field_schema) in fields {
            let body = json!({
                "field_name": field_name,
                "field_schema": field_schema,
            });
            match self
                .send_json(self.request(reqwest::Method::PUT, &path).json(&body))
                .await
            {
                Ok(_) => {}
                Err(ClientError::Permanent(message)) if message.contains("already exists") => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn scroll_payloads(
        &self,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ChunkPayload>, ClientError> {
        let path = format!("/collections/{}/points/scroll", self.collection);

        let mut body = json!({
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter_json) = filter.to_request_json() {
            body["filter"] = filter_json;
        }

        let payload = self
            .send_json(self.request(reqwest::Method::POST, &path).json(&body))
            .await?;

        let points = payload
            .pointer("/result/points")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(points
            .into_iter()
            .filter_map(|point| point.get("payload").cloned())
            .map(|p| serde_json::from_value(p).unwrap_or_default())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_produces_no_request_json() {
        assert!(SearchFilter::default().to_request_json().is_none());
    }

    #[test]
    fn filters_combine_with_and() {
        let filter = SearchFilter {
            source_url_prefix: Some("/docs/module1".to_string()),
            section: Some("module1-ros2-fundamentals".to_string()),
        };
        let json = filter.to_request_json().unwrap();
        let must = json.get("must").and_then(Value::as_array).unwrap();
        assert_eq!(must.len(), 2);
        assert_eq!(must[0].pointer("/match/text").unwrap(), "/docs/module1");
        assert_eq!(
            must[1].pointer("/match/value").unwrap(),
            "module1-ros2-fundamentals"
        );
    }

    #[test]
    fn payload_tolerates_missing_fields() {
        let payload: ChunkPayload = serde_json::from_value(json!({
            "chunk_text": "some text"
        }))
        .unwrap();
        assert_eq!(payload.chunk_text, "some text");
        assert!(payload.source_url.is_empty());
        assert_eq!(payload.chunk_position, 0);
    }
}
