//! Runtime configuration: optional `config.yml` with environment overrides
//! for endpoints and secrets.

use std::env;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::core::retry::RetryPolicy;
use crate::retrieval::GoldenQuery;

pub mod paths;

pub use self::paths::AppPaths;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub embedding: EmbeddingConfig,
    pub vector_index: VectorIndexConfig,
    pub generation: GenerationConfig,
    pub retrieval: RetrievalConfig,
    pub auth: AuthConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_allowed_origins: default_local_origins(),
            max_concurrent_requests: 10,
        }
    }
}

pub fn default_local_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
        "http://127.0.0.1:3000".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.cohere.com".to_string(),
            api_key: String::new(),
            model: "embed-english-v3.0".to_string(),
            dimensions: 1024,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VectorIndexConfig {
    pub url: String,
    pub api_key: String,
    pub collection: String,
    pub timeout_secs: u64,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            api_key: String::new(),
            collection: "rag_embedding".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_tool_rounds: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            api_key: String::new(),
            model: "gemini-2.5-flash".to_string(),
            timeout_secs: 120,
            max_tool_rounds: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub high_confidence_threshold: f32,
    pub low_confidence_threshold: f32,
    pub retry: RetryPolicy,
    /// Golden-test queries for `validate_pipeline`. Corpus-specific, so they
    /// live in configuration rather than code.
    pub golden_queries: Vec<GoldenQuery>,
    pub negative_query: Option<GoldenQuery>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            high_confidence_threshold: 0.5,
            low_confidence_threshold: 0.3,
            retry: RetryPolicy::default(),
            golden_queries: Vec::new(),
            negative_query: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwks_url: Option<String>,
    pub cache_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwks_url: None,
            cache_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub base_url: Option<String>,
    /// Used when sitemap discovery fails.
    pub fallback_urls: Vec<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_content_chars: usize,
    pub embed_batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            fallback_urls: Vec::new(),
            chunk_size: 1000,
            chunk_overlap: 100,
            min_content_chars: 100,
            embed_batch_size: 96,
        }
    }
}

impl AppConfig {
    /// Loads `config.yml` when present, then applies environment overrides.
    pub fn load(paths: &AppPaths) -> Result<Self, serde_yaml::Error> {
        let mut config = Self::from_file(&paths.config_path())?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, serde_yaml::Error> {
        match fs::read_to_string(path) {
            Ok(raw) => serde_yaml::from_str(&raw),
            Err(_) => Ok(Self::default()),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var("HOST") {
            self.server.host = value;
        }
        if let Some(port) = env::var("PORT").ok().and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Ok(value) = env::var("CORS_ORIGINS") {
            let origins: Vec<String> = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if !origins.is_empty() {
                self.server.cors_allowed_origins = origins;
            }
        }
        if let Ok(value) = env::var("COHERE_API_KEY") {
            self.embedding.api_key = value;
        }
        if let Ok(value) = env::var("COHERE_BASE_URL") {
            self.embedding.base_url = value;
        }
        if let Ok(value) = env::var("QDRANT_URL") {
            self.vector_index.url = value;
        }
        if let Ok(value) = env::var("QDRANT_API_KEY") {
            self.vector_index.api_key = value;
        }
        if let Ok(value) = env::var("GEMINI_API_KEY") {
            self.generation.api_key = value;
        }
        if let Ok(value) = env::var("GEMINI_BASE_URL") {
            self.generation.base_url = value;
        }
        if let Ok(value) = env::var("JWKS_URL") {
            if !value.trim().is_empty() {
                self.auth.jwks_url = Some(value);
            }
        }
        if let Ok(value) = env::var("DOCS_BASE_URL") {
            self.ingest.base_url = Some(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let config = AppConfig::default();
        assert_eq!(config.server.max_concurrent_requests, 10);
        assert_eq!(config.embedding.dimensions, 1024);
        assert_eq!(config.embedding.timeout_secs, 30);
        assert_eq!(config.vector_index.timeout_secs, 10);
        assert_eq!(config.vector_index.collection, "rag_embedding");
        assert!((config.retrieval.high_confidence_threshold - 0.5).abs() < f32::EPSILON);
        assert!((config.retrieval.low_confidence_threshold - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let raw = "retrieval:\n  high_confidence_threshold: 0.6\n";
        let config: AppConfig = serde_yaml::from_str(raw).unwrap();
        assert!((config.retrieval.high_confidence_threshold - 0.6).abs() < f32::EPSILON);
        assert!((config.retrieval.low_confidence_threshold - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.server.port, 8000);
    }
}
