use std::sync::Arc;

use crate::agent::GenerationAgent;
use crate::core::config::{AppConfig, AppPaths};
use crate::core::limiter::RequestLimiter;
use crate::core::security::AuthVerifier;
use crate::embedding::{CohereEmbedder, Embedder};
use crate::grounding::ConfidenceThresholds;
use crate::history::HistoryStore;
use crate::llm::OpenAiChatProvider;
use crate::retrieval::RetrievalService;
use crate::vector::{QdrantIndex, VectorIndex};

pub mod error;

use self::error::InitializationError;

/// Global application state shared across all routes.
///
/// Every hosted-dependency client is constructed exactly once here and
/// injected; request handlers never build clients of their own.
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: AppConfig,
    pub auth: AuthVerifier,
    pub limiter: RequestLimiter,
    pub retrieval: RetrievalService,
    pub agent: GenerationAgent,
    pub history: HistoryStore,
    pub vector_index: Arc<dyn VectorIndex>,
    pub thresholds: ConfidenceThresholds,
}

impl AppState {
    /// Initializes paths, configuration, storage and the service clients.
    pub async fn initialize() -> Result<Arc<Self>, InitializationError> {
        let paths = Arc::new(AppPaths::new());
        let config = AppConfig::load(&paths)
            .map_err(|e| InitializationError::Config(anyhow::Error::new(e)))?;

        let history = HistoryStore::new(paths.db_path.clone())
            .await
            .map_err(|e| InitializationError::History(anyhow::Error::new(e)))?;

        let embedder: Arc<dyn Embedder> = Arc::new(
            CohereEmbedder::new(&config.embedding)
                .map_err(|e| InitializationError::Embedding(anyhow::anyhow!(e)))?,
        );
        let vector_index: Arc<dyn VectorIndex> = Arc::new(
            QdrantIndex::new(&config.vector_index)
                .map_err(|e| InitializationError::VectorIndex(anyhow::anyhow!(e)))?,
        );
        let provider = Arc::new(
            OpenAiChatProvider::new(&config.generation)
                .map_err(|e| InitializationError::Generation(anyhow::anyhow!(e)))?,
        );

        let retrieval = RetrievalService::new(
            embedder,
            vector_index.clone(),
            config.retrieval.retry.clone(),
        );
        let agent = GenerationAgent::new(
            provider,
            retrieval.clone(),
            config.generation.max_tool_rounds,
        );

        let auth = AuthVerifier::new(config.auth.jwks_url.clone(), config.auth.cache_ttl_secs);
        let limiter = RequestLimiter::new(config.server.max_concurrent_requests);
        let thresholds = ConfidenceThresholds {
            high: config.retrieval.high_confidence_threshold,
            low: config.retrieval.low_confidence_threshold,
        };

        Ok(Arc::new(AppState {
            paths,
            config,
            auth,
            limiter,
            retrieval,
            agent,
            history,
            vector_index,
            thresholds,
        }))
    }
}
