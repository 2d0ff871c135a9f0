//! Ingestion entry point: crawls the documentation site, chunks and embeds
//! pages, and upserts them into the vector index. Re-runs are idempotent.

use std::sync::Arc;

use anyhow::Context;

use lectern_backend::core::config::{AppConfig, AppPaths};
use lectern_backend::embedding::{CohereEmbedder, Embedder};
use lectern_backend::ingest::IngestPipeline;
use lectern_backend::logging;
use lectern_backend::vector::{QdrantIndex, VectorIndex};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = AppPaths::new();
    logging::init(&paths);

    let config = AppConfig::load(&paths).context("Failed to load configuration")?;

    if config.embedding.api_key.is_empty() {
        anyhow::bail!("Missing required environment variable: COHERE_API_KEY");
    }
    if config.ingest.base_url.is_none() && config.ingest.fallback_urls.is_empty() {
        anyhow::bail!("No ingestion source configured: set DOCS_BASE_URL or ingest.fallback_urls");
    }

    let embedder: Arc<dyn Embedder> = Arc::new(
        CohereEmbedder::new(&config.embedding)
            .map_err(|e| anyhow::anyhow!("Failed to initialize embedding client: {}", e))?,
    );
    let index: Arc<dyn VectorIndex> = Arc::new(
        QdrantIndex::new(&config.vector_index)
            .map_err(|e| anyhow::anyhow!("Failed to initialize vector index client: {}", e))?,
    );

    index
        .ensure_collection(embedder.dimensions())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to ensure collection: {}", e))?;
    index
        .create_payload_indexes()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create payload indexes: {}", e))?;

    let pipeline = IngestPipeline::new(&config.ingest, embedder, index);
    let report = pipeline.run().await;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.pages_failed > 0 && report.pages_processed == 0 && report.pages_skipped == 0 {
        anyhow::bail!("ingestion failed for every page");
    }

    Ok(())
}
