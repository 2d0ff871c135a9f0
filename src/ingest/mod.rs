//! Corpus ingestion: discover documentation pages, chunk and embed them,
//! and upsert the vectors idempotently.
//!
//! Chunk ids are deterministic hashes of (source_url, position), so re-runs
//! overwrite in place. A per-URL content hash skips unchanged documents
//! before any embedding work.

pub mod chunker;
pub mod crawler;

use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::core::config::IngestConfig;
use crate::embedding::{Embedder, InputMode};
use crate::vector::{ChunkPayload, SearchFilter, VectorIndex, VectorPoint};

use self::chunker::Chunker;
use self::crawler::{PageContent, PageFetcher};

#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    pub pages_processed: usize,
    pub pages_skipped: usize,
    pub pages_failed: usize,
    pub chunks_embedded: usize,
}

pub struct IngestPipeline {
    fetcher: PageFetcher,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    embed_batch_size: usize,
}

impl IngestPipeline {
    pub fn new(
        config: &IngestConfig,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            fetcher: PageFetcher::new(config),
            chunker: Chunker::new(config.chunk_size, config.chunk_overlap),
            embedder,
            index,
            embed_batch_size: config.embed_batch_size.max(1),
        }
    }

    /// Runs the full pipeline: URL discovery, fetch, chunk, embed, upsert.
    pub async fn run(&self) -> IngestReport {
        let urls = self.fetcher.discover_urls().await;
        tracing::info!(stage = "discovery", url_count = urls.len(), "discovered URLs");

        let mut report = IngestReport::default();

        for url in urls {
            match self.ingest_url(&url).await {
                Ok(IngestedPage::Skipped) => {
                    report.pages_skipped += 1;
                    tracing::info!(stage = "process", url = %url, "content unchanged, skipped");
                }
                Ok(IngestedPage::Stored { chunks }) => {
                    report.pages_processed += 1;
                    report.chunks_embedded += chunks;
                    tracing::info!(stage = "process", url = %url, chunks, "page ingested");
                }
                Err(err) => {
                    report.pages_failed += 1;
                    tracing::error!(stage = "process", url = %url, error = %err, "page failed");
                }
            }
        }

        tracing::info!(
            stage = "report",
            processed = report.pages_processed,
            skipped = report.pages_skipped,
            failed = report.pages_failed,
            chunks = report.chunks_embedded,
            "ingestion finished"
        );
        report
    }

    async fn ingest_url(&self, url: &str) -> anyhow::Result<IngestedPage> {
        let page = self.fetcher.fetch_page(url).await?;

        if self.content_unchanged(url, &page.content_hash).await {
            return Ok(IngestedPage::Skipped);
        }

        let chunks = self.chunker.split(&page.text);
        if chunks.is_empty() {
            anyhow::bail!("no chunks produced from {}", url);
        }

        let points = self.embed_chunks(url, &page, &chunks).await?;
        let count = points.len();
        self.index
            .upsert(points)
            .await
            .map_err(|e| anyhow::anyhow!("upsert failed: {}", e))?;

        Ok(IngestedPage::Stored { chunks: count })
    }

    /// Compares the stored content hash for a URL against the fresh one.
    async fn content_unchanged(&self, url: &str, content_hash: &str) -> bool {
        let filter = SearchFilter {
            source_url_prefix: Some(url.to_string()),
            section: None,
        };
        match self.index.scroll_payloads(&filter, 1).await {
            Ok(payloads) => payloads
                .first()
                .and_then(|p| p.content_hash.as_deref())
                .map(|stored| stored == content_hash)
                .unwrap_or(false),
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "content-hash lookup failed");
                false
            }
        }
    }

    async fn embed_chunks(
        &self,
        url: &str,
        page: &PageContent,
        chunks: &[String],
    ) -> anyhow::Result<Vec<VectorPoint>> {
        let mut points = Vec::with_capacity(chunks.len());

        for (batch_index, batch) in chunks.chunks(self.embed_batch_size).enumerate() {
            let texts: Vec<String> = batch.to_vec();
            let vectors = self
                .embedder
                .embed(&texts, InputMode::SearchDocument)
                .await
                .map_err(|e| anyhow::anyhow!("embedding failed: {}", e))?;

            for (offset, (text, vector)) in batch.iter().zip(vectors).enumerate() {
                let position = (batch_index * self.embed_batch_size + offset) as u32;
                points.push(VectorPoint {
                    id: chunk_id(url, position).to_string(),
                    vector,
                    payload: ChunkPayload {
                        chunk_text: text.clone(),
                        source_url: url.to_string(),
                        title: page.title.clone(),
                        section: page.section.clone(),
                        chunk_position: position,
                        content_hash: Some(page.content_hash.clone()),
                    },
                });
            }
        }

        Ok(points)
    }
}

enum IngestedPage {
    Skipped,
    Stored { chunks: usize },
}

/// Deterministic point id for a chunk: a UUID derived from the hash of
/// (source_url, position). Re-ingestion of the same page overwrites by id.
pub fn chunk_id(source_url: &str, position: u32) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(source_url.as_bytes());
    hasher.update(b"|");
    hasher.update(position.to_le_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

/// Hex sha-256 over normalized page text, for unchanged-content detection.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_are_deterministic_and_position_sensitive() {
        let a = chunk_id("/docs/module1/chapter1", 0);
        let b = chunk_id("/docs/module1/chapter1", 0);
        let c = chunk_id("/docs/module1/chapter1", 1);
        let d = chunk_id("/docs/module1/chapter2", 0);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash("hello"), content_hash("hello"));
        assert_ne!(content_hash("hello"), content_hash("hello "));
        assert_eq!(content_hash("x").len(), 64);
    }
}
