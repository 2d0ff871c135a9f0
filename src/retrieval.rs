//! Core retrieval service: validates query parameters, generates a query
//! embedding, executes a filtered similarity search and maps index hits to
//! a result set with non-fatal warnings.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::retry::{retry_with_backoff, RetryError, RetryPolicy};
use crate::embedding::{Embedder, InputMode};
use crate::vector::{CollectionStats, SearchFilter, VectorIndex};

/// Queries beyond this length are truncated with a warning, never rejected.
pub const MAX_QUERY_CHARACTERS: usize = 32_000;
pub const MIN_LIMIT: usize = 1;
pub const MAX_LIMIT: usize = 20;

/// Small taxonomy callers branch on. Dependency failures never escape as
/// their low-level error types.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    Unavailable(String),
}

impl From<RetryError> for RetrievalError {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::Timeout(operation) => {
                RetrievalError::Timeout(format!("{} timed out after retries", operation))
            }
            RetryError::Unavailable(operation, message) => {
                RetrievalError::Unavailable(format!("{}: {}", operation, message))
            }
        }
    }
}

/// A single retrieved chunk with relevance information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub similarity_score: f32,
    pub chunk_text: String,
    pub source_url: String,
    pub title: String,
    pub section: String,
    pub chunk_position: u32,
}

/// Complete response to one search call. Results keep the index order
/// (descending score); warnings carry non-fatal issues such as truncation
/// or missing metadata.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total_results: usize,
    pub query_time_ms: f64,
    pub warnings: Vec<String>,
}

/// One golden-test query for pipeline validation. Corpus-specific, supplied
/// through configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenQuery {
    pub query_text: String,
    #[serde(default)]
    pub expected_url_patterns: Vec<String>,
    pub min_score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationFailure {
    pub query: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub total_queries: usize,
    pub passed_queries: usize,
    pub failed_queries: Vec<ValidationFailure>,
    pub vector_count: u64,
    pub metadata_completeness: f32,
}

#[derive(Clone)]
pub struct RetrievalService {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    retry: RetryPolicy,
}

impl RetrievalService {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, retry: RetryPolicy) -> Self {
        Self {
            embedder,
            index,
            retry,
        }
    }

    /// Semantic similarity search over the ingested corpus.
    ///
    /// The URL filter matches a prefix/substring of `source_url`; the
    /// section filter is an exact match; both combine with AND.
    pub async fn search(
        &self,
        query_text: &str,
        limit: usize,
        score_threshold: f32,
        source_url_filter: Option<&str>,
        section_filter: Option<&str>,
    ) -> Result<SearchResponse, RetrievalError> {
        let started = Instant::now();
        let mut warnings: Vec<String> = Vec::new();

        let trimmed = query_text.trim();
        if trimmed.is_empty() {
            return Err(RetrievalError::InvalidQuery(
                "query text cannot be empty or whitespace".to_string(),
            ));
        }

        if !(MIN_LIMIT..=MAX_LIMIT).contains(&limit) {
            return Err(RetrievalError::InvalidParameter(format!(
                "limit must be between {} and {}, got {}",
                MIN_LIMIT, MAX_LIMIT, limit
            )));
        }
        if !(0.0..=1.0).contains(&score_threshold) {
            return Err(RetrievalError::InvalidParameter(format!(
                "score threshold must be between 0.0 and 1.0, got {}",
                score_threshold
            )));
        }

        let mut query = trimmed.to_string();
        let original_chars = query.chars().count();
        if original_chars > MAX_QUERY_CHARACTERS {
            let byte_end = query
                .char_indices()
                .nth(MAX_QUERY_CHARACTERS)
                .map(|(index, _)| index)
                .unwrap_or(query.len());
            query.truncate(byte_end);
            warnings.push(format!(
                "Query truncated from {} to {} characters",
                original_chars, MAX_QUERY_CHARACTERS
            ));
            tracing::warn!(stage = "search", query_length = original_chars, "query truncated");
        }

        let filter = SearchFilter {
            source_url_prefix: source_url_filter.map(str::to_string),
            section: section_filter.map(str::to_string),
        };

        let vector = self.query_embedding(&query).await?;

        let index = self.index.clone();
        let query_filter = filter.clone();
        let points = retry_with_backoff(&self.retry, "vector search", move || {
            let index = index.clone();
            let vector = vector.clone();
            let filter = query_filter.clone();
            async move { index.query(&vector, limit, score_threshold, &filter).await }
        })
        .await?;

        // Preserve index order; no re-ranking.
        let results: Vec<SearchResult> = points
            .into_iter()
            .map(|point| SearchResult {
                similarity_score: point.score,
                chunk_text: point.payload.chunk_text,
                source_url: point.payload.source_url,
                title: point.payload.title,
                section: point.payload.section,
                chunk_position: point.payload.chunk_position,
            })
            .collect();

        for result in &results {
            let mut missing = Vec::new();
            if result.source_url.is_empty() {
                missing.push("source_url");
            }
            if result.title.is_empty() {
                missing.push("title");
            }
            if result.chunk_text.is_empty() {
                missing.push("chunk_text");
            }
            if !missing.is_empty() {
                warnings.push(format!("Result missing fields: {}", missing.join(", ")));
            }
        }

        let query_time_ms = started.elapsed().as_secs_f64() * 1_000.0;
        tracing::info!(
            stage = "search",
            query_length = query.chars().count(),
            result_count = results.len(),
            latency_ms = query_time_ms,
            "search completed"
        );

        Ok(SearchResponse {
            total_results: results.len(),
            results,
            query_time_ms,
            warnings,
        })
    }

    async fn query_embedding(&self, query: &str) -> Result<Vec<f32>, RetrievalError> {
        let embedder = self.embedder.clone();
        let texts = vec![query.to_string()];
        let vectors = retry_with_backoff(&self.retry, "query embedding", move || {
            let embedder = embedder.clone();
            let texts = texts.clone();
            async move { embedder.embed(&texts, InputMode::SearchQuery).await }
        })
        .await?;

        vectors.into_iter().next().ok_or_else(|| {
            RetrievalError::Unavailable("embedding service returned no vector".to_string())
        })
    }

    pub async fn collection_stats(&self) -> Result<CollectionStats, RetrievalError> {
        let index = self.index.clone();
        let stats = retry_with_backoff(&self.retry, "collection stats", move || {
            let index = index.clone();
            async move { index.collection_stats().await }
        })
        .await?;
        Ok(stats)
    }

    /// Samples stored payloads and reports the share carrying complete
    /// metadata (source_url, title, section, chunk_text), in percent.
    pub async fn metadata_completeness(&self, sample_size: usize) -> Result<f32, RetrievalError> {
        let index = self.index.clone();
        let payloads = retry_with_backoff(&self.retry, "metadata sample", move || {
            let index = index.clone();
            async move {
                index
                    .scroll_payloads(&SearchFilter::default(), sample_size)
                    .await
            }
        })
        .await?;

        if payloads.is_empty() {
            return Ok(0.0);
        }

        let complete = payloads
            .iter()
            .filter(|p| {
                !p.source_url.is_empty()
                    && !p.title.is_empty()
                    && !p.section.is_empty()
                    && !p.chunk_text.is_empty()
            })
            .count();

        Ok(complete as f32 / payloads.len() as f32 * 100.0)
    }

    /// Runs the configured golden-test set plus the negative query against
    /// the live index and reports pass/fail per query.
    ///
    /// A golden query passes when any top-5 hit matches one of its expected
    /// URL patterns with a score at or above its minimum. The negative query
    /// passes when it returns nothing, or nothing above its minimum. Overall
    /// pass tolerates one golden failure but requires the negative query to
    /// hold.
    pub async fn validate_pipeline(
        &self,
        golden_queries: &[GoldenQuery],
        negative_query: Option<&GoldenQuery>,
    ) -> Result<ValidationReport, RetrievalError> {
        tracing::info!(stage = "validate", "starting pipeline validation");

        let stats = self.collection_stats().await?;
        let total_queries = golden_queries.len() + usize::from(negative_query.is_some());

        if stats.vector_count == 0 {
            tracing::warn!(stage = "validate", "collection is empty");
            return Ok(ValidationReport {
                passed: false,
                total_queries,
                passed_queries: 0,
                failed_queries: vec![ValidationFailure {
                    query: "all".to_string(),
                    reason: "Collection is empty".to_string(),
                }],
                vector_count: 0,
                metadata_completeness: 0.0,
            });
        }

        let metadata_completeness = self.metadata_completeness(100).await?;

        let mut failed_queries = Vec::new();
        let mut passed_count = 0usize;

        for golden in golden_queries {
            match self.search(&golden.query_text, 5, 0.0, None, None).await {
                Ok(response) => {
                    let matched = response.results.iter().any(|result| {
                        result.similarity_score >= golden.min_score
                            && golden
                                .expected_url_patterns
                                .iter()
                                .any(|pattern| result.source_url.contains(pattern.as_str()))
                    });
                    if matched {
                        passed_count += 1;
                    } else {
                        failed_queries.push(ValidationFailure {
                            query: golden.query_text.clone(),
                            reason: format!(
                                "No results matching expected patterns with score >= {}",
                                golden.min_score
                            ),
                        });
                    }
                }
                Err(err) => failed_queries.push(ValidationFailure {
                    query: golden.query_text.clone(),
                    reason: format!("Error: {}", err),
                }),
            }
        }

        let mut negative_passed = negative_query.is_none();
        if let Some(negative) = negative_query {
            match self.search(&negative.query_text, 5, 0.0, None, None).await {
                Ok(response) => {
                    negative_passed = response
                        .results
                        .iter()
                        .all(|result| result.similarity_score < negative.min_score);
                    if negative_passed {
                        passed_count += 1;
                    } else {
                        failed_queries.push(ValidationFailure {
                            query: negative.query_text.clone(),
                            reason: "Expected empty or low-confidence results for out-of-domain query"
                                .to_string(),
                        });
                    }
                }
                Err(err) => failed_queries.push(ValidationFailure {
                    query: negative.query_text.clone(),
                    reason: format!("Error: {}", err),
                }),
            }
        }

        let golden_passed = passed_count - usize::from(negative_passed && negative_query.is_some());
        let required = golden_queries.len().saturating_sub(1);
        let passed = golden_passed >= required && negative_passed;

        tracing::info!(
            stage = "validate",
            result_count = passed_count,
            passed,
            "pipeline validation finished"
        );

        Ok(ValidationReport {
            passed,
            total_queries,
            passed_queries: passed_count,
            failed_queries,
            vector_count: stats.vector_count,
            metadata_completeness,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::core::retry::ClientError;
    use crate::vector::{ChunkPayload, ScoredPoint, VectorPoint};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 2.0,
        }
    }

    struct FakeEmbedder {
        seen_texts: Mutex<Vec<String>>,
    }

    impl FakeEmbedder {
        fn new() -> Self {
            Self {
                seen_texts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(
            &self,
            texts: &[String],
            _mode: InputMode,
        ) -> Result<Vec<Vec<f32>>, ClientError> {
            self.seen_texts.lock().unwrap().extend(texts.iter().cloned());
            Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
        }

        fn dimensions(&self) -> usize {
            3
        }
    }

    struct FakeIndex {
        points: Vec<ScoredPoint>,
        fail_with: Option<fn() -> ClientError>,
    }

    impl FakeIndex {
        fn with_points(points: Vec<ScoredPoint>) -> Self {
            Self {
                points,
                fail_with: None,
            }
        }

        fn failing(fail_with: fn() -> ClientError) -> Self {
            Self {
                points: Vec::new(),
                fail_with: Some(fail_with),
            }
        }
    }

    #[async_trait]
    impl VectorIndex for FakeIndex {
        async fn query(
            &self,
            _vector: &[f32],
            limit: usize,
            score_threshold: f32,
            _filter: &SearchFilter,
        ) -> Result<Vec<ScoredPoint>, ClientError> {
            if let Some(fail) = self.fail_with {
                return Err(fail());
            }
            Ok(self
                .points
                .iter()
                .filter(|p| p.score >= score_threshold)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn upsert(&self, _points: Vec<VectorPoint>) -> Result<(), ClientError> {
            Ok(())
        }

        async fn collection_stats(&self) -> Result<CollectionStats, ClientError> {
            Ok(CollectionStats {
                vector_count: self.points.len() as u64,
                dimensions: 3,
                index_status: "green".to_string(),
                points_count: self.points.len() as u64,
                segments_count: 1,
            })
        }

        async fn ensure_collection(&self, _dimensions: usize) -> Result<(), ClientError> {
            Ok(())
        }

        async fn create_payload_indexes(&self) -> Result<(), ClientError> {
            Ok(())
        }

        async fn scroll_payloads(
            &self,
            _filter: &SearchFilter,
            limit: usize,
        ) -> Result<Vec<ChunkPayload>, ClientError> {
            Ok(self
                .points
                .iter()
                .take(limit)
                .map(|p| p.payload.clone())
                .collect())
        }
    }

    fn point(score: f32, url: &str, title: &str, text: &str) -> ScoredPoint {
        ScoredPoint {
            score,
            payload: ChunkPayload {
                chunk_text: text.to_string(),
                source_url: url.to_string(),
                title: title.to_string(),
                section: "module1".to_string(),
                chunk_position: 0,
                content_hash: None,
            },
        }
    }

    fn service(index: FakeIndex) -> RetrievalService {
        RetrievalService::new(Arc::new(FakeEmbedder::new()), Arc::new(index), fast_retry())
    }

    #[tokio::test]
    async fn whitespace_query_is_invalid() {
        let svc = service(FakeIndex::with_points(vec![]));
        let err = svc.search("   ", 5, 0.5, None, None).await.unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn limit_bounds_are_enforced() {
        let svc = service(FakeIndex::with_points(vec![]));
        assert!(matches!(
            svc.search("q", 0, 0.5, None, None).await.unwrap_err(),
            RetrievalError::InvalidParameter(_)
        ));
        assert!(matches!(
            svc.search("q", 21, 0.5, None, None).await.unwrap_err(),
            RetrievalError::InvalidParameter(_)
        ));
        assert!(matches!(
            svc.search("q", 5, 1.5, None, None).await.unwrap_err(),
            RetrievalError::InvalidParameter(_)
        ));
    }

    #[tokio::test]
    async fn oversized_query_is_truncated_with_warning() {
        let embedder = Arc::new(FakeEmbedder::new());
        let svc = RetrievalService::new(
            embedder.clone(),
            Arc::new(FakeIndex::with_points(vec![])),
            fast_retry(),
        );

        let long_query = "q".repeat(33_000);
        let response = svc.search(&long_query, 5, 0.5, None, None).await.unwrap();

        assert!(response
            .warnings
            .iter()
            .any(|w| w.contains("truncated")));

        let seen = embedder.seen_texts.lock().unwrap();
        assert_eq!(seen[0].chars().count(), MAX_QUERY_CHARACTERS);
    }

    #[tokio::test]
    async fn results_preserve_index_order() {
        let svc = service(FakeIndex::with_points(vec![
            point(0.9, "/docs/a", "A", "alpha"),
            point(0.7, "/docs/b", "B", "beta"),
            point(0.6, "/docs/c", "C", "gamma"),
        ]));

        let response = svc.search("robot arms", 5, 0.5, None, None).await.unwrap();
        assert_eq!(response.total_results, 3);

        let scores: Vec<f32> = response
            .results
            .iter()
            .map(|r| r.similarity_score)
            .collect();
        assert!(scores.windows(2).all(|pair| pair[0] >= pair[1]));
        assert!(scores.iter().all(|s| *s >= 0.5));
    }

    #[tokio::test]
    async fn missing_metadata_warns_but_keeps_result() {
        let mut incomplete = point(0.8, "", "", "some text");
        incomplete.payload.title = String::new();
        let svc = service(FakeIndex::with_points(vec![incomplete]));

        let response = svc.search("anything", 5, 0.5, None, None).await.unwrap();
        assert_eq!(response.total_results, 1);
        assert!(response
            .warnings
            .iter()
            .any(|w| w.contains("source_url") && w.contains("title")));
    }

    #[tokio::test]
    async fn index_failure_surfaces_as_unavailable() {
        let svc = service(FakeIndex::failing(|| {
            ClientError::Transient("connection refused".to_string())
        }));
        let err = svc.search("q", 5, 0.5, None, None).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Unavailable(_)));
    }

    #[tokio::test]
    async fn index_timeout_surfaces_as_timeout() {
        let svc = service(FakeIndex::failing(|| ClientError::Timeout));
        let err = svc.search("q", 5, 0.5, None, None).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Timeout(_)));
    }

    #[tokio::test]
    async fn repeated_searches_are_deterministic() {
        let make = || {
            service(FakeIndex::with_points(vec![
                point(0.62, "/docs/module1/chapter2", "Kinematics", "IK text"),
                point(0.41, "/docs/module3/chapter8", "Manipulation", "arm text"),
            ]))
        };

        let first = make().search("inverse kinematics", 5, 0.3, None, None).await.unwrap();
        let second = make().search("inverse kinematics", 5, 0.3, None, None).await.unwrap();

        let urls = |r: &SearchResponse| -> Vec<String> {
            r.results.iter().map(|x| x.source_url.clone()).collect()
        };
        assert_eq!(urls(&first), urls(&second));
        for (a, b) in first.results.iter().zip(second.results.iter()) {
            assert!((a.similarity_score - b.similarity_score).abs() < 1e-3);
        }
    }

    #[tokio::test]
    async fn validate_pipeline_reports_golden_and_negative() {
        let svc = service(FakeIndex::with_points(vec![point(
            0.62,
            "/docs/module1/chapter2",
            "Kinematics",
            "IK text",
        )]));

        let golden = vec![GoldenQuery {
            query_text: "What is inverse kinematics?".to_string(),
            expected_url_patterns: vec!["/docs/module1".to_string()],
            min_score: 0.25,
        }];
        let negative = GoldenQuery {
            query_text: "What is the best pizza recipe?".to_string(),
            expected_url_patterns: vec![],
            min_score: 0.9,
        };

        let report = svc
            .validate_pipeline(&golden, Some(&negative))
            .await
            .unwrap();
        assert!(report.passed);
        assert_eq!(report.total_queries, 2);
        assert_eq!(report.passed_queries, 2);
    }
}
