use crate::chunking::{split_document, ChunkingConfig};
use crate::embeddings::CachedEmbedder;
use crate::error::{IngestError, SearchError};
use crate::lexical::LexicalIndex;
use crate::models::{Document, MetadataFilter, ScoredChunk};
use crate::rerank::Reranker;
use crate::retriever::{HybridRetriever, RetrievalWeights};
use crate::traits::{RerankProvider, VectorStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub chunking: ChunkingConfig,
    pub weights: RetrievalWeights,
    /// Over-fetch multiplier applied to each retrieval leg.
    pub overfetch: usize,
    /// Bounded attempts for the embedding phase of an ingest job.
    pub max_embed_attempts: u32,
    /// First retry delay; doubles on each subsequent attempt.
    pub backoff_base: Duration,
    pub rerank_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            weights: RetrievalWeights::default(),
            overfetch: 3,
            max_embed_attempts: 3,
            backoff_base: Duration::from_millis(200),
            rerank_timeout: Duration::from_secs(5),
        }
    }
}

/// Per-ingest-job state. `Failed` is reachable from any state; the
/// other transitions are strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IngestState {
    Pending,
    Chunking,
    Embedding,
    Persisting,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub source: String,
    pub chunk_count: usize,
    pub state: IngestState,
    pub embed_attempts: u32,
}

/// Terminal failure of an ingest job. The report carries the
/// `Failed` state for the job; the error says why it got there.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct IngestFailure {
    pub report: IngestReport,
    pub error: IngestError,
}

/// Sequences chunking, embedding, and persistence at ingest time, and
/// hybrid retrieval plus reranking at query time. Owns the document
/// and chunk lifecycle; the vector store remains the system of record
/// for what was persisted.
pub struct RetrievalPipeline<V: VectorStore> {
    store: Arc<V>,
    lexical: Arc<LexicalIndex>,
    embedder: Arc<CachedEmbedder>,
    retriever: HybridRetriever<V>,
    reranker: Reranker,
    config: PipelineConfig,
}

impl<V: VectorStore + 'static> RetrievalPipeline<V> {
    pub fn new(
        store: Arc<V>,
        embedder: CachedEmbedder,
        rerank_provider: Arc<dyn RerankProvider>,
        config: PipelineConfig,
    ) -> Self {
        let lexical = Arc::new(LexicalIndex::new());
        let retriever = HybridRetriever::new(
            Arc::clone(&store),
            Arc::clone(&lexical),
            config.weights,
            config.overfetch,
        );

        Self {
            store,
            lexical,
            embedder: Arc::new(embedder),
            retriever,
            reranker: Reranker::new(rerank_provider, config.rerank_timeout),
            config,
        }
    }

    pub fn lexical_index(&self) -> &Arc<LexicalIndex> {
        &self.lexical
    }

    /// Runs one document through `Pending -> Chunking -> Embedding ->
    /// Persisting -> Complete`. Transient embedding failures are
    /// retried with exponential backoff; configuration and dimension
    /// violations fail immediately. Chunks are embedded and persisted
    /// in index order so `chunk_index` stays contiguous.
    pub async fn ingest_document(&self, document: &Document) -> Result<IngestReport, IngestFailure> {
        let mut state = IngestState::Pending;
        let mut embed_attempts = 0u32;

        let result = async {
            state = IngestState::Chunking;
            let mut chunks = split_document(document, &self.config.chunking)?;
            if chunks.is_empty() {
                return Ok(IngestReport {
                    document_id: document.id.clone(),
                    source: document.source.clone(),
                    chunk_count: 0,
                    state: IngestState::Complete,
                    embed_attempts: 0,
                });
            }

            state = IngestState::Embedding;
            let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
            let vectors = self.embed_with_retry(&texts, &mut embed_attempts).await?;
            for (chunk, vector) in chunks.iter_mut().zip(vectors) {
                chunk.embedding = Some(vector);
            }

            state = IngestState::Persisting;
            self.store
                .upsert(&chunks)
                .await
                .map_err(|error| IngestError::Storage(error.to_string()))?;
            for chunk in &chunks {
                self.lexical.index_chunk(chunk).await;
            }

            state = IngestState::Complete;
            Ok(IngestReport {
                document_id: document.id.clone(),
                source: document.source.clone(),
                chunk_count: chunks.len(),
                state,
                embed_attempts,
            })
        }
        .await;

        match result {
            Ok(report) => {
                info!(
                    document_id = %report.document_id,
                    source = %report.source,
                    chunks = report.chunk_count,
                    "document ingested"
                );
                Ok(report)
            }
            Err(error) => {
                warn!(
                    document_id = %document.id,
                    failed_in = ?state,
                    %error,
                    "ingest failed"
                );
                Err(IngestFailure {
                    report: IngestReport {
                        document_id: document.id.clone(),
                        source: document.source.clone(),
                        chunk_count: 0,
                        state: IngestState::Failed,
                        embed_attempts,
                    },
                    error,
                })
            }
        }
    }

    /// Ingests independent documents in parallel worker tasks. Order
    /// of the returned reports matches the input order; each document
    /// still embeds and persists its own chunks sequentially.
    pub async fn ingest_documents(
        self: Arc<Self>,
        documents: Vec<Document>,
    ) -> Vec<Result<IngestReport, IngestFailure>> {
        let mut handles = Vec::with_capacity(documents.len());
        for document in documents {
            let descriptor = (document.id.clone(), document.source.clone());
            let pipeline = Arc::clone(&self);
            handles.push((
                descriptor,
                tokio::spawn(async move { pipeline.ingest_document(&document).await }),
            ));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for ((document_id, source), handle) in handles {
            match handle.await {
                Ok(result) => reports.push(result),
                Err(join_error) => reports.push(Err(IngestFailure {
                    report: IngestReport {
                        document_id,
                        source,
                        chunk_count: 0,
                        state: IngestState::Failed,
                        embed_attempts: 0,
                    },
                    error: IngestError::Storage(format!("ingest worker panicked: {join_error}")),
                })),
            }
        }
        reports
    }

    async fn embed_with_retry(
        &self,
        texts: &[String],
        attempts: &mut u32,
    ) -> Result<Vec<Vec<f32>>, IngestError> {
        loop {
            *attempts += 1;
            match self.embedder.embed(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(error) => {
                    let mapped = IngestError::from(error);
                    if !mapped.is_retryable() || *attempts >= self.config.max_embed_attempts {
                        return Err(mapped);
                    }

                    let exponent = attempts.saturating_sub(1).min(16);
                    let delay = self.config.backoff_base * 2u32.saturating_pow(exponent);
                    warn!(
                        attempt = *attempts,
                        delay_ms = delay.as_millis() as u64,
                        %mapped,
                        "embedding attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Stateless query path: embed the query, retrieve hybrid
    /// candidates, hydrate their chunks, rerank (or fall back), and
    /// return the final top `k_final` with scores for downstream
    /// generation and citation. Never errors for "no matches".
    pub async fn answer_context(
        &self,
        query: &str,
        k_final: usize,
        k_candidates: usize,
    ) -> Result<Vec<ScoredChunk>, SearchError> {
        self.answer_context_filtered(query, k_final, k_candidates, None)
            .await
    }

    pub async fn answer_context_filtered(
        &self,
        query: &str,
        k_final: usize,
        k_candidates: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredChunk>, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::InvalidConfig("query is empty".to_string()));
        }
        if k_final == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                SearchError::EmbeddingProvider("provider returned no query vector".to_string())
            })?;

        let candidates = self
            .retriever
            .retrieve(&query_vector, query, k_candidates.max(k_final), filter)
            .await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        // The lexical leg has no filter support, so the predicate is
        // re-applied on the hydrated chunks.
        let mut hydrated = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            match self.store.get(&candidate.chunk_id).await {
                Ok(Some(chunk)) => {
                    if filter.map_or(true, |predicate| predicate.matches(&chunk.metadata)) {
                        hydrated.push(ScoredChunk {
                            chunk,
                            score: candidate.fused_score,
                        });
                    }
                }
                Ok(None) => {
                    warn!(chunk_id = %candidate.chunk_id, "candidate missing from store, skipping")
                }
                Err(error) => {
                    warn!(chunk_id = %candidate.chunk_id, %error, "chunk fetch failed, skipping")
                }
            }
        }

        let outcome = self.reranker.rerank(query, hydrated, k_final).await;
        Ok(outcome.chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EmbeddingCache;
    use crate::embeddings::{EmbeddingProvider, HashedNgramEmbedder};
    use crate::rerank::TermOverlapRerank;
    use crate::stores::MemoryVectorStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pipeline_with(
        store: Arc<MemoryVectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
        config: PipelineConfig,
    ) -> Arc<RetrievalPipeline<MemoryVectorStore>> {
        let cache = Arc::new(EmbeddingCache::new(1024));
        let embedder = CachedEmbedder::new(provider, cache, 16, Duration::from_secs(30));
        Arc::new(RetrievalPipeline::new(
            store,
            embedder,
            Arc::new(TermOverlapRerank),
            config,
        ))
    }

    fn default_pipeline() -> Arc<RetrievalPipeline<MemoryVectorStore>> {
        pipeline_with(
            Arc::new(MemoryVectorStore::new()),
            Arc::new(HashedNgramEmbedder { dimensions: 32 }),
            PipelineConfig::default(),
        )
    }

    /// Fails a configurable number of times before succeeding.
    struct FlakyProvider {
        inner: HashedNgramEmbedder,
        failures_left: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        fn dimensions(&self) -> usize {
            self.inner.dimensions
        }

        fn model_id(&self) -> &str {
            "flaky-v1"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                    left.checked_sub(1)
                })
                .is_ok()
            {
                return Err(SearchError::EmbeddingProvider("503".to_string()));
            }
            self.inner.embed_batch(texts).await
        }
    }

    struct StalledProvider;

    #[async_trait]
    impl EmbeddingProvider for StalledProvider {
        fn dimensions(&self) -> usize {
            32
        }

        fn model_id(&self) -> &str {
            "stalled-v1"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(texts.iter().map(|_| vec![0.0; 32]).collect())
        }
    }

    struct MismatchedProvider;

    #[async_trait]
    impl EmbeddingProvider for MismatchedProvider {
        fn dimensions(&self) -> usize {
            32
        }

        fn model_id(&self) -> &str {
            "mismatched-v1"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
            Ok(texts.iter().map(|_| vec![0.5; 16]).collect())
        }
    }

    #[tokio::test]
    async fn ingest_walks_through_to_complete() {
        let pipeline = default_pipeline();
        let document = Document::new(
            "Refunds are issued within 14 days of purchase. Shipping costs are not refundable.",
            "faq.md",
        );

        let report = pipeline.ingest_document(&document).await.expect("ingest");
        assert_eq!(report.state, IngestState::Complete);
        assert!(report.chunk_count >= 1);
        assert_eq!(report.embed_attempts, 1);
    }

    #[tokio::test]
    async fn query_returns_relevant_context_with_scores() {
        let pipeline = default_pipeline();
        let documents = vec![
            Document::new(
                "Our refund policy allows returns within 30 days for a full refund.",
                "refunds.md",
            ),
            Document::new(
                "The cafeteria is open from 8am until 6pm on weekdays.",
                "cafeteria.md",
            ),
        ];

        for document in &documents {
            pipeline.ingest_document(document).await.expect("ingest");
        }

        let context = pipeline
            .answer_context("refund policy", 2, 6)
            .await
            .expect("query");
        assert!(!context.is_empty());
        assert!(context[0].chunk.text.contains("refund"));
        for pair in context.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_embedding_failures_are_retried() {
        let provider = Arc::new(FlakyProvider {
            inner: HashedNgramEmbedder { dimensions: 32 },
            failures_left: AtomicUsize::new(2),
            calls: AtomicUsize::new(0),
        });
        let pipeline = pipeline_with(
            Arc::new(MemoryVectorStore::new()),
            provider.clone(),
            PipelineConfig::default(),
        );

        let document = Document::new("Some content that needs embedding.", "doc.txt");
        let report = pipeline.ingest_document(&document).await.expect("ingest");

        assert_eq!(report.state, IngestState::Complete);
        assert_eq!(report.embed_attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded_before_terminal_failure() {
        let provider = Arc::new(FlakyProvider {
            inner: HashedNgramEmbedder { dimensions: 32 },
            failures_left: AtomicUsize::new(usize::MAX),
            calls: AtomicUsize::new(0),
        });
        let pipeline = pipeline_with(
            Arc::new(MemoryVectorStore::new()),
            provider.clone(),
            PipelineConfig::default(),
        );

        let document = Document::new("Content.", "doc.txt");
        let failure = pipeline
            .ingest_document(&document)
            .await
            .expect_err("must exhaust retries");

        assert!(matches!(failure.error, IngestError::EmbeddingProvider(_)));
        assert_eq!(failure.report.state, IngestState::Failed);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn dimension_mismatch_fails_without_retry() {
        let pipeline = pipeline_with(
            Arc::new(MemoryVectorStore::new()),
            Arc::new(MismatchedProvider),
            PipelineConfig::default(),
        );

        let document = Document::new("Content.", "doc.txt");
        let failure = pipeline
            .ingest_document(&document)
            .await
            .expect_err("must fail");
        assert!(matches!(
            failure.error,
            IngestError::DimensionMismatch { .. }
        ));
        assert_eq!(failure.report.state, IngestState::Failed);
        assert_eq!(failure.report.document_id, document.id);
    }

    #[tokio::test]
    async fn invalid_chunking_config_fails_without_retry() {
        let config = PipelineConfig {
            chunking: ChunkingConfig {
                chunk_size: 100,
                overlap: 200,
                boundary_window: 10,
            },
            ..PipelineConfig::default()
        };
        let pipeline = pipeline_with(
            Arc::new(MemoryVectorStore::new()),
            Arc::new(HashedNgramEmbedder { dimensions: 32 }),
            config,
        );

        let document = Document::new("Content.", "doc.txt");
        let failure = pipeline
            .ingest_document(&document)
            .await
            .expect_err("must fail");
        assert!(matches!(failure.error, IngestError::InvalidConfig(_)));
        assert_eq!(failure.report.state, IngestState::Failed);
    }

    #[tokio::test]
    async fn parallel_ingest_keeps_per_document_indices_contiguous() {
        let store = Arc::new(MemoryVectorStore::new());
        let pipeline = pipeline_with(
            store,
            Arc::new(HashedNgramEmbedder { dimensions: 32 }),
            PipelineConfig {
                chunking: ChunkingConfig {
                    chunk_size: 80,
                    overlap: 10,
                    boundary_window: 20,
                },
                ..PipelineConfig::default()
            },
        );

        let documents: Vec<Document> = (0..4)
            .map(|n| {
                Document::new(
                    format!("Document number {n}. ").repeat(20),
                    format!("doc-{n}.txt"),
                )
            })
            .collect();

        let reports = pipeline.ingest_documents(documents).await;
        assert_eq!(reports.len(), 4);
        for report in reports {
            let report = report.expect("ingest");
            assert_eq!(report.state, IngestState::Complete);
            assert!(report.chunk_count > 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_embedding_backend_does_not_stall_queries() {
        let pipeline = pipeline_with(
            Arc::new(MemoryVectorStore::new()),
            Arc::new(StalledProvider),
            PipelineConfig::default(),
        );

        let result = pipeline.answer_context("refund policy", 3, 9).await;
        assert!(matches!(result, Err(SearchError::EmbeddingProvider(_))));
    }

    #[tokio::test]
    async fn query_against_nothing_ingested_is_an_empty_index_error() {
        let pipeline = default_pipeline();
        let result = pipeline.answer_context("anything", 3, 9).await;
        assert!(matches!(result, Err(SearchError::EmptyIndex)));
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let pipeline = default_pipeline();
        let result = pipeline.answer_context("   ", 3, 9).await;
        assert!(matches!(result, Err(SearchError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn metadata_filter_narrows_the_answer_context() {
        let pipeline = default_pipeline();
        let billing = Document::new(
            "Invoices are payable within 30 days of receipt.",
            "billing.md",
        )
        .with_metadata("category", "billing");
        let shipping = Document::new(
            "Orders ship within two business days of payment.",
            "shipping.md",
        )
        .with_metadata("category", "shipping");

        pipeline.ingest_document(&billing).await.expect("ingest");
        pipeline.ingest_document(&shipping).await.expect("ingest");

        let filter = MetadataFilter::default().eq("category", "billing");
        let context = pipeline
            .answer_context_filtered("payment terms days", 5, 15, Some(&filter))
            .await
            .expect("query");

        assert!(!context.is_empty());
        assert!(context
            .iter()
            .all(|scored| scored.chunk.metadata.get("category").map(String::as_str)
                == Some("billing")));
    }
}
