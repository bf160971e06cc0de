use crate::error::SearchError;
use crate::models::{Chunk, MetadataFilter};
use async_trait::async_trait;

/// Storage collaborator boundary. The store is the system of record
/// for persisted chunk+embedding pairs; the core only depends on this
/// query contract.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, chunks: &[Chunk]) -> Result<(), SearchError>;

    /// Nearest neighbours by cosine similarity, highest first.
    async fn query_nearest(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(String, f64)>, SearchError>;

    async fn get(&self, chunk_id: &str) -> Result<Option<Chunk>, SearchError>;

    async fn is_empty(&self) -> Result<bool, SearchError>;
}

/// Rerank collaborator: relevance scores aligned positionally to the
/// passages, higher is more relevant.
#[async_trait]
pub trait RerankProvider: Send + Sync {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, SearchError>;
}
