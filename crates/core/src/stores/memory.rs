use crate::error::SearchError;
use crate::models::{Chunk, MetadataFilter};
use crate::traits::VectorStore;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process vector store: exact cosine scan over every chunk with an
/// embedding. System of record for tests and the CLI's offline mode.
#[derive(Default)]
pub struct MemoryVectorStore {
    chunks: RwLock<HashMap<String, Chunk>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    /// Removes every chunk whose metadata `source` matches, so a
    /// re-ingest of the same source supersedes prior content instead
    /// of accumulating next to it. Returns the number removed.
    pub async fn delete_by_source(&self, source: &str) -> usize {
        let mut chunks = self.chunks.write().await;
        let before = chunks.len();
        chunks.retain(|_, chunk| chunk.metadata.get("source").map(String::as_str) != Some(source));
        before - chunks.len()
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut left_norm = 0.0f64;
    let mut right_norm = 0.0f64;
    for (a, b) in left.iter().zip(right) {
        dot += f64::from(*a) * f64::from(*b);
        left_norm += f64::from(*a) * f64::from(*a);
        right_norm += f64::from(*b) * f64::from(*b);
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }

    dot / (left_norm.sqrt() * right_norm.sqrt())
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, chunks: &[Chunk]) -> Result<(), SearchError> {
        let mut state = self.chunks.write().await;
        for chunk in chunks {
            state.insert(chunk.id.clone(), chunk.clone());
        }
        Ok(())
    }

    async fn query_nearest(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(String, f64)>, SearchError> {
        let state = self.chunks.read().await;

        let mut scored: Vec<(String, f64)> = state
            .values()
            .filter(|chunk| {
                filter.map_or(true, |predicate| predicate.matches(&chunk.metadata))
            })
            .filter_map(|chunk| {
                chunk
                    .embedding
                    .as_ref()
                    .map(|embedding| (chunk.id.clone(), cosine_similarity(vector, embedding)))
            })
            .collect();

        scored.sort_by(|left, right| {
            right
                .1
                .total_cmp(&left.1)
                .then_with(|| left.0.cmp(&right.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn get(&self, chunk_id: &str) -> Result<Option<Chunk>, SearchError> {
        Ok(self.chunks.read().await.get(chunk_id).cloned())
    }

    async fn is_empty(&self) -> Result<bool, SearchError> {
        Ok(self.chunks.read().await.is_empty())
    }
}
