use crate::error::SearchError;
use crate::lexical::LexicalIndex;
use crate::models::{MetadataFilter, RetrievalCandidate};
use crate::traits::VectorStore;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::warn;

/// Fusion weights for the two retrieval legs. Defaults favour the
/// vector signal.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalWeights {
    pub vector: f64,
    pub lexical: f64,
}

impl Default for RetrievalWeights {
    fn default() -> Self {
        Self {
            vector: 0.7,
            lexical: 0.3,
        }
    }
}

/// Merges vector-similarity and lexical results into one ranked list.
/// Both legs are over-fetched and queried concurrently; scores are
/// min-max normalized per pool and combined linearly. A chunk present
/// in only one pool keeps a zero for the missing component instead of
/// being excluded, so either modality alone can surface results.
pub struct HybridRetriever<V: VectorStore> {
    vector: Arc<V>,
    lexical: Arc<LexicalIndex>,
    weights: RetrievalWeights,
    overfetch: usize,
}

impl<V: VectorStore> HybridRetriever<V> {
    pub fn new(
        vector: Arc<V>,
        lexical: Arc<LexicalIndex>,
        weights: RetrievalWeights,
        overfetch: usize,
    ) -> Self {
        Self {
            vector,
            lexical,
            weights,
            overfetch: overfetch.max(1),
        }
    }

    pub async fn retrieve(
        &self,
        query_vector: &[f32],
        query_text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievalCandidate>, SearchError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let fetch = k.saturating_mul(self.overfetch);
        let (vector_result, lexical_hits) = tokio::join!(
            self.vector.query_nearest(query_vector, fetch, filter),
            self.lexical.search(query_text, fetch)
        );

        let vector_hits = match vector_result {
            Ok(hits) => hits,
            Err(error) => {
                warn!(%error, "vector search failed, continuing with lexical results only");
                Vec::new()
            }
        };

        if vector_hits.is_empty() && lexical_hits.is_empty() {
            let store_empty = self.vector.is_empty().await.unwrap_or(true);
            if store_empty && self.lexical.is_empty().await {
                return Err(SearchError::EmptyIndex);
            }
            return Ok(Vec::new());
        }

        Ok(fuse(
            &vector_hits,
            &lexical_hits,
            self.weights,
            k,
        ))
    }
}

fn fuse(
    vector_hits: &[(String, f64)],
    lexical_hits: &[(String, f64)],
    weights: RetrievalWeights,
    k: usize,
) -> Vec<RetrievalCandidate> {
    let raw_vector: HashMap<&str, f64> = vector_hits
        .iter()
        .map(|(id, score)| (id.as_str(), *score))
        .collect();
    let raw_lexical: HashMap<&str, f64> = lexical_hits
        .iter()
        .map(|(id, score)| (id.as_str(), *score))
        .collect();

    let norm_vector = min_max_normalize(&raw_vector);
    let norm_lexical = min_max_normalize(&raw_lexical);

    let chunk_ids: BTreeSet<&str> = raw_vector.keys().chain(raw_lexical.keys()).copied().collect();

    let mut candidates: Vec<RetrievalCandidate> = chunk_ids
        .into_iter()
        .map(|chunk_id| {
            let fused_score = weights.vector * norm_vector.get(chunk_id).copied().unwrap_or(0.0)
                + weights.lexical * norm_lexical.get(chunk_id).copied().unwrap_or(0.0);
            RetrievalCandidate {
                chunk_id: chunk_id.to_string(),
                vector_score: raw_vector.get(chunk_id).copied(),
                lexical_score: raw_lexical.get(chunk_id).copied(),
                fused_score,
                rank: 0,
            }
        })
        .collect();

    candidates.sort_by(|left, right| {
        right
            .fused_score
            .total_cmp(&left.fused_score)
            .then_with(|| {
                right
                    .vector_score
                    .unwrap_or(f64::NEG_INFINITY)
                    .total_cmp(&left.vector_score.unwrap_or(f64::NEG_INFINITY))
            })
            .then_with(|| left.chunk_id.cmp(&right.chunk_id))
    });
    candidates.truncate(k);

    for (position, candidate) in candidates.iter_mut().enumerate() {
        candidate.rank = position;
    }

    candidates
}

/// Min-max normalization to [0, 1] within one candidate pool. A pool
/// with a single distinct score maps to 1.0 for every member.
fn min_max_normalize(raw: &HashMap<&str, f64>) -> HashMap<String, f64> {
    if raw.is_empty() {
        return HashMap::new();
    }

    let min = raw.values().copied().fold(f64::INFINITY, f64::min);
    let max = raw.values().copied().fold(f64::NEG_INFINITY, f64::max);
    let spread = max - min;

    raw.iter()
        .map(|(id, score)| {
            let normalized = if spread.abs() < f64::EPSILON {
                1.0
            } else {
                (score - min) / spread
            };
            ((*id).to_string(), normalized)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Metadata};
    use crate::stores::MemoryVectorStore;

    fn chunk_with_embedding(id: &str, text: &str, embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: "doc-1".to_string(),
            text: text.to_string(),
            chunk_index: 0,
            embedding: Some(embedding),
            metadata: Metadata::new(),
        }
    }

    async fn retriever_with(
        chunks: Vec<Chunk>,
    ) -> HybridRetriever<MemoryVectorStore> {
        let store = Arc::new(MemoryVectorStore::new());
        store.upsert(&chunks).await.expect("upsert");

        let lexical = Arc::new(LexicalIndex::new());
        for chunk in &chunks {
            lexical.index_chunk(chunk).await;
        }

        HybridRetriever::new(store, lexical, RetrievalWeights::default(), 3)
    }

    #[tokio::test]
    async fn fused_ordering_is_total_and_deterministic() {
        let retriever = retriever_with(vec![
            chunk_with_embedding("a", "refund policy details", vec![1.0, 0.0]),
            chunk_with_embedding("b", "shipping information", vec![0.0, 1.0]),
            chunk_with_embedding("c", "refund window for returns", vec![0.9, 0.1]),
        ])
        .await;

        let candidates = retriever
            .retrieve(&[1.0, 0.0], "refund policy", 3, None)
            .await
            .expect("retrieve");

        for pair in candidates.windows(2) {
            assert!(pair[0].fused_score >= pair[1].fused_score);
        }
        for (position, candidate) in candidates.iter().enumerate() {
            assert_eq!(candidate.rank, position);
        }
    }

    #[tokio::test]
    async fn lexical_only_matches_are_not_excluded() {
        // "refund policy" shares no vector similarity with the stored
        // chunk direction, but the lexical leg must still surface it.
        let retriever = retriever_with(vec![
            chunk_with_embedding("lex-only", "refund policy text", vec![0.0, 1.0]),
            chunk_with_embedding("vec-only", "completely unrelated words", vec![1.0, 0.0]),
        ])
        .await;

        let candidates = retriever
            .retrieve(&[1.0, 0.0], "refund policy", 2, None)
            .await
            .expect("retrieve");

        assert!(candidates.iter().any(|c| c.chunk_id == "lex-only"));
        let lex_only = candidates
            .iter()
            .find(|c| c.chunk_id == "lex-only")
            .expect("present");
        assert!(lex_only.lexical_score.is_some());
    }

    #[tokio::test]
    async fn both_sources_empty_is_an_empty_index_error() {
        let store = Arc::new(MemoryVectorStore::new());
        let lexical = Arc::new(LexicalIndex::new());
        let retriever =
            HybridRetriever::new(store, lexical, RetrievalWeights::default(), 3);

        let result = retriever.retrieve(&[1.0, 0.0], "anything", 5, None).await;
        assert!(matches!(result, Err(SearchError::EmptyIndex)));
    }

    #[test]
    fn equal_fused_scores_tie_break_by_chunk_id() {
        let vector_hits = vec![("b".to_string(), 0.5), ("a".to_string(), 0.5)];
        let candidates = fuse(&vector_hits, &[], RetrievalWeights::default(), 10);

        assert_eq!(candidates[0].chunk_id, "a");
        assert_eq!(candidates[1].chunk_id, "b");
    }

    #[test]
    fn missing_component_contributes_zero() {
        let vector_hits = vec![("v".to_string(), 0.9)];
        let lexical_hits = vec![("l".to_string(), 3.0)];
        let candidates = fuse(&vector_hits, &lexical_hits, RetrievalWeights::default(), 10);

        let vector_only = candidates.iter().find(|c| c.chunk_id == "v").expect("v");
        assert!(vector_only.lexical_score.is_none());
        assert!((vector_only.fused_score - 0.7).abs() < 1e-9);

        let lexical_only = candidates.iter().find(|c| c.chunk_id == "l").expect("l");
        assert!(lexical_only.vector_score.is_none());
        assert!((lexical_only.fused_score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn results_are_truncated_to_k() {
        let vector_hits: Vec<(String, f64)> = (0..10)
            .map(|n| (format!("c{n}"), 1.0 - n as f64 * 0.05))
            .collect();
        let candidates = fuse(&vector_hits, &[], RetrievalWeights::default(), 4);
        assert_eq!(candidates.len(), 4);
    }
}
