use crate::cache::{cache_key, EmbeddingCache};
use crate::error::SearchError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

/// Capability interface for embedding backends. Output vectors are
/// positionally aligned to the inputs and share one dimensionality
/// per provider+model.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimensions(&self) -> usize;
    fn model_id(&self) -> &str;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError>;
}

/// Deterministic local embedder: character bigrams and trigrams are
/// feature-hashed into a fixed-dimension, L2-normalized vector, with
/// a sign bit per n-gram so unrelated features cancel rather than
/// pile up. No network, no keys; the default for tests and offline
/// runs.
#[derive(Debug, Clone, Copy)]
pub struct HashedNgramEmbedder {
    pub dimensions: usize,
}

impl Default for HashedNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl HashedNgramEmbedder {
    fn embed_one(&self, text: &str) -> Vec<f32> {
        let buckets = self.dimensions.max(1) as u64;
        let mut vector = vec![0f32; buckets as usize];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for width in [2usize, 3] {
            for window in chars.windows(width) {
                let mut state = 0x9e37_79b9_7f4a_7c15u64 ^ width as u64;
                for ch in window {
                    state = (state ^ u64::from(*ch)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
                    state ^= state >> 31;
                }
                let sign = if state >> 63 == 0 { 1.0 } else { -1.0 };
                vector[(state % buckets) as usize] += sign;
            }
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashedNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        "hashed-ngram-v1"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

/// Provider wrapper that memoizes embeddings by content hash. Cache
/// hits bypass the provider entirely; misses are embedded in batches
/// and each successful batch is written back before the next one runs,
/// so a late batch failure never invalidates earlier results. Every
/// provider call runs under a deadline; a hung backend surfaces as a
/// transient provider error instead of stalling the caller.
pub struct CachedEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
    max_batch_size: usize,
    call_timeout: Duration,
}

impl CachedEmbedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<EmbeddingCache>,
        max_batch_size: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            cache,
            max_batch_size: max_batch_size.max(1),
            call_timeout,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let model_id = self.provider.model_id().to_string();
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses = Vec::new();

        for (position, text) in texts.iter().enumerate() {
            match self.cache.get(&cache_key(text, &model_id)).await {
                Some(hit) => results[position] = Some(hit),
                None => misses.push(position),
            }
        }

        if !misses.is_empty() {
            debug!(
                total = texts.len(),
                misses = misses.len(),
                model = %model_id,
                "embedding cache misses"
            );
        }

        for batch in misses.chunks(self.max_batch_size) {
            let batch_texts: Vec<String> =
                batch.iter().map(|&position| texts[position].clone()).collect();
            let vectors =
                match timeout(self.call_timeout, self.provider.embed_batch(&batch_texts)).await {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(SearchError::EmbeddingProvider(format!(
                            "embedding call exceeded its {}ms deadline",
                            self.call_timeout.as_millis()
                        )))
                    }
                };

            if vectors.len() != batch_texts.len() {
                return Err(SearchError::EmbeddingProvider(format!(
                    "provider returned {} vectors for {} inputs",
                    vectors.len(),
                    batch_texts.len()
                )));
            }

            for (&position, vector) in batch.iter().zip(vectors) {
                if vector.len() != self.provider.dimensions() {
                    return Err(SearchError::DimensionMismatch {
                        expected: self.provider.dimensions(),
                        actual: vector.len(),
                    });
                }
                self.cache
                    .insert(cache_key(&texts[position], &model_id), vector.clone())
                    .await;
                results[position] = Some(vector);
            }
        }

        Ok(results
            .into_iter()
            .map(|vector| vector.unwrap_or_default())
            .collect())
    }
}
