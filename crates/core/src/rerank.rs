use crate::error::SearchError;
use crate::lexical::tokenize;
use crate::models::ScoredChunk;
use crate::traits::RerankProvider;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

/// Outcome of a rerank pass. `fell_back` marks degraded mode: the
/// provider failed or timed out and the chunks kept their pre-rerank
/// (fused-score) order. Degradation is an expected condition consumed
/// by the orchestrator, not an error.
#[derive(Debug)]
pub struct RerankOutcome {
    pub chunks: Vec<ScoredChunk>,
    pub fell_back: bool,
}

/// Re-scores candidates against the query through a pluggable
/// relevance model and reorders them. Strictly a permutation and
/// truncation of its input; never introduces chunks.
pub struct Reranker {
    provider: Arc<dyn RerankProvider>,
    call_timeout: Duration,
}

impl Reranker {
    pub fn new(provider: Arc<dyn RerankProvider>, call_timeout: Duration) -> Self {
        Self {
            provider,
            call_timeout,
        }
    }

    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<ScoredChunk>,
        top_n: usize,
    ) -> RerankOutcome {
        if candidates.is_empty() || top_n == 0 {
            return RerankOutcome {
                chunks: Vec::new(),
                fell_back: false,
            };
        }

        let passages: Vec<String> = candidates
            .iter()
            .map(|candidate| candidate.chunk.text.clone())
            .collect();

        let scores = match timeout(self.call_timeout, self.provider.score(query, &passages)).await
        {
            Ok(Ok(scores)) if scores.len() == passages.len() => scores,
            Ok(Ok(scores)) => {
                warn!(
                    expected = passages.len(),
                    actual = scores.len(),
                    "rerank provider returned misaligned scores, keeping fused order"
                );
                return fallback(candidates, top_n);
            }
            Ok(Err(error)) => {
                warn!(%error, "rerank provider failed, keeping fused order");
                return fallback(candidates, top_n);
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "rerank provider timed out, keeping fused order"
                );
                return fallback(candidates, top_n);
            }
        };

        let mut reranked: Vec<ScoredChunk> = candidates
            .into_iter()
            .zip(scores)
            .map(|(candidate, score)| ScoredChunk {
                chunk: candidate.chunk,
                score: f64::from(score),
            })
            .collect();

        reranked.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.chunk.id.cmp(&right.chunk.id))
        });
        reranked.truncate(top_n);

        RerankOutcome {
            chunks: reranked,
            fell_back: false,
        }
    }
}

fn fallback(mut candidates: Vec<ScoredChunk>, top_n: usize) -> RerankOutcome {
    candidates.truncate(top_n);
    RerankOutcome {
        chunks: candidates,
        fell_back: true,
    }
}

/// Local deterministic relevance model: the fraction of distinct query
/// terms present in each passage. A weak cross-encoder stand-in that
/// keeps the full pipeline runnable offline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TermOverlapRerank;

#[async_trait]
impl RerankProvider for TermOverlapRerank {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, SearchError> {
        let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
        if query_terms.is_empty() {
            return Ok(vec![0.0; passages.len()]);
        }

        Ok(passages
            .iter()
            .map(|passage| {
                let passage_terms: HashSet<String> = tokenize(passage).into_iter().collect();
                let shared = query_terms.intersection(&passage_terms).count();
                shared as f32 / query_terms.len() as f32
            })
            .collect())
    }
}
