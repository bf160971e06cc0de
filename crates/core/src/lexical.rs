use crate::models::Chunk;
use std::collections::HashMap;
use tokio::sync::RwLock;

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

struct IndexedChunk {
    term_frequencies: HashMap<String, usize>,
    token_count: usize,
    insertion_order: usize,
}

#[derive(Default)]
struct IndexState {
    chunks: HashMap<String, IndexedChunk>,
    chunk_frequencies: HashMap<String, usize>,
    total_tokens: usize,
    next_insertion: usize,
}

/// Incremental in-memory BM25 index over chunk text. Single-chunk adds
/// and replacements never trigger a full re-index. Ties in score are
/// broken by insertion order, earlier wins, for determinism.
#[derive(Default)]
pub struct LexicalIndex {
    state: RwLock<IndexState>,
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a chunk, or replaces it in place if the id is already
    /// indexed. Replacement keeps the original insertion order so
    /// tie-breaking stays stable across updates.
    pub async fn index_chunk(&self, chunk: &Chunk) {
        let tokens = tokenize(&chunk.text);
        let mut term_frequencies: HashMap<String, usize> = HashMap::new();
        for token in &tokens {
            *term_frequencies.entry(token.clone()).or_insert(0) += 1;
        }

        let mut state = self.state.write().await;

        let insertion_order = match state.chunks.remove(&chunk.id) {
            Some(previous) => {
                for term in previous.term_frequencies.keys() {
                    let emptied = match state.chunk_frequencies.get_mut(term) {
                        Some(count) => {
                            *count -= 1;
                            *count == 0
                        }
                        None => false,
                    };
                    if emptied {
                        state.chunk_frequencies.remove(term);
                    }
                }
                state.total_tokens -= previous.token_count;
                previous.insertion_order
            }
            None => {
                let order = state.next_insertion;
                state.next_insertion += 1;
                order
            }
        };

        for term in term_frequencies.keys() {
            *state.chunk_frequencies.entry(term.clone()).or_insert(0) += 1;
        }
        state.total_tokens += tokens.len();
        state.chunks.insert(
            chunk.id.clone(),
            IndexedChunk {
                term_frequencies,
                token_count: tokens.len(),
                insertion_order,
            },
        );
    }

    /// Scores every indexed chunk against the query terms and returns
    /// the top `k` as `(chunk_id, score)` pairs, highest first. Empty
    /// query or empty index yields an empty vec, never an error.
    pub async fn search(&self, query: &str, k: usize) -> Vec<(String, f64)> {
        let terms = tokenize(query);
        if terms.is_empty() || k == 0 {
            return Vec::new();
        }

        let state = self.state.read().await;
        if state.chunks.is_empty() {
            return Vec::new();
        }

        let chunk_count = state.chunks.len() as f64;
        let average_length = state.total_tokens as f64 / chunk_count;

        let mut scored: Vec<(String, f64, usize)> = Vec::new();
        for (chunk_id, indexed) in &state.chunks {
            let mut score = 0.0;
            for term in &terms {
                let tf = indexed.term_frequencies.get(term).copied().unwrap_or(0) as f64;
                if tf == 0.0 {
                    continue;
                }
                let df = state.chunk_frequencies.get(term).copied().unwrap_or(0) as f64;
                let idf = ((chunk_count - df + 0.5) / (df + 0.5) + 1.0).ln();
                let length_norm =
                    1.0 - BM25_B + BM25_B * indexed.token_count as f64 / average_length.max(1.0);
                score += idf * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * length_norm);
            }
            if score > 0.0 {
                scored.push((chunk_id.clone(), score, indexed.insertion_order));
            }
        }

        scored.sort_by(|left, right| {
            right
                .1
                .total_cmp(&left.1)
                .then_with(|| left.2.cmp(&right.2))
        });
        scored.truncate(k);
        scored.into_iter().map(|(id, score, _)| (id, score)).collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.chunks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.chunks.is_empty()
    }
}
