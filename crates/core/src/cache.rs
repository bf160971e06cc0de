use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Deterministic cache key over (text, model). Embeddings for the same
/// text and model are identical, so entries never go stale.
pub fn cache_key(text: &str, model_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Vec<f32>>,
    insertion_order: VecDeque<String>,
}

/// Shared embedding memo, injected into the pipeline rather than held
/// as a process-wide singleton. Safe under concurrent reads and writes;
/// inserts are idempotent (last-writer-wins on identical content), so
/// redundant in-flight provider calls for the same key cannot corrupt
/// it. Size-bounded with FIFO eviction.
pub struct EmbeddingCache {
    max_entries: usize,
    state: RwLock<CacheState>,
}

impl EmbeddingCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            state: RwLock::new(CacheState::default()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Vec<f32>> {
        self.state.read().await.entries.get(key).cloned()
    }

    pub async fn insert(&self, key: String, vector: Vec<f32>) {
        let mut state = self.state.write().await;

        if state.entries.insert(key.clone(), vector).is_none() {
            state.insertion_order.push_back(key);
        }

        while state.entries.len() > self.max_entries {
            if let Some(oldest) = state.insertion_order.pop_front() {
                state.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }
}
