pub mod cache;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod lexical;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod rerank;
pub mod retriever;
pub mod stores;
pub mod traits;

pub use cache::{cache_key, EmbeddingCache};
pub use chunking::{normalize_whitespace, split_document, split_text, ChunkingConfig};
pub use embeddings::{
    CachedEmbedder, EmbeddingProvider, HashedNgramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IngestError, SearchError};
pub use lexical::LexicalIndex;
pub use models::{
    Chunk, Document, Metadata, MetadataFilter, RetrievalCandidate, ScoredChunk,
};
pub use orchestrator::{IngestFailure, IngestReport, IngestState, PipelineConfig, RetrievalPipeline};
pub use providers::{CohereRerank, OpenAiCompatEmbeddings};
pub use rerank::{RerankOutcome, Reranker, TermOverlapRerank};
pub use retriever::{HybridRetriever, RetrievalWeights};
pub use stores::{MemoryVectorStore, QdrantStore};
pub use traits::{RerankProvider, VectorStore};
