pub mod memory;
pub mod qdrant;

pub use memory::MemoryVectorStore;
pub use qdrant::QdrantStore;
