use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IngestError {
    /// Transient failures are retried with backoff by the orchestrator;
    /// configuration and contract violations fail immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::EmbeddingProvider(_) | IngestError::Storage(_) | IngestError::Http(_)
        )
    }
}

impl From<SearchError> for IngestError {
    fn from(value: SearchError) -> Self {
        match value {
            SearchError::InvalidConfig(details) => IngestError::InvalidConfig(details),
            SearchError::DimensionMismatch { expected, actual } => {
                IngestError::DimensionMismatch { expected, actual }
            }
            SearchError::Http(error) => IngestError::Http(error),
            SearchError::Serialization(error) => IngestError::Serialization(error),
            other => IngestError::EmbeddingProvider(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("rerank provider error: {0}")]
    RerankProvider(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("no chunks have been indexed yet")]
    EmptyIndex,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = SearchError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_mismatch_is_not_retryable() {
        let error = IngestError::DimensionMismatch {
            expected: 128,
            actual: 256,
        };
        assert!(!error.is_retryable());
        assert!(IngestError::EmbeddingProvider("timeout".to_string()).is_retryable());
    }

    #[test]
    fn search_errors_map_onto_ingest_taxonomy() {
        let mapped = IngestError::from(SearchError::DimensionMismatch {
            expected: 128,
            actual: 64,
        });
        assert!(matches!(
            mapped,
            IngestError::DimensionMismatch {
                expected: 128,
                actual: 64
            }
        ));

        let mapped = IngestError::from(SearchError::EmbeddingProvider("503".to_string()));
        assert!(mapped.is_retryable());
    }
}
